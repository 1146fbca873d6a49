//! # Shared Wire Protocol
//!
//! Everything both ends of a match connection must agree on: the
//! zero-suppression packet compression, the typed client/server message model
//! and the bit-exact wire codec. The server crate builds on this; a match
//! client links the same definitions.
//!
//! All multi-byte integers on the wire are little-endian. Every payload is
//! prefixed by a five-byte header (`type:u8 || sequence:u32`) and the whole
//! datagram is run through the zero-suppression codec before hitting the
//! socket.

pub mod codec;
pub mod compression;
pub mod messages;

mod error;

pub use compression::MAX_PACKET_SIZE;
pub use error::ProtocolError;
