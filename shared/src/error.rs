use thiserror::Error;

use crate::compression::MAX_PACKET_SIZE;

/// Errors produced while encoding, decoding or (de)compressing datagrams.
///
/// All of these are packet-scoped: the server logs them and drops the
/// offending datagram, it never tears down a match over one.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A payload ended before the fields its own counters promised.
    #[error("truncated packet")]
    TruncatedPacket,

    /// Compressing this payload would exceed [`MAX_PACKET_SIZE`] bytes.
    #[error("compressed payload would exceed {MAX_PACKET_SIZE} bytes")]
    CompressionOverflow,

    /// A length outside the `[0, 1024]` range the codec supports.
    #[error("payload length {0} out of range (max {MAX_PACKET_SIZE})")]
    LengthOutOfRange(usize),

    /// A header carried a type tag neither direction of the protocol defines.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// A field could not be read at the expected offset.
    #[error("malformed packet: {0}")]
    Malformed(#[from] std::io::Error),
}
