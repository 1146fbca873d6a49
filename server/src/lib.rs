//! # Rollback Match Server
//!
//! Authoritative server for deterministic, rollback-netcode matches. Clients
//! send their per-frame inputs over UDP; the server aggregates them into a
//! combined per-frame broadcast, paced by a fixed 60 Hz tick loop, while
//! continuously estimating each client's round-trip time and clock drift
//! (*rift*) against the authoritative frame counter.
//!
//! ## Structure
//!
//! - [`network`] — the UDP receive loop, message routing and the send path
//! - [`handshake`] — connection validation, slot assignment, the
//!   ping-calibration phase and match start gating
//! - [`inputs`] — the per-frame input record and acknowledgement frontiers
//! - [`rift`] — EWMA smoothing of RTT samples and clock-drift estimation
//! - [`tick`] — the fixed-rate broadcast loop driving each match to its end
//! - [`provisioning`] — the external HTTP service that owns match configs
//! - [`sync_map`] — the multi-reader/single-writer map both registries use
//!
//! A match lives entirely in memory: it is created lazily by the first valid
//! handshake and torn down when its duration expires or its last player
//! leaves.

pub mod error;
pub mod game_match;
pub mod handshake;
pub mod inputs;
pub mod network;
pub mod player;
pub mod provisioning;
pub mod rift;
pub mod sync_map;
pub mod tick;

pub use error::ServerError;
pub use network::{Server, ServerConfig};
pub use provisioning::{
    HttpProvisioner, MatchConfig, MatchProvisioner, PlayerSlot, StaticProvisioner,
    DEFAULT_MATCH_DURATION,
};
