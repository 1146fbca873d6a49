use std::net::SocketAddr;

use thiserror::Error;

/// Server-side error kinds.
///
/// Packet-scoped variants (`Protocol`, `UnknownPlayer`, `UnknownMatch`) are
/// logged at the dispatch layer and the datagram dropped. `Socket` aborts the
/// process only at startup; transient send failures are logged and the next
/// tick retries.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Protocol(#[from] shared::ProtocolError),

    #[error("datagram from unknown player {0}")]
    UnknownPlayer(SocketAddr),

    #[error("unknown match {0}")]
    UnknownMatch(String),

    #[error("match provisioning failed: {0}")]
    MatchProvisioningFailed(String),

    #[error("player {0} timed out")]
    PlayerTimeout(u8),

    #[error("match duration reached")]
    DurationReached,

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
}
