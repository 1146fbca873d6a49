//! Per-connection player state.
//!
//! Identity (remote address, slot, match id) is fixed for the life of the
//! connection. Everything the dispatcher and the tick loop both touch lives
//! behind the player's own lock; the inner maps are [`SharedMap`]s so either
//! side can take cheap snapshots.

use std::net::SocketAddr;
use std::time::Instant;

use parking_lot::RwLock;

use crate::rift::RiftTracker;
use crate::sync_map::SharedMap;

/// Frames of recent history considered when estimating packet loss.
pub const LOSS_WINDOW_FRAMES: u32 = 256;

/// One connected client within a match.
pub struct PlayerInfo {
    /// Remote endpoint; doubles as the global registry key.
    pub addr: SocketAddr,
    /// Slot in the match, stable for the connection's life.
    pub player_index: u8,
    /// Players hold only the key back to their match, never a handle.
    pub match_id: String,
    /// Mutable networking state, guarded by the player's own lock.
    pub net: RwLock<PlayerNetState>,
    /// Outstanding RTT probes: server sequence → send time.
    pub pending_pings: SharedMap<u32, Instant>,
    /// Frames we had to zero-fill for this recipient: frame → occurrences.
    pub missed_inputs: SharedMap<u32, u32>,
}

pub struct PlayerNetState {
    /// Highest client sequence observed. Advisory only.
    pub last_seq_recv: u32,
    /// Sequence of the last datagram sent to this player.
    pub last_seq_sent: u32,
    /// Per peer: the next frame this client still needs (highest acked + 1).
    /// Monotonically non-decreasing.
    pub ack_frontier: Vec<u32>,
    /// Most recent `client_frame` the client reported.
    pub last_client_frame: u32,
    /// Steady-clock stamp of the last accepted `Input`; drives the timeout.
    pub last_input_time: Instant,
    pub ready: bool,
    pub disconnected: bool,
    /// Set once the client delivered its `MatchResult`.
    pub finished: bool,
    pub rift: RiftTracker,
}

impl PlayerInfo {
    pub fn new(addr: SocketAddr, player_index: u8, match_id: String, max_players: usize) -> Self {
        Self {
            addr,
            player_index,
            match_id,
            net: RwLock::new(PlayerNetState {
                last_seq_recv: 0,
                last_seq_sent: 0,
                ack_frontier: vec![0; max_players],
                last_client_frame: 0,
                last_input_time: Instant::now(),
                ready: false,
                disconnected: false,
                finished: false,
                rift: RiftTracker::new(),
            }),
            pending_pings: SharedMap::new(),
            missed_inputs: SharedMap::new(),
        }
    }

    /// Records that `frame` had to be zero-filled in a broadcast to this
    /// player.
    pub fn record_missed_input(&self, frame: u32) {
        let count = self.missed_inputs.find(&frame).unwrap_or(0);
        self.missed_inputs.insert_or_assign(frame, count + 1);
    }

    /// Rough packet-loss estimate: the share of recent frames that needed
    /// zero-filling, over a sliding window ending at `current_frame`.
    /// Entries that fall out of the window are pruned here.
    pub fn loss_percent(&self, current_frame: u32) -> i16 {
        let cutoff = current_frame.saturating_sub(LOSS_WINDOW_FRAMES);
        let mut stale = Vec::new();
        let mut missed: u32 = 0;
        self.missed_inputs.for_each_read(|&frame, _| {
            if frame < cutoff {
                stale.push(frame);
            } else {
                missed += 1;
            }
        });
        for frame in stale {
            self.missed_inputs.erase(&frame);
        }
        (missed * 100 / LOSS_WINDOW_FRAMES).min(100) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_player() -> PlayerInfo {
        PlayerInfo::new("127.0.0.1:9000".parse().unwrap(), 0, "M1".into(), 2)
    }

    #[test]
    fn new_player_starts_unready() {
        let player = test_player();
        let net = player.net.read();
        assert!(!net.ready);
        assert!(!net.disconnected);
        assert_eq!(net.ack_frontier, vec![0, 0]);
        assert_eq!(net.last_client_frame, 0);
    }

    #[test]
    fn loss_percent_counts_recent_misses_only() {
        let player = test_player();
        assert_eq!(player.loss_percent(100), 0);

        for frame in 0..64 {
            player.record_missed_input(frame);
        }
        // All 64 misses are inside the window at frame 100.
        assert_eq!(player.loss_percent(100), (64 * 100 / LOSS_WINDOW_FRAMES) as i16);

        // Far later, everything has aged out and been pruned.
        assert_eq!(player.loss_percent(10_000), 0);
        assert!(player.missed_inputs.is_empty());
    }

    #[test]
    fn repeated_misses_overwrite_not_grow() {
        let player = test_player();
        player.record_missed_input(5);
        player.record_missed_input(5);
        assert_eq!(player.missed_inputs.len(), 1);
        assert_eq!(player.missed_inputs.find(&5), Some(2));
    }
}
