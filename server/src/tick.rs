//! Fixed-rate tick engine: one task per match.
//!
//! Each iteration re-evaluates rift estimates, assembles one `PlayerInput`
//! broadcast per recipient, detects timeouts and advances the authoritative
//! frame counter. Scheduling is absolute: the loop sleeps to the next
//! multiple of the tick interval from match start, so lag in one iteration
//! does not accumulate.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use shared::messages::{PlayerDisconnected, PlayerInputBroadcast, ServerPayload};

use crate::game_match::{MatchState, INPUT_HISTORY_PRUNE_INTERVAL};
use crate::network::Server;
use crate::player::PlayerInfo;

/// Frames a single `PlayerInput` carries per peer, at most.
pub const MAX_FRAMES_PER_MESSAGE: u32 = 8;
/// A player silent this long is considered gone.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Unanswered RTT probes older than this are evicted and count as lost.
pub const PENDING_PING_EXPIRY: Duration = Duration::from_secs(2);

/// What one peer's block of a `PlayerInput` message will carry.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PeerSelection {
    pub start_frame: u32,
    pub inputs: Vec<u32>,
    /// Frames inside the run that had no recorded input and went out as 0.
    pub zero_filled: Vec<u32>,
}

/// Picks the run of frames to relay for one peer: everything past the
/// recipient's ack frontier, capped at [`MAX_FRAMES_PER_MESSAGE`], gaps
/// zero-filled.
pub(crate) fn select_peer_frames(
    next_needed: u32,
    history: &HashMap<u32, u32>,
    cap: u32,
) -> PeerSelection {
    let available_max = history.keys().copied().max();
    let count = match available_max {
        Some(max) if max >= next_needed => (max - next_needed + 1).min(cap),
        _ => 0,
    };

    let mut inputs = Vec::with_capacity(count as usize);
    let mut zero_filled = Vec::new();
    for frame in next_needed..next_needed + count {
        match history.get(&frame) {
            Some(&word) => inputs.push(word),
            None => {
                inputs.push(0);
                zero_filled.push(frame);
            }
        }
    }
    PeerSelection {
        start_frame: next_needed,
        inputs,
        zero_filled,
    }
}

/// The run to emit for a peer that stopped producing input: zeros from the
/// recipient's frontier up to the server's current frame, cap applied, so the
/// rest of the match keeps advancing without the gone player.
pub(crate) fn select_disconnected_frames(
    next_needed: u32,
    current_frame: u32,
    cap: u32,
) -> PeerSelection {
    let count = if current_frame >= next_needed {
        (current_frame - next_needed + 1).min(cap)
    } else {
        0
    };
    PeerSelection {
        start_frame: next_needed,
        inputs: vec![0; count as usize],
        zero_filled: (next_needed..next_needed + count).collect(),
    }
}

impl Server {
    pub(crate) fn spawn_tick_loop(server: &Arc<Server>, game: Arc<MatchState>) {
        let server = Arc::clone(server);
        tokio::spawn(async move {
            server.run_tick_loop(game).await;
        });
    }

    async fn run_tick_loop(&self, game: Arc<MatchState>) {
        let interval = Duration::from_secs_f32(game.tick_interval_ms / 1000.0);
        let started = tokio::time::Instant::now();
        let mut iteration: u32 = 0;
        info!("match {}: tick loop started", game.match_id);

        while self.is_running() && game.tick_running.load(Ordering::SeqCst) {
            let frame = game.current_frame.load(Ordering::SeqCst);
            if frame >= game.duration_in_frames {
                info!("match {}: duration reached at frame {}", game.match_id, frame);
                self.finish_match(&game).await;
                return;
            }

            self.tick(&game, frame).await;

            if self.all_players_disconnected(&game) {
                info!("match {}: all players disconnected", game.match_id);
                self.finish_match(&game).await;
                return;
            }

            game.current_frame.store(frame + 1, Ordering::SeqCst);
            if (frame + 1) % INPUT_HISTORY_PRUNE_INTERVAL == 0 {
                game.prune_input_history();
            }

            iteration += 1;
            tokio::time::sleep_until(started + interval * iteration).await;
        }
        game.tick_running.store(false, Ordering::SeqCst);
        info!("match {}: tick loop stopped", game.match_id);
    }

    async fn tick(&self, game: &Arc<MatchState>, frame: u32) {
        let now = Instant::now();
        let players = game.players.snapshot();

        for (_, player) in &players {
            let timed_out = {
                let mut net = player.net.write();
                if !net.disconnected
                    && now.duration_since(net.last_input_time) > DISCONNECT_TIMEOUT
                {
                    net.disconnected = true;
                    true
                } else {
                    false
                }
            };
            if timed_out {
                warn!(
                    "match {}: player {} timed out",
                    game.match_id, player.player_index
                );
                self.broadcast_player_disconnected(game, &players, player, frame)
                    .await;
                continue;
            }
            {
                let mut net = player.net.write();
                if net.disconnected {
                    continue;
                }
                let last_client_frame = net.last_client_frame;
                net.rift.evaluate(frame, last_client_frame, game.tick_interval_ms);
            }
            self.expire_pending_pings(player, now, frame);
        }

        for (_, recipient) in &players {
            if recipient.net.read().disconnected {
                continue;
            }
            let broadcast = self.build_player_input(game, &players, recipient, frame);
            match self
                .send_to_player(game, recipient, ServerPayload::PlayerInput(broadcast))
                .await
            {
                // Every broadcast doubles as an RTT probe; the client echoes
                // the sequence in its PlayerInputAck.
                Ok(0) => {}
                Ok(sequence) => recipient.pending_pings.insert_or_assign(sequence, now),
                Err(e) => warn!(
                    "match {}: send to player {} failed, will retry next tick: {}",
                    game.match_id, recipient.player_index, e
                ),
            }
        }
    }

    fn build_player_input(
        &self,
        game: &Arc<MatchState>,
        players: &HashMap<String, Arc<PlayerInfo>>,
        recipient: &Arc<PlayerInfo>,
        frame: u32,
    ) -> PlayerInputBroadcast {
        let slots = game.max_players as usize;
        let mut start_frame = vec![0u32; slots];
        let mut num_frames = vec![0u8; slots];
        let mut input_per_frame = vec![Vec::new(); slots];
        let mut zeroed: u16 = 0;

        let (frontiers, ping, rift) = {
            let net = recipient.net.read();
            (net.ack_frontier.clone(), net.rift.ping_ms(), net.rift.rift())
        };

        for (_, peer) in players {
            let index = peer.player_index as usize;
            if index >= slots {
                continue;
            }
            let next_needed = frontiers.get(index).copied().unwrap_or(0);
            let selection = if peer.net.read().disconnected {
                select_disconnected_frames(next_needed, frame, MAX_FRAMES_PER_MESSAGE)
            } else {
                let history = game.input_history(index);
                let selection =
                    select_peer_frames(next_needed, &history, MAX_FRAMES_PER_MESSAGE);
                // Gaps in a live peer's history count toward the loss
                // estimate; a gone peer's zeros do not.
                for &missing in &selection.zero_filled {
                    recipient.record_missed_input(missing);
                }
                selection
            };
            start_frame[index] = selection.start_frame;
            num_frames[index] = selection.inputs.len() as u8;
            zeroed += selection.zero_filled.len() as u16;
            input_per_frame[index] = selection.inputs;
        }

        PlayerInputBroadcast {
            num_players: game.max_players,
            start_frame,
            num_frames,
            num_predicted_overrides: 0,
            num_zeroed_overrides: zeroed,
            ping,
            packets_loss_percent: recipient.loss_percent(frame),
            rift,
            checksum_ack_frame: game.checksum_ack_frame(),
            input_per_frame,
        }
    }

    async fn broadcast_player_disconnected(
        &self,
        game: &Arc<MatchState>,
        players: &HashMap<String, Arc<PlayerInfo>>,
        gone: &Arc<PlayerInfo>,
        frame: u32,
    ) {
        let notice = PlayerDisconnected {
            player_index: gone.player_index,
            should_ai_take_control: 1,
            ai_take_control_frame: frame,
            array_index: 0,
        };
        for (_, player) in players {
            if Arc::ptr_eq(player, gone) || player.net.read().disconnected {
                continue;
            }
            if let Err(e) = self
                .send_to_player(game, player, ServerPayload::PlayerDisconnected(notice))
                .await
            {
                warn!(
                    "match {}: disconnect notice to player {} failed: {}",
                    game.match_id, player.player_index, e
                );
            }
        }
    }

    fn expire_pending_pings(&self, player: &Arc<PlayerInfo>, now: Instant, frame: u32) {
        let mut expired: Vec<u32> = Vec::new();
        player.pending_pings.for_each_read(|&sequence, &sent_at| {
            if now.duration_since(sent_at) > PENDING_PING_EXPIRY {
                expired.push(sequence);
            }
        });
        for sequence in &expired {
            player.pending_pings.erase(sequence);
            player.record_missed_input(frame);
        }
        if !expired.is_empty() {
            debug!(
                "player {}: {} probes expired unanswered",
                player.player_index,
                expired.len()
            );
        }
    }

    fn all_players_disconnected(&self, game: &Arc<MatchState>) -> bool {
        if game.players.is_empty() {
            return false;
        }
        let mut any_connected = false;
        game.players.for_each_read(|_, player| {
            if !player.net.read().disconnected {
                any_connected = true;
            }
        });
        !any_connected
    }

    /// Ends the match: reports to the external service and tears down every
    /// registry entry before the handles drop.
    async fn finish_match(&self, game: &Arc<MatchState>) {
        game.tick_running.store(false, Ordering::SeqCst);
        self.provisioner
            .report_match_end(&game.match_id, &game.key)
            .await;
        let keys: Vec<String> = game.players.snapshot().into_keys().collect();
        for key in &keys {
            self.players.erase(key);
        }
        game.players.clear();
        game.clear_histories();
        self.matches.erase(&game.match_id);
        info!("match {} cleaned up", game.match_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(pairs: &[(u32, u32)]) -> HashMap<u32, u32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn empty_history_selects_nothing() {
        let selection = select_peer_frames(0, &HashMap::new(), MAX_FRAMES_PER_MESSAGE);
        assert_eq!(selection.start_frame, 0);
        assert!(selection.inputs.is_empty());
        assert!(selection.zero_filled.is_empty());
    }

    #[test]
    fn selects_from_the_frontier() {
        let history = history(&[(0, 0xAA), (1, 0xBB), (2, 0xCC), (3, 0xDD)]);
        let selection = select_peer_frames(0, &history, MAX_FRAMES_PER_MESSAGE);
        assert_eq!(selection.start_frame, 0);
        assert_eq!(selection.inputs, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(selection.zero_filled.is_empty());

        let selection = select_peer_frames(2, &history, MAX_FRAMES_PER_MESSAGE);
        assert_eq!(selection.start_frame, 2);
        assert_eq!(selection.inputs, vec![0xCC, 0xDD]);
    }

    #[test]
    fn cap_bounds_the_run() {
        let pairs: Vec<(u32, u32)> = (0..20).map(|f| (f, f * 10)).collect();
        let selection = select_peer_frames(0, &history(&pairs), MAX_FRAMES_PER_MESSAGE);
        assert_eq!(selection.inputs.len(), MAX_FRAMES_PER_MESSAGE as usize);
        assert_eq!(selection.inputs[7], 70);
    }

    #[test]
    fn gaps_are_zero_filled_and_reported() {
        let history = history(&[(5, 0x11), (8, 0x22)]);
        let selection = select_peer_frames(5, &history, MAX_FRAMES_PER_MESSAGE);
        assert_eq!(selection.start_frame, 5);
        assert_eq!(selection.inputs, vec![0x11, 0, 0, 0x22]);
        assert_eq!(selection.zero_filled, vec![6, 7]);
    }

    #[test]
    fn fully_acked_history_selects_nothing() {
        let history = history(&[(0, 1), (1, 2)]);
        let selection = select_peer_frames(2, &history, MAX_FRAMES_PER_MESSAGE);
        assert!(selection.inputs.is_empty());
        assert_eq!(selection.start_frame, 2);
    }

    #[test]
    fn disconnected_peer_is_zero_filled_to_the_current_frame() {
        let selection = select_disconnected_frames(10, 13, MAX_FRAMES_PER_MESSAGE);
        assert_eq!(selection.start_frame, 10);
        assert_eq!(selection.inputs, vec![0, 0, 0, 0]);
        assert_eq!(selection.zero_filled, vec![10, 11, 12, 13]);
    }

    #[test]
    fn disconnected_zero_fill_respects_the_cap() {
        let selection = select_disconnected_frames(0, 100, MAX_FRAMES_PER_MESSAGE);
        assert_eq!(selection.inputs.len(), MAX_FRAMES_PER_MESSAGE as usize);
        assert!(selection.inputs.iter().all(|&w| w == 0));
        assert_eq!(selection.zero_filled.len(), MAX_FRAMES_PER_MESSAGE as usize);
    }

    #[test]
    fn disconnected_peer_ahead_of_the_frame_emits_nothing() {
        let selection = select_disconnected_frames(20, 13, MAX_FRAMES_PER_MESSAGE);
        assert!(selection.inputs.is_empty());
        assert!(selection.zero_filled.is_empty());
        assert_eq!(selection.start_frame, 20);
    }
}
