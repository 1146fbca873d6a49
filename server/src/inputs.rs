//! Input aggregation and acknowledgement tracking.

use std::sync::Arc;
use std::time::Instant;

use log::debug;

use shared::messages::{InputAck, InputPayload, PlayerInputAckPayload, QualityDataPayload, ServerPayload};

use crate::error::ServerError;
use crate::game_match::MatchState;
use crate::network::Server;
use crate::player::PlayerInfo;

impl Server {
    /// Handles an `Input` run: record the frames (first write wins), stamp
    /// the client's progress and acknowledge the highest frame received.
    pub(crate) async fn handle_input(
        &self,
        game: &Arc<MatchState>,
        player: &Arc<PlayerInfo>,
        payload: InputPayload,
    ) -> Result<(), ServerError> {
        {
            let mut net = player.net.write();
            net.last_client_frame = net.last_client_frame.max(payload.client_frame);
            net.rift.note_client_frame();
            net.last_input_time = Instant::now();
            net.disconnected = false;
        }

        let index = player.player_index as usize;
        game.store_checksums(index, payload.start_frame, &payload.checksum_per_frame);
        let Some(ack_frame) = game.store_inputs(index, payload.start_frame, &payload.input_per_frame)
        else {
            return Ok(());
        };

        self.send_to_player(game, player, ServerPayload::InputAck(InputAck { ack_frame }))
            .await?;
        Ok(())
    }

    /// Handles a `PlayerInputAck`: raise this client's per-peer ack
    /// frontiers and, if the echoed sequence matches a pending probe, turn it
    /// into an RTT sample.
    pub(crate) fn handle_input_ack(&self, player: &Arc<PlayerInfo>, payload: PlayerInputAckPayload) {
        raise_ack_frontiers(&mut player.net.write().ack_frontier, &payload.ack_frame);
        self.record_rtt(player, payload.server_sequence);
    }

    /// A `QualityData` reply carries only the echoed probe sequence.
    pub(crate) fn handle_quality_data(&self, player: &Arc<PlayerInfo>, payload: QualityDataPayload) {
        self.record_rtt(player, payload.server_sequence);
    }

    fn record_rtt(&self, player: &Arc<PlayerInfo>, server_sequence: u32) {
        let Some(sent_at) = player.pending_pings.find(&server_sequence) else {
            return;
        };
        player.pending_pings.erase(&server_sequence);
        let sample_ms = sent_at.elapsed().as_secs_f32() * 1000.0;
        debug!(
            "player {}: rtt sample {:.1} ms (seq {})",
            player.player_index, sample_ms, server_sequence
        );
        player.net.write().rift.record_rtt_sample(sample_ms);
    }
}

/// Raises each frontier to the acked frame plus one, never lowering it.
/// An acked frame of 0 on the wire means the peer has received nothing.
fn raise_ack_frontiers(frontiers: &mut [u32], acked_frames: &[u32]) {
    for (frontier, &acked) in frontiers.iter_mut().zip(acked_frames) {
        if acked != 0 && acked + 1 > *frontier {
            *frontier = acked + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontiers_only_move_forward() {
        let mut frontiers = vec![0u32, 0];
        raise_ack_frontiers(&mut frontiers, &[10, 3]);
        assert_eq!(frontiers, vec![11, 4]);

        // A stale (lower) ack must not regress the frontier.
        raise_ack_frontiers(&mut frontiers, &[7, 3]);
        assert_eq!(frontiers, vec![11, 4]);

        raise_ack_frontiers(&mut frontiers, &[12, 0]);
        assert_eq!(frontiers, vec![13, 4]);
    }

    #[test]
    fn zero_ack_means_nothing_received() {
        let mut frontiers = vec![0u32, 0];
        raise_ack_frontiers(&mut frontiers, &[0, 0]);
        assert_eq!(frontiers, vec![0, 0]);
    }

    #[test]
    fn extra_ack_entries_are_ignored() {
        let mut frontiers = vec![0u32];
        raise_ack_frontiers(&mut frontiers, &[5, 9, 9]);
        assert_eq!(frontiers, vec![6]);
    }
}
