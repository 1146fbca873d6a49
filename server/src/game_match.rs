//! Per-match authoritative state: the input record, checksum frontiers and
//! the counters the tick loop and dispatcher share.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::player::PlayerInfo;
use crate::sync_map::SharedMap;

/// Nominal frame period at the fixed 60 Hz target.
pub const TICK_INTERVAL_MS: f32 = 1000.0 / 60.0;
/// Input history is pruned every this many frames...
pub const INPUT_HISTORY_PRUNE_INTERVAL: u32 = 200;
/// ...down to this many most recent entries per player.
pub const INPUT_HISTORY_KEEP: usize = 150;

pub struct MatchState {
    pub match_id: String,
    /// Pre-shared credential clients present and end-of-match reporting echoes.
    pub key: String,
    pub max_players: u8,
    pub duration_in_frames: u32,
    pub tick_interval_ms: f32,
    /// Players of this match, keyed like the global registry (`"ip:port"`).
    pub players: SharedMap<String, Arc<PlayerInfo>>,
    /// Authoritative per-player input record: frame → 32-bit input word.
    inputs: Vec<SharedMap<u32, u32>>,
    /// Per-player frame checksums as reported by the client.
    checksums: Vec<SharedMap<u32, u32>>,
    /// Per-player count of consecutive checksummed frames starting at 0.
    checksum_frontier: Vec<AtomicU32>,
    /// Authoritative frame counter. Advanced only by the tick loop.
    pub current_frame: AtomicU32,
    sequence_counter: AtomicU32,
    pub ping_phase_count: AtomicU32,
    pub ping_phase_total: u32,
    pub tick_running: AtomicBool,
}

impl MatchState {
    pub fn new(
        match_id: String,
        key: String,
        max_players: u8,
        duration_in_frames: u32,
        ping_phase_total: u32,
    ) -> Self {
        let slots = max_players as usize;
        Self {
            match_id,
            key,
            max_players,
            duration_in_frames,
            tick_interval_ms: TICK_INTERVAL_MS,
            players: SharedMap::new(),
            inputs: (0..slots).map(|_| SharedMap::new()).collect(),
            checksums: (0..slots).map(|_| SharedMap::new()).collect(),
            checksum_frontier: (0..slots).map(|_| AtomicU32::new(0)).collect(),
            current_frame: AtomicU32::new(0),
            sequence_counter: AtomicU32::new(0),
            ping_phase_count: AtomicU32::new(0),
            ping_phase_total,
            tick_running: AtomicBool::new(false),
        }
    }

    /// Hands out the next server sequence number. Strictly increasing,
    /// starting at 1, unique within the match.
    pub fn next_sequence(&self) -> u32 {
        self.sequence_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Stores a run of inputs for `player_index`, first write wins.
    ///
    /// Returns the highest frame of the run, the value to acknowledge.
    pub fn store_inputs(&self, player_index: usize, start_frame: u32, words: &[u32]) -> Option<u32> {
        if words.is_empty() {
            return None;
        }
        let history = self.inputs.get(player_index)?;
        for (i, &word) in words.iter().enumerate() {
            let frame = start_frame + i as u32;
            if !history.contains(&frame) {
                history.insert_or_assign(frame, word);
            }
        }
        Some(start_frame + words.len() as u32 - 1)
    }

    /// Stores frame checksums for `player_index` and advances that player's
    /// consecutive-checksum frontier.
    pub fn store_checksums(&self, player_index: usize, start_frame: u32, checksums: &[u32]) {
        let Some(map) = self.checksums.get(player_index) else {
            return;
        };
        for (i, &sum) in checksums.iter().enumerate() {
            let frame = start_frame + i as u32;
            if !map.contains(&frame) {
                map.insert_or_assign(frame, sum);
            }
        }
        let frontier = &self.checksum_frontier[player_index];
        let mut next = frontier.load(Ordering::SeqCst);
        while map.contains(&next) {
            next += 1;
        }
        frontier.store(next, Ordering::SeqCst);
    }

    /// Highest frame for which every player has delivered all checksums up
    /// to and including it; 0 while any player has none.
    pub fn checksum_ack_frame(&self) -> u32 {
        self.checksum_frontier
            .iter()
            .map(|f| f.load(Ordering::SeqCst))
            .min()
            .unwrap_or(0)
            .saturating_sub(1)
    }

    /// Snapshot of one player's input history.
    pub fn input_history(&self, player_index: usize) -> std::collections::HashMap<u32, u32> {
        self.inputs
            .get(player_index)
            .map(|m| m.snapshot())
            .unwrap_or_default()
    }

    pub fn ping_phase_complete(&self) -> bool {
        self.ping_phase_count.load(Ordering::SeqCst) >= self.ping_phase_total
    }

    /// Drops the oldest input history entries so a long match stays bounded.
    pub fn prune_input_history(&self) {
        for history in &self.inputs {
            if history.len() <= INPUT_HISTORY_KEEP {
                continue;
            }
            let mut frames: Vec<u32> = Vec::with_capacity(history.len());
            history.for_each_read(|&frame, _| frames.push(frame));
            frames.sort_unstable();
            for frame in &frames[..frames.len() - INPUT_HISTORY_KEEP] {
                history.erase(frame);
            }
        }
    }

    /// Clears all per-player input data at end of match.
    pub fn clear_histories(&self) {
        for history in &self.inputs {
            history.clear();
        }
        for map in &self.checksums {
            map.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_match() -> MatchState {
        MatchState::new("M1".into(), "K".into(), 2, 3600, 65)
    }

    #[test]
    fn sequences_are_strictly_increasing() {
        let game = test_match();
        let a = game.next_sequence();
        let b = game.next_sequence();
        let c = game.next_sequence();
        assert!(a < b && b < c);
        assert_eq!(a, 1);
    }

    #[test]
    fn store_inputs_acks_the_last_frame() {
        let game = test_match();
        let ack = game.store_inputs(0, 0, &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(ack, Some(3));
        assert_eq!(game.input_history(0).get(&2), Some(&0xCC));
    }

    #[test]
    fn first_write_wins() {
        let game = test_match();
        game.store_inputs(0, 10, &[1, 2, 3]);
        game.store_inputs(0, 10, &[7, 8, 9]);
        let history = game.input_history(0);
        assert_eq!(history.get(&10), Some(&1));
        assert_eq!(history.get(&11), Some(&2));
        assert_eq!(history.get(&12), Some(&3));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let game = test_match();
        game.store_inputs(1, 0, &[5, 6]);
        let before = game.input_history(1);
        game.store_inputs(1, 0, &[5, 6]);
        assert_eq!(game.input_history(1), before);
    }

    #[test]
    fn empty_input_run_has_nothing_to_ack() {
        let game = test_match();
        assert_eq!(game.store_inputs(0, 4, &[]), None);
    }

    #[test]
    fn checksum_frontier_requires_consecutive_frames() {
        let game = test_match();
        assert_eq!(game.checksum_ack_frame(), 0);

        game.store_checksums(0, 0, &[11, 22]);
        // Player 1 has nothing yet.
        assert_eq!(game.checksum_ack_frame(), 0);

        game.store_checksums(1, 0, &[33]);
        assert_eq!(game.checksum_ack_frame(), 0);

        game.store_checksums(1, 1, &[44]);
        assert_eq!(game.checksum_ack_frame(), 1);

        // A gap at frame 2 holds the frontier even after frame 3 arrives.
        game.store_checksums(0, 3, &[55]);
        game.store_checksums(1, 2, &[66]);
        game.store_checksums(1, 3, &[77]);
        assert_eq!(game.checksum_ack_frame(), 1);

        game.store_checksums(0, 2, &[88]);
        assert_eq!(game.checksum_ack_frame(), 3);
    }

    #[test]
    fn prune_keeps_the_most_recent_tail() {
        let game = test_match();
        let words: Vec<u32> = (0..200).collect();
        for (i, chunk) in words.chunks(50).enumerate() {
            game.store_inputs(0, i as u32 * 50, chunk);
        }
        game.prune_input_history();
        let history = game.input_history(0);
        assert_eq!(history.len(), INPUT_HISTORY_KEEP);
        assert!(!history.contains_key(&0));
        assert!(history.contains_key(&199));
    }
}
