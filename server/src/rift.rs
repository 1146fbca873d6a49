//! Smoothed round-trip and clock-drift estimation.
//!
//! Each player carries a [`RiftTracker`]. RTT samples arrive whenever an ack
//! matches a pending probe; the client-frame stamp arrives with every `Input`.
//! Once per tick, if both are fresh, the tracker re-estimates how far the
//! client's simulation clock sits from where the server expects it
//! (positive: client is ahead).

/// EWMA coefficient for ping smoothing.
pub const PING_ALPHA: f32 = 0.125;
/// EWMA coefficient for rift smoothing.
pub const RIFT_BETA: f32 = 0.1;
/// Rift is clamped to this many frames either way.
pub const MAX_RIFT: f32 = 15.0;
/// RTT samples are capped here before smoothing.
pub const MAX_PING_MS: f32 = 255.0;

#[derive(Debug, Clone)]
pub struct RiftTracker {
    smoothed_ping: f32,
    ping_init: bool,
    raw_ping: f32,
    has_new_ping: bool,
    has_new_frame: bool,
    smooth_rift: f32,
    rift: f32,
    rift_init: bool,
}

impl RiftTracker {
    pub fn new() -> Self {
        Self {
            smoothed_ping: 0.0,
            ping_init: false,
            raw_ping: 0.0,
            has_new_ping: false,
            has_new_frame: false,
            smooth_rift: 0.0,
            rift: 0.0,
            rift_init: false,
        }
    }

    /// Feeds one round-trip sample in milliseconds.
    ///
    /// The first sample initialises the filter; later samples blend in with
    /// weight [`PING_ALPHA`].
    pub fn record_rtt_sample(&mut self, sample_ms: f32) {
        if sample_ms < 0.0 {
            return;
        }
        let sample = sample_ms.min(MAX_PING_MS);
        if self.ping_init {
            self.smoothed_ping =
                ((1.0 - PING_ALPHA) * self.smoothed_ping + PING_ALPHA * sample).min(MAX_PING_MS);
        } else {
            self.smoothed_ping = sample;
            self.ping_init = true;
        }
        self.raw_ping = sample;
        self.has_new_ping = true;
    }

    /// Marks that a fresh `client_frame` stamp arrived since the last tick.
    pub fn note_client_frame(&mut self) {
        self.has_new_frame = true;
    }

    /// Re-estimates the rift if both a new ping and a new frame stamp are
    /// pending; otherwise a no-op. Consumes both freshness flags.
    pub fn evaluate(&mut self, current_frame: u32, last_client_frame: u32, tick_interval_ms: f32) {
        if !(self.has_new_ping && self.has_new_frame) {
            return;
        }

        // With one-way latency of half the RTT, the client should be running
        // about this far ahead of us for its inputs to land on time.
        let half_ping_frames = (self.smoothed_ping * 0.5) / tick_interval_ms;
        let expected = current_frame as f32 + half_ping_frames;
        let raw = (last_client_frame as f32 - expected).clamp(-MAX_RIFT, MAX_RIFT);

        if self.rift_init {
            self.smooth_rift = (1.0 - RIFT_BETA) * self.smooth_rift + RIFT_BETA * raw;
        } else {
            self.smooth_rift = raw;
            self.rift_init = true;
        }
        self.rift = self.smooth_rift.clamp(-MAX_RIFT, MAX_RIFT);

        self.has_new_ping = false;
        self.has_new_frame = false;
    }

    /// The published drift estimate, in frames.
    pub fn rift(&self) -> f32 {
        self.rift
    }

    pub fn smoothed_ping(&self) -> f32 {
        self.smoothed_ping
    }

    /// Smoothed ping rounded for the wire.
    pub fn ping_ms(&self) -> i16 {
        self.smoothed_ping.round() as i16
    }
}

impl Default for RiftTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const TICK_MS: f32 = 1000.0 / 60.0;

    #[test]
    fn first_sample_initialises_the_filter() {
        let mut tracker = RiftTracker::new();
        tracker.record_rtt_sample(120.0);
        assert_approx_eq!(tracker.smoothed_ping(), 120.0);
    }

    #[test]
    fn ewma_moves_bounded_by_alpha() {
        let mut tracker = RiftTracker::new();
        tracker.record_rtt_sample(100.0);
        let prior = tracker.smoothed_ping();
        tracker.record_rtt_sample(180.0);
        let delta = (tracker.smoothed_ping() - prior).abs();
        assert!(delta <= (180.0f32 - prior).abs() * PING_ALPHA + 1e-4);
        assert_approx_eq!(tracker.smoothed_ping(), 110.0);
    }

    #[test]
    fn rtt_samples_are_capped() {
        let mut tracker = RiftTracker::new();
        tracker.record_rtt_sample(4000.0);
        assert_approx_eq!(tracker.smoothed_ping(), MAX_PING_MS);
    }

    #[test]
    fn negative_samples_are_ignored() {
        let mut tracker = RiftTracker::new();
        tracker.record_rtt_sample(-5.0);
        assert_approx_eq!(tracker.smoothed_ping(), 0.0);
    }

    #[test]
    fn evaluate_needs_both_fresh_inputs() {
        let mut tracker = RiftTracker::new();
        tracker.record_rtt_sample(100.0);
        tracker.evaluate(100, 200, TICK_MS);
        assert_approx_eq!(tracker.rift(), 0.0);

        tracker.note_client_frame();
        tracker.evaluate(100, 200, TICK_MS);
        assert!(tracker.rift() != 0.0);
    }

    #[test]
    fn far_ahead_client_clamps_to_max_rift() {
        // smoothed ping 200ms at 60Hz -> client expected ~6 frames ahead;
        // raw drift of 94 frames clamps to the cap on the first sample.
        let mut tracker = RiftTracker::new();
        tracker.record_rtt_sample(200.0);
        tracker.note_client_frame();
        tracker.evaluate(100, 200, TICK_MS);
        assert_approx_eq!(tracker.rift(), MAX_RIFT);
        // Serialised as round(rift * 100) = 1500.
        assert_eq!((tracker.rift() * 100.0).round() as i16, 1500);
    }

    #[test]
    fn behind_client_yields_negative_rift() {
        let mut tracker = RiftTracker::new();
        tracker.record_rtt_sample(0.0);
        tracker.note_client_frame();
        tracker.evaluate(100, 97, TICK_MS);
        assert_approx_eq!(tracker.rift(), -3.0);
    }

    #[test]
    fn later_samples_blend_with_beta() {
        let mut tracker = RiftTracker::new();
        tracker.record_rtt_sample(0.0);
        tracker.note_client_frame();
        tracker.evaluate(100, 105, TICK_MS);
        assert_approx_eq!(tracker.rift(), 5.0);

        tracker.record_rtt_sample(0.0);
        tracker.note_client_frame();
        tracker.evaluate(200, 200, TICK_MS);
        // (1 - beta) * 5 + beta * 0
        assert_approx_eq!(tracker.rift(), 4.5);
    }

    #[test]
    fn flags_are_consumed_by_evaluate() {
        let mut tracker = RiftTracker::new();
        tracker.record_rtt_sample(0.0);
        tracker.note_client_frame();
        tracker.evaluate(100, 105, TICK_MS);
        let published = tracker.rift();

        // Nothing fresh: a second evaluation must not move the estimate.
        tracker.evaluate(500, 105, TICK_MS);
        assert_approx_eq!(tracker.rift(), published);
    }
}
