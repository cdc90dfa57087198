//! Fixed-step accumulator and server clock estimation

use std::time::{Duration, Instant};

/// Longest wall-clock gap fed into the accumulator in one call
const MAX_ACCUMULATED: Duration = Duration::from_millis(250);

/// Turns irregular wall-clock deltas into whole fixed-size ticks
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    step: Duration,
    accumulator: Duration,
}

impl FixedTimestep {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            accumulator: Duration::ZERO,
        }
    }

    pub fn from_tick_rate(tick_rate: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / f64::from(tick_rate)))
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Adds elapsed wall time, capped so a stall cannot queue a burst of ticks
    pub fn accumulate(&mut self, elapsed: Duration) {
        self.accumulator += elapsed.min(MAX_ACCUMULATED);
    }

    /// Consumes one tick's worth of time if a tick is due
    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.step {
            self.accumulator -= self.step;
            true
        } else {
            false
        }
    }

    pub fn pending(&self) -> Duration {
        self.accumulator
    }

    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }
}

/// Client-side estimate of the server clock.
///
/// Each time sync sets `server_now = received_time + rtt / 2` and the estimate
/// then advances with the local monotonic clock.
#[derive(Debug, Clone, Default)]
pub struct ServerClock {
    anchor: Option<(Instant, u64)>,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync(&mut self, server_time_ms: u64, rtt_ms: f32) {
        self.sync_at(Instant::now(), server_time_ms, rtt_ms);
    }

    pub fn sync_at(&mut self, local: Instant, server_time_ms: u64, rtt_ms: f32) {
        let half_rtt = (rtt_ms.max(0.0) / 2.0).round() as u64;
        self.anchor = Some((local, server_time_ms + half_rtt));
    }

    pub fn is_synced(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn now_ms(&self) -> Option<u64> {
        self.now_ms_at(Instant::now())
    }

    pub fn now_ms_at(&self, local: Instant) -> Option<u64> {
        self.anchor.map(|(anchor, server_ms)| {
            let elapsed = local.saturating_duration_since(anchor);
            server_ms + elapsed.as_millis() as u64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_tick_before_step_elapsed() {
        let mut timestep = FixedTimestep::new(Duration::from_millis(16));
        timestep.accumulate(Duration::from_millis(10));

        assert!(!timestep.consume_tick());
        assert_eq!(timestep.pending(), Duration::from_millis(10));
    }

    #[test]
    fn test_multiple_ticks_due() {
        let mut timestep = FixedTimestep::new(Duration::from_millis(10));
        timestep.accumulate(Duration::from_millis(35));

        let mut ticks = 0;
        while timestep.consume_tick() {
            ticks += 1;
        }

        assert_eq!(ticks, 3);
        assert_eq!(timestep.pending(), Duration::from_millis(5));
    }

    #[test]
    fn test_remainder_carries_over() {
        let mut timestep = FixedTimestep::new(Duration::from_millis(10));
        timestep.accumulate(Duration::from_millis(6));
        assert!(!timestep.consume_tick());
        timestep.accumulate(Duration::from_millis(6));
        assert!(timestep.consume_tick());
        assert_eq!(timestep.pending(), Duration::from_millis(2));
    }

    #[test]
    fn test_long_stall_is_capped() {
        let mut timestep = FixedTimestep::new(Duration::from_millis(10));
        timestep.accumulate(Duration::from_secs(5));

        let mut ticks = 0;
        while timestep.consume_tick() {
            ticks += 1;
        }
        assert_eq!(ticks, 25);
    }

    #[test]
    fn test_from_tick_rate() {
        let timestep = FixedTimestep::from_tick_rate(50);
        assert_eq!(timestep.step(), Duration::from_millis(20));
    }

    #[test]
    fn test_reset() {
        let mut timestep = FixedTimestep::new(Duration::from_millis(10));
        timestep.accumulate(Duration::from_millis(8));
        timestep.reset();
        assert_eq!(timestep.pending(), Duration::ZERO);
    }

    #[test]
    fn test_server_clock_unsynced() {
        let clock = ServerClock::new();
        assert!(!clock.is_synced());
        assert_eq!(clock.now_ms(), None);
    }

    #[test]
    fn test_server_clock_adds_half_rtt() {
        let mut clock = ServerClock::new();
        let t0 = Instant::now();
        clock.sync_at(t0, 1_000, 40.0);

        assert_eq!(clock.now_ms_at(t0), Some(1_020));
        assert_eq!(
            clock.now_ms_at(t0 + Duration::from_millis(100)),
            Some(1_120)
        );
    }

    #[test]
    fn test_server_clock_resync_moves_anchor() {
        let mut clock = ServerClock::new();
        let t0 = Instant::now();
        clock.sync_at(t0, 1_000, 0.0);
        clock.sync_at(t0 + Duration::from_millis(500), 1_400, 20.0);

        assert_eq!(
            clock.now_ms_at(t0 + Duration::from_millis(500)),
            Some(1_410)
        );
    }
}
