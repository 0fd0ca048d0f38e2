//! Frame timing statistics.

use std::time::Duration;

use tracing::info;

/// Timings and counters of one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number.
    pub frame: u64,
    /// Total frame time in microseconds, pacing included.
    pub total_us: u64,
    /// Hook time (pre-update, update, post-update) in microseconds.
    pub simulate_us: u64,
    /// Sync packet build and submit time in microseconds.
    pub sync_us: u64,
    /// Time blocked on the previous core frame in microseconds.
    pub handshake_us: u64,
    /// Time spent pacing in microseconds.
    pub pace_us: u64,
    /// Sync packet bytes sent this frame.
    pub sync_bytes: usize,
    /// Task completion callbacks dispatched this frame.
    pub tasks_completed: usize,
}

/// Accumulator for [`FrameStats`].
#[derive(Clone, Debug)]
pub struct FrameStatsAccumulator {
    /// Total frames recorded.
    pub frames_recorded: u64,
    /// Sum of total frame times.
    pub total_us_sum: u64,
    /// Sum of simulate times.
    pub simulate_us_sum: u64,
    /// Sum of sync times.
    pub sync_us_sum: u64,
    /// Sum of handshake waits.
    pub handshake_us_sum: u64,
    /// Min frame time.
    pub min_frame_us: u64,
    /// Max frame time.
    pub max_frame_us: u64,
    /// Longest handshake wait.
    pub max_handshake_us: u64,
    /// Sync bytes sent.
    pub sync_bytes: u64,
    /// Tasks completed.
    pub tasks_completed: u64,
    /// Frames that exceeded the budget.
    pub frames_over_budget: u64,
    budget_us: Option<u64>,
}

impl FrameStatsAccumulator {
    /// Creates an accumulator. Frames longer than `budget` (plus pacing)
    /// count as over budget.
    #[must_use]
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            frames_recorded: 0,
            total_us_sum: 0,
            simulate_us_sum: 0,
            sync_us_sum: 0,
            handshake_us_sum: 0,
            min_frame_us: u64::MAX,
            max_frame_us: 0,
            max_handshake_us: 0,
            sync_bytes: 0,
            tasks_completed: 0,
            frames_over_budget: 0,
            budget_us: budget.map(|b| b.as_micros() as u64),
        }
    }

    /// Records a frame's statistics.
    pub fn record(&mut self, stats: FrameStats) {
        self.frames_recorded += 1;
        self.total_us_sum += stats.total_us;
        self.simulate_us_sum += stats.simulate_us;
        self.sync_us_sum += stats.sync_us;
        self.handshake_us_sum += stats.handshake_us;
        self.min_frame_us = self.min_frame_us.min(stats.total_us);
        self.max_frame_us = self.max_frame_us.max(stats.total_us);
        self.max_handshake_us = self.max_handshake_us.max(stats.handshake_us);
        self.sync_bytes += stats.sync_bytes as u64;
        self.tasks_completed += stats.tasks_completed as u64;

        // Pacing time is idle, not work.
        let busy = stats.total_us.saturating_sub(stats.pace_us);
        if self.budget_us.is_some_and(|budget| busy > budget) {
            self.frames_over_budget += 1;
        }
    }

    fn avg_ms(&self, sum: u64) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        (sum as f64 / self.frames_recorded as f64) / 1000.0
    }

    /// Average frame time in milliseconds.
    #[must_use]
    pub fn avg_frame_ms(&self) -> f64 {
        self.avg_ms(self.total_us_sum)
    }

    /// Average handshake wait in milliseconds.
    #[must_use]
    pub fn avg_handshake_ms(&self) -> f64 {
        self.avg_ms(self.handshake_us_sum)
    }

    /// Average FPS.
    #[must_use]
    pub fn avg_fps(&self) -> f64 {
        let avg_ms = self.avg_frame_ms();
        if avg_ms <= 0.0 {
            return 0.0;
        }
        1000.0 / avg_ms
    }

    /// Fraction of frames over budget.
    #[must_use]
    pub fn over_budget_ratio(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        self.frames_over_budget as f64 / self.frames_recorded as f64
    }

    /// Logs a summary at info level.
    pub fn log_summary(&self) {
        if self.frames_recorded == 0 {
            info!("no frames recorded");
            return;
        }
        info!(
            frames = self.frames_recorded,
            avg_ms = format_args!("{:.3}", self.avg_frame_ms()),
            fps = format_args!("{:.1}", self.avg_fps()),
            min_ms = format_args!("{:.3}", self.min_frame_us as f64 / 1000.0),
            max_ms = format_args!("{:.3}", self.max_frame_us as f64 / 1000.0),
            "frame timing"
        );
        info!(
            simulate_ms = format_args!("{:.3}", self.avg_ms(self.simulate_us_sum)),
            sync_ms = format_args!("{:.3}", self.avg_ms(self.sync_us_sum)),
            handshake_ms = format_args!("{:.3}", self.avg_handshake_ms()),
            max_handshake_ms = format_args!("{:.3}", self.max_handshake_us as f64 / 1000.0),
            "frame breakdown"
        );
        info!(
            sync_bytes = self.sync_bytes,
            tasks_completed = self.tasks_completed,
            over_budget = self.frames_over_budget,
            over_budget_pct = format_args!("{:.1}", self.over_budget_ratio() * 100.0),
            "frame totals"
        );
    }
}

impl Default for FrameStatsAccumulator {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_accumulator() {
        let mut acc = FrameStatsAccumulator::new(Some(Duration::from_millis(10)));
        acc.record(FrameStats {
            total_us: 8_000,
            handshake_us: 1_000,
            sync_bytes: 100,
            ..Default::default()
        });
        acc.record(FrameStats {
            total_us: 12_000,
            handshake_us: 3_000,
            sync_bytes: 50,
            tasks_completed: 2,
            ..Default::default()
        });

        assert_eq!(acc.frames_recorded, 2);
        assert!((acc.avg_frame_ms() - 10.0).abs() < 1e-9);
        assert!((acc.avg_fps() - 100.0).abs() < 1e-9);
        assert!((acc.avg_handshake_ms() - 2.0).abs() < 1e-9);
        assert_eq!(acc.min_frame_us, 8_000);
        assert_eq!(acc.max_frame_us, 12_000);
        assert_eq!(acc.max_handshake_us, 3_000);
        assert_eq!(acc.sync_bytes, 150);
        assert_eq!(acc.tasks_completed, 2);
        assert_eq!(acc.frames_over_budget, 1);
        assert!((acc.over_budget_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_pacing_not_over_budget() {
        let mut acc = FrameStatsAccumulator::new(Some(Duration::from_millis(10)));
        acc.record(FrameStats {
            total_us: 16_000,
            pace_us: 9_000,
            ..Default::default()
        });
        assert_eq!(acc.frames_over_budget, 0);
    }

    #[test]
    fn test_empty_accumulator() {
        let acc = FrameStatsAccumulator::default();
        assert_eq!(acc.avg_frame_ms(), 0.0);
        assert_eq!(acc.avg_fps(), 0.0);
        assert_eq!(acc.over_budget_ratio(), 0.0);
        acc.log_summary();
    }
}
