use std::time::Duration;

pub const DEFAULT_SAMPLING_WINDOW: Duration = Duration::from_secs(10);

/// Epoch-aligned fixed window used to emit at most one audit record per
/// alarm evaluation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingWindow {
    period_ms: i64,
}

impl Default for SamplingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLING_WINDOW)
    }
}

impl SamplingWindow {
    pub fn new(period: Duration) -> Self {
        let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX);
        Self {
            period_ms: period_ms.max(1),
        }
    }

    pub fn period_ms(&self) -> i64 {
        self.period_ms
    }

    pub fn window_start(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms - timestamp_ms.rem_euclid(self.period_ms)
    }

    pub fn window_end(&self, timestamp_ms: i64) -> i64 {
        self.window_start(timestamp_ms).saturating_add(self.period_ms)
    }

    pub fn same_window(&self, left_ms: i64, right_ms: i64) -> bool {
        self.window_start(left_ms) == self.window_start(right_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_to_period_boundaries() {
        let window = SamplingWindow::default();
        assert_eq!(window.window_start(1_700_000_004_999), 1_700_000_000_000);
        assert_eq!(window.window_end(1_700_000_004_999), 1_700_000_010_000);
        assert_eq!(window.window_start(1_700_000_010_000), 1_700_000_010_000);
    }

    #[test]
    fn negative_timestamps_floor_downwards() {
        let window = SamplingWindow::new(Duration::from_secs(10));
        assert_eq!(window.window_start(-1), -10_000);
    }

    #[test]
    fn same_window_detects_boundary_crossing() {
        let window = SamplingWindow::default();
        assert!(window.same_window(20_000, 29_999));
        assert!(!window.same_window(29_999, 30_000));
    }

    #[test]
    fn zero_period_is_clamped() {
        assert_eq!(SamplingWindow::new(Duration::ZERO).period_ms(), 1);
    }
}
