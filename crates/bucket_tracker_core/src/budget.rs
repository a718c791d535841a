use std::time::{Duration, Instant};

pub const CLEANER_BUDGET: Duration = Duration::from_secs(60);
pub const PLOT_RENDERER_BUDGET: Duration = Duration::from_secs(50);
pub const DRIVER_BUDGET: Duration = Duration::from_secs(6 * 60);

/// Wall-clock allowance for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionBudget {
    started_at: Instant,
    limit: Duration,
}

impl ExecutionBudget {
    pub fn start(limit: Duration) -> Self {
        Self::starting_at(Instant::now(), limit)
    }

    pub fn starting_at(started_at: Instant, limit: Duration) -> Self {
        Self { started_at, limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    pub fn is_exhausted(&self) -> bool {
        self.elapsed() >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_is_exhausted_immediately() {
        let budget = ExecutionBudget::start(Duration::ZERO);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), Duration::ZERO);
    }

    #[test]
    fn fresh_budget_has_time_left() {
        let budget = ExecutionBudget::start(CLEANER_BUDGET);
        assert!(!budget.is_exhausted());
        assert!(budget.remaining() <= CLEANER_BUDGET);
    }
}
