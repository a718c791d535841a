//! Metric extraction, period aggregation and the edge-triggered alarm.
//!
//! The audit logger writes JSON lines; a [`MetricFilter`] pulls one numeric
//! field out of each line, a [`PeriodAggregator`] folds samples into aligned
//! periods with a single statistic, and [`Alarm`] evaluates closed periods.
//! Only the `Ok -> Alarm` edge produces an action.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde_json::Value;

use crate::contract::{DEFAULT_SIZE_THRESHOLD_BYTES, TOTAL_SIZE_FIELD};
use crate::sampling::SamplingWindow;

/// Extracts a numeric value at a `$.a.b` style path from a JSON log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricFilter {
    path: Vec<String>,
}

impl Default for MetricFilter {
    fn default() -> Self {
        Self::new(&format!("$.{TOTAL_SIZE_FIELD}"))
    }
}

impl MetricFilter {
    pub fn new(selector: &str) -> Self {
        let trimmed = selector.trim().trim_start_matches('$').trim_start_matches('.');
        Self {
            path: trimmed
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn extract(&self, line: &str) -> Option<f64> {
        let value: Value = serde_json::from_str(line).ok()?;
        let mut current = &value;
        for segment in &self.path {
            current = current.get(segment)?;
        }
        current.as_f64()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Maximum,
    Minimum,
    Average,
    Sum,
    SampleCount,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PeriodStats {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl PeriodStats {
    fn first(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn value(&self, statistic: Statistic) -> f64 {
        match statistic {
            Statistic::Maximum => self.max,
            Statistic::Minimum => self.min,
            Statistic::Average => self.sum / self.count as f64,
            Statistic::Sum => self.sum,
            Statistic::SampleCount => self.count as f64,
        }
    }
}

/// One closed evaluation period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodSample {
    pub period_start_ms: i64,
    pub value: f64,
    pub sample_count: u64,
}

#[derive(Debug, Clone)]
pub struct PeriodAggregator {
    window: SamplingWindow,
    statistic: Statistic,
    open: BTreeMap<i64, PeriodStats>,
}

impl PeriodAggregator {
    pub fn new(period: Duration, statistic: Statistic) -> Self {
        Self {
            window: SamplingWindow::new(period),
            statistic,
            open: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, timestamp_ms: i64, value: f64) {
        let start = self.window.window_start(timestamp_ms);
        self.open
            .entry(start)
            .and_modify(|stats| stats.add(value))
            .or_insert_with(|| PeriodStats::first(value));
    }

    /// Removes and returns, oldest first, every period that ended at or
    /// before `now_ms`.
    pub fn drain_closed(&mut self, now_ms: i64) -> Vec<PeriodSample> {
        let period_ms = self.window.period_ms();
        let closed: Vec<i64> = self
            .open
            .keys()
            .copied()
            .take_while(|start| start.saturating_add(period_ms) <= now_ms)
            .collect();

        closed
            .into_iter()
            .filter_map(|start| {
                self.open.remove(&start).map(|stats| PeriodSample {
                    period_start_ms: start,
                    value: stats.value(self.statistic),
                    sample_count: stats.count,
                })
            })
            .collect()
    }

    pub fn pending_periods(&self) -> usize {
        self.open.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    GreaterThanThreshold,
    GreaterThanOrEqualToThreshold,
    LessThanThreshold,
    LessThanOrEqualToThreshold,
}

impl ComparisonOperator {
    pub fn breaches(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThanThreshold => value > threshold,
            Self::GreaterThanOrEqualToThreshold => value >= threshold,
            Self::LessThanThreshold => value < threshold,
            Self::LessThanOrEqualToThreshold => value <= threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmConfig {
    pub threshold: f64,
    pub evaluation_periods: usize,
    pub comparison: ComparisonOperator,
    pub period: Duration,
    pub statistic: Statistic,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIZE_THRESHOLD_BYTES as f64,
            evaluation_periods: 1,
            comparison: ComparisonOperator::GreaterThanThreshold,
            period: Duration::from_secs(10),
            statistic: Statistic::Maximum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Ok,
    Alarm,
}

impl AlarmState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Alarm => "ALARM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlarmTransition {
    /// `Ok -> Alarm`; the alarm action must run exactly once for this edge.
    EnteredAlarm { period_start_ms: i64, value: f64 },
    Recovered { period_start_ms: i64, value: f64 },
}

#[derive(Debug, Clone)]
pub struct Alarm {
    config: AlarmConfig,
    state: AlarmState,
    recent: VecDeque<bool>,
}

impl Alarm {
    pub fn new(config: AlarmConfig) -> Self {
        Self {
            config,
            state: AlarmState::Ok,
            recent: VecDeque::with_capacity(config.evaluation_periods.max(1)),
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// Feeds one closed period. Returns a transition only when the state
    /// changes; a sustained breach returns `None`.
    pub fn evaluate(&mut self, sample: PeriodSample) -> Option<AlarmTransition> {
        let required = self.config.evaluation_periods.max(1);
        let breaching = self
            .config
            .comparison
            .breaches(sample.value, self.config.threshold);

        self.recent.push_back(breaching);
        while self.recent.len() > required {
            self.recent.pop_front();
        }

        let all_breaching = self.recent.len() == required && self.recent.iter().all(|b| *b);
        let next = if all_breaching {
            AlarmState::Alarm
        } else if breaching {
            self.state
        } else {
            AlarmState::Ok
        };

        if next == self.state {
            return None;
        }
        self.state = next;

        Some(match next {
            AlarmState::Alarm => AlarmTransition::EnteredAlarm {
                period_start_ms: sample.period_start_ms,
                value: sample.value,
            },
            AlarmState::Ok => AlarmTransition::Recovered {
                period_start_ms: sample.period_start_ms,
                value: sample.value,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(period_start_ms: i64, value: f64) -> PeriodSample {
        PeriodSample {
            period_start_ms,
            value,
            sample_count: 1,
        }
    }

    #[test]
    fn filter_extracts_total_size() {
        let filter = MetricFilter::default();
        assert_eq!(
            filter.extract(r#"{"object_name":"a","total_size":25}"#),
            Some(25.0)
        );
        assert_eq!(filter.extract(r#"{"object_name":"a"}"#), None);
        assert_eq!(filter.extract("START RequestId: abc"), None);
        assert_eq!(filter.extract(r#"{"total_size":"25"}"#), None);
    }

    #[test]
    fn filter_follows_nested_paths() {
        let filter = MetricFilter::new("$.details.total_size");
        assert_eq!(
            filter.extract(r#"{"details":{"total_size":7}}"#),
            Some(7.0)
        );
    }

    #[test]
    fn aggregator_uses_maximum_per_period() {
        let mut aggregator = PeriodAggregator::new(Duration::from_secs(10), Statistic::Maximum);
        aggregator.record(1_000, 5.0);
        aggregator.record(9_999, 25.0);
        aggregator.record(10_000, 3.0);

        let closed = aggregator.drain_closed(10_000);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].value, 25.0);
        assert_eq!(closed[0].sample_count, 2);
        assert_eq!(aggregator.pending_periods(), 1);
    }

    #[test]
    fn aggregator_keeps_open_period_until_it_ends() {
        let mut aggregator = PeriodAggregator::new(Duration::from_secs(10), Statistic::Average);
        aggregator.record(12_000, 4.0);
        aggregator.record(13_000, 6.0);
        assert!(aggregator.drain_closed(19_999).is_empty());
        assert_eq!(aggregator.drain_closed(20_000)[0].value, 5.0);
    }

    #[test]
    fn alarm_fires_once_for_five_twenty_five_five() {
        let mut alarm = Alarm::new(AlarmConfig::default());
        let transitions: Vec<Option<AlarmTransition>> = [5.0, 25.0, 5.0]
            .iter()
            .enumerate()
            .map(|(index, value)| alarm.evaluate(sample(index as i64 * 10_000, *value)))
            .collect();

        let entered = transitions
            .iter()
            .filter(|t| matches!(t, Some(AlarmTransition::EnteredAlarm { .. })))
            .count();
        assert_eq!(entered, 1);
        assert_eq!(transitions[0], None);
        assert_eq!(
            transitions[1],
            Some(AlarmTransition::EnteredAlarm {
                period_start_ms: 10_000,
                value: 25.0
            })
        );
        assert!(matches!(
            transitions[2],
            Some(AlarmTransition::Recovered { .. })
        ));
        assert_eq!(alarm.state(), AlarmState::Ok);
    }

    #[test]
    fn sustained_breach_does_not_refire() {
        let mut alarm = Alarm::new(AlarmConfig::default());
        assert!(alarm.evaluate(sample(0, 30.0)).is_some());
        assert!(alarm.evaluate(sample(10_000, 40.0)).is_none());
        assert!(alarm.evaluate(sample(20_000, 21.0)).is_none());
        assert_eq!(alarm.state(), AlarmState::Alarm);
    }

    #[test]
    fn threshold_value_itself_does_not_breach() {
        let mut alarm = Alarm::new(AlarmConfig::default());
        assert!(alarm.evaluate(sample(0, 20.0)).is_none());
        assert_eq!(alarm.state(), AlarmState::Ok);
    }

    #[test]
    fn multiple_evaluation_periods_require_consecutive_breaches() {
        let mut alarm = Alarm::new(AlarmConfig {
            evaluation_periods: 2,
            ..AlarmConfig::default()
        });
        assert!(alarm.evaluate(sample(0, 30.0)).is_none());
        assert!(alarm.evaluate(sample(10_000, 5.0)).is_none());
        assert!(alarm.evaluate(sample(20_000, 30.0)).is_none());
        assert!(matches!(
            alarm.evaluate(sample(30_000, 30.0)),
            Some(AlarmTransition::EnteredAlarm { .. })
        ));
    }
}
