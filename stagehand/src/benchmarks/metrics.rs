//! Sweep results and the metrics reported from them.
//!
//! Every run carries its sweep coordinates so a report can be regrouped per
//! point. Only deploy time is measured; destroy is excluded.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::error::BenchmarkError;

/// Default metric name for deploy duration.
pub const CREATION_METRIC: &str = "creation_ms";

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

fn opt_as_millis<S: Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        Some(d) => as_millis(d, serializer),
        None => serializer.serialize_none(),
    }
}

/// One timed deploy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkRun {
    pub sweep: String,
    pub parameter: String,
    pub value: u64,
    pub iteration: u32,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
}

impl BenchmarkRun {
    /// Sub-benchmark label, e.g. `containers_5`.
    pub fn label(&self) -> String {
        format!("{}_{}", self.parameter, self.value)
    }
}

/// Aggregate over the iterations of one sweep point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointSummary {
    pub value: u64,
    pub iterations: usize,
    #[serde(rename = "mean_ms", serialize_with = "as_millis")]
    pub mean: Duration,
    #[serde(rename = "min_ms", serialize_with = "as_millis")]
    pub min: Duration,
    #[serde(rename = "max_ms", serialize_with = "as_millis")]
    pub max: Duration,
}

/// A named metric value attached to a sub-benchmark.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub label: String,
    pub name: String,
    pub value: f64,
}

/// Results of a complete sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub name: String,
    pub parameter: String,
    pub metric: String,
    pub runs: Vec<BenchmarkRun>,
    #[serde(rename = "mean_ms", serialize_with = "opt_as_millis")]
    pub mean: Option<Duration>,
    pub points: Vec<PointSummary>,
    pub completed_at: DateTime<Utc>,
}

impl SweepReport {
    pub fn new(
        name: impl Into<String>,
        parameter: impl Into<String>,
        metric: impl Into<String>,
        mut runs: Vec<BenchmarkRun>,
    ) -> Self {
        runs.sort_by(|a, b| a.value.cmp(&b.value).then(a.iteration.cmp(&b.iteration)));
        let mean = mean_of(runs.iter().map(|r| r.duration));
        let points = summarize(&runs);
        Self {
            name: name.into(),
            parameter: parameter.into(),
            metric: metric.into(),
            runs,
            mean,
            points,
            completed_at: Utc::now(),
        }
    }

    pub fn min(&self) -> Option<Duration> {
        self.runs.iter().map(|r| r.duration).min()
    }

    pub fn max(&self) -> Option<Duration> {
        self.runs.iter().map(|r| r.duration).max()
    }

    /// Per-run metrics: the timing metric plus the swept parameter itself,
    /// both labelled with the run's sub-benchmark name.
    pub fn metrics(&self) -> Vec<Metric> {
        self.runs
            .iter()
            .flat_map(|run| {
                let label = run.label();
                [
                    Metric {
                        label: label.clone(),
                        name: self.metric.clone(),
                        value: run.duration.as_secs_f64() * 1000.0,
                    },
                    Metric {
                        label,
                        name: self.parameter.clone(),
                        value: run.value as f64,
                    },
                ]
            })
            .collect()
    }

    /// Fail if the mean deploy time is above `budget`. An empty report
    /// passes.
    pub fn assert_mean_within(&self, budget: Duration) -> Result<(), BenchmarkError> {
        match self.mean {
            Some(mean) if mean > budget => Err(BenchmarkError::BudgetExceeded {
                metric: self.metric.clone(),
                mean,
                budget,
            }),
            _ => Ok(()),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn mean_of(durations: impl Iterator<Item = Duration>) -> Option<Duration> {
    let (total, count) = durations.fold((Duration::ZERO, 0u32), |(t, n), d| {
        (t.saturating_add(d), n.saturating_add(1))
    });
    (count > 0).then(|| total / count)
}

fn summarize(runs: &[BenchmarkRun]) -> Vec<PointSummary> {
    let mut by_value: BTreeMap<u64, Vec<Duration>> = BTreeMap::new();
    for run in runs {
        by_value.entry(run.value).or_default().push(run.duration);
    }
    by_value
        .into_iter()
        .filter_map(|(value, durations)| {
            Some(PointSummary {
                value,
                iterations: durations.len(),
                mean: mean_of(durations.iter().copied())?,
                min: durations.iter().copied().min()?,
                max: durations.iter().copied().max()?,
            })
        })
        .collect()
}
