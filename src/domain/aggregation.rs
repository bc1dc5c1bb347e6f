//! Derived rollup shapes returned by the aggregation queries.
//!
//! None of these are persisted; they are computed inside the store's query
//! engine and handed to the application layer for response shaping.

use crate::domain::granularity::Granularity;
use crate::domain::score::{EvaluatorLevel, ScoreValue};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-trace rollup of one evaluator's scores inside a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceAggregation {
    pub trace_id: String,
    pub trace_timestamp: DateTime<Utc>,
    /// Arithmetic mean of scored values; `None` when every row was skipped.
    pub mean_score: Option<f64>,
    pub total_count: i64,
    pub skipped_count: i64,
}

/// Per-time-bucket rollup of one evaluator's scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeBucketAggregation {
    /// Trace timestamp truncated to the granularity boundary in UTC.
    pub time_bucket: DateTime<Utc>,
    pub mean_score: Option<f64>,
    pub total_count: i64,
    pub skipped_count: i64,
}

/// Per-evaluator rollup for the monitor summary, straight from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorAggregation {
    pub evaluator_name: String,
    pub level: EvaluatorLevel,
    /// Aggregation names configured on the evaluator.
    pub configured_aggregations: Vec<String>,
    pub total_count: i64,
    pub skipped_count: i64,
    pub mean_score: Option<f64>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
}

/// One point of an assembled time series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub count: i64,
    pub error_count: i64,
    /// Computed aggregations by name; a point whose rows were all skipped
    /// carries an empty map rather than a null mean.
    pub aggregations: BTreeMap<String, f64>,
}

/// Assembled response of the Time-Series Assembler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    pub granularity: Granularity,
    pub points: Vec<TimeSeriesPoint>,
}

/// One evaluator's row in the monitor summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatorSummary {
    pub evaluator_name: String,
    pub level: EvaluatorLevel,
    pub count: i64,
    pub error_count: i64,
    pub aggregations: BTreeMap<String, f64>,
}

/// Cross-evaluator snapshot for a fixed window (no adaptive resolution).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorScores {
    pub evaluators: Vec<EvaluatorSummary>,
}

/// One score row in the per-trace listing, joined with its monitor and
/// evaluator identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceScore {
    pub monitor_name: String,
    pub evaluator_name: String,
    pub level: EvaluatorLevel,
    pub span_id: Option<String>,
    pub value: ScoreValue,
    pub explanation: Option<String>,
    pub trace_timestamp: DateTime<Utc>,
}
