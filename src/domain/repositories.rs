//! Repository abstraction over the durable score store.
//!
//! The trait keeps the application layer independent of the SQL backend and
//! lets service tests run against an in-process mock. Every aggregation
//! method is expected to push its work into the store's query engine rather
//! than materializing raw rows client-side, so the density probe and the
//! subsequent aggregation see the same data.

use crate::domain::aggregation::{
    EvaluatorAggregation, TimeBucketAggregation, TraceAggregation, TraceScore,
};
use crate::domain::errors::ScoresError;
use crate::domain::granularity::Granularity;
use crate::domain::score::{EvaluatorLevel, MonitorRunEvaluator, Score};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Optional narrowing of the monitor summary query.
#[derive(Debug, Clone, Default)]
pub struct ScoreFilters {
    /// Restrict to one evaluator display name.
    pub evaluator: Option<String>,
    /// Restrict to evaluators of one level.
    pub level: Option<EvaluatorLevel>,
}

/// Data access for evaluator scores and their aggregations.
#[async_trait]
pub trait ScoreRepository: Send + Sync {
    /// Upserts the evaluator rows for a monitor run. Written once per run
    /// start by the external lifecycle; read here to resolve evaluators.
    async fn upsert_monitor_run_evaluators(
        &self,
        evaluators: &[MonitorRunEvaluator],
    ) -> Result<(), ScoresError>;

    /// Returns the evaluators configured for one monitor run.
    async fn get_evaluators_by_run(
        &self,
        monitor_id: Uuid,
        monitor_run_id: Uuid,
    ) -> Result<Vec<MonitorRunEvaluator>, ScoresError>;

    /// Inserts or updates scores in a single transaction. The conflict key
    /// is `(run_evaluator_id, trace_id, span_id)` with a missing span
    /// treated as one well-defined value; on conflict only the mutable
    /// columns (value, explanation, trace timestamp) are overwritten.
    async fn batch_create_scores(&self, scores: &[Score]) -> Result<(), ScoresError>;

    /// Deletes scores of a monitor whose evaluator is no longer part of the
    /// run (rerun cleanup).
    async fn delete_stale_scores(
        &self,
        monitor_id: Uuid,
        keep_run_evaluator_ids: &[Uuid],
    ) -> Result<u64, ScoresError>;

    /// Resolves a monitor id from its external identity. `NotFound` when
    /// absent.
    async fn get_monitor_id(
        &self,
        org: &str,
        project: &str,
        agent: &str,
        monitor_name: &str,
    ) -> Result<Uuid, ScoresError>;

    /// Density probe: number of **distinct** traces with a score for the
    /// evaluator in the inclusive `[start, end]` window. Span-level
    /// duplicates must not inflate this count.
    async fn get_evaluator_score_count(
        &self,
        monitor_id: Uuid,
        evaluator_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, ScoresError>;

    /// Per-trace rollup, ascending by trace timestamp, capped at `limit`.
    async fn get_evaluator_trace_aggregated(
        &self,
        monitor_id: Uuid,
        evaluator_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TraceAggregation>, ScoresError>;

    /// Per-time-bucket rollup, ascending by bucket. Empty buckets are never
    /// emitted; absence of a point means absence of data, not zero.
    async fn get_evaluator_time_series_aggregated(
        &self,
        monitor_id: Uuid,
        evaluator_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<TimeBucketAggregation>, ScoresError>;

    /// Per-evaluator rollup across the window for the monitor summary. One
    /// row per configured evaluator, including evaluators with no in-window
    /// scores.
    async fn get_monitor_scores_aggregated(
        &self,
        monitor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filters: &ScoreFilters,
    ) -> Result<Vec<EvaluatorAggregation>, ScoresError>;

    /// Score listing for one trace across all monitors of an agent.
    async fn get_scores_by_trace_id(
        &self,
        org: &str,
        project: &str,
        agent: &str,
        trace_id: &str,
    ) -> Result<Vec<TraceScore>, ScoresError>;
}
