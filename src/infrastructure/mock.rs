//! Configurable in-process repository for service-level tests.

use crate::domain::aggregation::{
    EvaluatorAggregation, TimeBucketAggregation, TraceAggregation, TraceScore,
};
use crate::domain::errors::ScoresError;
use crate::domain::granularity::Granularity;
use crate::domain::repositories::{ScoreFilters, ScoreRepository};
use crate::domain::score::{MonitorRunEvaluator, Score};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use uuid::Uuid;

/// Mock `ScoreRepository` with configurable return values. Captures the
/// granularity passed to the bucket aggregator so routing tests can assert
/// which aggregation path the assembler dispatched to.
#[derive(Default)]
pub struct MockScoreRepository {
    /// Result of the monitor lookup; `None` means "not found".
    pub monitor_id: Option<Uuid>,
    /// Result of the density probe.
    pub score_count: i64,
    pub trace_aggregations: Vec<TraceAggregation>,
    pub bucket_aggregations: Vec<TimeBucketAggregation>,
    pub evaluator_aggregations: Vec<EvaluatorAggregation>,
    pub trace_scores: Vec<TraceScore>,
    pub last_granularity: Mutex<Option<Granularity>>,
    pub recorded_scores: Mutex<Vec<Score>>,
    pub upserted_evaluators: Mutex<Vec<MonitorRunEvaluator>>,
}

#[async_trait]
impl ScoreRepository for MockScoreRepository {
    async fn upsert_monitor_run_evaluators(
        &self,
        evaluators: &[MonitorRunEvaluator],
    ) -> Result<(), ScoresError> {
        self.upserted_evaluators
            .lock()
            .unwrap()
            .extend_from_slice(evaluators);
        Ok(())
    }

    async fn get_evaluators_by_run(
        &self,
        _monitor_id: Uuid,
        _monitor_run_id: Uuid,
    ) -> Result<Vec<MonitorRunEvaluator>, ScoresError> {
        Ok(self.upserted_evaluators.lock().unwrap().clone())
    }

    async fn batch_create_scores(&self, scores: &[Score]) -> Result<(), ScoresError> {
        self.recorded_scores
            .lock()
            .unwrap()
            .extend_from_slice(scores);
        Ok(())
    }

    async fn delete_stale_scores(
        &self,
        _monitor_id: Uuid,
        _keep_run_evaluator_ids: &[Uuid],
    ) -> Result<u64, ScoresError> {
        Ok(0)
    }

    async fn get_monitor_id(
        &self,
        _org: &str,
        _project: &str,
        _agent: &str,
        monitor_name: &str,
    ) -> Result<Uuid, ScoresError> {
        self.monitor_id
            .ok_or_else(|| ScoresError::not_found("monitor", monitor_name))
    }

    async fn get_evaluator_score_count(
        &self,
        _monitor_id: Uuid,
        _evaluator_name: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<i64, ScoresError> {
        Ok(self.score_count)
    }

    async fn get_evaluator_trace_aggregated(
        &self,
        _monitor_id: Uuid,
        _evaluator_name: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TraceAggregation>, ScoresError> {
        let mut aggregations = self.trace_aggregations.clone();
        if limit >= 0 && aggregations.len() > limit as usize {
            aggregations.truncate(limit as usize);
        }
        Ok(aggregations)
    }

    async fn get_evaluator_time_series_aggregated(
        &self,
        _monitor_id: Uuid,
        _evaluator_name: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<TimeBucketAggregation>, ScoresError> {
        *self.last_granularity.lock().unwrap() = Some(granularity);
        Ok(self.bucket_aggregations.clone())
    }

    async fn get_monitor_scores_aggregated(
        &self,
        _monitor_id: Uuid,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        filters: &ScoreFilters,
    ) -> Result<Vec<EvaluatorAggregation>, ScoresError> {
        let mut aggregations = self.evaluator_aggregations.clone();
        if let Some(evaluator) = &filters.evaluator {
            aggregations.retain(|a| &a.evaluator_name == evaluator);
        }
        if let Some(level) = filters.level {
            aggregations.retain(|a| a.level == level);
        }
        Ok(aggregations)
    }

    async fn get_scores_by_trace_id(
        &self,
        _org: &str,
        _project: &str,
        _agent: &str,
        trace_id: &str,
    ) -> Result<Vec<TraceScore>, ScoresError> {
        if trace_id.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.trace_scores.clone())
    }
}
