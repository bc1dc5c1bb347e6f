//! Monitor score queries: the Time-Series Assembler, the Monitor Summary
//! Aggregator and the per-trace listing, plus the ingestion seam the
//! external gateway writes through.

use crate::domain::aggregation::{
    EvaluatorAggregation, EvaluatorSummary, MonitorScores, TimeSeries, TimeSeriesPoint,
    TraceScore,
};
use crate::domain::errors::ScoresError;
use crate::domain::granularity::{Granularity, RAW_THRESHOLD, calculate_adaptive_granularity};
use crate::domain::repositories::{ScoreFilters, ScoreRepository};
use crate::domain::score::{MonitorRunEvaluator, Score};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Aggregations computed when an evaluator has no explicit configuration.
const DEFAULT_AGGREGATIONS: &[&str] = &["mean"];

pub struct MonitorScoresService {
    repository: Arc<dyn ScoreRepository>,
}

impl MonitorScoresService {
    pub fn new(repository: Arc<dyn ScoreRepository>) -> Self {
        Self { repository }
    }

    /// Ingestion entry point: upserts a batch of scores. Re-delivery is
    /// harmless, the upsert is idempotent per `(evaluator, trace, span)`.
    pub async fn record_scores(&self, scores: &[Score]) -> Result<(), ScoresError> {
        if scores.is_empty() {
            return Ok(());
        }
        self.repository.batch_create_scores(scores).await?;
        debug!("Recorded {} scores", scores.len());
        Ok(())
    }

    /// Registers the evaluator set of a monitor run and drops scores left
    /// behind by evaluators removed from it.
    pub async fn register_run_evaluators(
        &self,
        monitor_id: Uuid,
        evaluators: &[MonitorRunEvaluator],
    ) -> Result<(), ScoresError> {
        self.repository
            .upsert_monitor_run_evaluators(evaluators)
            .await?;
        let keep: Vec<Uuid> = evaluators.iter().map(|e| e.id).collect();
        let removed = self
            .repository
            .delete_stale_scores(monitor_id, &keep)
            .await?;
        if removed > 0 {
            info!(
                "Removed {} stale scores for monitor {}",
                removed, monitor_id
            );
        }
        Ok(())
    }

    /// Cross-evaluator snapshot for a fixed window. No adaptive resolution:
    /// one summary row per configured evaluator, including evaluators with
    /// no in-window scores.
    pub async fn get_monitor_scores(
        &self,
        monitor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filters: &ScoreFilters,
    ) -> Result<MonitorScores, ScoresError> {
        validate_range(start, end)?;

        let aggregated = self
            .repository
            .get_monitor_scores_aggregated(monitor_id, start, end, filters)
            .await?;

        Ok(MonitorScores {
            evaluators: aggregated.into_iter().map(summarize_evaluator).collect(),
        })
    }

    /// The Time-Series Assembler: probes score density, classifies the
    /// window into a granularity and dispatches to the matching aggregator.
    pub async fn get_evaluator_time_series(
        &self,
        monitor_id: Uuid,
        evaluator_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TimeSeries, ScoresError> {
        validate_range(start, end)?;

        let count = self
            .repository
            .get_evaluator_score_count(monitor_id, evaluator_name, start, end)
            .await?;
        let granularity = calculate_adaptive_granularity(end - start, count);
        debug!(
            "Time series for evaluator '{}' on monitor {}: {} traces -> granularity {}",
            evaluator_name, monitor_id, count, granularity
        );

        let points = if granularity == Granularity::Trace {
            // The probe counts distinct traces and the aggregator groups by
            // trace over the same window, so the cap can never truncate
            // below actual density in trace mode.
            self.repository
                .get_evaluator_trace_aggregated(
                    monitor_id,
                    evaluator_name,
                    start,
                    end,
                    RAW_THRESHOLD,
                )
                .await?
                .into_iter()
                .map(|agg| {
                    point(
                        agg.trace_timestamp,
                        agg.total_count,
                        agg.skipped_count,
                        agg.mean_score,
                    )
                })
                .collect()
        } else {
            self.repository
                .get_evaluator_time_series_aggregated(
                    monitor_id,
                    evaluator_name,
                    start,
                    end,
                    granularity,
                )
                .await?
                .into_iter()
                .map(|agg| {
                    point(
                        agg.time_bucket,
                        agg.total_count,
                        agg.skipped_count,
                        agg.mean_score,
                    )
                })
                .collect()
        };

        Ok(TimeSeries {
            granularity,
            points,
        })
    }

    /// Assembler variant resolving the monitor through the external lookup
    /// first. `NotFound` when the monitor does not exist.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_evaluator_time_series_by_name(
        &self,
        org: &str,
        project: &str,
        agent: &str,
        monitor_name: &str,
        evaluator_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TimeSeries, ScoresError> {
        let monitor_id = self
            .repository
            .get_monitor_id(org, project, agent, monitor_name)
            .await?;
        self.get_evaluator_time_series(monitor_id, evaluator_name, start, end)
            .await
    }

    /// Per-trace score listing across all monitors of an agent.
    pub async fn get_trace_scores(
        &self,
        org: &str,
        project: &str,
        agent: &str,
        trace_id: &str,
    ) -> Result<Vec<TraceScore>, ScoresError> {
        self.repository
            .get_scores_by_trace_id(org, project, agent, trace_id)
            .await
    }
}

fn validate_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), ScoresError> {
    if end <= start {
        return Err(ScoresError::InvalidRange { start, end });
    }
    Ok(())
}

fn point(
    timestamp: DateTime<Utc>,
    count: i64,
    error_count: i64,
    mean: Option<f64>,
) -> TimeSeriesPoint {
    let mut aggregations = BTreeMap::new();
    if let Some(mean) = mean {
        aggregations.insert("mean".to_string(), mean);
    }
    TimeSeriesPoint {
        timestamp,
        count,
        error_count,
        aggregations,
    }
}

/// Shapes one store-level rollup into a summary row, keeping only the
/// aggregations the evaluator is configured with.
fn summarize_evaluator(agg: EvaluatorAggregation) -> EvaluatorSummary {
    let configured: Vec<&str> = if agg.configured_aggregations.is_empty() {
        DEFAULT_AGGREGATIONS.to_vec()
    } else {
        agg.configured_aggregations.iter().map(String::as_str).collect()
    };

    let mut aggregations = BTreeMap::new();
    for name in configured {
        let value = match name {
            "mean" => agg.mean_score,
            "min" => agg.min_score,
            "max" => agg.max_score,
            _ => None, // unknown aggregation names are ignored
        };
        if let Some(value) = value {
            aggregations.insert(name.to_string(), value);
        }
    }

    EvaluatorSummary {
        evaluator_name: agg.evaluator_name,
        level: agg.level,
        count: agg.total_count,
        error_count: agg.skipped_count,
        aggregations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::score::EvaluatorLevel;

    fn aggregation(configured: &[&str]) -> EvaluatorAggregation {
        EvaluatorAggregation {
            evaluator_name: "Latency Check".to_string(),
            level: EvaluatorLevel::Trace,
            configured_aggregations: configured.iter().map(|s| s.to_string()).collect(),
            total_count: 4,
            skipped_count: 1,
            mean_score: Some(0.7),
            min_score: Some(0.2),
            max_score: Some(0.9),
        }
    }

    #[test]
    fn test_summarize_defaults_to_mean() {
        let summary = summarize_evaluator(aggregation(&[]));
        assert_eq!(summary.count, 4);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.aggregations.len(), 1);
        assert_eq!(summary.aggregations["mean"], 0.7);
    }

    #[test]
    fn test_summarize_respects_configuration() {
        let summary = summarize_evaluator(aggregation(&["min", "max", "p99"]));
        assert_eq!(summary.aggregations.len(), 2);
        assert_eq!(summary.aggregations["min"], 0.2);
        assert_eq!(summary.aggregations["max"], 0.9);
    }

    #[test]
    fn test_summarize_all_skipped_has_no_aggregations() {
        let mut agg = aggregation(&[]);
        agg.mean_score = None;
        agg.min_score = None;
        agg.max_score = None;
        let summary = summarize_evaluator(agg);
        assert!(summary.aggregations.is_empty());
    }
}
