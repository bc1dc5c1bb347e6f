use crate::domain::aggregation::{
    EvaluatorAggregation, TimeBucketAggregation, TraceAggregation, TraceScore,
};
use crate::domain::errors::ScoresError;
use crate::domain::granularity::Granularity;
use crate::domain::repositories::{ScoreFilters, ScoreRepository};
use crate::domain::score::{EvaluatorLevel, MonitorRunEvaluator, Score, ScoreValue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

/// Reserved span_id value standing in for "no span". SQLite unique indexes
/// treat NULLs as distinct, so trace-level rows carry this sentinel instead
/// of NULL to keep the composite conflict key total. The sentinel never
/// leaves this module.
const NO_SPAN: &str = "";

/// Monday-aligned week arithmetic: the unix epoch fell on a Thursday, so
/// week buckets are offset by four days before truncating.
const WEEK_SECS: i64 = 7 * 24 * 3600;
const MONDAY_EPOCH_OFFSET: i64 = 4 * 24 * 3600;

pub struct SqliteScoreRepository {
    pool: SqlitePool,
}

impl SqliteScoreRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// SQL expression truncating `trace_timestamp` (unix seconds) to the
    /// bucket boundary in UTC.
    fn bucket_expr(granularity: Granularity) -> Result<String, ScoresError> {
        let expr = match granularity {
            Granularity::Trace => {
                return Err(ScoresError::UnsupportedGranularity(granularity));
            }
            Granularity::Minute => "(s.trace_timestamp / 60) * 60".to_string(),
            Granularity::Hour => "(s.trace_timestamp / 3600) * 3600".to_string(),
            Granularity::Day => "(s.trace_timestamp / 86400) * 86400".to_string(),
            Granularity::Week => format!(
                "((s.trace_timestamp - {offset}) / {week}) * {week} + {offset}",
                offset = MONDAY_EPOCH_OFFSET,
                week = WEEK_SECS
            ),
        };
        Ok(expr)
    }
}

fn decode_failure(
    context: &'static str,
    source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> ScoresError {
    ScoresError::Persistence {
        context: context.to_string(),
        source: sqlx::Error::Decode(source.into()),
    }
}

fn parse_uuid(value: &str, context: &'static str) -> Result<Uuid, ScoresError> {
    Uuid::parse_str(value).map_err(|e| decode_failure(context, e))
}

fn timestamp_from_secs(secs: i64) -> Result<DateTime<Utc>, ScoresError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        decode_failure(
            "invalid stored timestamp",
            format!("{secs} seconds is out of range"),
        )
    })
}

/// Reassembles the scored/skipped sum type from the nullable columns.
fn score_value_from_columns(score: Option<f64>, skip_reason: Option<String>) -> ScoreValue {
    match score {
        Some(v) => ScoreValue::Scored(v),
        None => ScoreValue::Skipped(skip_reason.unwrap_or_default()),
    }
}

#[async_trait]
impl ScoreRepository for SqliteScoreRepository {
    async fn upsert_monitor_run_evaluators(
        &self,
        evaluators: &[MonitorRunEvaluator],
    ) -> Result<(), ScoresError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(ScoresError::persistence("Failed to begin evaluator upsert"))?;

        for evaluator in evaluators {
            let aggregations = serde_json::to_string(&evaluator.aggregations)
                .map_err(|e| decode_failure("Failed to encode evaluator aggregations", e))?;

            sqlx::query(
                r#"
                INSERT INTO monitor_run_evaluators
                    (id, monitor_run_id, monitor_id, evaluator_name, display_name, level, aggregations)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO UPDATE SET
                    evaluator_name = excluded.evaluator_name,
                    display_name = excluded.display_name,
                    level = excluded.level,
                    aggregations = excluded.aggregations
                "#,
            )
            .bind(evaluator.id.to_string())
            .bind(evaluator.monitor_run_id.to_string())
            .bind(evaluator.monitor_id.to_string())
            .bind(&evaluator.evaluator_name)
            .bind(&evaluator.display_name)
            .bind(evaluator.level.to_string())
            .bind(aggregations)
            .execute(&mut *tx)
            .await
            .map_err(ScoresError::persistence("Failed to upsert monitor run evaluator"))?;
        }

        tx.commit()
            .await
            .map_err(ScoresError::persistence("Failed to commit evaluator upsert"))
    }

    async fn get_evaluators_by_run(
        &self,
        monitor_id: Uuid,
        monitor_run_id: Uuid,
    ) -> Result<Vec<MonitorRunEvaluator>, ScoresError> {
        let rows = sqlx::query(
            r#"
            SELECT id, monitor_run_id, monitor_id, evaluator_name, display_name, level, aggregations
            FROM monitor_run_evaluators
            WHERE monitor_id = ?1 AND monitor_run_id = ?2
            ORDER BY display_name ASC
            "#,
        )
        .bind(monitor_id.to_string())
        .bind(monitor_run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(ScoresError::persistence("Failed to load run evaluators"))?;

        let mut evaluators = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row
                .try_get("id")
                .map_err(ScoresError::persistence("Failed to read evaluator row"))?;
            let run_id: String = row
                .try_get("monitor_run_id")
                .map_err(ScoresError::persistence("Failed to read evaluator row"))?;
            let mon_id: String = row
                .try_get("monitor_id")
                .map_err(ScoresError::persistence("Failed to read evaluator row"))?;
            let level_str: String = row
                .try_get("level")
                .map_err(ScoresError::persistence("Failed to read evaluator row"))?;
            let aggregations_json: String = row
                .try_get("aggregations")
                .map_err(ScoresError::persistence("Failed to read evaluator row"))?;

            evaluators.push(MonitorRunEvaluator {
                id: parse_uuid(&id, "invalid evaluator id")?,
                monitor_run_id: parse_uuid(&run_id, "invalid monitor run id")?,
                monitor_id: parse_uuid(&mon_id, "invalid monitor id")?,
                evaluator_name: row
                    .try_get("evaluator_name")
                    .map_err(ScoresError::persistence("Failed to read evaluator row"))?,
                display_name: row
                    .try_get("display_name")
                    .map_err(ScoresError::persistence("Failed to read evaluator row"))?,
                level: EvaluatorLevel::from_str(&level_str)
                    .map_err(|e| decode_failure("invalid evaluator level", e))?,
                aggregations: serde_json::from_str(&aggregations_json).unwrap_or_default(),
            });
        }
        Ok(evaluators)
    }

    async fn batch_create_scores(&self, scores: &[Score]) -> Result<(), ScoresError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(ScoresError::persistence("Failed to begin score upsert"))?;

        for score in scores {
            // Identity columns are never touched on conflict; only the
            // mutable columns are overwritten (last write wins).
            sqlx::query(
                r#"
                INSERT INTO scores
                    (id, run_evaluator_id, monitor_id, trace_id, span_id,
                     score, skip_reason, explanation, trace_timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(run_evaluator_id, trace_id, span_id) DO UPDATE SET
                    score = excluded.score,
                    skip_reason = excluded.skip_reason,
                    explanation = excluded.explanation,
                    trace_timestamp = excluded.trace_timestamp
                "#,
            )
            .bind(score.id.to_string())
            .bind(score.run_evaluator_id.to_string())
            .bind(score.monitor_id.to_string())
            .bind(&score.trace_id)
            .bind(score.span_id.as_deref().unwrap_or(NO_SPAN))
            .bind(score.value.value())
            .bind(score.value.skip_reason())
            .bind(score.explanation.as_deref())
            .bind(score.trace_timestamp.timestamp())
            .execute(&mut *tx)
            .await
            .map_err(ScoresError::persistence("Failed to upsert score"))?;
        }

        tx.commit()
            .await
            .map_err(ScoresError::persistence("Failed to commit score upsert"))
    }

    async fn delete_stale_scores(
        &self,
        monitor_id: Uuid,
        keep_run_evaluator_ids: &[Uuid],
    ) -> Result<u64, ScoresError> {
        let mut sql = String::from("DELETE FROM scores WHERE monitor_id = ?");
        if !keep_run_evaluator_ids.is_empty() {
            let placeholders = vec!["?"; keep_run_evaluator_ids.len()].join(", ");
            sql.push_str(&format!(" AND run_evaluator_id NOT IN ({placeholders})"));
        }

        let mut query = sqlx::query(&sql).bind(monitor_id.to_string());
        for id in keep_run_evaluator_ids {
            query = query.bind(id.to_string());
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(ScoresError::persistence("Failed to delete stale scores"))?;
        Ok(result.rows_affected())
    }

    async fn get_monitor_id(
        &self,
        org: &str,
        project: &str,
        agent: &str,
        monitor_name: &str,
    ) -> Result<Uuid, ScoresError> {
        let row = sqlx::query(
            r#"
            SELECT id FROM monitors
            WHERE org_name = ?1 AND project_name = ?2 AND agent_name = ?3 AND name = ?4
            "#,
        )
        .bind(org)
        .bind(project)
        .bind(agent)
        .bind(monitor_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(ScoresError::persistence("Failed to look up monitor"))?;

        match row {
            Some(row) => {
                let id: String = row
                    .try_get("id")
                    .map_err(ScoresError::persistence("Failed to read monitor row"))?;
                parse_uuid(&id, "invalid monitor id")
            }
            None => Err(ScoresError::not_found("monitor", monitor_name)),
        }
    }

    async fn get_evaluator_score_count(
        &self,
        monitor_id: Uuid,
        evaluator_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, ScoresError> {
        // COUNT(DISTINCT trace_id): span-level rows must not inflate the
        // density probe relative to the per-trace aggregation.
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT s.trace_id) AS trace_count
            FROM scores s
            JOIN monitor_run_evaluators e ON e.id = s.run_evaluator_id
            WHERE s.monitor_id = ?1 AND e.display_name = ?2
              AND s.trace_timestamp >= ?3 AND s.trace_timestamp <= ?4
            "#,
        )
        .bind(monitor_id.to_string())
        .bind(evaluator_name)
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(ScoresError::persistence("Failed to count evaluator scores"))?;

        row.try_get("trace_count")
            .map_err(ScoresError::persistence("Failed to read score count"))
    }

    async fn get_evaluator_trace_aggregated(
        &self,
        monitor_id: Uuid,
        evaluator_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TraceAggregation>, ScoresError> {
        // AVG ignores NULL scores, so a trace whose rows were all skipped
        // comes back with a NULL mean rather than zero.
        let rows = sqlx::query(
            r#"
            SELECT s.trace_id,
                   MIN(s.trace_timestamp) AS trace_timestamp,
                   COUNT(*) AS total_count,
                   SUM(CASE WHEN s.score IS NULL THEN 1 ELSE 0 END) AS skipped_count,
                   AVG(s.score) AS mean_score
            FROM scores s
            JOIN monitor_run_evaluators e ON e.id = s.run_evaluator_id
            WHERE s.monitor_id = ?1 AND e.display_name = ?2
              AND s.trace_timestamp >= ?3 AND s.trace_timestamp <= ?4
            GROUP BY s.trace_id
            ORDER BY trace_timestamp ASC
            LIMIT ?5
            "#,
        )
        .bind(monitor_id.to_string())
        .bind(evaluator_name)
        .bind(start.timestamp())
        .bind(end.timestamp())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ScoresError::persistence("Failed to aggregate scores by trace"))?;

        let mut aggregations = Vec::with_capacity(rows.len());
        for row in rows {
            let ts: i64 = row
                .try_get("trace_timestamp")
                .map_err(ScoresError::persistence("Failed to read trace aggregation"))?;
            aggregations.push(TraceAggregation {
                trace_id: row
                    .try_get("trace_id")
                    .map_err(ScoresError::persistence("Failed to read trace aggregation"))?,
                trace_timestamp: timestamp_from_secs(ts)?,
                mean_score: row
                    .try_get("mean_score")
                    .map_err(ScoresError::persistence("Failed to read trace aggregation"))?,
                total_count: row
                    .try_get("total_count")
                    .map_err(ScoresError::persistence("Failed to read trace aggregation"))?,
                skipped_count: row
                    .try_get("skipped_count")
                    .map_err(ScoresError::persistence("Failed to read trace aggregation"))?,
            });
        }
        Ok(aggregations)
    }

    async fn get_evaluator_time_series_aggregated(
        &self,
        monitor_id: Uuid,
        evaluator_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<TimeBucketAggregation>, ScoresError> {
        let bucket = Self::bucket_expr(granularity)?;

        // Truncation happens inside GROUP BY; empty buckets are simply
        // never produced, the series is sparse by design.
        let sql = format!(
            r#"
            SELECT {bucket} AS time_bucket,
                   COUNT(*) AS total_count,
                   SUM(CASE WHEN s.score IS NULL THEN 1 ELSE 0 END) AS skipped_count,
                   AVG(s.score) AS mean_score
            FROM scores s
            JOIN monitor_run_evaluators e ON e.id = s.run_evaluator_id
            WHERE s.monitor_id = ?1 AND e.display_name = ?2
              AND s.trace_timestamp >= ?3 AND s.trace_timestamp <= ?4
            GROUP BY time_bucket
            ORDER BY time_bucket ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(monitor_id.to_string())
            .bind(evaluator_name)
            .bind(start.timestamp())
            .bind(end.timestamp())
            .fetch_all(&self.pool)
            .await
            .map_err(ScoresError::persistence("Failed to aggregate scores by time bucket"))?;

        let mut buckets = Vec::with_capacity(rows.len());
        for row in rows {
            let bucket_secs: i64 = row
                .try_get("time_bucket")
                .map_err(ScoresError::persistence("Failed to read bucket aggregation"))?;
            buckets.push(TimeBucketAggregation {
                time_bucket: timestamp_from_secs(bucket_secs)?,
                mean_score: row
                    .try_get("mean_score")
                    .map_err(ScoresError::persistence("Failed to read bucket aggregation"))?,
                total_count: row
                    .try_get("total_count")
                    .map_err(ScoresError::persistence("Failed to read bucket aggregation"))?,
                skipped_count: row
                    .try_get("skipped_count")
                    .map_err(ScoresError::persistence("Failed to read bucket aggregation"))?,
            });
        }
        Ok(buckets)
    }

    async fn get_monitor_scores_aggregated(
        &self,
        monitor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filters: &ScoreFilters,
    ) -> Result<Vec<EvaluatorAggregation>, ScoresError> {
        // LEFT JOIN from the evaluator table so configured evaluators with
        // no in-window scores still get a summary row with count = 0.
        let mut sql = String::from(
            r#"
            SELECT e.display_name,
                   e.level,
                   MIN(e.aggregations) AS aggregations,
                   COUNT(s.id) AS total_count,
                   SUM(CASE WHEN s.id IS NOT NULL AND s.score IS NULL THEN 1 ELSE 0 END) AS skipped_count,
                   AVG(s.score) AS mean_score,
                   MIN(s.score) AS min_score,
                   MAX(s.score) AS max_score
            FROM monitor_run_evaluators e
            LEFT JOIN scores s ON s.run_evaluator_id = e.id
              AND s.trace_timestamp >= ? AND s.trace_timestamp <= ?
            WHERE e.monitor_id = ?
            "#,
        );
        if filters.evaluator.is_some() {
            sql.push_str(" AND e.display_name = ?");
        }
        if filters.level.is_some() {
            sql.push_str(" AND e.level = ?");
        }
        sql.push_str(
            r#"
            GROUP BY e.display_name, e.level
            ORDER BY e.display_name ASC
            "#,
        );

        let mut query = sqlx::query(&sql)
            .bind(start.timestamp())
            .bind(end.timestamp())
            .bind(monitor_id.to_string());
        if let Some(evaluator) = &filters.evaluator {
            query = query.bind(evaluator);
        }
        if let Some(level) = filters.level {
            query = query.bind(level.to_string());
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(ScoresError::persistence("Failed to aggregate monitor scores"))?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let level_str: String = row
                .try_get("level")
                .map_err(ScoresError::persistence("Failed to read evaluator aggregation"))?;
            let aggregations_json: String = row
                .try_get("aggregations")
                .map_err(ScoresError::persistence("Failed to read evaluator aggregation"))?;

            summaries.push(EvaluatorAggregation {
                evaluator_name: row
                    .try_get("display_name")
                    .map_err(ScoresError::persistence("Failed to read evaluator aggregation"))?,
                level: EvaluatorLevel::from_str(&level_str)
                    .map_err(|e| decode_failure("invalid evaluator level", e))?,
                configured_aggregations: serde_json::from_str(&aggregations_json)
                    .unwrap_or_default(),
                total_count: row
                    .try_get("total_count")
                    .map_err(ScoresError::persistence("Failed to read evaluator aggregation"))?,
                skipped_count: row
                    .try_get("skipped_count")
                    .map_err(ScoresError::persistence("Failed to read evaluator aggregation"))?,
                mean_score: row
                    .try_get("mean_score")
                    .map_err(ScoresError::persistence("Failed to read evaluator aggregation"))?,
                min_score: row
                    .try_get("min_score")
                    .map_err(ScoresError::persistence("Failed to read evaluator aggregation"))?,
                max_score: row
                    .try_get("max_score")
                    .map_err(ScoresError::persistence("Failed to read evaluator aggregation"))?,
            });
        }
        Ok(summaries)
    }

    async fn get_scores_by_trace_id(
        &self,
        org: &str,
        project: &str,
        agent: &str,
        trace_id: &str,
    ) -> Result<Vec<TraceScore>, ScoresError> {
        let rows = sqlx::query(
            r#"
            SELECT m.name AS monitor_name,
                   e.display_name,
                   e.level,
                   s.span_id,
                   s.score,
                   s.skip_reason,
                   s.explanation,
                   s.trace_timestamp
            FROM scores s
            JOIN monitor_run_evaluators e ON e.id = s.run_evaluator_id
            JOIN monitors m ON m.id = s.monitor_id
            WHERE s.trace_id = ?1
              AND m.org_name = ?2 AND m.project_name = ?3 AND m.agent_name = ?4
            ORDER BY s.trace_timestamp ASC, e.display_name ASC
            "#,
        )
        .bind(trace_id)
        .bind(org)
        .bind(project)
        .bind(agent)
        .fetch_all(&self.pool)
        .await
        .map_err(ScoresError::persistence("Failed to load trace scores"))?;

        let mut scores = Vec::with_capacity(rows.len());
        for row in rows {
            let level_str: String = row
                .try_get("level")
                .map_err(ScoresError::persistence("Failed to read trace score"))?;
            let span_id: String = row
                .try_get("span_id")
                .map_err(ScoresError::persistence("Failed to read trace score"))?;
            let score: Option<f64> = row
                .try_get("score")
                .map_err(ScoresError::persistence("Failed to read trace score"))?;
            let skip_reason: Option<String> = row
                .try_get("skip_reason")
                .map_err(ScoresError::persistence("Failed to read trace score"))?;
            let ts: i64 = row
                .try_get("trace_timestamp")
                .map_err(ScoresError::persistence("Failed to read trace score"))?;

            scores.push(TraceScore {
                monitor_name: row
                    .try_get("monitor_name")
                    .map_err(ScoresError::persistence("Failed to read trace score"))?,
                evaluator_name: row
                    .try_get("display_name")
                    .map_err(ScoresError::persistence("Failed to read trace score"))?,
                level: EvaluatorLevel::from_str(&level_str)
                    .map_err(|e| decode_failure("invalid evaluator level", e))?,
                span_id: (span_id != NO_SPAN).then_some(span_id),
                value: score_value_from_columns(score, skip_reason),
                explanation: row
                    .try_get("explanation")
                    .map_err(ScoresError::persistence("Failed to read trace score"))?,
                trace_timestamp: timestamp_from_secs(ts)?,
            });
        }
        Ok(scores)
    }
}
