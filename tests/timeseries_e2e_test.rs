//! End-to-end: service + SQLite repository, no mocks. Exercises the full
//! probe -> classify -> aggregate pipeline over real rows.

use chrono::{DateTime, Duration, TimeZone, Utc};
use scoreline::application::MonitorScoresService;
use scoreline::domain::granularity::Granularity;
use scoreline::domain::repositories::ScoreFilters;
use scoreline::domain::score::{EvaluatorLevel, MonitorRunEvaluator, Score, ScoreValue};
use scoreline::infrastructure::{Database, SqliteScoreRepository};
use std::sync::Arc;
use uuid::Uuid;

struct Env {
    service: MonitorScoresService,
    run_evaluator_id: Uuid,
    monitor_id: Uuid,
}

async fn setup() -> Env {
    scoreline::infrastructure::observability::init_tracing();

    let db = Database::new("sqlite::memory:")
        .await
        .expect("in-memory database");

    let monitor_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO monitors (id, name, org_name, project_name, agent_name) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(monitor_id.to_string())
    .bind("prod-quality")
    .bind("org1")
    .bind("proj1")
    .bind("agent1")
    .execute(&db.pool)
    .await
    .expect("seed monitor");

    let repository = Arc::new(SqliteScoreRepository::new(db.pool.clone()));
    let service = MonitorScoresService::new(repository);

    let run_evaluator_id = Uuid::new_v4();
    service
        .register_run_evaluators(
            monitor_id,
            &[MonitorRunEvaluator {
                id: run_evaluator_id,
                monitor_run_id: Uuid::new_v4(),
                monitor_id,
                evaluator_name: "helpfulness".to_string(),
                display_name: "Helpfulness".to_string(),
                level: EvaluatorLevel::Trace,
                aggregations: vec!["mean".to_string()],
            }],
        )
        .await
        .expect("register evaluators");

    Env {
        service,
        run_evaluator_id,
        monitor_id,
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap()
}

fn seed_scores(env: &Env, count: usize, base: DateTime<Utc>, interval: Duration) -> Vec<Score> {
    (0..count)
        .map(|i| Score {
            id: Uuid::new_v4(),
            run_evaluator_id: env.run_evaluator_id,
            monitor_id: env.monitor_id,
            trace_id: format!("trace-{i:04}"),
            span_id: None,
            value: ScoreValue::Scored((i % 10) as f64 / 10.0),
            explanation: None,
            trace_timestamp: base + interval * i as i32,
        })
        .collect()
}

#[tokio::test]
async fn three_day_window_with_51_traces_aggregates_hourly() {
    let env = setup().await;
    let base = base_time();

    let scores = seed_scores(&env, 51, base, Duration::minutes(30));
    env.service
        .record_scores(&scores)
        .await
        .expect("record scores");

    let result = env
        .service
        .get_evaluator_time_series(env.monitor_id, "Helpfulness", base, base + Duration::days(3))
        .await
        .expect("time series");

    assert_eq!(result.granularity, Granularity::Hour);
    // 51 scores every 30 minutes: two per hour bucket, no gaps.
    assert!(!result.points.is_empty());
    assert_eq!(result.points[0].timestamp, base);
    assert_eq!(result.points[0].count, 2);
    for window in result.points.windows(2) {
        assert!(window[0].timestamp < window[1].timestamp, "ascending order");
    }
}

#[tokio::test]
async fn three_day_window_with_50_traces_stays_raw() {
    let env = setup().await;
    let base = base_time();

    let scores = seed_scores(&env, 50, base, Duration::minutes(30));
    env.service
        .record_scores(&scores)
        .await
        .expect("record scores");

    let result = env
        .service
        .get_evaluator_time_series(env.monitor_id, "Helpfulness", base, base + Duration::days(3))
        .await
        .expect("time series");

    assert_eq!(result.granularity, Granularity::Trace);
    assert_eq!(result.points.len(), 50, "raw per-trace points, capped at 50");
    assert_eq!(result.points[0].timestamp, base);
}

#[tokio::test]
async fn re_recording_scores_is_idempotent() {
    let env = setup().await;
    let base = base_time();

    let scores = seed_scores(&env, 10, base, Duration::minutes(1));
    env.service.record_scores(&scores).await.expect("record");
    // Gateway retry: the same batch lands twice.
    env.service.record_scores(&scores).await.expect("re-record");

    let result = env
        .service
        .get_evaluator_time_series(
            env.monitor_id,
            "Helpfulness",
            base,
            base + Duration::hours(1),
        )
        .await
        .expect("time series");
    assert_eq!(result.granularity, Granularity::Trace);
    assert_eq!(result.points.len(), 10, "no duplicates after redelivery");
}

#[tokio::test]
async fn by_name_assembly_and_summary_agree_on_counts() {
    let env = setup().await;
    let base = base_time();

    let mut scores = seed_scores(&env, 4, base, Duration::minutes(5));
    scores.push(Score {
        id: Uuid::new_v4(),
        run_evaluator_id: env.run_evaluator_id,
        monitor_id: env.monitor_id,
        trace_id: "trace-skip".to_string(),
        span_id: None,
        value: ScoreValue::Skipped("model returned no output".to_string()),
        explanation: None,
        trace_timestamp: base + Duration::minutes(20),
    });
    env.service.record_scores(&scores).await.expect("record");

    let series = env
        .service
        .get_evaluator_time_series_by_name(
            "org1",
            "proj1",
            "agent1",
            "prod-quality",
            "Helpfulness",
            base,
            base + Duration::hours(1),
        )
        .await
        .expect("time series");
    assert_eq!(series.granularity, Granularity::Trace);
    assert_eq!(series.points.len(), 5);

    let summary = env
        .service
        .get_monitor_scores(
            env.monitor_id,
            base,
            base + Duration::hours(1),
            &ScoreFilters::default(),
        )
        .await
        .expect("summary");
    assert_eq!(summary.evaluators.len(), 1);
    let evaluator = &summary.evaluators[0];
    assert_eq!(evaluator.evaluator_name, "Helpfulness");
    assert_eq!(evaluator.level, EvaluatorLevel::Trace);
    assert_eq!(evaluator.count, 5);
    assert_eq!(evaluator.error_count, 1);
    assert!(evaluator.aggregations.contains_key("mean"));

    let trace_scores = env
        .service
        .get_trace_scores("org1", "proj1", "agent1", "trace-skip")
        .await
        .expect("trace listing");
    assert_eq!(trace_scores.len(), 1);
    assert_eq!(
        trace_scores[0].value,
        ScoreValue::Skipped("model returned no output".to_string())
    );
}
