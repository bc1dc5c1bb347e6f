use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared database handle
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        // An in-memory SQLite database exists per connection, so the pool
        // must stay at one connection for it to behave like one database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. Monitors table. Owned by the external monitor lifecycle; this
        // engine only reads it to resolve monitor ids by name.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                org_name TEXT NOT NULL,
                project_name TEXT NOT NULL,
                agent_name TEXT NOT NULL,
                UNIQUE (org_name, project_name, agent_name, name)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create monitors table")?;

        // 2. Monitor run evaluators table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_run_evaluators (
                id TEXT PRIMARY KEY,
                monitor_run_id TEXT NOT NULL,
                monitor_id TEXT NOT NULL,
                evaluator_name TEXT NOT NULL,
                display_name TEXT NOT NULL,
                level TEXT NOT NULL,
                aggregations TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_run_evaluators_monitor
            ON monitor_run_evaluators (monitor_id, display_name);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create monitor_run_evaluators table")?;

        // 3. Scores table. span_id uses '' as the "no span" sentinel so the
        // composite unique index stays NULL-safe (SQLite treats NULLs as
        // distinct in unique indexes).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scores (
                id TEXT PRIMARY KEY,
                run_evaluator_id TEXT NOT NULL,
                monitor_id TEXT NOT NULL,
                trace_id TEXT NOT NULL,
                span_id TEXT NOT NULL DEFAULT '',
                score REAL,
                skip_reason TEXT,
                explanation TEXT,
                trace_timestamp INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS uq_score_per_item
            ON scores (run_evaluator_id, trace_id, span_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create scores table")?;

        // Index for time-range aggregation queries on scores
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_scores_monitor_time
            ON scores (monitor_id, trace_timestamp);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create scores index")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
