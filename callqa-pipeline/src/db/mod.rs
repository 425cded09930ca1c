//! Database access for the CallQA pipeline
//!
//! Single shared SQLite database. Multi-row mutations (transcript write +
//! statistics delta) run inside `sqlx` transactions; status transitions are
//! guarded compare-and-set updates.

pub mod agents;
pub mod calls;
pub mod rubric;
pub mod settings;
pub mod stats;
pub mod statuses;
pub mod transcripts;

use callqa_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

/// Initialize database connection pool, creating the file and tables if
/// they don't exist
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the pipeline tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calls (
            id TEXT PRIMARY KEY,
            call_id TEXT NOT NULL UNIQUE,
            activity_name TEXT NOT NULL,
            call_time TEXT NOT NULL,
            duration INTEGER,
            direction TEXT,
            answered INTEGER,
            agent_id TEXT,
            question_group_id TEXT,
            processing_status TEXT NOT NULL DEFAULT 'synced',
            processing_error TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_processed_at TEXT,
            qa_score INTEGER,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_calls_processing_status ON calls(processing_status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            username TEXT NOT NULL UNIQUE,
            extension TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transcripts (
            call_id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            language_code TEXT NOT NULL,
            utterances TEXT NOT NULL DEFAULT '[]',
            qa_completed_at TEXT,
            qa_results TEXT,
            human_review TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS question_groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            system_prompt TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS questions (
            question_id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            question TEXT NOT NULL,
            context TEXT NOT NULL DEFAULT '',
            reference_script TEXT,
            good_examples TEXT NOT NULL DEFAULT '[]',
            bad_examples TEXT NOT NULL DEFAULT '[]',
            possible_answers TEXT NOT NULL DEFAULT '[]',
            sort_order INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_questions_group ON questions(group_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_stats (
            agent_id TEXT NOT NULL,
            question_group_id TEXT NOT NULL,
            analyzed_count INTEGER NOT NULL DEFAULT 0,
            total_score INTEGER NOT NULL DEFAULT 0,
            total_duration INTEGER NOT NULL DEFAULT 0,
            last_updated_at TEXT NOT NULL,
            PRIMARY KEY (agent_id, question_group_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS question_stats (
            question_id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            tak_count INTEGER NOT NULL DEFAULT 0,
            nie_count INTEGER NOT NULL DEFAULT 0,
            total_count INTEGER NOT NULL DEFAULT 0,
            last_updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS platform_statuses (
            status_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            title TEXT NOT NULL,
            question_group_id TEXT,
            is_active_for_qa INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}

/// Parse an RFC3339 timestamp column
pub(crate) fn parse_datetime(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Parse a UUID column
pub(crate) fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}
