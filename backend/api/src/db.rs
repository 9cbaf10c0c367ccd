//! Database layer — migrations, journal writes, and journal queries.

use escrow_protocol::JournalEvent;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::Result;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    // Make sure the file is created if it doesn't exist yet.
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Journal writes
// ─────────────────────────────────────────────────────────

/// Persist one journal event. Events sharing a sequence number are
/// silently ignored so a replayed stream stays idempotent.
pub async fn insert_journal_event(pool: &SqlitePool, event: &JournalEvent) -> Result<usize> {
    let rows_affected = sqlx::query(
        r#"
        INSERT OR IGNORE INTO journal
            (seq, project_id, kind, actor, milestone, amount, note, at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(event.seq as i64)
    .bind(event.project_id.0 as i64)
    .bind(event.kind.as_str())
    .bind(event.actor.as_ref().map(|a| a.0.clone()))
    .bind(event.milestone.map(|m| m as i64))
    // i128 amounts exceed SQLite's integer range; stored as text.
    .bind(event.amount.map(|a| a.to_string()))
    .bind(event.note.clone())
    .bind(event.at as i64)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected as usize)
}

// ─────────────────────────────────────────────────────────
// Journal reads
// ─────────────────────────────────────────────────────────

/// A journal row as stored in / read from the database.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct JournalRow {
    pub seq: i64,
    pub project_id: i64,
    pub kind: String,
    pub actor: Option<String>,
    pub milestone: Option<i64>,
    pub amount: Option<String>,
    pub note: Option<String>,
    pub at: i64,
    pub created_at: i64,
}

/// Fetch all journal rows for a given project, oldest first.
pub async fn get_journal_for_project(pool: &SqlitePool, project_id: i64) -> Result<Vec<JournalRow>> {
    let rows = sqlx::query_as::<_, JournalRow>(
        r#"
        SELECT seq, project_id, kind, actor, milestone, amount, note, at, created_at
        FROM   journal
        WHERE  project_id = ?1
        ORDER  BY seq ASC
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch the full journal across all projects, oldest first.
pub async fn get_all_journal(pool: &SqlitePool) -> Result<Vec<JournalRow>> {
    let rows = sqlx::query_as::<_, JournalRow>(
        r#"
        SELECT seq, project_id, kind, actor, milestone, amount, note, at, created_at
        FROM   journal
        ORDER  BY seq ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
