//! Agent database operations

use callqa_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::Agent;

use super::parse_uuid;

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<Agent> {
    let id: String = row.get("id");
    Ok(Agent {
        id: parse_uuid(&id, "id")?,
        display_name: row.get("display_name"),
        username: row.get("username"),
        extension: row.get("extension"),
    })
}

/// Load an agent by document id
pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<Agent>> {
    let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_agent).transpose()
}

/// Upsert an agent keyed by platform username; returns its document id
pub async fn upsert_by_username(
    pool: &SqlitePool,
    username: &str,
    display_name: &str,
    extension: Option<&str>,
) -> Result<Uuid> {
    sqlx::query(
        r#"
        INSERT INTO agents (id, display_name, username, extension)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(username) DO UPDATE SET
            display_name = excluded.display_name,
            extension = excluded.extension
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(display_name)
    .bind(username)
    .bind(extension)
    .execute(pool)
    .await?;

    let id: String = sqlx::query_scalar("SELECT id FROM agents WHERE username = ?")
        .bind(username)
        .fetch_one(pool)
        .await?;

    parse_uuid(&id, "id")
}

/// List all agents
pub async fn list(pool: &SqlitePool) -> Result<Vec<Agent>> {
    let rows = sqlx::query("SELECT * FROM agents ORDER BY display_name ASC")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_agent).collect()
}
