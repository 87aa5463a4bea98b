use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

/// Idempotent schema creation. Analysis columns live inline on the news
/// item row; list-valued fields are JSON text.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS news_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            published_at TEXT,
            created_at TEXT NOT NULL,
            processed_by_llm INTEGER NOT NULL DEFAULT 0,
            processed_at TEXT,
            executive_summary TEXT NOT NULL DEFAULT '',
            detailed_summary TEXT NOT NULL DEFAULT '',
            technical_details TEXT NOT NULL DEFAULT '',
            affected_systems TEXT NOT NULL DEFAULT '[]',
            affected_users TEXT NOT NULL DEFAULT '',
            business_impact TEXT NOT NULL DEFAULT '',
            risk_level TEXT NOT NULL DEFAULT 'low',
            risk_score INTEGER NOT NULL DEFAULT 5,
            risk_reasoning TEXT NOT NULL DEFAULT '',
            immediate_actions TEXT NOT NULL DEFAULT '[]',
            long_term_recommendations TEXT NOT NULL DEFAULT '[]',
            indicators_of_compromise TEXT NOT NULL DEFAULT '[]',
            reference_links TEXT NOT NULL DEFAULT '[]',
            priority INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create news_items table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_news_items_eligibility
         ON news_items (processed_by_llm, created_at)",
    )
    .execute(pool)
    .await
    .context("Failed to create eligibility index")?;

    // Singleton row; presence of id=1 means a run holds the lock.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            started_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create run_lock table")?;

    info!("Store schema up to date");
    Ok(())
}
