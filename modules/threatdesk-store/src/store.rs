use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use threatdesk_common::{AnalysisRecord, CandidateRecord};

use crate::migrate;

/// A run lock older than this is considered abandoned by a killed process
/// and is cleared on the next acquisition attempt.
const LOCK_STALE_MINUTES: i64 = 30;

/// A candidate as produced by the scraper, before it has an id.
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub source: String,
    pub url: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// SQLite-backed store for candidates, analysis results, and the
/// single-instance run lock. Workers only ever read through this; all
/// writes happen from the run coordinator.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {database_url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite")?;
        info!(database_url, "Connected to store");
        Ok(Self { pool })
    }

    /// Shared in-memory database for tests. A single connection keeps
    /// every query on the same memory instance.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        migrate::migrate(&self.pool).await
    }

    // --- Candidates ---

    /// Unprocessed candidates scraped at or after `since`, newest first,
    /// optionally capped.
    pub async fn fetch_eligible(
        &self,
        since: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<CandidateRecord>> {
        let limit = limit.map(i64::from).unwrap_or(-1);
        let rows = sqlx::query(
            "SELECT id, source, url, title, summary, content, published_at, created_at,
                    processed_by_llm
             FROM news_items
             WHERE processed_by_llm = 0 AND created_at >= ?
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch eligible candidates")?;

        rows.iter().map(candidate_from_row).collect()
    }

    /// Insert a scraped candidate. Returns false when the URL is already
    /// known (duplicate scrape).
    pub async fn insert_candidate(&self, candidate: &NewCandidate) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO news_items
                 (source, url, title, summary, content, published_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&candidate.source)
        .bind(&candidate.url)
        .bind(&candidate.title)
        .bind(&candidate.summary)
        .bind(&candidate.content)
        .bind(candidate.published_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert candidate")?;
        Ok(result.rows_affected() == 1)
    }

    /// Persist an analysis and flip the processed flag in one statement.
    /// Only called for records with `analysis_succeeded == true`; failed
    /// analyses leave the row untouched and eligible for the next run.
    pub async fn mark_processed(&self, id: i64, analysis: &AnalysisRecord) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE news_items SET
                 executive_summary = ?,
                 detailed_summary = ?,
                 technical_details = ?,
                 affected_systems = ?,
                 affected_users = ?,
                 business_impact = ?,
                 risk_level = ?,
                 risk_score = ?,
                 risk_reasoning = ?,
                 immediate_actions = ?,
                 long_term_recommendations = ?,
                 indicators_of_compromise = ?,
                 reference_links = ?,
                 priority = ?,
                 processed_by_llm = 1,
                 processed_at = ?
             WHERE id = ?",
        )
        .bind(&analysis.executive_summary)
        .bind(&analysis.detailed_summary)
        .bind(&analysis.technical_details)
        .bind(json_list(&analysis.affected_systems)?)
        .bind(&analysis.affected_users)
        .bind(&analysis.business_impact)
        .bind(analysis.risk_level.as_str())
        .bind(i64::from(analysis.risk_score))
        .bind(&analysis.risk_reasoning)
        .bind(json_list(&analysis.immediate_actions)?)
        .bind(json_list(&analysis.long_term_recommendations)?)
        .bind(json_list(&analysis.indicators_of_compromise)?)
        .bind(json_list(&analysis.references)?)
        .bind(i64::from(analysis.priority))
        .bind(analysis.processed_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark candidate {id} processed"))?
        .rows_affected();

        if affected == 0 {
            warn!(id, "mark_processed matched no row");
        }
        Ok(())
    }

    pub async fn count_all(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM news_items")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count candidates")
    }

    pub async fn count_unprocessed(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM news_items WHERE processed_by_llm = 0")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count unprocessed candidates")
    }

    // --- Run lock ---

    /// Acquire the single-instance run lock. Returns false if another run
    /// holds it. Stale locks from killed processes are cleared first; the
    /// insert itself is atomic, so there is no check-then-create race.
    pub async fn acquire_run_lock(&self) -> Result<bool> {
        let stale_cutoff = Utc::now() - chrono::Duration::minutes(LOCK_STALE_MINUTES);
        sqlx::query("DELETE FROM run_lock WHERE started_at < ?")
            .bind(stale_cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to clear stale run lock")?;

        let result = sqlx::query("INSERT OR IGNORE INTO run_lock (id, started_at) VALUES (1, ?)")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .context("Failed to acquire run lock")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn release_run_lock(&self) -> Result<()> {
        sqlx::query("DELETE FROM run_lock WHERE id = 1")
            .execute(&self.pool)
            .await
            .context("Failed to release run lock")?;
        Ok(())
    }
}

fn json_list(items: &[String]) -> Result<String> {
    serde_json::to_string(items).context("Failed to encode list column")
}

fn candidate_from_row(row: &SqliteRow) -> Result<CandidateRecord> {
    Ok(CandidateRecord {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        content: row.try_get("content")?,
        published_at: row.try_get("published_at")?,
        scraped_at: row.try_get("created_at")?,
        processed: row.try_get::<i64, _>("processed_by_llm")? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use threatdesk_common::RiskLevel;

    async fn test_store() -> Store {
        let store = Store::connect_in_memory().await.expect("connect");
        store.migrate().await.expect("migrate");
        store
    }

    fn new_candidate(url: &str, title: &str) -> NewCandidate {
        NewCandidate {
            source: "example.com".into(),
            url: url.into(),
            title: title.into(),
            summary: format!("summary of {title}"),
            content: String::new(),
            published_at: Some(Utc::now()),
        }
    }

    fn analysis(now: DateTime<Utc>) -> AnalysisRecord {
        AnalysisRecord {
            executive_summary: "exec".into(),
            detailed_summary: "detail".into(),
            technical_details: "tech".into(),
            affected_systems: vec!["Exchange Server".into()],
            affected_users: "enterprise admins".into(),
            business_impact: "downtime".into(),
            risk_level: RiskLevel::High,
            risk_score: 8,
            risk_reasoning: "actively exploited".into(),
            immediate_actions: vec!["patch now".into()],
            long_term_recommendations: vec!["segment network".into()],
            indicators_of_compromise: vec![],
            references: vec![],
            priority: RiskLevel::High.priority(),
            processed_at: now,
            analysis_succeeded: true,
        }
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = test_store().await;
        store.migrate().await.expect("second migrate");
    }

    #[tokio::test]
    async fn insert_dedups_on_url() {
        let store = test_store().await;
        assert!(store
            .insert_candidate(&new_candidate("https://a.example/x", "one"))
            .await
            .unwrap());
        assert!(
            !store
                .insert_candidate(&new_candidate("https://a.example/x", "one again"))
                .await
                .unwrap(),
            "same URL should be ignored"
        );
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fetch_eligible_respects_window_and_limit() {
        let store = test_store().await;
        for i in 0..5 {
            store
                .insert_candidate(&new_candidate(&format!("https://a.example/{i}"), "item"))
                .await
                .unwrap();
        }

        let since = Utc::now() - ChronoDuration::hours(24);
        let all = store.fetch_eligible(since, None).await.unwrap();
        assert_eq!(all.len(), 5);

        let capped = store.fetch_eligible(since, Some(2)).await.unwrap();
        assert_eq!(capped.len(), 2);

        // A window entirely in the future excludes everything.
        let future = Utc::now() + ChronoDuration::hours(1);
        let none = store.fetch_eligible(future, None).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn mark_processed_removes_from_eligible() {
        let store = test_store().await;
        store
            .insert_candidate(&new_candidate("https://a.example/1", "breach"))
            .await
            .unwrap();

        let since = Utc::now() - ChronoDuration::hours(1);
        let eligible = store.fetch_eligible(since, None).await.unwrap();
        assert_eq!(eligible.len(), 1);
        let id = eligible[0].id;

        store.mark_processed(id, &analysis(Utc::now())).await.unwrap();

        let after = store.fetch_eligible(since, None).await.unwrap();
        assert!(after.is_empty(), "processed rows must not be re-fetched");
        assert_eq!(store.count_unprocessed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_lock_is_exclusive_until_released() {
        let store = test_store().await;
        assert!(store.acquire_run_lock().await.unwrap());
        assert!(
            !store.acquire_run_lock().await.unwrap(),
            "second acquisition must fail while held"
        );
        store.release_run_lock().await.unwrap();
        assert!(store.acquire_run_lock().await.unwrap());
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let store = test_store().await;
        // Simulate a lock left behind by a killed process an hour ago.
        sqlx::query("INSERT INTO run_lock (id, started_at) VALUES (1, ?)")
            .bind(Utc::now() - ChronoDuration::hours(1))
            .execute(&store.pool)
            .await
            .unwrap();
        assert!(
            store.acquire_run_lock().await.unwrap(),
            "stale lock should be cleared and re-acquired"
        );
    }
}
