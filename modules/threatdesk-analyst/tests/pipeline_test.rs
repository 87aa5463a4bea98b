//! End-to-end pipeline scenarios against an in-memory store and a
//! scripted reasoner. No network, no real model: the reasoner seam is
//! where nondeterminism lives, so these tests pin it down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use ollama_client::{GenerateOptions, OllamaError};
use threatdesk_analyst::reasoner::Reasoner;
use threatdesk_analyst::retry::RetryPolicy;
use threatdesk_analyst::run::{Pipeline, RunParams, RunReport};
use threatdesk_common::{RiskLevel, ThreatdeskError};
use threatdesk_store::{NewCandidate, Store};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Scripted reasoner: per-title score replies, one analysis reply for
/// everyone, and a set of titles whose calls always transport-fail.
#[derive(Default)]
struct ScriptedReasoner {
    scores: HashMap<String, String>,
    analysis_reply: String,
    unavailable_titles: HashSet<String>,
}

impl ScriptedReasoner {
    fn new() -> Self {
        Self {
            analysis_reply: valid_analysis_json(),
            ..Self::default()
        }
    }

    fn score_reply(mut self, title: &str, reply: &str) -> Self {
        self.scores.insert(title.to_string(), reply.to_string());
        self
    }

    fn analysis_reply(mut self, reply: &str) -> Self {
        self.analysis_reply = reply.to_string();
        self
    }

    fn unavailable_for(mut self, title: &str) -> Self {
        self.unavailable_titles.insert(title.to_string());
        self
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> ollama_client::Result<String> {
        if self
            .unavailable_titles
            .iter()
            .any(|title| prompt.contains(title.as_str()))
        {
            return Err(OllamaError::Unavailable("connection refused".into()));
        }

        // Scoring prompts ask for a bare integer; everything else is the
        // deep-analysis prompt.
        if prompt.contains("single integer") {
            for (title, reply) in &self.scores {
                if prompt.contains(title.as_str()) {
                    return Ok(reply.clone());
                }
            }
            return Ok("50".to_string());
        }
        Ok(self.analysis_reply.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn valid_analysis_json() -> String {
    serde_json::json!({
        "executive_summary": "Actively exploited flaw in widely deployed software.",
        "detailed_summary": "Attackers chain the bug with stolen credentials.",
        "technical_details": "Unauthenticated path traversal to RCE.",
        "affected_systems": ["Acme Gateway 3.x"],
        "affected_users": "Enterprises exposing the management port.",
        "business_impact": "Data theft and service disruption.",
        "risk_assessment": {
            "risk_level": "high",
            "risk_score": 8,
            "reasoning": "Public exploit code and broad exposure."
        },
        "immediate_actions": ["Apply vendor patch"],
        "long_term_recommendations": ["Remove management ports from the internet"],
        "indicators_of_compromise": [],
        "references": []
    })
    .to_string()
}

async fn seeded_store(titles: &[&str]) -> Store {
    let store = Store::connect_in_memory().await.expect("connect");
    store.migrate().await.expect("migrate");
    for (i, title) in titles.iter().enumerate() {
        store
            .insert_candidate(&NewCandidate {
                source: "example.com".into(),
                url: format!("https://example.com/{i}"),
                title: title.to_string(),
                summary: format!("summary of {title}"),
                content: format!("full article about {title}"),
                published_at: Some(Utc::now()),
            })
            .await
            .expect("insert");
        // Distinct scrape timestamps so tie-breaks are well-defined.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    store
}

fn params(top_n: usize) -> RunParams {
    RunParams {
        top_n,
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        ..RunParams::default()
    }
}

async fn run(store: &Store, reasoner: ScriptedReasoner, top_n: usize) -> RunReport {
    Pipeline::new(store.clone(), Arc::new(reasoner), params(top_n))
        .run()
        .await
        .expect("run")
}

// ---------------------------------------------------------------------------
// Scenario A: scores [90, 85, 85, 40, 10], N=2 → [90, earlier-scraped 85]
// ---------------------------------------------------------------------------

#[tokio::test]
async fn top_two_selection_breaks_tie_by_scrape_time() {
    let store = seeded_store(&["ninety", "early tie", "late tie", "forty", "ten"]).await;
    let reasoner = ScriptedReasoner::new()
        .score_reply("ninety", "90")
        .score_reply("early tie", "85")
        .score_reply("late tie", "85")
        .score_reply("forty", "40")
        .score_reply("ten", "10");

    let report = run(&store, reasoner, 2).await;

    assert_eq!(report.stats.eligible, 5);
    assert_eq!(report.stats.scored_ok, 5);
    assert_eq!(report.stats.selected, 2);

    let titles: Vec<&str> = report
        .items
        .iter()
        .map(|i| i.candidate.title.as_str())
        .collect();
    assert_eq!(
        titles,
        vec!["ninety", "early tie"],
        "equal scores must prefer the earlier-scraped candidate"
    );
    assert_eq!(report.items[0].score, 90);
    assert_eq!(report.items[1].score, 85);

    // Both analyses succeeded, so both are now processed.
    assert_eq!(report.stats.analyzed_ok, 2);
    assert_eq!(store.count_unprocessed().await.unwrap(), 3);
}

// ---------------------------------------------------------------------------
// Scenario B: reasoner unavailable for one candidate during scoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transport_failed_candidate_gets_neutral_score_and_stays_in() {
    let store = seeded_store(&["healthy item", "unreachable item"]).await;
    let reasoner = ScriptedReasoner::new()
        .score_reply("healthy item", "70")
        .unavailable_for("unreachable item");

    let report = run(&store, reasoner, 5).await;

    assert_eq!(report.stats.eligible, 2);
    assert_eq!(report.stats.scored_failed, 1);
    assert_eq!(report.stats.scored_ok, 1);
    // Still passed to selection, just ranked by its neutral default.
    assert_eq!(report.stats.selected, 2);

    let failed = report
        .items
        .iter()
        .find(|i| i.candidate.title == "unreachable item")
        .expect("failed candidate still selected");
    assert_eq!(failed.score, 5, "neutral default score");
    assert!(report.rationale.contains("(default score)"));
}

// ---------------------------------------------------------------------------
// Scenario C: deep analysis returns plain prose with no structured fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prose_analysis_degrades_and_candidate_stays_eligible() {
    let store = seeded_store(&["vague story"]).await;
    let reasoner = ScriptedReasoner::new()
        .score_reply("vague story", "80")
        .analysis_reply("I think this is probably concerning but hard to say.");

    let report = run(&store, reasoner, 3).await;

    assert_eq!(report.stats.selected, 1);
    assert_eq!(report.stats.analyzed_ok, 0);
    assert_eq!(report.stats.analyzed_failed, 1);

    let analysis = &report.items[0].analysis;
    assert_eq!(analysis.risk_level, RiskLevel::Medium);
    assert_eq!(analysis.risk_score, 5);
    assert!(analysis.immediate_actions.is_empty());
    assert!(analysis.long_term_recommendations.is_empty());
    assert!(!analysis.analysis_succeeded);

    // Not committed: still eligible next run.
    assert_eq!(store.count_unprocessed().await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Idempotence: a second run with no new candidates processes nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_run_with_no_new_candidates_is_a_noop() {
    let store = seeded_store(&["one", "two"]).await;

    let first = run(&store, ScriptedReasoner::new(), 10).await;
    assert_eq!(first.stats.analyzed_ok, 2);
    assert_eq!(store.count_unprocessed().await.unwrap(), 0);

    let second = run(&store, ScriptedReasoner::new(), 10).await;
    assert_eq!(second.stats.eligible, 0);
    assert_eq!(second.stats.selected, 0);
    assert_eq!(second.stats.analyzed_ok, 0, "nothing left to process");
}

// ---------------------------------------------------------------------------
// Single-instance law: a held lock aborts the run without store mutation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn held_lock_aborts_immediately_without_mutation() {
    let store = seeded_store(&["item"]).await;
    assert!(store.acquire_run_lock().await.unwrap());

    let result = Pipeline::new(
        store.clone(),
        Arc::new(ScriptedReasoner::new()),
        params(10),
    )
    .run()
    .await;

    assert!(
        matches!(result, Err(ThreatdeskError::LockConflict)),
        "expected lock conflict, got {result:?}"
    );
    assert_eq!(
        store.count_unprocessed().await.unwrap(),
        1,
        "no store mutation on abort"
    );

    // The foreign lock must survive the aborted run's cleanup... the
    // aborted run never acquired it, so it must not release it either.
    assert!(
        !store.acquire_run_lock().await.unwrap(),
        "lock still held by the original owner"
    );
}

// ---------------------------------------------------------------------------
// Lock release: a completed run leaves the lock free
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lock_is_released_after_a_run() {
    let store = seeded_store(&["item"]).await;
    run(&store, ScriptedReasoner::new(), 10).await;
    assert!(
        store.acquire_run_lock().await.unwrap(),
        "lock must be free after the run"
    );
    store.release_run_lock().await.unwrap();
}
