use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use ollama_client::GenerateOptions;
use threatdesk_common::{CandidateRecord, ScoredCandidate};

use crate::interpreter::{interpret_score, Interpretation};
use crate::reasoner::Reasoner;
use crate::retry::{with_backoff, RetryPolicy};

/// The score answer is a bare integer; no need for a generous budget.
const SCORE_MAX_TOKENS: u32 = 20;

/// Assigns each candidate an importance score in [1, 100] via one
/// reasoner call. Total: a candidate whose every attempt transport-fails
/// still comes back scored (neutral default, failure flag set) and stays
/// eligible for selection.
pub struct Scorer {
    reasoner: Arc<dyn Reasoner>,
    options: GenerateOptions,
    retry: RetryPolicy,
}

impl Scorer {
    pub fn new(reasoner: Arc<dyn Reasoner>, model: &str) -> Self {
        Self {
            reasoner,
            options: GenerateOptions::with_model(model).max_tokens(SCORE_MAX_TOKENS),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn score(&self, candidate: CandidateRecord, now: DateTime<Utc>) -> ScoredCandidate {
        let prompt = build_score_prompt(&candidate, now);

        let raw = match with_backoff(&self.retry, "score", || {
            self.reasoner.generate(&prompt, &self.options)
        })
        .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    candidate = candidate.id,
                    title = candidate.title.as_str(),
                    error = %e,
                    "Scoring attempts exhausted, falling back to neutral score"
                );
                String::new()
            }
        };

        match interpret_score(&raw) {
            Interpretation::Clean(score) => ScoredCandidate {
                candidate,
                score,
                score_failed: false,
            },
            Interpretation::Degraded { value, reason } => {
                warn!(
                    candidate = candidate.id,
                    reason = reason.as_str(),
                    "Score interpretation degraded"
                );
                ScoredCandidate {
                    candidate,
                    score: value,
                    score_failed: true,
                }
            }
        }
    }
}

fn build_score_prompt(candidate: &CandidateRecord, now: DateTime<Utc>) -> String {
    let age = match candidate.published_at {
        Some(published) => {
            let hours = (now - published).num_hours().max(0);
            format!("{hours} hours ago")
        }
        None => "unknown".to_string(),
    };

    format!(
        "You are a cybersecurity analyst triaging news. Rate the importance of this item \
         from 1 to 100, considering technical severity and exploitability, potential business \
         impact, the size of the affected user base, and time sensitivity.\n\
         \n\
         TITLE: {title}\n\
         SUMMARY: {summary}\n\
         PUBLISHED: {age}\n\
         \n\
         Respond with a single integer between 1 and 100 and nothing else.",
        title = candidate.title,
        summary = candidate.summary,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> CandidateRecord {
        CandidateRecord {
            id: 7,
            source: "example.com".into(),
            url: "https://example.com/story".into(),
            title: "New ransomware strain".into(),
            summary: "Hits healthcare orgs".into(),
            content: String::new(),
            published_at: Some(Utc::now() - chrono::Duration::hours(6)),
            scraped_at: Utc::now(),
            processed: false,
        }
    }

    #[test]
    fn prompt_carries_title_summary_and_age() {
        let prompt = build_score_prompt(&candidate(), Utc::now());
        assert!(prompt.contains("New ransomware strain"));
        assert!(prompt.contains("Hits healthcare orgs"));
        assert!(prompt.contains("6 hours ago"));
        assert!(prompt.contains("single integer"));
    }

    #[test]
    fn prompt_handles_missing_publish_date() {
        let mut c = candidate();
        c.published_at = None;
        let prompt = build_score_prompt(&c, Utc::now());
        assert!(prompt.contains("PUBLISHED: unknown"));
    }
}
