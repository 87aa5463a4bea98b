use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use ollama_client::util::truncate_to_char_boundary;
use ollama_client::GenerateOptions;
use threatdesk_common::{AnalysisRecord, ScoredCandidate};

use crate::interpreter::interpret_analysis;
use crate::reasoner::Reasoner;
use crate::retry::{with_backoff, RetryPolicy};

/// Generous budget: the analysis covers summaries, impact, and action
/// lists for a full article.
const ANALYSIS_MAX_TOKENS: u32 = 2500;

/// Article bodies are truncated to keep the prompt inside the model's
/// context window.
const MAX_BODY_BYTES: usize = 12_000;

/// Produces the structured risk assessment for one selected candidate.
/// Total like scoring: transport exhaustion and unparseable output both
/// come back as a populated record with `analysis_succeeded = false`,
/// leaving the commit decision to the coordinator.
pub struct Analyst {
    reasoner: Arc<dyn Reasoner>,
    options: GenerateOptions,
    retry: RetryPolicy,
}

impl Analyst {
    pub fn new(reasoner: Arc<dyn Reasoner>, model: &str) -> Self {
        Self {
            reasoner,
            options: GenerateOptions::with_model(model).max_tokens(ANALYSIS_MAX_TOKENS),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn analyze(&self, item: &ScoredCandidate, now: DateTime<Utc>) -> AnalysisRecord {
        let prompt = build_analysis_prompt(item);

        let raw = match with_backoff(&self.retry, "analyze", || {
            self.reasoner.generate(&prompt, &self.options)
        })
        .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    candidate = item.candidate.id,
                    title = item.candidate.title.as_str(),
                    error = %e,
                    "Analysis attempts exhausted"
                );
                String::new()
            }
        };

        let interpretation = interpret_analysis(&raw, now);
        if let Some(reason) = interpretation.reason() {
            warn!(
                candidate = item.candidate.id,
                reason, "Analysis interpretation degraded"
            );
        }
        interpretation.into_value()
    }
}

fn build_analysis_prompt(item: &ScoredCandidate) -> String {
    let candidate = &item.candidate;
    let body = truncate_to_char_boundary(candidate.body(), MAX_BODY_BYTES);
    let published = candidate
        .published_at
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        "You are a cybersecurity analyst writing a threat intelligence report. Analyze this \
         news item in depth: cover every important detail, the technical nature of the threat, \
         who is affected and how, business consequences, and what defenders should do now and \
         later.\n\
         \n\
         TITLE: {title}\n\
         \n\
         CONTENT:\n{body}\n\
         \n\
         SOURCE: {source}\n\
         URL: {url}\n\
         PUBLISHED: {published}\n\
         TRIAGE IMPORTANCE SCORE: {score}/100\n\
         \n\
         Respond ONLY with JSON in this exact format:\n\
         {{\n\
           \"executive_summary\": \"<3-4 sentence overview>\",\n\
           \"detailed_summary\": \"<thorough summary covering all important details>\",\n\
           \"technical_details\": \"<technical analysis of the vulnerability or threat>\",\n\
           \"affected_systems\": [\"<specific systems, software, or platforms>\"],\n\
           \"affected_users\": \"<who is impacted and how>\",\n\
           \"business_impact\": \"<potential business consequences>\",\n\
           \"risk_assessment\": {{\n\
             \"risk_level\": \"<critical/high/medium/low>\",\n\
             \"risk_score\": <1-10>,\n\
             \"reasoning\": \"<risk rationale>\"\n\
           }},\n\
           \"immediate_actions\": [\"<action>\"],\n\
           \"long_term_recommendations\": [\"<recommendation>\"],\n\
           \"indicators_of_compromise\": [\"<IoC if applicable>\"],\n\
           \"references\": [\"<additional resources>\"]\n\
         }}",
        title = candidate.title,
        source = candidate.source,
        url = candidate.url,
        score = item.score,
    )
}
