use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Candidate Records ---

/// One scraped news item, as read from the store. Created by the scraper;
/// the pipeline never mutates it directly (the store flips `processed`
/// during commit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: i64,
    /// Feed or site the item came from (e.g. "thehackernews.com").
    pub source: String,
    pub url: String,
    pub title: String,
    /// Short excerpt captured at scrape time.
    pub summary: String,
    /// Full article body when available; may be empty.
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
    pub processed: bool,
}

impl CandidateRecord {
    /// Body text for prompting: full content when present, else the excerpt.
    pub fn body(&self) -> &str {
        if self.content.is_empty() {
            &self.summary
        } else {
            &self.content
        }
    }
}

/// A candidate annotated with an importance score in [1, 100].
/// Per-run value, never persisted.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: CandidateRecord,
    pub score: u8,
    /// Set when every scoring attempt failed and the neutral default was
    /// used. The candidate stays eligible for selection regardless.
    pub score_failed: bool,
}

/// Ranked, size-bounded subset chosen for deep analysis.
#[derive(Debug, Clone)]
pub struct SelectionResult {
    /// Highest score first; ties resolved by earlier scrape time.
    pub selected: Vec<ScoredCandidate>,
    /// Human-readable pattern summary plus the ranked title list.
    pub rationale: String,
}

// --- Risk ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl RiskLevel {
    /// Fixed priority mapping. Risk level and priority are always
    /// consistent; priority is never set independently.
    pub fn priority(self) -> u8 {
        match self {
            RiskLevel::Critical => 10,
            RiskLevel::High => 8,
            RiskLevel::Medium => 5,
            RiskLevel::Low => 2,
        }
    }

    /// Parse the model's risk-level string, tolerating case and padding.
    /// Returns None for anything outside the four levels.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Some(RiskLevel::Critical),
            "high" => Some(RiskLevel::High),
            "medium" => Some(RiskLevel::Medium),
            "low" => Some(RiskLevel::Low),
            _ => None,
        }
    }

    /// Infer a level from a risk score in [1, 10] when the model's level
    /// text is unusable: >=9 critical, >=7 high, >=4 medium, else low.
    pub fn from_score(score: u8) -> Self {
        match score {
            9..=10 => RiskLevel::Critical,
            7..=8 => RiskLevel::High,
            4..=6 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Critical => "critical",
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- Analysis Record ---

/// The structured risk assessment persisted per selected candidate.
/// Always fully populated: interpretation fills missing fields with
/// documented defaults and carries failure in `analysis_succeeded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub executive_summary: String,
    pub detailed_summary: String,
    pub technical_details: String,
    pub affected_systems: Vec<String>,
    pub affected_users: String,
    pub business_impact: String,
    pub risk_level: RiskLevel,
    /// 1–10.
    pub risk_score: u8,
    pub risk_reasoning: String,
    pub immediate_actions: Vec<String>,
    pub long_term_recommendations: Vec<String>,
    pub indicators_of_compromise: Vec<String>,
    pub references: Vec<String>,
    /// Derived from risk_level, see [`RiskLevel::priority`].
    pub priority: u8,
    pub processed_at: DateTime<Utc>,
    /// False when fewer than the minimum number of fields could be
    /// recovered from the model output. Failed records are not committed.
    pub analysis_succeeded: bool,
}
