//! Turns raw reasoner output into validated domain values. The model's
//! text is untrusted: it may be a clean JSON document, a fenced fragment,
//! truncated JSON, or plain prose. Interpretation is total: every input,
//! including the empty string, produces a usable value, and partial
//! recovery is carried in the `Interpretation` tag instead of an error.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use ollama_client::util::strip_code_blocks;
use threatdesk_common::{AnalysisRecord, RiskLevel};

/// Score used when no numeric content can be recovered at all.
pub const NEUTRAL_SCORE: u8 = 5;

/// An analysis with fewer recovered top-level fields than this is marked
/// failed (still returned fully populated with defaults).
const MIN_RECOVERED_FIELDS: usize = 3;

/// Outcome of interpreting one response. `Degraded` means defaults were
/// substituted; the value is still valid and in range.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation<T> {
    Clean(T),
    Degraded { value: T, reason: String },
}

impl<T> Interpretation<T> {
    pub fn value(&self) -> &T {
        match self {
            Interpretation::Clean(v) => v,
            Interpretation::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Interpretation::Clean(v) => v,
            Interpretation::Degraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Interpretation::Degraded { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Interpretation::Clean(_) => None,
            Interpretation::Degraded { reason, .. } => Some(reason),
        }
    }
}

// --- Score interpretation ---

/// Parse an importance score out of model text. Layered: strict leading
/// integer, then first digit run anywhere, then the neutral default.
/// Always returns a value in [1, 100].
pub fn interpret_score(text: &str) -> Interpretation<u8> {
    let cleaned = strip_code_blocks(text);

    let leading: String = cleaned
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if !leading.is_empty() {
        return Interpretation::Clean(clamp_score(parse_digits(&leading)));
    }

    if let Some(run) = first_digit_run(cleaned) {
        return Interpretation::Clean(clamp_score(parse_digits(run)));
    }

    Interpretation::Degraded {
        value: NEUTRAL_SCORE,
        reason: "no numeric score in response".to_string(),
    }
}

fn clamp_score(n: u64) -> u8 {
    n.clamp(1, 100) as u8
}

/// Parse a run of ASCII digits; absurdly long runs saturate rather than
/// error, since anything past u64 clamps to 100 anyway.
fn parse_digits(digits: &str) -> u64 {
    digits.parse::<u64>().unwrap_or(u64::MAX)
}

fn first_digit_run(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

// --- Analysis interpretation ---

/// Recover a full analysis record from model text. Layered:
/// 1. slice the outermost `{...}` (after fence stripping) and parse it as
///    JSON, then pull each top-level field independently;
/// 2. with no parseable JSON, scan the raw text per field;
/// 3. any field still missing takes its documented default.
/// Risk level text outside the enum is inferred from the risk score, and
/// priority is always derived from the final level, so the record's risk
/// invariants hold for arbitrary input.
pub fn interpret_analysis(text: &str, now: DateTime<Utc>) -> Interpretation<AnalysisRecord> {
    let json = extract_json_object(text);
    let mut missing: Vec<&str> = Vec::new();
    let mut recovered = 0usize;

    let mut text_field = |key: &'static str| -> String {
        match recover_text(json.as_ref(), text, key) {
            Some(v) => {
                recovered += 1;
                v
            }
            None => {
                missing.push(key);
                String::new()
            }
        }
    };

    let executive_summary = text_field("executive_summary");
    let detailed_summary = text_field("detailed_summary");
    let technical_details = text_field("technical_details");
    let affected_users = text_field("affected_users");
    let business_impact = text_field("business_impact");

    let mut list_field = |key: &'static str| -> Vec<String> {
        match recover_list(json.as_ref(), key) {
            Some(v) => {
                recovered += 1;
                v
            }
            None => {
                missing.push(key);
                Vec::new()
            }
        }
    };

    let affected_systems = list_field("affected_systems");
    let immediate_actions = list_field("immediate_actions");
    let long_term_recommendations = list_field("long_term_recommendations");
    let indicators_of_compromise = list_field("indicators_of_compromise");
    let references = list_field("references");

    // Risk block: nested risk_assessment object, top-level keys, or raw
    // text scan, in that order of preference.
    let risk = json
        .as_ref()
        .and_then(|j| j.get("risk_assessment"))
        .filter(|v| v.is_object())
        .cloned();

    let score_raw = risk
        .as_ref()
        .and_then(|r| value_as_u64(r.get("risk_score")?))
        .or_else(|| json.as_ref().and_then(|j| value_as_u64(j.get("risk_score")?)))
        .or_else(|| scan_number_field(text, "risk_score"));
    let risk_score = match score_raw {
        Some(n) => {
            recovered += 1;
            n.clamp(1, 10) as u8
        }
        None => {
            missing.push("risk_score");
            5
        }
    };

    let level_text = risk
        .as_ref()
        .and_then(|r| r.get("risk_level")?.as_str().map(str::to_string))
        .or_else(|| {
            json.as_ref()
                .and_then(|j| j.get("risk_level")?.as_str().map(str::to_string))
        })
        .or_else(|| scan_string_field(text, "risk_level"));
    let risk_level = match level_text.as_deref().and_then(RiskLevel::parse) {
        Some(level) => {
            recovered += 1;
            level
        }
        None => {
            missing.push("risk_level");
            RiskLevel::from_score(risk_score)
        }
    };

    let risk_reasoning = risk
        .as_ref()
        .and_then(|r| r.get("reasoning")?.as_str().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .or_else(|| recover_text(json.as_ref(), text, "risk_reasoning"))
        .map(|v| {
            recovered += 1;
            v
        })
        .unwrap_or_else(|| {
            missing.push("risk_reasoning");
            String::new()
        });

    let analysis_succeeded = recovered >= MIN_RECOVERED_FIELDS;
    let record = AnalysisRecord {
        executive_summary,
        detailed_summary,
        technical_details,
        affected_systems,
        affected_users,
        business_impact,
        risk_level,
        risk_score,
        risk_reasoning,
        immediate_actions,
        long_term_recommendations,
        indicators_of_compromise,
        references,
        priority: risk_level.priority(),
        processed_at: now,
        analysis_succeeded,
    };

    if json.is_some() && missing.is_empty() {
        Interpretation::Clean(record)
    } else {
        let reason = if json.is_none() {
            format!("no JSON object in response; recovered {recovered} fields by text scan")
        } else {
            format!("defaulted fields: {}", missing.join(", "))
        };
        debug!(recovered, %reason, "Degraded analysis interpretation");
        Interpretation::Degraded {
            value: record,
            reason,
        }
    }
}

/// Slice the outermost `{...}` out of a (possibly fenced) response and
/// parse it. Returns None when nothing parseable is present.
fn extract_json_object(text: &str) -> Option<Value> {
    let cleaned = strip_code_blocks(text);
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Value>(&cleaned[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn recover_text(json: Option<&Value>, raw: &str, key: &str) -> Option<String> {
    if let Some(v) = json.and_then(|j| j.get(key)) {
        return v
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
    }
    if json.is_none() {
        return scan_string_field(raw, key);
    }
    None
}

/// Pull a string list, tolerating the model returning a stringified JSON
/// array instead of a proper one.
fn recover_list(json: Option<&Value>, key: &str) -> Option<Vec<String>> {
    let v = json?.get(key)?;
    let items: Vec<String> = match v {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => serde_json::from_str::<Vec<String>>(s).ok()?,
        _ => return None,
    };
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn value_as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => first_digit_run(s).map(parse_digits),
        _ => None,
    }
}

/// Scan raw (non-JSON) text for a `"key": "value"` fragment. Tolerates
/// surrounding garbage and truncated documents.
fn scan_string_field(raw: &str, key: &str) -> Option<String> {
    let pattern = format!(r#""{}"\s*:\s*"([^"]+)""#, regex::escape(key));
    let re = Regex::new(&pattern).ok()?;
    re.captures(raw)?
        .get(1)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn scan_number_field(raw: &str, key: &str) -> Option<u64> {
    let pattern = format!(r#""{}"\s*:\s*"?(\d+)"#, regex::escape(key));
    let re = Regex::new(&pattern).ok()?;
    re.captures(raw)?.get(1).map(|m| parse_digits(m.as_str()))
}
