//! Deterministic top-N selection over scored candidates. Pure, no I/O:
//! the same scores and timestamps always produce the same ordering, so
//! reruns and tests are reproducible.

use threatdesk_common::{ScoredCandidate, SelectionResult};

/// Recurring threat themes tallied across selected titles for the
/// rationale text. Substring match, lowercased.
const THREAT_THEMES: &[&str] = &[
    "ransomware",
    "zero-day",
    "0-day",
    "supply chain",
    "phishing",
    "breach",
    "malware",
    "vulnerability",
    "exploit",
    "backdoor",
    "ddos",
    "botnet",
];

/// Rank candidates by score (descending), breaking ties by earlier scrape
/// time, and keep the top `n`. The result never exceeds `n` or the number
/// of candidates supplied.
pub fn select(mut scored: Vec<ScoredCandidate>, n: usize) -> SelectionResult {
    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.candidate.scraped_at.cmp(&b.candidate.scraped_at))
    });

    // A tie matters when it falls inside the selected set or on the
    // cut-off boundary, where scrape time decided who made the cut.
    let boundary = scored.len().min(n.saturating_add(1));
    let tie_broken = scored[..boundary].windows(2).any(|w| w[0].score == w[1].score);

    scored.truncate(n);
    let rationale = build_rationale(&scored, tie_broken);

    SelectionResult {
        selected: scored,
        rationale,
    }
}

fn build_rationale(selected: &[ScoredCandidate], tie_broken: bool) -> String {
    if selected.is_empty() {
        return "No candidates available for selection.".to_string();
    }

    let mut lines = Vec::new();
    lines.push(format!(
        "Selected top {} candidate(s) by importance score.",
        selected.len()
    ));

    let themes = tally_themes(selected);
    if themes.is_empty() {
        lines.push("No repeated threat themes across selected titles.".to_string());
    } else {
        let summary: Vec<String> = themes
            .iter()
            .map(|(theme, count)| format!("{count}x {theme}"))
            .collect();
        lines.push(format!("Repeated threat themes: {}.", summary.join(", ")));
    }

    if tie_broken {
        lines.push("Equal scores ranked by earlier scrape time.".to_string());
    }

    for (rank, item) in selected.iter().enumerate() {
        let flag = if item.score_failed { " (default score)" } else { "" };
        lines.push(format!(
            "{}. [{}]{} {}",
            rank + 1,
            item.score,
            flag,
            item.candidate.title
        ));
    }

    lines.join("\n")
}

/// Count theme keywords appearing in two or more selected titles.
fn tally_themes(selected: &[ScoredCandidate]) -> Vec<(&'static str, usize)> {
    let titles: Vec<String> = selected
        .iter()
        .map(|s| s.candidate.title.to_lowercase())
        .collect();

    let mut tallies: Vec<(&'static str, usize)> = THREAT_THEMES
        .iter()
        .map(|theme| (*theme, titles.iter().filter(|t| t.contains(theme)).count()))
        .filter(|(_, count)| *count >= 2)
        .collect();
    tallies.sort_by(|a, b| b.1.cmp(&a.1));
    tallies
}
