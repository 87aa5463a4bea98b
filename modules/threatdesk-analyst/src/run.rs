use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use threatdesk_common::{
    AnalysisRecord, CandidateRecord, ScoredCandidate, ThreatdeskError,
};
use threatdesk_store::Store;

use crate::analysis::Analyst;
use crate::interpreter::{interpret_analysis, NEUTRAL_SCORE};
use crate::pool::{run_bounded, DEFAULT_WORKERS};
use crate::reasoner::Reasoner;
use crate::retry::RetryPolicy;
use crate::scoring::Scorer;
use crate::scraper::Scraper;
use crate::selection::select;

/// Knobs for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Only candidates scraped within the last N hours are eligible.
    pub lookback_hours: i64,
    /// How many candidates go to deep analysis.
    pub top_n: usize,
    pub workers: usize,
    /// Optional cap on candidates pulled for scoring.
    pub limit: Option<u32>,
    pub model: String,
    pub scrape_first: bool,
    /// Abort the run if scraping was requested and failed.
    pub require_fresh: bool,
    pub retry: RetryPolicy,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            top_n: 10,
            workers: DEFAULT_WORKERS,
            limit: None,
            model: "llama3".to_string(),
            scrape_first: false,
            require_fresh: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Counters from one run.
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub scraped_new: u32,
    pub eligible: u32,
    pub scored_ok: u32,
    pub scored_failed: u32,
    pub selected: u32,
    pub analyzed_ok: u32,
    pub analyzed_failed: u32,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Analysis Run Complete ===")?;
        writeln!(f, "New from scrape:  {}", self.scraped_new)?;
        writeln!(f, "Eligible:         {}", self.eligible)?;
        writeln!(f, "Scored ok:        {}", self.scored_ok)?;
        writeln!(f, "Scored failed:    {}", self.scored_failed)?;
        writeln!(f, "Selected:         {}", self.selected)?;
        writeln!(f, "Analyzed ok:      {}", self.analyzed_ok)?;
        writeln!(f, "Analyzed failed:  {}", self.analyzed_failed)?;
        Ok(())
    }
}

/// One selected candidate with its final analysis, for display.
#[derive(Debug, Clone)]
pub struct AnalyzedItem {
    pub candidate: CandidateRecord,
    pub score: u8,
    pub analysis: AnalysisRecord,
}

#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub stats: RunStats,
    pub rationale: String,
    pub items: Vec<AnalyzedItem>,
}

/// Owns the end-to-end sequence: lock → (scrape) → gather → score →
/// select → analyze → commit, with a strict barrier between stages. The
/// run lock is released on every exit path.
pub struct Pipeline {
    store: Store,
    reasoner: Arc<dyn Reasoner>,
    scraper: Option<Arc<dyn Scraper>>,
    params: RunParams,
}

impl Pipeline {
    pub fn new(store: Store, reasoner: Arc<dyn Reasoner>, params: RunParams) -> Self {
        Self {
            store,
            reasoner,
            scraper: None,
            params,
        }
    }

    pub fn with_scraper(mut self, scraper: Arc<dyn Scraper>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    pub async fn run(&self) -> Result<RunReport, ThreatdeskError> {
        let acquired = self
            .store
            .acquire_run_lock()
            .await
            .map_err(|e| ThreatdeskError::Database(e.to_string()))?;
        if !acquired {
            return Err(ThreatdeskError::LockConflict);
        }

        let result = self.run_inner().await;

        // Always release, even when aborting.
        if let Err(e) = self.store.release_run_lock().await {
            error!("Failed to release run lock: {e}");
        }

        result
    }

    async fn run_inner(&self) -> Result<RunReport, ThreatdeskError> {
        let mut stats = RunStats::default();

        // Optional scrape phase.
        if self.params.scrape_first {
            match &self.scraper {
                Some(scraper) => match scraper.scrape_new().await {
                    Ok(count) => {
                        stats.scraped_new = count;
                        info!(new_items = count, scraper = scraper.name(), "Scrape complete");
                    }
                    Err(e) if self.params.require_fresh => {
                        return Err(ThreatdeskError::Scraping(e.to_string()));
                    }
                    Err(e) => {
                        warn!(error = %e, "Scrape failed, analyzing existing candidates");
                    }
                },
                None if self.params.require_fresh => {
                    return Err(ThreatdeskError::Scraping(
                        "fresh data required but no scraper configured".to_string(),
                    ));
                }
                None => warn!("Scrape requested but no scraper configured, skipping"),
            }
        }

        // Gather eligible candidates.
        let since = Utc::now() - chrono::Duration::hours(self.params.lookback_hours);
        let candidates = self
            .store
            .fetch_eligible(since, self.params.limit)
            .await
            .map_err(|e| ThreatdeskError::Database(e.to_string()))?;
        stats.eligible = candidates.len() as u32;

        if candidates.is_empty() {
            info!(
                lookback_hours = self.params.lookback_hours,
                "No eligible candidates, nothing to do"
            );
            return Ok(RunReport {
                stats,
                ..RunReport::default()
            });
        }
        info!(eligible = stats.eligible, "Scoring candidates");

        // Scoring fan-out. Results come back index-aligned; a worker
        // failure degrades that slot to the neutral default.
        let scorer = Arc::new(
            Scorer::new(Arc::clone(&self.reasoner), &self.params.model)
                .with_retry(self.params.retry.clone()),
        );
        let now = Utc::now();
        let score_results = run_bounded(candidates.clone(), self.params.workers, {
            let scorer = Arc::clone(&scorer);
            move |_, candidate| {
                let scorer = Arc::clone(&scorer);
                async move { scorer.score(candidate, now).await }
            }
        })
        .await;

        let mut scored = Vec::with_capacity(score_results.len());
        for (index, result) in score_results.into_iter().enumerate() {
            match result {
                Ok(item) => scored.push(item),
                Err(e) => {
                    warn!(candidate = candidates[index].id, error = %e, "Scoring worker failed");
                    scored.push(ScoredCandidate {
                        candidate: candidates[index].clone(),
                        score: NEUTRAL_SCORE,
                        score_failed: true,
                    });
                }
            }
        }
        stats.scored_failed = scored.iter().filter(|s| s.score_failed).count() as u32;
        stats.scored_ok = stats.eligible - stats.scored_failed;

        // Selection: pure, deterministic.
        let selection = select(scored, self.params.top_n);
        stats.selected = selection.selected.len() as u32;
        if selection.selected.is_empty() {
            info!("Selection is empty, nothing to analyze");
            return Ok(RunReport {
                stats,
                rationale: selection.rationale,
                items: Vec::new(),
            });
        }
        info!(selected = stats.selected, "Running deep analysis");

        // Deep-analysis fan-out.
        let analyst = Arc::new(
            Analyst::new(Arc::clone(&self.reasoner), &self.params.model)
                .with_retry(self.params.retry.clone()),
        );
        let selected = selection.selected.clone();
        let analysis_results = run_bounded(selected.clone(), self.params.workers, {
            let analyst = Arc::clone(&analyst);
            move |_, item| {
                let analyst = Arc::clone(&analyst);
                async move { analyst.analyze(&item, Utc::now()).await }
            }
        })
        .await;

        // Commit: write and mark processed only successful analyses;
        // failures stay eligible for the next run.
        let mut items = Vec::with_capacity(selected.len());
        for (index, result) in analysis_results.into_iter().enumerate() {
            let scored_item = &selected[index];
            let analysis = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!(candidate = scored_item.candidate.id, error = %e, "Analysis worker failed");
                    interpret_analysis("", Utc::now()).into_value()
                }
            };

            if analysis.analysis_succeeded {
                self.store
                    .mark_processed(scored_item.candidate.id, &analysis)
                    .await
                    .map_err(|e| ThreatdeskError::Database(e.to_string()))?;
                stats.analyzed_ok += 1;
            } else {
                stats.analyzed_failed += 1;
                info!(
                    candidate = scored_item.candidate.id,
                    "Analysis failed, candidate stays eligible for the next run"
                );
            }

            items.push(AnalyzedItem {
                candidate: scored_item.candidate.clone(),
                score: scored_item.score,
                analysis,
            });
        }

        info!("{stats}");
        Ok(RunReport {
            stats,
            rationale: selection.rationale,
            items,
        })
    }
}
