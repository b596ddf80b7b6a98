use tracing::{info, warn};

use crate::db::models::MarketRow;
use crate::db::MarketStore;
use crate::error::Result;
use crate::eval::heuristic::heuristic_scores;
use crate::eval::providers::{parse_scores, ScoreProvider};
use crate::types::{EvaluationOutcome, QualityScores};

/// Scores one stale market per cycle. One record per tick keeps provider
/// spend bounded; the heuristic fallback guarantees the cycle always ends
/// with a write, so a record is never left flagged after its turn.
pub struct EvaluationEngine {
    store: MarketStore,
    providers: Vec<Box<dyn ScoreProvider>>,
}

impl EvaluationEngine {
    pub fn new(store: MarketStore, providers: Vec<Box<dyn ScoreProvider>>) -> Self {
        Self { store, providers }
    }

    pub async fn run_one_cycle(&self) -> Result<EvaluationOutcome> {
        let candidates = self.store.select_needing_evaluation(1).await?;
        let Some(market) = candidates.into_iter().next() else {
            return Ok(EvaluationOutcome::Idle);
        };

        let market_id = market.market_id;
        let (scores, source) = self.evaluate(&market).await;
        self.store.write_evaluation(market_id, &scores).await?;
        info!(
            "Evaluated market {market_id} via {source}: resolvability={} clarity={} risk={}",
            scores.resolvability, scores.clarity, scores.manipulability_risk
        );
        Ok(EvaluationOutcome::Evaluated { market_id, source })
    }

    /// Walk the provider chain, falling back to the heuristic scorer when
    /// every provider fails or none is configured. Missing title or criteria
    /// evaluate as empty text rather than skipping the record.
    async fn evaluate(&self, market: &MarketRow) -> (QualityScores, String) {
        let title = market.title.as_deref().unwrap_or("");
        let criteria = market.resolution_criteria.as_deref().unwrap_or("");
        let prompt = build_prompt(title, criteria);

        for provider in &self.providers {
            match provider.complete(&prompt).await {
                Ok(text) => match parse_scores(&text) {
                    Some(scores) => return (scores, provider.name().to_string()),
                    None => warn!(
                        "Provider {} returned no parseable scores for market {}",
                        provider.name(),
                        market.market_id
                    ),
                },
                Err(e) => warn!(
                    "Provider {} failed for market {}: {e}",
                    provider.name(),
                    market.market_id
                ),
            }
        }

        let scores = heuristic_scores(title, criteria, &market.outcome_labels());
        (scores, "heuristic".to_string())
    }
}

pub fn build_prompt(title: &str, criteria: &str) -> String {
    format!(
        r#"
Evaluate this prediction market on three metrics (0-10 scale):

**Market Details:**
Title: "{title}"
Resolution Criteria: "{criteria}"

**Evaluation Metrics:**
1. **Resolvability (0-10)**: Can this market be resolved using clear, public, objective data?
2. **Clarity (0-10)**: Is the phrasing unambiguous and specific?
3. **Manipulability Risk (0-10)**: Is the outcome at risk of being influenced by insiders or vague sources?

**Instructions:**
- Score each metric from 0 (worst) to 10 (best)
- Higher manipulability risk = lower score (0 = high risk, 10 = low risk)
- Provide a 1-3 sentence explanation of your overall assessment

**Response Format (JSON only):**
{{
  "resolvability": 8,
  "clarity": 7,
  "manipulabilityRisk": 6,
  "explanation": "Brief explanation of the scores in 1-3 sentences."
}}"#
    )
}
