use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Market creation event as the index returns it. Numeric chain values
/// arrive as decimal strings and are kept that way until a consumer needs
/// arithmetic.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketCreatedEvent {
    pub market_id: String,
    pub creator: String,
    pub starts_at: String,
    pub expires_at: String,
    pub collateral_token: String,
    pub outcome_count: String,
    pub initial_collateral: String,
    pub creator_fee_bps: String,
    #[serde(rename = "metaDataURI")]
    pub meta_data_uri: Option<String>,
    pub alpha: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketResolvedEvent {
    pub market_id: String,
    pub resolver: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuyEvent {
    pub cost: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SellEvent {
    pub received: String,
}

/// All trade events for one market, both directions.
#[derive(Debug, Clone, Default)]
pub struct TradeActivity {
    pub bought: Vec<BuyEvent>,
    pub sold: Vec<SellEvent>,
}

impl TradeActivity {
    /// Sum of buy costs and sell proceeds, exact decimal arithmetic over the
    /// raw strings. A malformed amount or an overflowing sum fails the whole
    /// computation rather than silently skewing the total.
    pub fn total_volume(&self) -> Result<Decimal> {
        let mut total = Decimal::ZERO;
        for event in &self.bought {
            let cost = event
                .cost
                .parse::<Decimal>()
                .map_err(|e| AppError::Indexer(format!("bad buy amount {:?}: {e}", event.cost)))?;
            total = total.checked_add(cost).ok_or_else(|| {
                AppError::Indexer(format!("volume overflow adding buy amount {:?}", event.cost))
            })?;
        }
        for event in &self.sold {
            let received = event.received.parse::<Decimal>().map_err(|e| {
                AppError::Indexer(format!("bad sell amount {:?}: {e}", event.received))
            })?;
            total = total.checked_add(received).ok_or_else(|| {
                AppError::Indexer(format!(
                    "volume overflow adding sell amount {:?}",
                    event.received
                ))
            })?;
        }
        Ok(total)
    }

    pub fn trade_count(&self) -> i64 {
        (self.bought.len() + self.sold.len()) as i64
    }
}

/// Enrichment document fields. Parsed leniently from arbitrary JSON, so any
/// field may be absent.
#[derive(Debug, Clone, Default)]
pub struct MarketMetadata {
    pub title: Option<String>,
    pub resolution_criteria: Option<String>,
    pub end_date: Option<String>,
    pub outcomes: Option<Vec<String>>,
}

/// Quality scores on the 0..=10 scale, already clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityScores {
    pub resolvability: u8,
    pub clarity: u8,
    pub manipulability_risk: u8,
    pub explanation: String,
}

/// Counters for one synchronization pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncReport {
    pub discovered: usize,
    pub created: usize,
    pub skipped: usize,
    pub errored: usize,
}

/// What one evaluation cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    Evaluated { market_id: i64, source: String },
    Idle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_sums_both_directions() {
        let activity = TradeActivity {
            bought: vec![
                BuyEvent {
                    cost: "100".to_string(),
                },
                BuyEvent {
                    cost: "50".to_string(),
                },
            ],
            sold: vec![SellEvent {
                received: "30".to_string(),
            }],
        };
        assert_eq!(activity.total_volume().unwrap().to_string(), "180");
        assert_eq!(activity.trade_count(), 3);
    }

    #[test]
    fn empty_activity_is_zero() {
        let activity = TradeActivity::default();
        assert_eq!(activity.total_volume().unwrap().to_string(), "0");
        assert_eq!(activity.trade_count(), 0);
    }

    #[test]
    fn fractional_amounts_stay_exact() {
        let activity = TradeActivity {
            bought: vec![BuyEvent {
                cost: "0.1".to_string(),
            }],
            sold: vec![SellEvent {
                received: "0.2".to_string(),
            }],
        };
        assert_eq!(activity.total_volume().unwrap().to_string(), "0.3");
    }

    #[test]
    fn malformed_amount_is_an_error() {
        let activity = TradeActivity {
            bought: vec![BuyEvent {
                cost: "not-a-number".to_string(),
            }],
            sold: vec![],
        };
        assert!(activity.total_volume().is_err());
    }

    #[test]
    fn overflowing_sum_is_an_error() {
        // Each amount parses on its own; the running total does not fit.
        let big = "70000000000000000000000000000".to_string();
        let bought = TradeActivity {
            bought: vec![BuyEvent { cost: big.clone() }, BuyEvent { cost: big.clone() }],
            sold: vec![],
        };
        assert!(bought.total_volume().is_err());

        let mixed = TradeActivity {
            bought: vec![BuyEvent { cost: big.clone() }],
            sold: vec![SellEvent { received: big }],
        };
        assert!(mixed.total_volume().is_err());
    }
}
