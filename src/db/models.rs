use sqlx::FromRow;

/// One market record as persisted. Chain-sourced columns are always present;
/// enrichment columns stay NULL until a metadata document has been fetched,
/// and AI columns stay NULL until the first evaluation.
#[derive(Debug, Clone, FromRow)]
pub struct MarketRow {
    pub market_id: i64,
    pub creator: String,
    pub starts_at: String,
    pub expires_at: String,
    pub collateral_token: String,
    pub outcome_count: i64,
    pub initial_collateral: String,
    pub creator_fee_bps: i64,
    pub meta_data_uri: Option<String>,
    pub alpha: String,
    pub title: Option<String>,
    pub resolution_criteria: Option<String>,
    pub end_date: Option<String>,
    pub outcomes: Option<String>,
    pub total_volume: String,
    pub trade_count: i64,
    pub resolved: bool,
    pub resolved_at: Option<i64>,
    pub ai_resolvability: Option<f64>,
    pub ai_clarity: Option<f64>,
    pub ai_manipulability_risk: Option<f64>,
    pub ai_explanation: Option<String>,
    pub ai_evaluated_at: Option<i64>,
    pub needs_evaluation: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MarketRow {
    /// Outcome labels from the metadata document, empty when the document
    /// never arrived or carried none.
    pub fn outcome_labels(&self) -> Vec<String> {
        self.outcomes
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default()
    }
}

/// Everything needed to insert or refresh a market from one sync pass.
#[derive(Debug, Clone)]
pub struct NewMarket {
    pub market_id: i64,
    pub creator: String,
    pub starts_at: String,
    pub expires_at: String,
    pub collateral_token: String,
    pub outcome_count: i64,
    pub initial_collateral: String,
    pub creator_fee_bps: i64,
    pub meta_data_uri: Option<String>,
    pub alpha: String,
    pub title: Option<String>,
    pub resolution_criteria: Option<String>,
    pub end_date: Option<String>,
    pub outcomes: Option<String>,
    pub resolved: bool,
    pub total_volume: String,
    pub trade_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_with_outcomes(outcomes: Option<&str>) -> MarketRow {
        MarketRow {
            market_id: 1,
            creator: "0xabc".to_string(),
            starts_at: "0".to_string(),
            expires_at: "0".to_string(),
            collateral_token: "0xdef".to_string(),
            outcome_count: 2,
            initial_collateral: "0".to_string(),
            creator_fee_bps: 0,
            meta_data_uri: None,
            alpha: "0".to_string(),
            title: None,
            resolution_criteria: None,
            end_date: None,
            outcomes: outcomes.map(str::to_string),
            total_volume: "0".to_string(),
            trade_count: 0,
            resolved: false,
            resolved_at: None,
            ai_resolvability: None,
            ai_clarity: None,
            ai_manipulability_risk: None,
            ai_explanation: None,
            ai_evaluated_at: None,
            needs_evaluation: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn outcome_labels_parse() {
        let row = row_with_outcomes(Some(r#"["Yes","No"]"#));
        assert_eq!(row.outcome_labels(), vec!["Yes", "No"]);
    }

    #[test]
    fn outcome_labels_tolerate_null_and_garbage() {
        assert!(row_with_outcomes(None).outcome_labels().is_empty());
        assert!(row_with_outcomes(Some("not json")).outcome_labels().is_empty());
    }
}
