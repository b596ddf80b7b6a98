use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::SqlitePool;

use crate::db::models::{MarketRow, NewMarket};
use crate::error::Result;
use crate::types::{MarketMetadata, QualityScores};

/// Persistent market records. All writes funnel through here so the merge
/// rules live in one place: enrichment fields fill NULL slots only, resolved
/// never goes back to false, and derived trade aggregates are overwritten
/// wholesale each pass.
#[derive(Clone)]
pub struct MarketStore {
    pool: SqlitePool,
}

impl MarketStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, market_id: i64) -> Result<Option<MarketRow>> {
        let row = sqlx::query_as::<_, MarketRow>("SELECT * FROM markets WHERE market_id = ?1")
            .bind(market_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Insert a market or refresh an existing row in one statement. The
    /// conflict arm re-applies chain facts, fills enrichment fields only
    /// where they are still NULL, and re-arms evaluation when a title
    /// arrives for a row that never had one.
    pub async fn upsert(&self, market: &NewMarket) -> Result<()> {
        let now = now_ms();
        let resolved_at = if market.resolved { Some(now) } else { None };

        sqlx::query(
            r#"
            INSERT INTO markets (
                market_id, creator, starts_at, expires_at, collateral_token,
                outcome_count, initial_collateral, creator_fee_bps, meta_data_uri, alpha,
                title, resolution_criteria, end_date, outcomes,
                resolved, resolved_at, total_volume, trade_count,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                      ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)
            ON CONFLICT(market_id) DO UPDATE SET
                creator = excluded.creator,
                starts_at = excluded.starts_at,
                expires_at = excluded.expires_at,
                collateral_token = excluded.collateral_token,
                outcome_count = excluded.outcome_count,
                initial_collateral = excluded.initial_collateral,
                creator_fee_bps = excluded.creator_fee_bps,
                meta_data_uri = excluded.meta_data_uri,
                alpha = excluded.alpha,
                title = COALESCE(markets.title, excluded.title),
                resolution_criteria = COALESCE(markets.resolution_criteria, excluded.resolution_criteria),
                end_date = COALESCE(markets.end_date, excluded.end_date),
                outcomes = COALESCE(markets.outcomes, excluded.outcomes),
                resolved = MAX(markets.resolved, excluded.resolved),
                resolved_at = COALESCE(markets.resolved_at, excluded.resolved_at),
                total_volume = excluded.total_volume,
                trade_count = excluded.trade_count,
                needs_evaluation = CASE
                    WHEN markets.title IS NULL AND excluded.title IS NOT NULL THEN 1
                    ELSE markets.needs_evaluation
                END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(market.market_id)
        .bind(&market.creator)
        .bind(&market.starts_at)
        .bind(&market.expires_at)
        .bind(&market.collateral_token)
        .bind(market.outcome_count)
        .bind(&market.initial_collateral)
        .bind(market.creator_fee_bps)
        .bind(&market.meta_data_uri)
        .bind(&market.alpha)
        .bind(&market.title)
        .bind(&market.resolution_criteria)
        .bind(&market.end_date)
        .bind(&market.outcomes)
        .bind(market.resolved)
        .bind(resolved_at)
        .bind(&market.total_volume)
        .bind(market.trade_count)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Refresh derived trade aggregates and the resolution flag for a row
    /// that already exists. Metadata, when supplied, fills NULL enrichment
    /// slots only. SET expressions see pre-update column values, so the
    /// re-arm check reads the old title.
    pub async fn refresh_derived(
        &self,
        market_id: i64,
        total_volume: &str,
        trade_count: i64,
        resolved: bool,
        metadata: Option<&MarketMetadata>,
    ) -> Result<()> {
        let now = now_ms();
        let resolved_at = if resolved { Some(now) } else { None };
        let title = metadata.and_then(|m| m.title.as_deref());
        let criteria = metadata.and_then(|m| m.resolution_criteria.as_deref());
        let end_date = metadata.and_then(|m| m.end_date.as_deref());
        let outcomes = metadata
            .and_then(|m| m.outcomes.as_ref())
            .and_then(|o| serde_json::to_string(o).ok());

        sqlx::query(
            r#"
            UPDATE markets SET
                total_volume = ?2,
                trade_count = ?3,
                resolved = MAX(resolved, ?4),
                resolved_at = COALESCE(resolved_at, ?5),
                title = COALESCE(title, ?6),
                resolution_criteria = COALESCE(resolution_criteria, ?7),
                end_date = COALESCE(end_date, ?8),
                outcomes = COALESCE(outcomes, ?9),
                needs_evaluation = CASE
                    WHEN title IS NULL AND ?6 IS NOT NULL THEN 1
                    ELSE needs_evaluation
                END,
                updated_at = ?10
            WHERE market_id = ?1
            "#,
        )
        .bind(market_id)
        .bind(total_volume)
        .bind(trade_count)
        .bind(resolved)
        .bind(resolved_at)
        .bind(title)
        .bind(criteria)
        .bind(end_date)
        .bind(outcomes)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Markets still waiting on a quality evaluation. Flagged rows come
    /// first so a backlog of titleless records cannot starve fresh ones,
    /// then oldest market id wins.
    pub async fn select_needing_evaluation(&self, limit: i64) -> Result<Vec<MarketRow>> {
        let rows = sqlx::query_as::<_, MarketRow>(
            r#"
            SELECT * FROM markets
            WHERE needs_evaluation = 1 OR title IS NULL
            ORDER BY needs_evaluation DESC, market_id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn write_evaluation(&self, market_id: i64, scores: &QualityScores) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"
            UPDATE markets SET
                ai_resolvability = ?2,
                ai_clarity = ?3,
                ai_manipulability_risk = ?4,
                ai_explanation = ?5,
                ai_evaluated_at = ?6,
                needs_evaluation = 0,
                updated_at = ?6
            WHERE market_id = ?1
            "#,
        )
        .bind(market_id)
        .bind(f64::from(scores.resolvability))
        .bind(f64::from(scores.clarity))
        .bind(f64::from(scores.manipulability_risk))
        .bind(&scores.explanation)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn market_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM markets")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn needing_evaluation_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM markets WHERE needs_evaluation = 1 OR title IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
