use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{Config, METADATA_TIMEOUT_SECS, RESOLUTION_FETCH_LIMIT, TRADE_FETCH_LIMIT};
use crate::db::models::NewMarket;
use crate::db::MarketStore;
use crate::error::Result;
use crate::indexer::EventIndex;
use crate::sync::batch::BatchFetcher;
use crate::sync::metadata::fetch_metadata;
use crate::types::{MarketCreatedEvent, SyncReport, TradeActivity};

/// Drives one full synchronization pass: discover creation events, derive
/// per-market trade aggregates and resolution flags, then create or refresh
/// records. Individual market failures are counted and skipped so one bad
/// market never sinks the pass.
pub struct Reconciler {
    index: Arc<dyn EventIndex>,
    store: MarketStore,
    batch: BatchFetcher,
    http: reqwest::Client,
}

impl Reconciler {
    pub fn new(cfg: &Config, index: Arc<dyn EventIndex>, store: MarketStore) -> Result<Self> {
        let batch = BatchFetcher::new(
            cfg.fetch_window_size,
            Duration::from_millis(cfg.fetch_window_delay_ms),
        )?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(METADATA_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            index,
            store,
            batch,
            http,
        })
    }

    pub async fn sync_pass(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let events = self.index.all_creation_events().await?;
        report.discovered = events.len();
        info!("Discovered {} creation events", events.len());

        let resolutions = self.index.resolution_events(RESOLUTION_FETCH_LIMIT).await?;
        let mut resolved_keys: HashSet<i64> = HashSet::new();
        for event in &resolutions {
            match event.market_id.parse::<i64>() {
                Ok(id) => {
                    debug!("Market {id} resolved by {}", event.resolver);
                    resolved_keys.insert(id);
                }
                Err(_) => warn!(
                    "Skipping resolution event with bad market id {:?}",
                    event.market_id
                ),
            }
        }

        let mut keyed: Vec<(i64, &MarketCreatedEvent)> = Vec::with_capacity(events.len());
        let mut seen: HashSet<i64> = HashSet::with_capacity(events.len());
        for event in &events {
            match event.market_id.parse::<i64>() {
                Ok(id) => {
                    // Page-boundary overlap can surface an id twice in one
                    // pass; the first occurrence wins.
                    if seen.insert(id) {
                        keyed.push((id, event));
                    }
                }
                Err(_) => {
                    report.errored += 1;
                    warn!(
                        "Skipping creation event with bad market id {:?}",
                        event.market_id
                    );
                }
            }
        }

        let keys: Vec<i64> = keyed.iter().map(|(id, _)| *id).collect();
        let index = Arc::clone(&self.index);
        let trades = self
            .batch
            .fetch_all(&keys, move |id| {
                let index = Arc::clone(&index);
                async move { index.trade_events(id, TRADE_FETCH_LIMIT).await }
            })
            .await;
        report.errored += trades.failed.len();
        let failed: HashSet<i64> = trades.failed.iter().copied().collect();
        let mut activity: HashMap<i64, TradeActivity> = trades.ok.into_iter().collect();

        for (market_id, event) in keyed {
            // No trade data this pass means no write at all for this market.
            if failed.contains(&market_id) {
                continue;
            }
            let trades = activity.remove(&market_id).unwrap_or_default();
            match self
                .reconcile_one(market_id, event, trades, &resolved_keys)
                .await
            {
                Ok(true) => report.created += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.errored += 1;
                    error!("Failed to sync market {market_id}: {e}");
                }
            }
        }

        info!(
            "Sync pass complete: {} discovered, {} created, {} skipped, {} errored",
            report.discovered, report.created, report.skipped, report.errored
        );
        Ok(report)
    }

    /// Returns true when the market was newly created. Existing rows get
    /// their derived aggregates refreshed; a metadata fetch is attempted for
    /// them only while the title is still missing.
    async fn reconcile_one(
        &self,
        market_id: i64,
        event: &MarketCreatedEvent,
        trades: TradeActivity,
        resolved_keys: &HashSet<i64>,
    ) -> Result<bool> {
        let total_volume = trades.total_volume()?.to_string();
        let trade_count = trades.trade_count();
        let resolved = resolved_keys.contains(&market_id);

        if let Some(existing) = self.store.get(market_id).await? {
            let metadata = if existing.title.is_none() {
                match &event.meta_data_uri {
                    Some(uri) => fetch_metadata(&self.http, market_id, uri).await,
                    None => None,
                }
            } else {
                None
            };
            self.store
                .refresh_derived(
                    market_id,
                    &total_volume,
                    trade_count,
                    resolved,
                    metadata.as_ref(),
                )
                .await?;
            return Ok(false);
        }

        let metadata = match &event.meta_data_uri {
            Some(uri) => fetch_metadata(&self.http, market_id, uri).await,
            None => None,
        }
        .unwrap_or_default();

        let market = NewMarket {
            market_id,
            creator: event.creator.to_lowercase(),
            starts_at: event.starts_at.clone(),
            expires_at: event.expires_at.clone(),
            collateral_token: event.collateral_token.to_lowercase(),
            outcome_count: event.outcome_count.parse().unwrap_or(0),
            initial_collateral: event.initial_collateral.clone(),
            creator_fee_bps: event.creator_fee_bps.parse().unwrap_or(0),
            meta_data_uri: event.meta_data_uri.clone(),
            alpha: event.alpha.clone(),
            title: metadata.title,
            resolution_criteria: metadata.resolution_criteria,
            end_date: metadata.end_date,
            outcomes: metadata
                .outcomes
                .as_ref()
                .and_then(|o| serde_json::to_string(o).ok()),
            resolved,
            total_volume,
            trade_count,
        };
        self.store.upsert(&market).await?;
        info!("Created market {market_id}");
        Ok(true)
    }
}
