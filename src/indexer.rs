use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{Config, EVENT_PAGE_SIZE, INDEXER_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::{BuyEvent, MarketCreatedEvent, MarketResolvedEvent, SellEvent, TradeActivity};

// ---------------------------------------------------------------------------
// Event index abstraction
// ---------------------------------------------------------------------------

/// Read access to the chain event index. The GraphQL client implements this
/// in production; tests substitute an in-memory stub.
#[async_trait]
pub trait EventIndex: Send + Sync {
    async fn creation_events(&self, limit: i64, offset: i64) -> Result<Vec<MarketCreatedEvent>>;

    async fn resolution_events(&self, limit: i64) -> Result<Vec<MarketResolvedEvent>>;

    async fn trade_events(&self, market_id: i64, limit: i64) -> Result<TradeActivity>;

    /// Pages through creation events until a short page signals the end.
    async fn all_creation_events(&self) -> Result<Vec<MarketCreatedEvent>> {
        let mut events = Vec::new();
        let mut offset = 0i64;
        loop {
            let page = self.creation_events(EVENT_PAGE_SIZE, offset).await?;
            let page_len = page.len() as i64;
            events.extend(page);
            if page_len < EVENT_PAGE_SIZE {
                break;
            }
            offset += page_len;
        }
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// GraphQL client
// ---------------------------------------------------------------------------

const CREATION_EVENTS_QUERY: &str = r#"
    query CreationEvents($limit: Int, $offset: Int) {
      MarketContract_MarketCreated(
        limit: $limit
        offset: $offset
        order_by: { marketId: asc }
      ) {
        marketId
        creator
        startsAt
        expiresAt
        collateralToken
        outcomeCount
        initialCollateral
        creatorFeeBps
        metaDataURI
        alpha
      }
    }
"#;

const RESOLUTION_EVENTS_QUERY: &str = r#"
    query ResolutionEvents($limit: Int) {
      MarketContract_MarketResolved(
        limit: $limit
        order_by: { marketId: desc }
      ) {
        marketId
        resolver
      }
    }
"#;

const TRADE_EVENTS_QUERY: &str = r#"
    query TradeEvents($marketId: numeric, $limit: Int) {
      bought: MarketContract_OutcomeTokensBought(
        where: { marketId: { _eq: $marketId } }
        limit: $limit
        order_by: { id: desc }
      ) {
        cost
      }
      sold: MarketContract_OutcomeTokensSold(
        where: { marketId: { _eq: $marketId } }
        limit: $limit
        order_by: { id: desc }
      ) {
        received
      }
    }
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct CreationEventsData {
    #[serde(rename = "MarketContract_MarketCreated")]
    events: Vec<MarketCreatedEvent>,
}

#[derive(Debug, Deserialize)]
struct ResolutionEventsData {
    #[serde(rename = "MarketContract_MarketResolved")]
    events: Vec<MarketResolvedEvent>,
}

#[derive(Debug, Deserialize)]
struct TradeEventsData {
    bought: Vec<BuyEvent>,
    sold: Vec<SellEvent>,
}

pub struct IndexerClient {
    client: reqwest::Client,
    endpoint: String,
}

impl IndexerClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(INDEXER_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            endpoint: cfg.indexer_url.clone(),
        })
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AppError::Indexer(format!(
                "index responded with HTTP {}",
                resp.status()
            )));
        }

        let body = resp.text().await?;
        let parsed: GraphQlResponse<T> = serde_json::from_str(&body)?;

        if let Some(errors) = parsed.errors {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(AppError::Indexer(messages.join("; ")));
        }

        parsed
            .data
            .ok_or_else(|| AppError::Indexer("empty response data".to_string()))
    }
}

#[async_trait]
impl EventIndex for IndexerClient {
    async fn creation_events(&self, limit: i64, offset: i64) -> Result<Vec<MarketCreatedEvent>> {
        let data: CreationEventsData = self
            .query(
                CREATION_EVENTS_QUERY,
                json!({ "limit": limit, "offset": offset }),
            )
            .await?;
        Ok(data.events)
    }

    async fn resolution_events(&self, limit: i64) -> Result<Vec<MarketResolvedEvent>> {
        let data: ResolutionEventsData = self
            .query(RESOLUTION_EVENTS_QUERY, json!({ "limit": limit }))
            .await?;
        Ok(data.events)
    }

    async fn trade_events(&self, market_id: i64, limit: i64) -> Result<TradeActivity> {
        let data: TradeEventsData = self
            .query(
                TRADE_EVENTS_QUERY,
                json!({ "marketId": market_id.to_string(), "limit": limit }),
            )
            .await?;
        Ok(TradeActivity {
            bought: data.bought,
            sold: data.sold,
        })
    }
}
