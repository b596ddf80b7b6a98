use serde_json::Value;
use tracing::warn;

use crate::types::MarketMetadata;

/// Fetch and parse the enrichment document behind a market's metadata URI.
/// Any failure degrades to None; the market record is still created and a
/// later pass can fill the fields in.
pub async fn fetch_metadata(
    client: &reqwest::Client,
    market_id: i64,
    uri: &str,
) -> Option<MarketMetadata> {
    if !uri.starts_with("http") {
        warn!("Market {market_id} metadata URI is not fetchable: {uri:?}");
        return None;
    }

    let resp = match client.get(uri).send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!("Metadata fetch failed for market {market_id}: {e}");
            return None;
        }
    };
    if !resp.status().is_success() {
        warn!(
            "Metadata fetch for market {market_id} returned HTTP {}",
            resp.status()
        );
        return None;
    }

    match resp.json::<Value>().await {
        Ok(doc) => Some(parse_metadata_doc(&doc)),
        Err(e) => {
            warn!("Metadata for market {market_id} is not valid JSON: {e}");
            None
        }
    }
}

/// Pull known fields out of an arbitrary metadata document. Missing or
/// wrongly typed fields become None rather than errors.
pub fn parse_metadata_doc(doc: &Value) -> MarketMetadata {
    let title = doc.get("title").and_then(Value::as_str).map(str::to_string);
    let resolution_criteria = doc
        .get("rules")
        .and_then(|r| r.get("description"))
        .and_then(Value::as_str)
        .map(str::to_string);
    // endDate is numeric in some documents, a string in others.
    let end_date = doc.get("endDate").and_then(|v| {
        v.as_str()
            .map(str::to_string)
            .or_else(|| v.as_i64().map(|n| n.to_string()))
    });
    let outcomes = doc.get("outcomes").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    });

    MarketMetadata {
        title,
        resolution_criteria,
        end_date,
        outcomes,
    }
}
