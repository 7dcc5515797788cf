//! Polymarket CLOB client: read-only top-of-book snapshots. Order
//! placement is deliberately not exposed.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::connectors::{book_level_value, get_json_with_backoff, value_to_f64, TopOfBook};
use crate::db::models::Venue;

pub struct PolyClobClient {
    client: reqwest::Client,
    base_url: String,
}

impl PolyClobClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_sec))
            .build()
            .context("failed to build clob HTTP client")?;
        Ok(PolyClobClient {
            client,
            base_url: config.poly_clob_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Best bid/ask for one token, or None when the book is empty or the
    /// fetch fails.
    pub async fn fetch_top_of_book(&self, token_id: &str) -> Option<TopOfBook> {
        let url = format!("{}/book", self.base_url);
        let params = [("token_id", token_id.to_string())];
        let payload = get_json_with_backoff(&self.client, &url, &params, None).await?;

        let top = parse_book_payload(token_id, &payload);
        if top.is_none() {
            debug!("empty or malformed clob book for token {token_id}");
        }
        top
    }
}

/// Book payload -> top-of-book. Levels are dicts with price/size keys or
/// [price, size] pairs; the first level on each side is the touch.
pub(crate) fn parse_book_payload(token_id: &str, payload: &Value) -> Option<TopOfBook> {
    let bids = payload.get("bids").and_then(|v| v.as_array())?;
    let asks = payload.get("asks").and_then(|v| v.as_array())?;
    let best_bid = bids.first()?;
    let best_ask = asks.first()?;

    let bid_price = value_to_f64(book_level_value(best_bid, "price", 0)?)?;
    let bid_size = value_to_f64(book_level_value(best_bid, "size", 1)?)?;
    let ask_price = value_to_f64(book_level_value(best_ask, "price", 0)?)?;
    let ask_size = value_to_f64(book_level_value(best_ask, "size", 1)?)?;

    Some(TopOfBook {
        venue: Venue::Poly,
        venue_market_id: token_id.to_string(),
        outcome: "YES".to_string(),
        best_bid: bid_price,
        best_ask: ask_price,
        bid_size,
        ask_size,
    })
}
