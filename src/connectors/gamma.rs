//! Polymarket Gamma client: market listings for the direct data source.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use crate::config::Config;
use crate::connectors::{
    extract_outcomes, extract_tags, filter_winner_listing, finalize_winner_market, first_string,
    first_value, get_json_with_backoff, is_supported_scope, ListingCache,
};
use crate::db::models::{Venue, VenueMarket};
use crate::normalize::canonical::{build_market, parse_time_value, MarketDraft};

pub struct GammaClient {
    client: reqwest::Client,
    base_url: String,
    discovery_limit: usize,
    cache: ListingCache,
}

impl GammaClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_sec))
            .build()
            .context("failed to build gamma HTTP client")?;
        Ok(GammaClient {
            client,
            base_url: config.poly_gamma_base_url.trim_end_matches('/').to_string(),
            discovery_limit: config.market_discovery_limit,
            cache: ListingCache::new(),
        })
    }

    /// Fetch active POLY listings, filtered to in-scope winner markets.
    /// Serves from the 30-second cache unless forced; serves stale contents
    /// when the fetch fails.
    pub async fn discover_markets(&self, force: bool) -> Vec<VenueMarket> {
        if !force {
            if let Some(markets) = self.cache.fresh() {
                return markets;
            }
        }

        let url = format!("{}/markets", self.base_url);
        let params = [
            ("active", "true".to_string()),
            ("limit", self.discovery_limit.to_string()),
        ];
        let Some(payload) = get_json_with_backoff(&self.client, &url, &params, None).await else {
            return self.cache.stale();
        };

        let items = match payload.as_array() {
            Some(items) => items.clone(),
            None => payload
                .get("markets")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default(),
        };

        let markets: Vec<VenueMarket> = items
            .iter()
            .filter_map(normalize_gamma_row)
            .take(self.discovery_limit)
            .collect();

        info!("gamma discovery completed: {} markets", markets.len());
        self.cache.store(markets.clone());
        markets
    }
}

/// One Gamma listing row -> normalized market, or None when the row is
/// malformed, not a winner market, or out of scope.
pub(crate) fn normalize_gamma_row(row: &Value) -> Option<VenueMarket> {
    let venue_market_id = first_string(row, &["conditionId", "condition_id", "id"])?;
    let title = first_string(row, &["question", "title"])?;

    let outcomes = extract_outcomes(row);
    let (outcomes, draw) = filter_winner_listing(row, &title, outcomes)?;

    let tags = extract_tags(row);
    let category = first_string(row, &["category", "categorySlug"]);
    let start_time = first_value(
        row,
        &["startDate", "startDateTime", "gameStartTime", "endDate"],
    )
    .and_then(parse_time_value);

    let raw = row
        .as_object()
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    let mut market = build_market(
        Venue::Poly,
        MarketDraft {
            venue_market_id,
            title,
            outcomes,
            start_time,
            sport_hint: None,
            competition_hint: None,
            category,
            tags,
            raw,
        },
    );
    finalize_winner_market(&mut market, draw);

    is_supported_scope(&market).then_some(market)
}
