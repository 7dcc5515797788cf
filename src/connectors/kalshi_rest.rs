//! Kalshi REST client: cursor-paginated market listings plus the event
//! ticker game-time derivation.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

use crate::config::Config;
use crate::connectors::{
    extract_tags, filter_winner_listing, finalize_winner_market, first_string, first_value,
    get_json_with_backoff, is_supported_scope, ListingCache, MARKET_PAGE_SIZE,
};
use crate::db::models::{Sport, Venue, VenueMarket};
use crate::normalize::canonical::{build_market, parse_time_value, MarketDraft};

/// Cursor pages fetched per discovery call before giving up.
const MAX_PAGES: usize = 10;

pub struct KalshiRestClient {
    client: reqwest::Client,
    base_url: String,
    discovery_limit: usize,
    cache: ListingCache,
}

impl KalshiRestClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_sec))
            .build()
            .context("failed to build kalshi HTTP client")?;
        Ok(KalshiRestClient {
            client,
            base_url: config.kalshi_rest_base_url.trim_end_matches('/').to_string(),
            discovery_limit: config.market_discovery_limit,
            cache: ListingCache::new(),
        })
    }

    /// Fetch open KALSHI listings with cursor pagination. A seen-cursor set
    /// breaks cycles; fetch failures fall back to the stale cache.
    pub async fn discover_markets(&self, force: bool) -> Vec<VenueMarket> {
        if !force {
            if let Some(markets) = self.cache.fresh() {
                return markets;
            }
        }

        let url = format!("{}/markets", self.base_url);
        let mut markets: Vec<VenueMarket> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors: HashSet<String> = HashSet::new();
        let mut fetched_any = false;

        for _ in 0..MAX_PAGES {
            let mut params = vec![
                ("status", "open".to_string()),
                ("limit", MARKET_PAGE_SIZE.to_string()),
            ];
            if let Some(cursor) = &cursor {
                params.push(("cursor", cursor.clone()));
            }

            let Some(payload) = get_json_with_backoff(&self.client, &url, &params, None).await
            else {
                break;
            };
            fetched_any = true;

            let (rows, next_cursor) = crate::connectors::rows_and_cursor(&payload);
            if rows.is_empty() {
                break;
            }

            for row in &rows {
                if let Some(market) = normalize_kalshi_row(row) {
                    markets.push(market);
                    if markets.len() >= self.discovery_limit {
                        break;
                    }
                }
            }

            if markets.len() >= self.discovery_limit {
                break;
            }
            match next_cursor {
                Some(next) if !seen_cursors.contains(&next) => {
                    seen_cursors.insert(next.clone());
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        if !fetched_any {
            return self.cache.stale();
        }

        info!("kalshi discovery completed: {} markets", markets.len());
        self.cache.store(markets.clone());
        markets
    }
}

/// One Kalshi listing row -> normalized market, or None when malformed,
/// not a winner market, or out of scope.
pub(crate) fn normalize_kalshi_row(row: &Value) -> Option<VenueMarket> {
    let ticker = first_string(row, &["ticker", "market_ticker"])?;
    let title = first_string(row, &["title", "subtitle"])?;

    let outcomes = vec!["YES".to_string(), "NO".to_string()];
    let (outcomes, draw) = filter_winner_listing(row, &title, outcomes)?;

    let (sport_hint, competition_hint) = infer_sport_competition(row, &title);

    let reference = first_value(
        row,
        &["event_start_time", "close_time", "expiration_time", "open_time"],
    )
    .and_then(parse_time_value);
    let start_time = derive_game_time(&ticker, reference).or_else(|| {
        first_value(
            row,
            &["open_time", "event_start_time", "close_time", "expiration_time"],
        )
        .and_then(parse_time_value)
    });

    let category = first_string(row, &["category"]);
    let tags = extract_tags(row);
    let raw = row
        .as_object()
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    let mut market = build_market(
        Venue::Kalshi,
        MarketDraft {
            venue_market_id: ticker,
            title,
            outcomes,
            start_time,
            sport_hint,
            competition_hint,
            category,
            tags,
            raw,
        },
    );
    finalize_winner_market(&mut market, draw);

    is_supported_scope(&market).then_some(market)
}

fn infer_sport_competition(row: &Value, title: &str) -> (Option<Sport>, Option<String>) {
    let text = [
        title.to_lowercase(),
        first_string(row, &["series_ticker"]).unwrap_or_default().to_lowercase(),
        first_string(row, &["event_ticker"]).unwrap_or_default().to_lowercase(),
        first_string(row, &["subtitle"]).unwrap_or_default().to_lowercase(),
    ]
    .join(" ");

    if text.contains("nba") || text.contains("basketball") {
        return (Some(Sport::Nba), Some("NBA".to_string()));
    }
    if text.contains("epl") || text.contains("premier") {
        return (Some(Sport::Soccer), Some("EPL".to_string()));
    }
    if text.contains("ucl") || text.contains("champions league") {
        return (Some(Sport::Soccer), Some("UCL".to_string()));
    }
    if text.contains("uel") || text.contains("europa league") {
        return (Some(Sport::Soccer), Some("UEL".to_string()));
    }
    if text.contains("laliga") || text.contains("la liga") {
        return (Some(Sport::Soccer), Some("LALIGA".to_string()));
    }
    (None, None)
}

/// Kalshi event tickers carry a `-DDMonYY` date token. Parse it as a UTC
/// date and merge the time-of-day from the reference timestamp. NBA games
/// landing at or before 08:00 UTC are local-evening games that tip off the
/// next UTC day.
pub(crate) fn derive_game_time(
    ticker: &str,
    reference: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let date = ticker.split('-').find_map(parse_date_token)?;

    let (hour, minute, second) = reference
        .map(|r| (r.hour(), r.minute(), r.second()))
        .unwrap_or((0, 0, 0));

    let mut merged = Utc
        .with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, second)
        .single()?;

    if ticker.to_uppercase().contains("NBA") && hour <= 8 {
        merged += Duration::days(1);
    }
    Some(merged)
}

/// `25DEC25` -> 2025-12-25.
fn parse_date_token(token: &str) -> Option<NaiveDate> {
    if token.len() < 7 {
        return None;
    }
    // Tickers append team codes to the date segment (`25DEC25DENLAL`).
    let day: u32 = token.get(0..2)?.parse().ok()?;
    let month = match token.get(2..5)?.to_uppercase().as_str() {
        "JAN" => 1,
        "FEB" => 2,
        "MAR" => 3,
        "APR" => 4,
        "MAY" => 5,
        "JUN" => 6,
        "JUL" => 7,
        "AUG" => 8,
        "SEP" => 9,
        "OCT" => 10,
        "NOV" => 11,
        "DEC" => 12,
        _ => return None,
    };
    let year: i32 = token.get(5..7)?.parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}
