//! Unified router client: one vendor API fronting both venues.
//!
//! Listings and order books are fetched per platform with cursor
//! pagination, a shared request-per-minute budget and retry backoff. The
//! router hands out its own lookup ids; the client remembers the mapping
//! to each venue's native market id so order-book rows can be stored under
//! the id the rest of the pipeline knows.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connectors::{
    book_level_value, coerce_price, coerce_size, extract_outcomes, extract_tags,
    filter_winner_listing, finalize_winner_market, first_string, first_value, is_supported_scope,
    rows_and_cursor, ListingCache, TopOfBook, MARKET_PAGE_SIZE,
};
use crate::db::models::{Sport, Venue, VenueMarket};
use crate::normalize::canonical::{build_market, parse_time_value, MarketDraft};

fn platform_key(venue: Venue) -> &'static str {
    match venue {
        Venue::Poly => "polymarket",
        Venue::Kalshi => "kalshi",
    }
}

pub struct RouterClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    page_limit: usize,
    orderbook_batch_size: usize,
    req_per_minute: u32,
    discovery_limit: usize,
    /// (venue, router lookup id) -> native market id.
    lookup_to_native: std::sync::Mutex<HashMap<(Venue, String), String>>,
    poly_cache: ListingCache,
    kalshi_cache: ListingCache,
    /// Start time of the last request; the budget gate sleeps while holding
    /// this lock so concurrent callers queue behind it.
    rate: AsyncMutex<Option<Instant>>,
}

impl RouterClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_sec))
            .build()
            .context("failed to build router HTTP client")?;
        Ok(RouterClient {
            client,
            base_url: config.router_base_url.trim_end_matches('/').to_string(),
            api_key: config.router_api_key.clone(),
            page_limit: config.router_market_page_limit.max(1),
            orderbook_batch_size: config.router_orderbook_batch_size.max(1),
            req_per_minute: config.router_req_per_minute,
            discovery_limit: config.market_discovery_limit,
            lookup_to_native: std::sync::Mutex::new(HashMap::new()),
            poly_cache: ListingCache::new(),
            kalshi_cache: ListingCache::new(),
            rate: AsyncMutex::new(None),
        })
    }

    fn cache(&self, venue: Venue) -> &ListingCache {
        match venue {
            Venue::Poly => &self.poly_cache,
            Venue::Kalshi => &self.kalshi_cache,
        }
    }

    /// Discover one platform's listings through the router, paginating on
    /// cursors with a seen-set to break cycles.
    pub async fn discover_markets(&self, venue: Venue, force: bool) -> Vec<VenueMarket> {
        if !force {
            if let Some(markets) = self.cache(venue).fresh() {
                return markets;
            }
        }

        let mut markets: Vec<VenueMarket> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors: HashSet<String> = HashSet::new();

        for _ in 0..self.page_limit {
            let mut params = vec![
                ("platform", platform_key(venue).to_string()),
                ("limit", MARKET_PAGE_SIZE.to_string()),
            ];
            if let Some(cursor) = &cursor {
                params.push(("cursor", cursor.clone()));
            }

            let Some(payload) = self.request_with_backoff("/markets", &params).await else {
                break;
            };

            let (rows, next_cursor) = rows_and_cursor(&payload);
            if rows.is_empty() {
                break;
            }

            for row in &rows {
                if let Some(market) = self.normalize_market_row(venue, row) {
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

        info!(
            "router discovery completed: platform={} markets={}",
            platform_key(venue),
            markets.len()
        );
        self.cache(venue).store(markets.clone());
        markets
    }

    /// Fetch order books for a set of router lookup ids in batches,
    /// substituting cached native market ids into the output rows.
    pub async fn fetch_orderbooks(&self, venue: Venue, lookup_ids: &[String]) -> Vec<TopOfBook> {
        let mut deduped: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for id in lookup_ids {
            let trimmed = id.trim();
            if !trimmed.is_empty() && seen.insert(trimmed.to_string()) {
                deduped.push(trimmed.to_string());
            }
        }
        if deduped.is_empty() {
            return Vec::new();
        }

        let mut tops = Vec::new();
        for batch in deduped.chunks(self.orderbook_batch_size) {
            let params = vec![
                ("platform", platform_key(venue).to_string()),
                ("market_ids", batch.join(",")),
            ];
            let Some(payload) = self.request_with_backoff("/orderbooks", &params).await else {
                continue;
            };

            let (rows, _) = rows_and_cursor(&payload);
            for row in &rows {
                if let Some(top) = self.normalize_orderbook_row(venue, row) {
                    tops.push(top);
                }
            }
        }

        debug!(
            "router orderbook fetch completed: platform={} requested={} returned={}",
            platform_key(venue),
            deduped.len(),
            tops.len()
        );
        tops
    }

    async fn request_with_backoff(&self, path: &str, params: &[(&str, String)]) -> Option<Value> {
        const ATTEMPTS: u32 = 4;
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        for attempt in 1..=ATTEMPTS {
            self.respect_rate_limit().await;

            let mut request = self.client.get(&url).query(params);
            if let Some(api_key) = &self.api_key {
                request = request.header("X-API-Key", api_key);
            }

            let failure = match request.send().await {
                Ok(response) if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    if attempt < ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs_f64(0.6 * attempt as f64)).await;
                        continue;
                    }
                    "rate limited".to_string()
                }
                Ok(response) => match response.error_for_status() {
                    Ok(response) => match response.json::<Value>().await {
                        Ok(payload) => return Some(payload),
                        Err(err) => format!("invalid json: {err}"),
                    },
                    Err(err) => err.to_string(),
                },
                Err(err) => err.to_string(),
            };

            if attempt == ATTEMPTS {
                warn!("router request to {path} failed after {ATTEMPTS} attempts: {failure}");
                return None;
            }
            tokio::time::sleep(Duration::from_secs_f64(0.4 * attempt as f64)).await;
        }
        None
    }

    /// Global request budget: at least `60 / req_per_minute` seconds elapse
    /// between request starts, across all concurrent callers.
    async fn respect_rate_limit(&self) {
        let req_per_minute = self.req_per_minute.clamp(1, 1_000);
        let min_interval = Duration::from_secs_f64(60.0 / req_per_minute as f64);

        let mut last = self.rate.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn normalize_market_row(&self, venue: Venue, row: &Value) -> Option<VenueMarket> {
        if !row.is_object() {
            return None;
        }

        let lookup_id = extract_market_lookup_id(row)?;
        let venue_market_id = extract_native_market_id(venue, row).unwrap_or_else(|| lookup_id.clone());

        let title = first_string(row, &["title", "question", "name", "event_title", "eventTitle"])?;
        let question = first_string(row, &["question"]).unwrap_or_else(|| title.clone());

        let outcomes = extract_outcomes(row);
        let (outcomes, draw) = filter_winner_listing(row, &question, outcomes)?;

        let start_time = first_value(
            row,
            &[
                "start_time",
                "startTime",
                "event_start_time",
                "eventStartTime",
                "game_start_time",
                "gameStartTime",
                "end_time",
                "endTime",
                "expiration_time",
                "expirationTime",
            ],
        )
        .and_then(parse_time_value);

        let tags = extract_tags(row);
        let (sport_hint, competition_hint) = extract_sport_and_competition(row, &title, &tags);
        let sport_hint = sport_hint?;

        // Enrich the raw bag with router bookkeeping and normalized quote
        // fields so the discovery cycle can seed order books from it.
        let mut raw: std::collections::BTreeMap<String, Value> = row
            .as_object()
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        raw.insert("router_platform".to_string(), Value::from(platform_key(venue)));
        raw.insert("router_lookup_id".to_string(), Value::from(lookup_id.clone()));
        raw.insert(
            "router_native_market_id".to_string(),
            Value::from(venue_market_id.clone()),
        );

        let quote_fields: [(&str, &[&str], bool); 6] = [
            ("yes_bid", &["yes_bid", "yesBid", "best_bid", "bestBid", "bid", "price_bid", "bid_price"], true),
            ("yes_ask", &["yes_ask", "yesAsk", "best_ask", "bestAsk", "ask", "price_ask", "ask_price"], true),
            ("yes_bid_size", &["yes_bid_size", "yesBidSize", "bid_size", "best_bid_size", "size_bid"], false),
            ("yes_ask_size", &["yes_ask_size", "yesAskSize", "ask_size", "best_ask_size", "size_ask"], false),
            ("no_bid", &["no_bid", "noBid"], true),
            ("no_ask", &["no_ask", "noAsk"], true),
        ];
        for (target, aliases, is_price) in quote_fields {
            let coerced = first_value(row, aliases).and_then(|value| {
                if is_price {
                    coerce_price(value)
                } else {
                    coerce_size(value)
                }
            });
            if let Some(value) = coerced {
                raw.insert(target.to_string(), Value::from(value));
            }
        }

        let mut market = build_market(
            venue,
            MarketDraft {
                venue_market_id: venue_market_id.clone(),
                title,
                outcomes,
                start_time,
                sport_hint: Some(sport_hint),
                competition_hint,
                category: Some("sports".to_string()),
                tags,
                raw,
            },
        );
        finalize_winner_market(&mut market, draw);

        if !is_supported_scope(&market) {
            return None;
        }

        self.lookup_to_native
            .lock()
            .unwrap()
            .insert((venue, lookup_id), venue_market_id);
        Some(market)
    }

    fn normalize_orderbook_row(&self, venue: Venue, row: &Value) -> Option<TopOfBook> {
        if !row.is_object() {
            return None;
        }

        let lookup_id = extract_market_lookup_id(row);
        let mut native_market_id = extract_native_market_id(venue, row).unwrap_or_default();

        if let Some(lookup_id) = &lookup_id {
            let mapped = self
                .lookup_to_native
                .lock()
                .unwrap()
                .get(&(venue, lookup_id.clone()))
                .cloned();
            if let Some(mapped) = mapped {
                if native_market_id.is_empty() || native_market_id == *lookup_id {
                    native_market_id = mapped;
                }
            }
            if native_market_id.is_empty() {
                native_market_id = lookup_id.clone();
            }
        }
        if native_market_id.is_empty() {
            return None;
        }

        let mut bid_price = first_value(
            row,
            &["yes_bid", "yesBid", "best_bid", "bestBid", "bid", "bid_price"],
        )
        .and_then(coerce_price);
        let mut ask_price = first_value(
            row,
            &["yes_ask", "yesAsk", "best_ask", "bestAsk", "ask", "ask_price"],
        )
        .and_then(coerce_price);
        let mut bid_size = first_value(
            row,
            &["yes_bid_size", "yesBidSize", "bid_size", "best_bid_size"],
        )
        .and_then(coerce_size);
        let mut ask_size = first_value(
            row,
            &["yes_ask_size", "yesAskSize", "ask_size", "best_ask_size"],
        )
        .and_then(coerce_size);

        if bid_price.is_none() || ask_price.is_none() {
            let bids = row.get("bids").and_then(|v| v.as_array());
            let asks = row.get("asks").and_then(|v| v.as_array());
            if let (Some(bids), Some(asks)) = (bids, asks) {
                if let (Some(best_bid), Some(best_ask)) = (bids.first(), asks.first()) {
                    bid_price = bid_price
                        .or_else(|| book_level_value(best_bid, "price", 0).and_then(coerce_price));
                    ask_price = ask_price
                        .or_else(|| book_level_value(best_ask, "price", 0).and_then(coerce_price));
                    bid_size = bid_size
                        .or_else(|| book_level_value(best_bid, "size", 1).and_then(coerce_size));
                    ask_size = ask_size
                        .or_else(|| book_level_value(best_ask, "size", 1).and_then(coerce_size));
                }
            }
        }

        let (Some(bid_price), Some(ask_price)) = (bid_price, ask_price) else {
            return None;
        };

        Some(TopOfBook {
            venue,
            venue_market_id: native_market_id,
            outcome: "YES".to_string(),
            best_bid: bid_price,
            best_ask: ask_price,
            bid_size: bid_size.unwrap_or(0.0),
            ask_size: ask_size.unwrap_or(0.0),
        })
    }
}

fn extract_market_lookup_id(row: &Value) -> Option<String> {
    first_string(
        row,
        &[
            "market_id",
            "marketId",
            "id",
            "uuid",
            "condition_id",
            "conditionId",
            "ticker",
            "market_ticker",
            "marketTicker",
        ],
    )
}

fn extract_native_market_id(venue: Venue, row: &Value) -> Option<String> {
    match venue {
        Venue::Poly => first_string(
            row,
            &[
                "condition_id",
                "conditionId",
                "clob_token_id",
                "clobTokenId",
                "token_id",
                "tokenId",
                "market_id",
                "marketId",
                "id",
            ],
        ),
        Venue::Kalshi => first_string(
            row,
            &[
                "ticker",
                "market_ticker",
                "marketTicker",
                "event_ticker",
                "eventTicker",
                "market_id",
                "marketId",
                "id",
            ],
        ),
    }
}

/// Router rows mix sport hints across many fields; join them all and look
/// for league markers. Rows with no recognizable sport are dropped.
fn extract_sport_and_competition(
    row: &Value,
    title: &str,
    tags: &[String],
) -> (Option<Sport>, Option<String>) {
    let mut values: Vec<String> = vec![title.to_lowercase()];
    values.extend(tags.iter().map(|t| t.to_lowercase()));
    for key in [
        "sport",
        "league",
        "competition",
        "series",
        "category",
        "event_title",
        "eventTitle",
        "slug",
        "event_slug",
        "eventSlug",
    ] {
        if let Some(text) = row.get(key).and_then(|v| v.as_str()) {
            values.push(text.to_lowercase());
        }
    }
    let joined = values.join(" ");

    let has_nba = joined.contains("nba") || joined.contains("basketball");
    let competition = if joined.contains("epl") || joined.contains("premier league") {
        Some("EPL")
    } else if joined.contains("ucl") || joined.contains("champions league") {
        Some("UCL")
    } else if joined.contains("uel") || joined.contains("europa league") {
        Some("UEL")
    } else if joined.contains("laliga") || joined.contains("la liga") {
        Some("LALIGA")
    } else {
        None
    };

    if has_nba {
        return (Some(Sport::Nba), Some("NBA".to_string()));
    }
    if let Some(competition) = competition {
        return (Some(Sport::Soccer), Some(competition.to_string()));
    }
    if joined.contains("soccer") || joined.contains("football") {
        return (Some(Sport::Soccer), None);
    }
    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::MarketType;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_config(base_url: &str) -> Config {
        use clap::Parser;
        let mut config = Config::parse_from(["mispricing-bot"]);
        config.router_base_url = base_url.to_string();
        config.router_api_key = Some("test-key".to_string());
        config.router_enable = true;
        config.router_req_per_minute = 1_000;
        config
    }

    async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_market_parsing_filters_and_maps_platform() {
        let pages = json!([
            {
                "data": [
                    {
                        "id": "pr-nba-1",
                        "condition_id": "cond-nba-1",
                        "title": "Boston Celtics vs New York Knicks Winner?",
                        "sport": "NBA",
                        "outcomes": ["Yes", "No"],
                        "start_time": "2030-01-01T00:00:00Z",
                    },
                    {
                        "id": "pr-prop-1",
                        "condition_id": "cond-prop-1",
                        "title": "LeBron James points over/under",
                        "sport": "NBA",
                        "outcomes": ["Over", "Under"],
                        "start_time": "2030-01-01T00:00:00Z",
                    },
                    {
                        "id": "pr-epl-1",
                        "condition_id": "cond-epl-1",
                        "title": "Arsenal vs Liverpool Winner?",
                        "league": "EPL",
                        "outcomes": ["Yes", "No"],
                        "start_time": "2030-01-02T00:00:00Z",
                    },
                ],
                "next_cursor": "cursor-2",
            },
            {
                "data": [
                    {
                        "id": "pr-ucl-1",
                        "condition_id": "cond-ucl-1",
                        "title": "Real Madrid vs Barcelona Winner?",
                        "competition": "UCL",
                        "outcomes": ["Yes", "No"],
                        "start_time": "2030-01-03T00:00:00Z",
                    }
                ]
            },
        ]);

        let calls: Arc<std::sync::Mutex<Vec<HashMap<String, String>>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        let app = axum::Router::new().route(
            "/markets",
            get({
                let calls = calls.clone();
                let counter = counter.clone();
                move |Query(params): Query<HashMap<String, String>>| {
                    let calls = calls.clone();
                    let counter = counter.clone();
                    let pages = pages.clone();
                    async move {
                        calls.lock().unwrap().push(params);
                        let page = counter.fetch_add(1, Ordering::SeqCst);
                        let body = pages
                            .as_array()
                            .and_then(|p| p.get(page))
                            .cloned()
                            .unwrap_or(json!({"data": []}));
                        axum::Json(body)
                    }
                }
            }),
        );

        let base_url = serve(app).await;
        let client = RouterClient::new(&test_config(&base_url)).unwrap();

        let markets = client.discover_markets(Venue::Poly, true).await;

        assert_eq!(markets.len(), 3);
        assert!(markets.iter().all(|m| m.venue == Venue::Poly));
        let ids: HashSet<&str> = markets.iter().map(|m| m.venue_market_id.as_str()).collect();
        assert_eq!(
            ids,
            HashSet::from(["cond-nba-1", "cond-epl-1", "cond-ucl-1"])
        );
        assert!(markets.iter().all(|m| m.market_type == MarketType::WinnerBinary));

        let recorded = calls.lock().unwrap();
        assert_eq!(recorded[0].get("platform").map(String::as_str), Some("polymarket"));
        assert_eq!(recorded[1].get("cursor").map(String::as_str), Some("cursor-2"));
    }

    #[tokio::test]
    async fn test_orderbook_batching_and_native_id_mapping() {
        let responses = json!([
            {
                "data": [
                    {
                        "market_id": "lookup-1",
                        "best_bid": 0.44,
                        "best_ask": 0.46,
                        "bid_size": 120,
                        "ask_size": 130,
                    },
                    {
                        "market_id": "lookup-2",
                        "bids": [[0.51, 200]],
                        "asks": [[0.53, 190]],
                    },
                ]
            },
            {
                "data": [
                    {
                        "market_id": "lookup-3",
                        "yes_bid": 48,
                        "yes_ask": 52,
                        "yes_bid_size": 95,
                        "yes_ask_size": 90,
                    }
                ]
            },
        ]);

        let calls: Arc<std::sync::Mutex<Vec<HashMap<String, String>>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        let app = axum::Router::new().route(
            "/orderbooks",
            get({
                let calls = calls.clone();
                let counter = counter.clone();
                move |Query(params): Query<HashMap<String, String>>| {
                    let calls = calls.clone();
                    let counter = counter.clone();
                    let responses = responses.clone();
                    async move {
                        calls.lock().unwrap().push(params);
                        let index = counter.fetch_add(1, Ordering::SeqCst);
                        let body = responses
                            .as_array()
                            .and_then(|p| p.get(index))
                            .cloned()
                            .unwrap_or(json!({"data": []}));
                        axum::Json(body)
                    }
                }
            }),
        );

        let base_url = serve(app).await;
        let mut config = test_config(&base_url);
        config.router_orderbook_batch_size = 2;
        let client = RouterClient::new(&config).unwrap();
        {
            let mut mapping = client.lookup_to_native.lock().unwrap();
            mapping.insert((Venue::Poly, "lookup-1".to_string()), "cond-1".to_string());
            mapping.insert((Venue::Poly, "lookup-2".to_string()), "cond-2".to_string());
            mapping.insert((Venue::Poly, "lookup-3".to_string()), "cond-3".to_string());
        }

        let books = client
            .fetch_orderbooks(
                Venue::Poly,
                &[
                    "lookup-1".to_string(),
                    "lookup-2".to_string(),
                    "lookup-3".to_string(),
                ],
            )
            .await;

        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(
            recorded[0].get("market_ids").map(String::as_str),
            Some("lookup-1,lookup-2")
        );
        assert_eq!(
            recorded[1].get("market_ids").map(String::as_str),
            Some("lookup-3")
        );

        assert_eq!(books.len(), 3);
        assert!(books.iter().all(|b| b.venue == Venue::Poly));
        let ids: HashSet<&str> = books.iter().map(|b| b.venue_market_id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["cond-1", "cond-2", "cond-3"]));

        let cents_row = books.iter().find(|b| b.venue_market_id == "cond-3").unwrap();
        assert!((cents_row.best_bid - 0.48).abs() < 1e-12);
        assert!((cents_row.best_ask - 0.52).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_rate_limited_request_retries_and_succeeds() {
        let counter = Arc::new(AtomicUsize::new(0));

        let app = axum::Router::new().route(
            "/markets",
            get({
                let counter = counter.clone();
                move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            (
                                StatusCode::TOO_MANY_REQUESTS,
                                axum::Json(json!({"error": "rate limited"})),
                            )
                        } else {
                            (StatusCode::OK, axum::Json(json!({"data": [{"id": "ok"}]})))
                        }
                    }
                }
            }),
        );

        let base_url = serve(app).await;
        let client = RouterClient::new(&test_config(&base_url)).unwrap();

        let started = Instant::now();
        let payload = client
            .request_with_backoff("/markets", &[("platform", "polymarket".to_string())])
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(payload, json!({"data": [{"id": "ok"}]}));
        // The 429 path sleeps before retrying.
        assert!(started.elapsed() >= Duration::from_millis(550));
    }

    #[test]
    fn test_sport_extraction_drops_unknown_rows() {
        let row = json!({"id": "x", "title": "Rate hike in March?"});
        let (sport, _) = extract_sport_and_competition(&row, "Rate hike in March?", &[]);
        assert!(sport.is_none());

        let row = json!({"id": "x", "league": "EPL"});
        let (sport, competition) =
            extract_sport_and_competition(&row, "Arsenal vs Liverpool Winner?", &["epl".to_string()]);
        assert_eq!(sport, Some(Sport::Soccer));
        assert_eq!(competition.as_deref(), Some("EPL"));
    }
}
