//! Venue connectors and the shared listing-normalization pipeline.
//!
//! Vendor payloads use many aliases for the same concept, so field access
//! goes through first-non-empty value accessors rather than typed structs.
//! The winner-market filter, draw detection, scope filter and top-of-book
//! coercion live here once and are shared by the direct clients and the
//! unified router client.

pub mod clob;
pub mod gamma;
pub mod kalshi_rest;
pub mod kalshi_ws;
pub mod router;

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::db;
use crate::db::models::{MarketType, Sport, Venue, VenueMarket};
use crate::db::Database;
use crate::normalize::competitions::is_supported_soccer_competition;

/// Discovery results are cached this long; refreshes inside the window are
/// served from memory unless forced.
pub(crate) const MARKET_CACHE_TTL: Duration = Duration::from_secs(30);

/// Listing page size for cursor-paginated market endpoints.
pub(crate) const MARKET_PAGE_SIZE: usize = 200;

/// One normalized top-of-book row ready for the store.
#[derive(Debug, Clone)]
pub struct TopOfBook {
    pub venue: Venue,
    pub venue_market_id: String,
    pub outcome: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
}

/// Destination for streamed or polled top-of-book updates.
#[async_trait]
pub trait QuoteSink: Send + Sync {
    async fn publish_top(&self, top: TopOfBook) -> Result<()>;
}

#[async_trait]
impl QuoteSink for Database {
    async fn publish_top(&self, top: TopOfBook) -> Result<()> {
        self.with_conn(|conn| {
            db::upsert_top(
                conn,
                top.venue,
                &top.venue_market_id,
                &top.outcome,
                top.best_bid,
                top.best_ask,
                top.bid_size,
                top.ask_size,
            )
        })
    }
}

// ── Value accessors ──────────────────────────────────────────────────────────

/// First non-null value among the candidate keys.
pub(crate) fn first_value<'a>(row: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| row.get(key))
        .find(|value| !value.is_null())
}

/// First non-empty string among the candidate keys.
pub(crate) fn first_string(row: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| row.get(key))
        .filter_map(|value| value.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Prices arrive as probabilities or integer cents; cents are divided down.
/// Anything outside [0, 1] after scaling is rejected.
pub(crate) fn coerce_price(value: &Value) -> Option<f64> {
    let mut parsed = value_to_f64(value)?;
    if parsed > 1.0 {
        parsed /= 100.0;
    }
    (0.0..=1.0).contains(&parsed).then_some(parsed)
}

/// Sizes are clamped non-negative; unparseable sizes are dropped.
pub(crate) fn coerce_size(value: &Value) -> Option<f64> {
    value_to_f64(value).map(|size| size.max(0.0))
}

/// A book level is either {"price": .., "size": ..} or a [price, size] pair.
pub(crate) fn book_level_value<'a>(level: &'a Value, key: &str, index: usize) -> Option<&'a Value> {
    if level.is_object() {
        return level.get(key);
    }
    level.as_array().and_then(|pair| pair.get(index))
}

// ── Winner-market filtering ──────────────────────────────────────────────────

/// Question substrings that mark player props, spreads and totals.
pub(crate) const NOISE_MARKERS: &[&str] = &[
    "spread",
    "o/u",
    "over ",
    "under ",
    "assists",
    "points",
    "rebounds",
    "threes",
    "3-pointers",
    "turnovers",
    "steals",
    "blocks",
    "1h",
    "first half",
    "double-double",
    "triple-double",
    "margins",
    "by more than",
    "by at least",
];

/// Does this question describe a match-winner market?
pub(crate) fn is_winner_market(question: &str, outcomes: &[String]) -> bool {
    let lowered = question.to_lowercase();
    let q = lowered.trim();

    if NOISE_MARKERS.iter().any(|marker| q.contains(marker)) {
        return false;
    }

    if q.contains("end in a draw") {
        return true;
    }
    if q.contains(" winner") || q.ends_with("winner?") {
        return true;
    }
    if q.contains(" win on ") {
        return true;
    }
    if outcomes.len() == 2 && (q.contains(" vs") || q.contains(" at ")) {
        let lowered_outcomes: BTreeSet<String> = outcomes
            .iter()
            .map(|o| o.trim().to_lowercase())
            .collect();
        let yes_no: BTreeSet<String> = ["yes", "no"].iter().map(|s| s.to_string()).collect();
        let over_under: BTreeSet<String> =
            ["over", "under"].iter().map(|s| s.to_string()).collect();
        if lowered_outcomes != yes_no && lowered_outcomes != over_under {
            return true;
        }
    }
    q.contains(" win ") && q.starts_with("will ")
}

/// Draw legs show up as a DRAW/TIE outcome, a `-TIE` event ticker, or
/// draw/tie wording in the question or subtitle.
pub(crate) fn has_draw(row: &Value, outcomes: &[String], question: &str) -> bool {
    let lowered_outcomes: BTreeSet<String> = outcomes
        .iter()
        .map(|o| o.trim().to_lowercase())
        .collect();
    if lowered_outcomes.contains("draw") || lowered_outcomes.contains("tie") {
        return true;
    }

    for key in ["ticker", "event_ticker", "eventTicker", "market_ticker"] {
        if let Some(ticker) = row.get(key).and_then(|v| v.as_str()) {
            if ticker.to_uppercase().ends_with("-TIE") {
                return true;
            }
        }
    }

    for key in ["yes_sub_title", "subtitle", "title", "question"] {
        if let Some(text) = row.get(key).and_then(|v| v.as_str()) {
            let lowered = text.to_lowercase();
            if lowered.contains("draw") || lowered.contains("tie") {
                return true;
            }
        }
    }

    let q = question.to_lowercase();
    q.contains("draw") || q.contains("tie")
}

/// Applies the winner filter and draw rewrite to a candidate listing.
/// Returns the (possibly rewritten) outcomes and the draw flag, or None
/// when the listing is not a winner market.
pub(crate) fn filter_winner_listing(
    row: &Value,
    question: &str,
    outcomes: Vec<String>,
) -> Option<(Vec<String>, bool)> {
    if !is_winner_market(question, &outcomes) {
        return None;
    }
    if has_draw(row, &outcomes, question) {
        let three_way = vec!["HOME".to_string(), "DRAW".to_string(), "AWAY".to_string()];
        return Some((three_way, true));
    }
    Some((outcomes, false))
}

/// Winner markets carry a definitive type once the draw question is
/// settled: two-way or three-way, never OTHER.
pub(crate) fn finalize_winner_market(market: &mut VenueMarket, draw: bool) {
    market.market_type = if draw {
        MarketType::Winner3Way
    } else {
        MarketType::WinnerBinary
    };
}

/// Keep only (NBA, NBA) and (SOCCER, supported competition) listings.
pub(crate) fn is_supported_scope(market: &VenueMarket) -> bool {
    match market.sport {
        Sport::Nba => market.competition.as_deref() == Some("NBA"),
        Sport::Soccer => market
            .competition
            .as_deref()
            .is_some_and(is_supported_soccer_competition),
        Sport::Unknown => false,
    }
}

// ── Outcome / tag extraction ─────────────────────────────────────────────────

/// Outcomes arrive as a list of strings, a list of labeled objects, or a
/// JSON-encoded string of either. Missing outcomes default to YES/NO.
pub(crate) fn extract_outcomes(row: &Value) -> Vec<String> {
    let default = || vec!["YES".to_string(), "NO".to_string()];

    let Some(raw) = first_value(row, &["outcomes", "market_outcomes", "tokens"]) else {
        return default();
    };

    let decoded: Value = match raw {
        Value::String(text) => match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return default(),
        },
        other => other.clone(),
    };

    let mut parsed = Vec::new();
    if let Some(items) = decoded.as_array() {
        for item in items {
            match item {
                Value::String(label) => parsed.push(label.clone()),
                Value::Object(_) => {
                    if let Some(label) =
                        first_string(item, &["name", "title", "label", "outcome", "token"])
                    {
                        parsed.push(label);
                    }
                }
                _ => {}
            }
        }
    }

    if parsed.is_empty() {
        default()
    } else {
        parsed
    }
}

/// Collect every league-ish string the payload offers: tags, series,
/// category, slugs, either as plain strings or labeled objects.
pub(crate) fn extract_tags(row: &Value) -> Vec<String> {
    let mut tags = Vec::new();
    for key in [
        "tags",
        "tag",
        "league",
        "competition",
        "series",
        "series_ticker",
        "category",
        "sport",
        "slug",
        "event_slug",
        "eventSlug",
        "groupItemTitle",
    ] {
        match row.get(key) {
            Some(Value::String(text)) if !text.is_empty() => tags.push(text.clone()),
            Some(Value::Array(items)) => {
                for item in items {
                    match item {
                        Value::String(text) if !text.is_empty() => tags.push(text.clone()),
                        Value::Object(_) => {
                            if let Some(label) =
                                first_string(item, &["slug", "name", "title", "label"])
                            {
                                tags.push(label);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    tags
}

// ── Pagination helpers ───────────────────────────────────────────────────────

/// Listing payloads are either a bare array or an object wrapping the rows
/// under one of several keys, with an optional next cursor.
pub(crate) fn rows_and_cursor(payload: &Value) -> (Vec<Value>, Option<String>) {
    if let Some(items) = payload.as_array() {
        let rows = items.iter().filter(|v| v.is_object()).cloned().collect();
        return (rows, None);
    }
    if !payload.is_object() {
        return (Vec::new(), None);
    }

    let mut rows_value =
        first_value(payload, &["data", "markets", "orderbooks", "items", "results"]);
    if let Some(inner) = rows_value {
        if inner.is_object() {
            rows_value = first_value(inner, &["items", "results", "data"]);
        }
    }

    let rows = rows_value
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter(|v| v.is_object()).cloned().collect())
        .unwrap_or_default();

    let cursor = first_string(payload, &["next_cursor", "nextCursor", "cursor"]);
    (rows, cursor)
}

// ── HTTP retry policy ────────────────────────────────────────────────────────

/// GET with up to 4 attempts. Rate limits sleep longer than transient
/// failures; the final failure is logged and swallowed so callers fall back
/// to stale caches.
pub(crate) async fn get_json_with_backoff(
    client: &reqwest::Client,
    url: &str,
    params: &[(&str, String)],
    header: Option<(&str, String)>,
) -> Option<Value> {
    const ATTEMPTS: u32 = 4;
    const BASE_RETRY_SEC: f64 = 0.4;
    const BASE_RATE_LIMIT_SEC: f64 = 0.6;

    for attempt in 1..=ATTEMPTS {
        let mut request = client.get(url).query(params);
        if let Some((name, value)) = &header {
            request = request.header(*name, value.as_str());
        }

        let failure = match request.send().await {
            Ok(response) if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                if attempt < ATTEMPTS {
                    tokio::time::sleep(Duration::from_secs_f64(
                        BASE_RATE_LIMIT_SEC * attempt as f64,
                    ))
                    .await;
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
            warn!("request to {url} failed after {ATTEMPTS} attempts: {failure}");
            return None;
        }
        tokio::time::sleep(Duration::from_secs_f64(BASE_RETRY_SEC * attempt as f64)).await;
    }
    None
}

// ── Discovery cache ──────────────────────────────────────────────────────────

/// 30-second in-memory cache for one connector's discovered listings.
pub(crate) struct ListingCache {
    inner: Mutex<Option<(Vec<VenueMarket>, Instant)>>,
}

impl ListingCache {
    pub fn new() -> Self {
        ListingCache {
            inner: Mutex::new(None),
        }
    }

    pub fn fresh(&self) -> Option<Vec<VenueMarket>> {
        let guard = self.inner.lock().unwrap();
        match guard.as_ref() {
            Some((markets, fetched_at))
                if !markets.is_empty() && fetched_at.elapsed() < MARKET_CACHE_TTL =>
            {
                Some(markets.clone())
            }
            _ => None,
        }
    }

    /// Latest contents regardless of age, as the stale fallback after a
    /// failed fetch.
    pub fn stale(&self) -> Vec<VenueMarket> {
        let guard = self.inner.lock().unwrap();
        guard
            .as_ref()
            .map(|(markets, _)| markets.clone())
            .unwrap_or_default()
    }

    pub fn store(&self, markets: Vec<VenueMarket>) {
        let mut guard = self.inner.lock().unwrap();
        *guard = Some((markets, Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcomes(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_winner_filter_accepts_winner_questions() {
        assert!(is_winner_market(
            "Boston Celtics vs New York Knicks Winner?",
            &outcomes(&["Yes", "No"])
        ));
        assert!(is_winner_market(
            "Will Arsenal win the match?",
            &outcomes(&["Yes", "No"])
        ));
        assert!(is_winner_market(
            "Will the game end in a draw?",
            &outcomes(&["Yes", "No"])
        ));
        // Two team-named outcomes with a "vs" question qualify.
        assert!(is_winner_market(
            "Celtics vs Knicks",
            &outcomes(&["Celtics", "Knicks"])
        ));
    }

    #[test]
    fn test_winner_filter_rejects_props_and_totals() {
        assert!(!is_winner_market(
            "LeBron James points over/under",
            &outcomes(&["Over", "Under"])
        ));
        assert!(!is_winner_market(
            "Celtics vs Knicks spread -4.5",
            &outcomes(&["Yes", "No"])
        ));
        assert!(!is_winner_market(
            "Celtics vs Knicks",
            &outcomes(&["Over", "Under"])
        ));
        assert!(!is_winner_market(
            "Jokic triple-double vs Lakers?",
            &outcomes(&["Yes", "No"])
        ));
    }

    #[test]
    fn test_draw_detection_rewrites_outcomes() {
        let row = json!({"ticker": "KXUCLGAME-09DEC25GALJUV-TIE"});
        let (rewritten, draw) = filter_winner_listing(
            &row,
            "Galatasaray vs Juventus Winner?",
            outcomes(&["Yes", "No"]),
        )
        .unwrap();
        assert!(draw);
        assert_eq!(rewritten, outcomes(&["HOME", "DRAW", "AWAY"]));

        let plain = json!({});
        let (kept, draw) = filter_winner_listing(
            &plain,
            "Celtics vs Knicks Winner?",
            outcomes(&["Yes", "No"]),
        )
        .unwrap();
        assert!(!draw);
        assert_eq!(kept, outcomes(&["Yes", "No"]));
    }

    #[test]
    fn test_coerce_price_handles_cents_and_rejects_out_of_range() {
        assert_eq!(coerce_price(&json!(0.42)), Some(0.42));
        assert_eq!(coerce_price(&json!(57)), Some(0.57));
        assert_eq!(coerce_price(&json!("0.42")), Some(0.42));
        assert_eq!(coerce_price(&json!("57")), Some(0.57));
        assert_eq!(coerce_price(&json!(150)), None);
        assert_eq!(coerce_price(&json!(-0.1)), None);
        assert_eq!(coerce_price(&json!("n/a")), None);
    }

    #[test]
    fn test_coerce_size_clamps_negative() {
        assert_eq!(coerce_size(&json!(-5)), Some(0.0));
        assert_eq!(coerce_size(&json!(12.5)), Some(12.5));
        assert_eq!(coerce_size(&json!(null)), None);
    }

    #[test]
    fn test_extract_outcomes_variants() {
        assert_eq!(
            extract_outcomes(&json!({"outcomes": ["Yes", "No"]})),
            outcomes(&["Yes", "No"])
        );
        assert_eq!(
            extract_outcomes(&json!({"outcomes": "[\"Yes\", \"No\"]"})),
            outcomes(&["Yes", "No"])
        );
        assert_eq!(
            extract_outcomes(&json!({"tokens": [{"name": "Celtics"}, {"label": "Knicks"}]})),
            outcomes(&["Celtics", "Knicks"])
        );
        assert_eq!(extract_outcomes(&json!({})), outcomes(&["YES", "NO"]));
        assert_eq!(
            extract_outcomes(&json!({"outcomes": "not json"})),
            outcomes(&["YES", "NO"])
        );
    }

    #[test]
    fn test_rows_and_cursor_shapes() {
        let (rows, cursor) = rows_and_cursor(&json!([{"id": 1}, "noise", {"id": 2}]));
        assert_eq!(rows.len(), 2);
        assert!(cursor.is_none());

        let (rows, cursor) =
            rows_and_cursor(&json!({"data": [{"id": 1}], "next_cursor": "abc"}));
        assert_eq!(rows.len(), 1);
        assert_eq!(cursor.as_deref(), Some("abc"));

        let (rows, _) = rows_and_cursor(&json!({"markets": {"items": [{"id": 1}]}}));
        assert_eq!(rows.len(), 1);

        let (rows, cursor) = rows_and_cursor(&json!("nope"));
        assert!(rows.is_empty());
        assert!(cursor.is_none());
    }

    #[test]
    fn test_book_level_value_dict_and_tuple() {
        let dict = json!({"price": 0.5, "size": 100});
        assert_eq!(book_level_value(&dict, "price", 0), Some(&json!(0.5)));
        let tuple = json!([0.5, 100]);
        assert_eq!(book_level_value(&tuple, "price", 0), Some(&json!(0.5)));
        assert_eq!(book_level_value(&tuple, "size", 1), Some(&json!(100)));
    }
}
