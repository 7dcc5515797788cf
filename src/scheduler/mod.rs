//! Periodic orchestration: market discovery, signal refresh and snapshot
//! broadcast, plus the KALSHI order-book stream. All loops share one stop
//! signal and catch their own cycle errors, so a bad cycle is skipped
//! rather than fatal.

pub mod hub;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::connectors::clob::PolyClobClient;
use crate::connectors::gamma::GammaClient;
use crate::connectors::kalshi_rest::KalshiRestClient;
use crate::connectors::kalshi_ws::KalshiWsClient;
use crate::connectors::router::RouterClient;
use crate::connectors::{coerce_price, coerce_size, QuoteSink};
use crate::db;
use crate::db::models::{
    CanonicalEvent, MarketBinding, Sport, Venue, VenueMarket,
};
use crate::db::Database;
use crate::engine::signaler::refresh_signals;
use crate::engine::EngineParams;
use crate::normalize::canonical::{build_market, MarketDraft};
use crate::normalize::resolver::{load_overrides, resolve_markets, ResolvedPair};
use crate::paper::portfolio::{auto_close_started_events, mark_to_market};
use crate::scheduler::hub::SignalHub;

// ── Connector health ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ConnectorHealth {
    pub ok: bool,
    pub last_ok: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub detail: Value,
}

/// Last-known status per connector, surfaced by the health endpoint.
pub struct HealthRegistry {
    inner: Mutex<BTreeMap<&'static str, ConnectorHealth>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        let mut inner = BTreeMap::new();
        for name in ["gamma", "kalshi_rest", "poly_clob", "kalshi_ws", "router"] {
            inner.insert(name, ConnectorHealth::default());
        }
        HealthRegistry {
            inner: Mutex::new(inner),
        }
    }

    pub fn mark(&self, name: &'static str, ok: bool, detail: Value, error: Option<String>) {
        let mut inner = self.inner.lock().unwrap();
        let row = inner.entry(name).or_default();
        row.ok = ok;
        row.detail = detail;
        if ok {
            row.last_ok = Some(Utc::now());
            row.last_error = None;
        } else if let Some(error) = error {
            row.last_error = Some(error);
        }
    }

    pub fn payload(&self) -> Value {
        let inner = self.inner.lock().unwrap();
        let connectors: serde_json::Map<String, Value> = inner
            .iter()
            .map(|(name, row)| {
                (
                    name.to_string(),
                    json!({
                        "ok": row.ok,
                        "last_ok": row.last_ok.map(|t| t.to_rfc3339()),
                        "last_error": row.last_error,
                        "detail": row.detail,
                    }),
                )
            })
            .collect();
        Value::Object(connectors)
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Scheduler ────────────────────────────────────────────────────────────────

pub struct Scheduler {
    config: Config,
    params: EngineParams,
    db: Database,
    gamma: GammaClient,
    kalshi_rest: KalshiRestClient,
    clob: PolyClobClient,
    router: RouterClient,
    kalshi_ws: KalshiWsClient,
    pub hub: Arc<SignalHub>,
    pub health: Arc<HealthRegistry>,
    demo_purged: AtomicBool,
}

impl Scheduler {
    pub fn new(config: Config, database: Database, hub: Arc<SignalHub>) -> Result<Self> {
        let params = config.engine_params();
        Ok(Scheduler {
            gamma: GammaClient::new(&config)?,
            kalshi_rest: KalshiRestClient::new(&config)?,
            clob: PolyClobClient::new(&config)?,
            router: RouterClient::new(&config)?,
            kalshi_ws: KalshiWsClient::new(&config.kalshi_ws_url),
            params,
            config,
            db: database,
            hub,
            health: Arc::new(HealthRegistry::new()),
            demo_purged: AtomicBool::new(false),
        })
    }

    /// Spawn the discovery, signal, broadcast and stream loops. They all
    /// exit when the stop signal flips to true.
    pub fn start(self: Arc<Self>, stop: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(&self).discovery_loop(stop.clone())),
            tokio::spawn(Arc::clone(&self).signal_loop(stop.clone())),
            tokio::spawn(Arc::clone(&self).broadcast_loop(stop.clone())),
            tokio::spawn(Arc::clone(&self).stream_loop(stop)),
        ]
    }

    pub fn health_payload(&self) -> Value {
        json!({
            "status": "ok",
            "active_data_source": self.config.active_market_data_source(),
            "configured_data_source": self.config.market_data_source.trim().to_lowercase(),
            "connectors": self.health.payload(),
        })
    }

    // ── Loops ────────────────────────────────────────────────────────────

    async fn discovery_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.discovery_interval_sec));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.run_discovery_cycle().await {
                        error!("discovery cycle failed: {err:#}");
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn signal_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.signal_interval_sec));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.run_signal_cycle() {
                        error!("signal cycle failed: {err:#}");
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn broadcast_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(
            self.config.ws_broadcast_interval_sec,
        ));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.build_snapshot() {
                        Ok(payload) => {
                            self.hub.set_latest(payload.clone());
                            self.hub.broadcast(&payload);
                        }
                        Err(err) => error!("broadcast cycle failed: {err:#}"),
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Streams KALSHI order-book deltas for currently bound tickers. The
    /// stream is restarted every discovery interval so new bindings get
    /// subscribed.
    async fn stream_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let refresh = Duration::from_secs(self.config.discovery_interval_sec);
        loop {
            if *stop.borrow() {
                return;
            }

            let tickers = match self.db.with_conn(db::tradeable_kalshi_tickers) {
                Ok(tickers) => tickers,
                Err(err) => {
                    warn!("failed to load kalshi tickers for streaming: {err:#}");
                    Vec::new()
                }
            };

            if tickers.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(refresh) => {}
                    _ = stop.changed() => {}
                }
                continue;
            }

            self.health.mark(
                "kalshi_ws",
                true,
                json!({"tickers": tickers.len()}),
                None,
            );
            // Bounded by the refresh window; the timeout is the normal path
            // and triggers a resubscribe with fresh tickers.
            let _ = tokio::time::timeout(
                refresh,
                self.kalshi_ws
                    .stream_orderbooks(&tickers, &self.db, stop.clone()),
            )
            .await;
        }
    }

    // ── Discovery ────────────────────────────────────────────────────────

    async fn run_discovery_cycle(&self) -> Result<()> {
        if !self.config.enable_demo_fallback && !self.demo_purged.swap(true, Ordering::SeqCst) {
            self.db.with_conn(db::purge_demo_rows)?;
            info!("purged demo rows at startup");
        }

        let source = self.config.active_market_data_source();
        let (mut poly_markets, mut kalshi_markets) = self.discover_from_source(source).await;

        poly_markets = self.apply_sport_toggles(poly_markets);
        kalshi_markets = self.apply_sport_toggles(kalshi_markets);

        if poly_markets.is_empty() || kalshi_markets.is_empty() {
            if self.config.enable_demo_fallback {
                let (poly_demo, kalshi_demo) = demo_markets();
                poly_markets = poly_demo;
                kalshi_markets = kalshi_demo;
            } else {
                warn!(
                    "discovery returned insufficient live markets (source={source}, poly={}, kalshi={}); demo fallback disabled",
                    poly_markets.len(),
                    kalshi_markets.len()
                );
                return Ok(());
            }
        }

        let overrides = match load_overrides(Path::new(&self.config.overrides_path)) {
            Ok(overrides) => overrides,
            Err(err) => {
                warn!("failed to load overrides: {err:#}");
                Default::default()
            }
        };

        let pairs = resolve_markets(&poly_markets, &kalshi_markets, &overrides);
        info!(
            "discovery cycle: {} poly, {} kalshi, {} pairs",
            poly_markets.len(),
            kalshi_markets.len(),
            pairs.len()
        );

        self.db.transaction(|conn| {
            for pair in &pairs {
                upsert_pair(conn, pair)?;
            }
            for market in poly_markets.iter().chain(kalshi_markets.iter()) {
                seed_orderbook_from_market(conn, market)?;
            }
            Ok(())
        })?;

        if source == "router" {
            self.refresh_router_books(&pairs).await;
        } else {
            self.refresh_direct_books(&pairs).await;
        }
        Ok(())
    }

    async fn discover_from_source(&self, source: &str) -> (Vec<VenueMarket>, Vec<VenueMarket>) {
        if source == "router" {
            let poly = self.router.discover_markets(Venue::Poly, false).await;
            let kalshi = self.router.discover_markets(Venue::Kalshi, false).await;

            self.health.mark(
                "router",
                !poly.is_empty() || !kalshi.is_empty(),
                json!({"source": "router", "poly_markets": poly.len(), "kalshi_markets": kalshi.len()}),
                None,
            );
            for name in ["gamma", "kalshi_rest", "poly_clob"] {
                self.health
                    .mark(name, false, json!({"active": false, "source": "router"}), None);
            }
            return (poly, kalshi);
        }

        let poly = self.gamma.discover_markets(false).await;
        let kalshi = self.kalshi_rest.discover_markets(false).await;

        self.health.mark(
            "gamma",
            !poly.is_empty(),
            json!({"source": "direct", "markets": poly.len()}),
            None,
        );
        self.health.mark(
            "kalshi_rest",
            !kalshi.is_empty(),
            json!({"source": "direct", "markets": kalshi.len()}),
            None,
        );
        self.health.mark(
            "router",
            false,
            json!({"active": false, "source": "direct"}),
            None,
        );
        (poly, kalshi)
    }

    fn apply_sport_toggles(&self, markets: Vec<VenueMarket>) -> Vec<VenueMarket> {
        markets
            .into_iter()
            .filter(|market| match market.sport {
                Sport::Nba => self.config.enable_nba,
                Sport::Soccer => self.config.enable_soccer,
                Sport::Unknown => true,
            })
            .collect()
    }

    /// Best-effort CLOB snapshot pulls for resolved POLY markets.
    async fn refresh_direct_books(&self, pairs: &[ResolvedPair]) {
        let mut ok = false;
        let market_ids: Vec<&str> = pairs
            .iter()
            .map(|pair| pair.poly.venue_market_id.as_str())
            .take(100)
            .collect();

        for market_id in &market_ids {
            let Some(top) = self.clob.fetch_top_of_book(market_id).await else {
                continue;
            };
            ok = true;
            if let Err(err) = self.db.publish_top(top).await {
                warn!("failed to store clob top for {market_id}: {err:#}");
            }
        }
        self.health.mark(
            "poly_clob",
            ok,
            json!({"requested": market_ids.len()}),
            None,
        );
    }

    async fn refresh_router_books(&self, pairs: &[ResolvedPair]) {
        if pairs.is_empty() {
            self.health.mark(
                "router",
                false,
                json!({"source": "router", "requested": 0, "updated": 0}),
                None,
            );
            return;
        }

        let lookup_id = |market: &VenueMarket| -> String {
            market
                .raw
                .get("router_lookup_id")
                .and_then(|v| v.as_str())
                .unwrap_or(&market.venue_market_id)
                .to_string()
        };
        let poly_ids: Vec<String> = pairs.iter().map(|pair| lookup_id(&pair.poly)).collect();
        let kalshi_ids: Vec<String> = pairs.iter().map(|pair| lookup_id(&pair.kalshi)).collect();

        let mut tops = Vec::new();
        tops.extend(self.router.fetch_orderbooks(Venue::Poly, &poly_ids).await);
        tops.extend(self.router.fetch_orderbooks(Venue::Kalshi, &kalshi_ids).await);

        let requested = poly_ids.len() + kalshi_ids.len();
        let updated = tops.len();
        for top in tops {
            let market_id = top.venue_market_id.clone();
            if let Err(err) = self.db.publish_top(top).await {
                warn!("failed to store router top for {market_id}: {err:#}");
            }
        }
        self.health.mark(
            "router",
            updated > 0,
            json!({"source": "router", "requested": requested, "updated": updated}),
            None,
        );
    }

    // ── Signal cycle ─────────────────────────────────────────────────────

    /// One transaction: refresh signals, settle started events, mark the
    /// book. Either all three commit or none.
    pub fn run_signal_cycle(&self) -> Result<()> {
        self.db.transaction(|conn| {
            refresh_signals(conn, &self.params)?;
            auto_close_started_events(conn)?;
            mark_to_market(conn)?;
            Ok(())
        })
    }

    // ── Snapshot ─────────────────────────────────────────────────────────

    /// Wire snapshot: top OPEN signals joined with their events, recent
    /// order-book rows and the equity curve.
    pub fn build_snapshot(&self) -> Result<Value> {
        let exclude_demo = !self.config.enable_demo_fallback;
        let source = self.config.active_market_data_source();

        self.db.with_conn(|conn| {
            let signals = db::list_open_signals(conn, 0.0, 100, exclude_demo)?;
            let event_ids: Vec<String> = signals
                .iter()
                .map(|s| s.canonical_event_id.clone())
                .collect();
            let events = db::events_by_ids(conn, &event_ids)?;

            let signal_rows: Vec<Value> = signals
                .iter()
                .map(|signal| {
                    let event = events.get(&signal.canonical_event_id);
                    json!({
                        "id": signal.id,
                        "canonical_event_id": signal.canonical_event_id,
                        "sport": event.map(|e| e.sport.as_str()),
                        "competition": event.and_then(|e| e.competition.clone()),
                        "match": event
                            .map(|e| e.title_canonical.clone())
                            .unwrap_or_else(|| signal.canonical_event_id.clone()),
                        "start_time_utc": event.map(|e| e.start_time_utc.to_rfc3339()),
                        "outcome": signal.outcome,
                        "buy_venue": signal.buy_venue.as_str(),
                        "sell_venue": signal.sell_venue.as_str(),
                        "buy_market_id": signal.buy_market_id,
                        "sell_market_id": signal.sell_market_id,
                        "buy_price": signal.buy_price,
                        "sell_price": signal.sell_price,
                        "size_suggested": signal.size_suggested,
                        "edge_raw": signal.edge_raw,
                        "edge_after_costs": signal.edge_after_costs,
                        "confidence": signal.confidence,
                        "status": signal.status,
                        "created_at": signal.created_at.to_rfc3339(),
                    })
                })
                .collect();

            let orderbook_rows: Vec<Value> = db::recent_tops(conn, 200, exclude_demo)?
                .iter()
                .map(|top| {
                    json!({
                        "venue": top.venue.as_str(),
                        "venue_market_id": top.venue_market_id,
                        "outcome": top.outcome,
                        "best_bid": top.best_bid,
                        "best_ask": top.best_ask,
                        "bid_size": top.bid_size,
                        "ask_size": top.ask_size,
                        "ts": top.ts.to_rfc3339(),
                    })
                })
                .collect();

            let equity_curve: Vec<Value> = db::recent_snapshots(conn, 100)?
                .iter()
                .map(|snapshot| {
                    json!({
                        "ts": snapshot.ts.to_rfc3339(),
                        "equity": snapshot.equity,
                        "realized": snapshot.realized_pnl,
                        "unrealized": snapshot.unrealized_pnl,
                    })
                })
                .collect();

            Ok(json!({
                "type": "snapshot",
                "ts": Utc::now().to_rfc3339(),
                "data_source": source,
                "signals": signal_rows,
                "orderbooks": orderbook_rows,
                "equity_curve": equity_curve,
            }))
        })
    }
}

// ── Persistence of resolved pairs ────────────────────────────────────────────

/// Event first, then both bindings, inside the caller's transaction.
fn upsert_pair(conn: &Connection, pair: &ResolvedPair) -> Result<()> {
    db::upsert_event(
        conn,
        &CanonicalEvent {
            id: pair.event_id.clone(),
            sport: pair.sport,
            competition: pair.competition.clone(),
            start_time_utc: pair.start_time_utc,
            home_team: pair.home_team.clone(),
            away_team: pair.away_team.clone(),
            title_canonical: pair.title_canonical.clone(),
            created_at: Utc::now(),
        },
    )?;

    for market in [&pair.poly, &pair.kalshi] {
        db::upsert_binding(
            conn,
            &MarketBinding {
                id: Uuid::new_v4().to_string(),
                canonical_event_id: pair.event_id.clone(),
                venue: market.venue,
                venue_market_id: market.venue_market_id.clone(),
                outcome_schema: "YES_NO".to_string(),
                market_type: market.market_type,
                status: pair.status,
                confidence: pair.confidence,
                evidence_json: pair.evidence_json.clone(),
                updated_at: Utc::now(),
            },
        )?;
    }
    Ok(())
}

fn raw_value<'a>(market: &'a VenueMarket, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| market.raw.get(*key))
        .find(|value| !value.is_null())
}

/// Seed the order-book store from quote fields carried in the listing
/// payload: a YES row, and a NO row when both NO prices are present
/// (with sizes mirrored from the YES side).
fn seed_orderbook_from_market(conn: &Connection, market: &VenueMarket) -> Result<()> {
    let yes_bid = raw_value(market, &["yes_bid", "bestBid", "best_bid", "bid"]).and_then(coerce_price);
    let yes_ask = raw_value(market, &["yes_ask", "bestAsk", "best_ask", "ask"]).and_then(coerce_price);
    let (Some(yes_bid), Some(yes_ask)) = (yes_bid, yes_ask) else {
        return Ok(());
    };

    let yes_bid_size = raw_value(market, &["yes_bid_size", "bid_size", "bestBidSize", "size"])
        .and_then(coerce_size)
        .unwrap_or(0.0);
    let yes_ask_size = raw_value(market, &["yes_ask_size", "ask_size", "bestAskSize", "size"])
        .and_then(coerce_size)
        .unwrap_or(0.0);

    db::upsert_top(
        conn,
        market.venue,
        &market.venue_market_id,
        "YES",
        yes_bid,
        yes_ask,
        yes_bid_size,
        yes_ask_size,
    )?;

    let no_bid = raw_value(market, &["no_bid"]).and_then(coerce_price);
    let no_ask = raw_value(market, &["no_ask"]).and_then(coerce_price);
    if let (Some(no_bid), Some(no_ask)) = (no_bid, no_ask) {
        db::upsert_top(
            conn,
            market.venue,
            &market.venue_market_id,
            "NO",
            no_bid,
            no_ask,
            yes_ask_size,
            yes_bid_size,
        )?;
    }
    Ok(())
}

// ── Demo fixtures ────────────────────────────────────────────────────────────

/// Built-in market pairs used when live discovery comes up empty and the
/// demo fallback is enabled. Ids carry the demo marker so they can be
/// purged and filtered.
pub fn demo_markets() -> (Vec<VenueMarket>, Vec<VenueMarket>) {
    let now = Utc::now();
    let nba_start = now + chrono::Duration::hours(4);
    let ucl_start = now + chrono::Duration::hours(8);

    let raw =
        |entries: &[(&str, Value)]| -> BTreeMap<String, Value> {
            entries
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect()
        };

    let poly = vec![
        build_market(
            Venue::Poly,
            MarketDraft {
                venue_market_id: "poly-demo-nba-celtics-knicks".to_string(),
                title: "Boston Celtics vs New York Knicks".to_string(),
                outcomes: vec!["YES".to_string(), "NO".to_string()],
                start_time: Some(nba_start),
                sport_hint: Some(Sport::Nba),
                competition_hint: Some("NBA".to_string()),
                raw: raw(&[
                    ("bestBid", json!(0.52)),
                    ("bestAsk", json!(0.54)),
                    ("bestBidSize", json!(1200)),
                    ("bestAskSize", json!(900)),
                ]),
                ..Default::default()
            },
        ),
        build_market(
            Venue::Poly,
            MarketDraft {
                venue_market_id: "poly-demo-ucl-gal-juv".to_string(),
                title: "Galatasaray vs Juventus".to_string(),
                outcomes: vec!["YES".to_string(), "NO".to_string()],
                start_time: Some(ucl_start),
                sport_hint: Some(Sport::Soccer),
                competition_hint: Some("UCL".to_string()),
                raw: raw(&[
                    ("bestBid", json!(0.44)),
                    ("bestAsk", json!(0.46)),
                    ("bestBidSize", json!(860)),
                    ("bestAskSize", json!(760)),
                ]),
                ..Default::default()
            },
        ),
    ];

    let kalshi = vec![
        build_market(
            Venue::Kalshi,
            MarketDraft {
                venue_market_id: "kalshi-demo-nba-celtics-knicks".to_string(),
                title: "Boston Celtics vs New York Knicks".to_string(),
                outcomes: vec!["YES".to_string(), "NO".to_string()],
                start_time: Some(nba_start),
                sport_hint: Some(Sport::Nba),
                competition_hint: Some("NBA".to_string()),
                raw: raw(&[
                    ("yes_bid", json!(57)),
                    ("yes_ask", json!(59)),
                    ("yes_bid_size", json!(1400)),
                    ("yes_ask_size", json!(1100)),
                ]),
                ..Default::default()
            },
        ),
        build_market(
            Venue::Kalshi,
            MarketDraft {
                venue_market_id: "kalshi-demo-ucl-gal-juv".to_string(),
                title: "Galatasaray vs Juventus".to_string(),
                outcomes: vec!["YES".to_string(), "NO".to_string()],
                start_time: Some(ucl_start),
                sport_hint: Some(Sport::Soccer),
                competition_hint: Some("UCL".to_string()),
                raw: raw(&[
                    ("yes_bid", json!(49)),
                    ("yes_ask", json!(51)),
                    ("yes_bid_size", json!(900)),
                    ("yes_ask_size", json!(1000)),
                ]),
                ..Default::default()
            },
        ),
    ];

    (poly, kalshi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::BindingStatus;
    use clap::Parser;
    use std::collections::HashMap;

    fn demo_config() -> Config {
        let mut config = Config::parse_from(["mispricing-bot"]);
        config.enable_demo_fallback = true;
        config
    }

    fn demo_scheduler(config: Config) -> (Arc<Scheduler>, Database) {
        let database = Database::open_in_memory().unwrap();
        let hub = Arc::new(SignalHub::new());
        let scheduler = Scheduler::new(config, database.clone(), hub).unwrap();
        (Arc::new(scheduler), database)
    }

    fn seed_pairs(database: &Database, poly: &[VenueMarket], kalshi: &[VenueMarket]) {
        let pairs = resolve_markets(poly, kalshi, &HashMap::new());
        assert_eq!(pairs.len(), 2);
        database
            .transaction(|conn| {
                for pair in &pairs {
                    upsert_pair(conn, pair)?;
                }
                for market in poly.iter().chain(kalshi.iter()) {
                    seed_orderbook_from_market(conn, market)?;
                }
                Ok(())
            })
            .unwrap();
    }

    fn seed_demo_pairs(database: &Database) {
        let (poly, kalshi) = demo_markets();
        seed_pairs(database, &poly, &kalshi);
    }

    #[test]
    fn test_demo_markets_resolve_to_auto_pairs() {
        let (poly, kalshi) = demo_markets();
        let pairs = resolve_markets(&poly, &kalshi, &HashMap::new());
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.status == BindingStatus::Auto));
    }

    #[test]
    fn test_discovery_persistence_is_idempotent() {
        let (_scheduler, database) = demo_scheduler(demo_config());

        // The same market lists are seeded twice; ids must not churn.
        let (poly, kalshi) = demo_markets();
        seed_pairs(&database, &poly, &kalshi);
        let first: (Vec<_>, Vec<_>) = database
            .with_conn(|conn| {
                Ok((
                    db::list_events(conn, None, None)?,
                    db::list_bindings(conn, None)?,
                ))
            })
            .unwrap();

        seed_pairs(&database, &poly, &kalshi);
        let second: (Vec<_>, Vec<_>) = database
            .with_conn(|conn| {
                Ok((
                    db::list_events(conn, None, None)?,
                    db::list_bindings(conn, None)?,
                ))
            })
            .unwrap();

        assert_eq!(first.0.len(), second.0.len());
        assert_eq!(first.1.len(), second.1.len());
        let first_ids: Vec<&str> = first.0.iter().map(|e| e.id.as_str()).collect();
        let second_ids: Vec<&str> = second.0.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
        // Binding row ids survive the re-upsert (no row churn).
        let first_binding_ids: std::collections::HashSet<&str> =
            first.1.iter().map(|b| b.id.as_str()).collect();
        let second_binding_ids: std::collections::HashSet<&str> =
            second.1.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(first_binding_ids, second_binding_ids);
    }

    #[test]
    fn test_orderbook_seeding_from_raw_quotes() {
        let (_scheduler, database) = demo_scheduler(demo_config());
        seed_demo_pairs(&database);

        database
            .with_conn(|conn| {
                let poly_top = db::get_top(conn, Venue::Poly, "poly-demo-ucl-gal-juv", "YES")?
                    .expect("poly demo book seeded");
                assert!((poly_top.best_bid - 0.44).abs() < 1e-9);
                assert!((poly_top.best_ask - 0.46).abs() < 1e-9);

                // Cent-denominated KALSHI quotes were scaled to probabilities.
                let kalshi_top =
                    db::get_top(conn, Venue::Kalshi, "kalshi-demo-nba-celtics-knicks", "YES")?
                        .expect("kalshi demo book seeded");
                assert!((kalshi_top.best_bid - 0.57).abs() < 1e-9);
                assert!((kalshi_top.best_ask - 0.59).abs() < 1e-9);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_signal_cycle_emits_signals_and_snapshot_carries_them() {
        let (scheduler, database) = demo_scheduler(demo_config());
        seed_demo_pairs(&database);

        scheduler.run_signal_cycle().unwrap();

        let signals = database
            .with_conn(|conn| db::list_open_signals(conn, 0.0, 100, false))
            .unwrap();
        assert!(!signals.is_empty(), "demo books should produce signals");
        // Demo quotes price KALSHI above POLY: YES is bought on POLY, and
        // the derived NO side flips the direction.
        assert!(signals
            .iter()
            .filter(|s| s.outcome == "YES")
            .all(|s| s.buy_venue == Venue::Poly));
        assert!(signals
            .iter()
            .filter(|s| s.outcome == "NO")
            .all(|s| s.buy_venue == Venue::Kalshi));

        let snapshot = scheduler.build_snapshot().unwrap();
        assert_eq!(snapshot["type"], "snapshot");
        assert_eq!(snapshot["data_source"], "direct");
        assert!(!snapshot["signals"].as_array().unwrap().is_empty());
        assert!(!snapshot["orderbooks"].as_array().unwrap().is_empty());
        assert!(!snapshot["equity_curve"].as_array().unwrap().is_empty());
        let first_signal = &snapshot["signals"][0];
        assert!(first_signal["match"].as_str().unwrap().contains(" vs "));
        assert!(first_signal["edge_after_costs"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_snapshot_excludes_demo_rows_when_fallback_disabled() {
        let mut config = demo_config();
        config.enable_demo_fallback = false;
        let (scheduler, database) = demo_scheduler(config);
        seed_demo_pairs(&database);
        scheduler.run_signal_cycle().unwrap();

        let snapshot = scheduler.build_snapshot().unwrap();
        assert!(snapshot["signals"].as_array().unwrap().is_empty());
        assert!(snapshot["orderbooks"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_sport_toggles_filter_discovery() {
        let mut config = demo_config();
        config.enable_soccer = false;
        let (scheduler, _database) = demo_scheduler(config);

        let (poly, _) = demo_markets();
        let filtered = scheduler.apply_sport_toggles(poly);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].sport, Sport::Nba);
    }

    #[test]
    fn test_health_registry_tracks_transitions() {
        let registry = HealthRegistry::new();
        registry.mark("gamma", true, json!({"markets": 12}), None);
        registry.mark("router", false, json!({}), Some("boom".to_string()));

        let payload = registry.payload();
        assert_eq!(payload["gamma"]["ok"], json!(true));
        assert!(payload["gamma"]["last_ok"].is_string());
        assert_eq!(payload["router"]["ok"], json!(false));
        assert_eq!(payload["router"]["last_error"], json!("boom"));
    }
}
