use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::db;
use crate::db::models::{BindingStatus, MarketBinding};
use crate::db::Database;
use crate::paper::portfolio::paper_stats;
use crate::paper::{simulator, PaperError};
use crate::scheduler::hub::SignalHub;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub scheduler: Arc<Scheduler>,
    pub hub: Arc<SignalHub>,
    /// Demo-marker rows are hidden from listings when the fallback is off.
    pub exclude_demo: bool,
}

/// Build the Axum router for the dashboard and JSON API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/events", get(events_handler))
        .route("/api/events/:event_id/bindings", get(event_bindings_handler))
        .route("/api/orderbooks", get(orderbooks_handler))
        .route("/api/mappings", get(mappings_handler))
        .route("/api/mappings/review", get(review_mappings_handler))
        .route("/api/mappings/:id/approve", post(approve_mapping_handler))
        .route("/api/mappings/:id/reject", post(reject_mapping_handler))
        .route("/api/mappings/override", post(override_mapping_handler))
        .route("/api/signals", get(signals_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/paper/simulate", post(paper_simulate_handler))
        .route("/api/paper/positions", get(paper_positions_handler))
        .route(
            "/api/paper/positions/:id/close",
            post(paper_close_handler),
        )
        .route("/api/paper/fills/:position_id", get(paper_fills_handler))
        .route("/api/paper/stats", get(paper_stats_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

type ApiError = (StatusCode, String);

fn internal(err: anyhow::Error) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}

fn paper_error(err: PaperError) -> ApiError {
    match err {
        PaperError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        PaperError::Invalid(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        PaperError::Internal(inner) => internal(inner),
    }
}

/// Run a paper operation inside one transaction; a failure rolls back any
/// partial writes before being mapped to an HTTP status.
fn run_paper<T>(
    db: &Database,
    f: impl FnOnce(&rusqlite::Connection) -> Result<T, PaperError>,
) -> Result<T, ApiError> {
    match db.transaction(|conn| f(conn).map_err(anyhow::Error::from)) {
        Ok(value) => Ok(value),
        Err(err) => match err.downcast::<PaperError>() {
            Ok(paper) => Err(paper_error(paper)),
            Err(other) => Err(internal(other)),
        },
    }
}

async fn index_handler() -> impl IntoResponse {
    Html(DASHBOARD_HTML)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.health_payload())
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    sport: Option<String>,
    competition: Option<String>,
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state
        .db
        .with_conn(|conn| db::list_events(conn, query.sport.as_deref(), query.competition.as_deref()))
        .map_err(internal)?;

    let rows: Vec<Value> = events
        .iter()
        .map(|event| {
            json!({
                "id": event.id,
                "sport": event.sport.as_str(),
                "competition": event.competition,
                "start_time_utc": event.start_time_utc.to_rfc3339(),
                "home_team": event.home_team,
                "away_team": event.away_team,
                "title_canonical": event.title_canonical,
            })
        })
        .collect();
    Ok(Json(rows))
}

fn binding_json(binding: &MarketBinding) -> Value {
    json!({
        "id": binding.id,
        "canonical_event_id": binding.canonical_event_id,
        "venue": binding.venue.as_str(),
        "venue_market_id": binding.venue_market_id,
        "outcome_schema": binding.outcome_schema,
        "market_type": binding.market_type.as_str(),
        "status": binding.status.as_str(),
        "confidence": binding.confidence,
        "evidence_json": binding.evidence_json,
        "updated_at": binding.updated_at.to_rfc3339(),
    })
}

async fn event_bindings_handler(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bindings = state
        .db
        .with_conn(|conn| db::bindings_for_event(conn, &event_id))
        .map_err(internal)?;
    Ok(Json(bindings.iter().map(binding_json).collect::<Vec<_>>()))
}

#[derive(Debug, Deserialize)]
struct OrderbooksQuery {
    venue: Option<String>,
    market_id: Option<String>,
}

async fn orderbooks_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OrderbooksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tops = state
        .db
        .with_conn(|conn| {
            db::list_tops(conn, query.venue.as_deref(), query.market_id.as_deref(), 300)
        })
        .map_err(internal)?;

    let rows: Vec<Value> = tops
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
    Ok(Json(rows))
}

async fn mappings_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let bindings = state
        .db
        .with_conn(|conn| db::list_bindings(conn, None))
        .map_err(internal)?;
    Ok(Json(bindings.iter().map(binding_json).collect::<Vec<_>>()))
}

async fn review_mappings_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let bindings = state
        .db
        .with_conn(|conn| db::list_bindings(conn, Some(BindingStatus::Review)))
        .map_err(internal)?;
    Ok(Json(bindings.iter().map(binding_json).collect::<Vec<_>>()))
}

/// Operator approval promotes a binding to OVERRIDE with at least 0.9
/// confidence.
async fn approve_mapping_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let binding = state
        .db
        .transaction(|conn| {
            let Some(binding) = db::get_binding(conn, &id)? else {
                return Ok(None);
            };
            db::update_binding_status(
                conn,
                &id,
                BindingStatus::Override,
                Some(binding.confidence.max(0.9)),
                None,
            )?;
            db::get_binding(conn, &id)
        })
        .map_err(internal)?;

    match binding {
        Some(binding) => Ok(Json(binding_json(&binding))),
        None => Err((StatusCode::NOT_FOUND, "mapping not found".to_string())),
    }
}

async fn reject_mapping_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let binding = state
        .db
        .transaction(|conn| {
            if !db::update_binding_status(conn, &id, BindingStatus::Rejected, None, None)? {
                return Ok(None);
            }
            db::get_binding(conn, &id)
        })
        .map_err(internal)?;

    match binding {
        Some(binding) => Ok(Json(binding_json(&binding))),
        None => Err((StatusCode::NOT_FOUND, "mapping not found".to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct OverrideRequest {
    poly_market_id: String,
    kalshi_market_id: String,
    canonical_event_id: Option<String>,
}

/// Force-bind a POLY/KALSHI market pair to one canonical event.
async fn override_mapping_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OverrideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    use crate::db::models::Venue;

    let result = state
        .db
        .transaction(|conn| {
            let poly = db::get_binding_by_market(conn, Venue::Poly, &payload.poly_market_id)?;
            let kalshi = db::get_binding_by_market(conn, Venue::Kalshi, &payload.kalshi_market_id)?;
            let (Some(poly), Some(kalshi)) = (poly, kalshi) else {
                return Ok(Err("pair not found"));
            };

            let canonical_event_id = payload
                .canonical_event_id
                .clone()
                .unwrap_or_else(|| poly.canonical_event_id.clone());
            if db::get_event(conn, &canonical_event_id)?.is_none() {
                return Ok(Err("canonical event not found"));
            }

            let evidence = json!({
                "manual_override": true,
                "poly_market_id": payload.poly_market_id,
                "kalshi_market_id": payload.kalshi_market_id,
            })
            .to_string();

            for binding in [&poly, &kalshi] {
                db::rebind_to_event(conn, &binding.id, &canonical_event_id, &evidence)?;
            }

            let poly = db::get_binding(conn, &poly.id)?;
            let kalshi = db::get_binding(conn, &kalshi.id)?;
            Ok(Ok((canonical_event_id, poly, kalshi)))
        })
        .map_err(internal)?;

    match result {
        Err(message) => Err((StatusCode::NOT_FOUND, message.to_string())),
        Ok((canonical_event_id, poly, kalshi)) => Ok(Json(json!({
            "status": "ok",
            "canonical_event_id": canonical_event_id,
            "poly": poly.as_ref().map(binding_json),
            "kalshi": kalshi.as_ref().map(binding_json),
        }))),
    }
}

#[derive(Debug, Deserialize)]
struct SignalsQuery {
    #[serde(default)]
    min_edge: f64,
    sport: Option<String>,
    competition: Option<String>,
}

async fn signals_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignalsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let exclude_demo = state.exclude_demo;
    let rows = state
        .db
        .with_conn(|conn| {
            let signals = db::list_open_signals(conn, query.min_edge, 200, exclude_demo)?;
            let event_ids: Vec<String> = signals
                .iter()
                .map(|s| s.canonical_event_id.clone())
                .collect();
            let events = db::events_by_ids(conn, &event_ids)?;

            let mut rows = Vec::new();
            for signal in &signals {
                let event = events.get(&signal.canonical_event_id);
                if let Some(sport) = &query.sport {
                    if event.map(|e| e.sport.as_str()) != Some(sport.as_str()) {
                        continue;
                    }
                }
                if let Some(competition) = &query.competition {
                    if event.and_then(|e| e.competition.as_deref()) != Some(competition.as_str()) {
                        continue;
                    }
                }

                rows.push(json!({
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
                }));
            }
            Ok(rows)
        })
        .map_err(internal)?;
    Ok(Json(rows))
}

async fn snapshot_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let latest = state.hub.latest_snapshot();
    if !latest.is_null() {
        return Ok(Json(latest));
    }
    // No broadcast has run yet; build one on demand.
    state.scheduler.build_snapshot().map(Json).map_err(internal)
}

#[derive(Debug, Deserialize)]
struct SimulateRequest {
    signal_id: String,
    size: Option<f64>,
}

async fn paper_simulate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SimulateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let position = run_paper(&state.db, |conn| {
        simulator::simulate_signal(conn, &payload.signal_id, payload.size)
    })?;
    Ok(Json(position))
}

async fn paper_positions_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let positions = state
        .db
        .with_conn(|conn| db::list_positions(conn, None))
        .map_err(internal)?;
    Ok(Json(positions))
}

async fn paper_close_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let position = run_paper(&state.db, |conn| simulator::close_position(conn, &id))?;
    Ok(Json(position))
}

async fn paper_fills_handler(
    State(state): State<Arc<AppState>>,
    Path(position_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let fills = state
        .db
        .with_conn(|conn| db::list_fills(conn, &position_id))
        .map_err(internal)?;
    Ok(Json(fills))
}

async fn paper_stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .db
        .with_conn(paper_stats)
        .map_err(internal)?;
    Ok(Json(stats))
}

// ── Live snapshot feed ───────────────────────────────────────────────────────

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (id, mut rx) = state.hub.subscribe();
    let (mut sender, mut receiver) = socket.split();

    // New subscribers get the latest snapshot immediately.
    let latest = state.hub.latest_snapshot();
    if !latest.is_null() && sender.send(Message::Text(latest.to_string())).await.is_err() {
        state.hub.unsubscribe(id);
        return;
    }

    loop {
        tokio::select! {
            payload = rx.recv() => {
                match payload {
                    Some(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Client messages keep the connection alive.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unsubscribe(id);
    debug!("ws subscriber {id} disconnected");
}

/// Embedded single-file dashboard (HTML + CSS + JS).
const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Mispricing Detector</title>
<style>
  :root {
    --bg: #0f1117;
    --card: #1a1d27;
    --border: #2a2d3a;
    --accent: #6c63ff;
    --green: #00c896;
    --red: #ff4f6a;
    --text: #e0e0e0;
    --muted: #8888aa;
  }
  * { box-sizing: border-box; margin: 0; padding: 0; }
  body { background: var(--bg); color: var(--text); font-family: 'Segoe UI', system-ui, sans-serif; }
  header { display: flex; align-items: center; gap: 1rem; padding: 1rem 2rem; border-bottom: 1px solid var(--border); }
  header h1 { font-size: 1.4rem; font-weight: 700; }
  .badge { padding: .2rem .6rem; border-radius: 4px; font-size: .75rem; font-weight: 700; text-transform: uppercase; background: var(--accent); color: #000; }
  .status-dot { width: 10px; height: 10px; border-radius: 50%; background: var(--green); display: inline-block; animation: pulse 1.5s infinite; }
  @keyframes pulse { 0%,100% { opacity: 1; } 50% { opacity: .3; } }
  main { padding: 1.5rem 2rem; display: grid; gap: 1.5rem; }
  .stats-grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(180px, 1fr)); gap: 1rem; }
  .stat-card { background: var(--card); border: 1px solid var(--border); border-radius: 10px; padding: 1.2rem; }
  .stat-card .label { color: var(--muted); font-size: .8rem; text-transform: uppercase; letter-spacing: .06em; margin-bottom: .4rem; }
  .stat-card .value { font-size: 1.7rem; font-weight: 700; }
  .pos { color: var(--green); }
  .neg { color: var(--red); }
  .panel { background: var(--card); border: 1px solid var(--border); border-radius: 10px; overflow: hidden; }
  .panel-header { padding: .9rem 1.2rem; border-bottom: 1px solid var(--border); font-weight: 600; }
  table { width: 100%; border-collapse: collapse; }
  th { padding: .7rem 1rem; text-align: left; font-size: .75rem; text-transform: uppercase; color: var(--muted); border-bottom: 1px solid var(--border); }
  td { padding: .65rem 1rem; font-size: .88rem; border-bottom: 1px solid #1e2130; }
  tr:last-child td { border-bottom: none; }
  #chart-container { padding: 1rem; height: 200px; position: relative; }
  canvas { width: 100% !important; }
  .empty { color: var(--muted); text-align: center; padding: 2rem; font-size: .9rem; }
</style>
</head>
<body>
<header>
  <span class="status-dot" id="dot"></span>
  <h1>Cross-Exchange Mispricing Detector</h1>
  <span class="badge" id="source-badge">…</span>
  <span style="margin-left:auto;color:var(--muted);font-size:.8rem;" id="last-updated"></span>
</header>

<main>
  <div class="stats-grid">
    <div class="stat-card"><div class="label">Open Signals</div><div class="value" id="s-signals">–</div></div>
    <div class="stat-card"><div class="label">Best Edge</div><div class="value" id="s-edge">–</div></div>
    <div class="stat-card"><div class="label">Equity</div><div class="value" id="s-equity">–</div></div>
    <div class="stat-card"><div class="label">Books Tracked</div><div class="value" id="s-books">–</div></div>
  </div>

  <div class="panel">
    <div class="panel-header">Open Signals</div>
    <table>
      <thead><tr><th>Match</th><th>Outcome</th><th>Direction</th><th>Buy</th><th>Sell</th><th>Size</th><th>Edge (net)</th><th>Conf</th></tr></thead>
      <tbody id="signals-tbody"><tr><td colspan="8" class="empty">Waiting for snapshot…</td></tr></tbody>
    </table>
  </div>

  <div class="panel">
    <div class="panel-header">Equity Curve</div>
    <div id="chart-container"><canvas id="equity-chart"></canvas></div>
  </div>

  <div class="panel">
    <div class="panel-header">Top of Book</div>
    <table>
      <thead><tr><th>Venue</th><th>Market</th><th>Outcome</th><th>Bid</th><th>Ask</th><th>Bid Size</th><th>Ask Size</th></tr></thead>
      <tbody id="books-tbody"><tr><td colspan="7" class="empty">Waiting for snapshot…</td></tr></tbody>
    </table>
  </div>
</main>

<script>
const pct = v => (v*100).toFixed(2)+'%';
const money = v => (v >= 0 ? '+' : '') + '$' + v.toFixed(2);

function render(snap) {
  document.getElementById('source-badge').textContent = snap.data_source;
  document.getElementById('last-updated').textContent = 'Updated ' + new Date(snap.ts).toLocaleTimeString();

  const signals = snap.signals || [];
  document.getElementById('s-signals').textContent = signals.length;
  document.getElementById('s-edge').textContent = signals.length ? pct(signals[0].edge_after_costs) : '–';
  document.getElementById('s-books').textContent = (snap.orderbooks || []).length;

  const curve = snap.equity_curve || [];
  if (curve.length) {
    const last = curve[curve.length-1];
    const el = document.getElementById('s-equity');
    el.textContent = money(last.equity);
    el.className = 'value ' + (last.equity >= 0 ? 'pos' : 'neg');
    drawChart(curve.map(p => p.equity));
  }

  const stbody = document.getElementById('signals-tbody');
  if (!signals.length) { stbody.innerHTML = '<tr><td colspan="8" class="empty">No open signals</td></tr>'; }
  else {
    stbody.innerHTML = signals.slice(0,20).map(s => `<tr>
      <td>${s.match}</td>
      <td>${s.outcome}</td>
      <td>${s.buy_venue} → ${s.sell_venue}</td>
      <td>${pct(s.buy_price)}</td>
      <td>${pct(s.sell_price)}</td>
      <td>${s.size_suggested.toFixed(0)}</td>
      <td class="${s.edge_after_costs >= 0 ? 'pos' : 'neg'}">${pct(s.edge_after_costs)}</td>
      <td>${s.confidence.toFixed(2)}</td>
    </tr>`).join('');
  }

  const books = snap.orderbooks || [];
  const btbody = document.getElementById('books-tbody');
  if (!books.length) { btbody.innerHTML = '<tr><td colspan="7" class="empty">No order books yet</td></tr>'; }
  else {
    btbody.innerHTML = books.slice(0,20).map(b => `<tr>
      <td>${b.venue}</td>
      <td title="${b.venue_market_id}">${b.venue_market_id.slice(0,28)}</td>
      <td>${b.outcome}</td>
      <td>${pct(b.best_bid)}</td>
      <td>${pct(b.best_ask)}</td>
      <td>${b.bid_size.toFixed(0)}</td>
      <td>${b.ask_size.toFixed(0)}</td>
    </tr>`).join('');
  }
}

function drawChart(data) {
  const canvas = document.getElementById('equity-chart');
  const ctx = canvas.getContext('2d');
  const W = canvas.parentElement.clientWidth - 32;
  const H = 160;
  canvas.width = W;
  canvas.height = H;
  if (data.length < 2) return;

  const min = Math.min(...data) - 1e-9;
  const max = Math.max(...data) + 1e-9;
  const range = max - min || 1;
  ctx.clearRect(0, 0, W, H);

  ctx.strokeStyle = '#2a2d3a';
  ctx.lineWidth = 1;
  for (let i = 0; i <= 4; i++) {
    const y = H - (i / 4) * H;
    ctx.beginPath(); ctx.moveTo(0, y); ctx.lineTo(W, y); ctx.stroke();
  }

  const step = W / (data.length - 1);
  const toY = v => H - ((v - min) / range) * H;
  ctx.strokeStyle = '#6c63ff';
  ctx.lineWidth = 2;
  ctx.beginPath();
  data.forEach((v, i) => i === 0 ? ctx.moveTo(0, toY(v)) : ctx.lineTo(i * step, toY(v)));
  ctx.stroke();
}

function connect() {
  const proto = location.protocol === 'https:' ? 'wss' : 'ws';
  const ws = new WebSocket(`${proto}://${location.host}/ws`);
  ws.onmessage = ev => { try { render(JSON.parse(ev.data)); } catch {} };
  ws.onclose = () => {
    document.getElementById('dot').style.background = 'var(--red)';
    setTimeout(connect, 2000);
  };
  ws.onopen = () => { document.getElementById('dot').style.background = 'var(--green)'; };
}
connect();

// REST fallback in case the socket is blocked.
setInterval(async () => {
  try {
    const r = await fetch('/api/snapshot');
    if (r.ok) render(await r.json());
  } catch {}
}, 10000);
</script>
</body>
</html>"#;
