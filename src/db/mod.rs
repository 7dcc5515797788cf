use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

pub mod models;
use models::*;

/// Thread-safe SQLite handle (single connection behind a mutex).
///
/// Single-row operations are free functions taking `&Connection` so that
/// multi-step cycles (the signal loop) can run them inside one transaction.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent).
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Run a closure with the connection locked.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Run a closure inside a single transaction. The transaction commits
    /// when the closure returns Ok and rolls back otherwise.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }
}

// ── Canonical events ─────────────────────────────────────────────────────────

/// Upsert a canonical event; descriptive fields refresh when the same
/// deterministic id is re-derived, created_at stays from the first insert.
pub fn upsert_event(conn: &Connection, event: &CanonicalEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO canonical_events (
            id, sport, competition, start_time_utc, home_team, away_team,
            title_canonical, created_at
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
         ON CONFLICT(id) DO UPDATE SET
            sport=excluded.sport,
            competition=excluded.competition,
            start_time_utc=excluded.start_time_utc,
            home_team=excluded.home_team,
            away_team=excluded.away_team,
            title_canonical=excluded.title_canonical",
        params![
            event.id,
            event.sport.as_str(),
            event.competition,
            event.start_time_utc,
            event.home_team,
            event.away_team,
            event.title_canonical,
            event.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_event(conn: &Connection, id: &str) -> Result<Option<CanonicalEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, sport, competition, start_time_utc, home_team, away_team,
                title_canonical, created_at
         FROM canonical_events WHERE id=?1",
    )?;
    let mut rows = stmt.query_map(params![id], map_event)?;
    Ok(rows.next().transpose()?)
}

pub fn list_events(
    conn: &Connection,
    sport: Option<&str>,
    competition: Option<&str>,
) -> Result<Vec<CanonicalEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, sport, competition, start_time_utc, home_team, away_team,
                title_canonical, created_at
         FROM canonical_events
         WHERE (?1 IS NULL OR sport=?1) AND (?2 IS NULL OR competition=?2)
         ORDER BY start_time_utc ASC",
    )?;
    let events = stmt
        .query_map(params![sport, competition], map_event)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(events)
}

pub fn events_by_ids(conn: &Connection, ids: &[String]) -> Result<HashMap<String, CanonicalEvent>> {
    let mut out = HashMap::new();
    for id in ids {
        if let Some(event) = get_event(conn, id)? {
            out.insert(id.clone(), event);
        }
    }
    Ok(out)
}

// ── Market bindings ──────────────────────────────────────────────────────────

/// Upsert a binding keyed by (venue, venue_market_id).
pub fn upsert_binding(conn: &Connection, binding: &MarketBinding) -> Result<()> {
    conn.execute(
        "INSERT INTO market_bindings (
            id, canonical_event_id, venue, venue_market_id, outcome_schema,
            market_type, status, confidence, evidence_json, updated_at
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
         ON CONFLICT(venue, venue_market_id) DO UPDATE SET
            canonical_event_id=excluded.canonical_event_id,
            outcome_schema=excluded.outcome_schema,
            market_type=excluded.market_type,
            status=excluded.status,
            confidence=excluded.confidence,
            evidence_json=excluded.evidence_json,
            updated_at=excluded.updated_at",
        params![
            binding.id,
            binding.canonical_event_id,
            binding.venue.as_str(),
            binding.venue_market_id,
            binding.outcome_schema,
            binding.market_type.as_str(),
            binding.status.as_str(),
            binding.confidence,
            binding.evidence_json,
            binding.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_binding(conn: &Connection, id: &str) -> Result<Option<MarketBinding>> {
    let mut stmt = conn.prepare(&format!(
        "{BINDING_SELECT} WHERE id=?1"
    ))?;
    let mut rows = stmt.query_map(params![id], map_binding)?;
    Ok(rows.next().transpose()?)
}

pub fn get_binding_by_market(
    conn: &Connection,
    venue: Venue,
    venue_market_id: &str,
) -> Result<Option<MarketBinding>> {
    let mut stmt = conn.prepare(&format!(
        "{BINDING_SELECT} WHERE venue=?1 AND venue_market_id=?2"
    ))?;
    let mut rows = stmt.query_map(params![venue.as_str(), venue_market_id], map_binding)?;
    Ok(rows.next().transpose()?)
}

pub fn list_bindings(conn: &Connection, status: Option<BindingStatus>) -> Result<Vec<MarketBinding>> {
    let mut stmt = conn.prepare(&format!(
        "{BINDING_SELECT}
         WHERE (?1 IS NULL OR status=?1)
         ORDER BY updated_at DESC"
    ))?;
    let bindings = stmt
        .query_map(params![status.map(|s| s.as_str())], map_binding)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(bindings)
}

pub fn bindings_for_event(conn: &Connection, event_id: &str) -> Result<Vec<MarketBinding>> {
    let mut stmt = conn.prepare(&format!(
        "{BINDING_SELECT} WHERE canonical_event_id=?1"
    ))?;
    let bindings = stmt
        .query_map(params![event_id], map_binding)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(bindings)
}

pub fn update_binding_status(
    conn: &Connection,
    id: &str,
    status: BindingStatus,
    confidence: Option<f64>,
    evidence_json: Option<&str>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE market_bindings
         SET status=?1,
             confidence=COALESCE(?2, confidence),
             evidence_json=COALESCE(?3, evidence_json),
             updated_at=?4
         WHERE id=?5",
        params![status.as_str(), confidence, evidence_json, Utc::now(), id],
    )?;
    Ok(changed > 0)
}

pub fn rebind_to_event(
    conn: &Connection,
    id: &str,
    canonical_event_id: &str,
    evidence_json: &str,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE market_bindings
         SET canonical_event_id=?1, status=?2, confidence=1.0,
             evidence_json=?3, updated_at=?4
         WHERE id=?5",
        params![
            canonical_event_id,
            BindingStatus::Override.as_str(),
            evidence_json,
            Utc::now(),
            id
        ],
    )?;
    Ok(changed > 0)
}

/// KALSHI market ids of tradeable bindings, for the WebSocket subscription.
pub fn tradeable_kalshi_tickers(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT venue_market_id FROM market_bindings
         WHERE venue='KALSHI' AND status IN ('AUTO','OVERRIDE')
         ORDER BY updated_at DESC",
    )?;
    let tickers = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tickers)
}

// ── Order-book tops ──────────────────────────────────────────────────────────

/// Last-writer-wins upsert of one top-of-book row.
pub fn upsert_top(
    conn: &Connection,
    venue: Venue,
    venue_market_id: &str,
    outcome: &str,
    best_bid: f64,
    best_ask: f64,
    bid_size: f64,
    ask_size: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO orderbook_tops (
            venue, venue_market_id, outcome, best_bid, best_ask,
            bid_size, ask_size, ts
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
         ON CONFLICT(venue, venue_market_id, outcome) DO UPDATE SET
            best_bid=excluded.best_bid,
            best_ask=excluded.best_ask,
            bid_size=excluded.bid_size,
            ask_size=excluded.ask_size,
            ts=excluded.ts",
        params![
            venue.as_str(),
            venue_market_id,
            outcome,
            best_bid,
            best_ask,
            bid_size,
            ask_size,
            Utc::now(),
        ],
    )?;
    Ok(())
}

pub fn get_top(
    conn: &Connection,
    venue: Venue,
    venue_market_id: &str,
    outcome: &str,
) -> Result<Option<OrderBookTop>> {
    let mut stmt = conn.prepare(
        "SELECT venue, venue_market_id, outcome, best_bid, best_ask,
                bid_size, ask_size, ts
         FROM orderbook_tops
         WHERE venue=?1 AND venue_market_id=?2 AND outcome=?3",
    )?;
    let mut rows = stmt.query_map(params![venue.as_str(), venue_market_id, outcome], map_top)?;
    Ok(rows.next().transpose()?)
}

pub fn recent_tops(conn: &Connection, limit: i64, exclude_demo: bool) -> Result<Vec<OrderBookTop>> {
    let mut stmt = conn.prepare(
        "SELECT venue, venue_market_id, outcome, best_bid, best_ask,
                bid_size, ask_size, ts
         FROM orderbook_tops
         WHERE (?2 = 0 OR venue_market_id NOT LIKE '%demo%')
         ORDER BY ts DESC LIMIT ?1",
    )?;
    let tops = stmt
        .query_map(params![limit, exclude_demo as i64], map_top)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tops)
}

pub fn list_tops(
    conn: &Connection,
    venue: Option<&str>,
    venue_market_id: Option<&str>,
    limit: i64,
) -> Result<Vec<OrderBookTop>> {
    let mut stmt = conn.prepare(
        "SELECT venue, venue_market_id, outcome, best_bid, best_ask,
                bid_size, ask_size, ts
         FROM orderbook_tops
         WHERE (?1 IS NULL OR venue=?1) AND (?2 IS NULL OR venue_market_id=?2)
         ORDER BY ts DESC LIMIT ?3",
    )?;
    let tops = stmt
        .query_map(params![venue, venue_market_id, limit], map_top)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tops)
}

// ── Mispricing signals ───────────────────────────────────────────────────────

/// Idempotent upsert keyed by (event, outcome, buy_venue, sell_venue);
/// created_at refreshes on update so "latest evaluation" is queryable.
pub fn upsert_signal(conn: &Connection, signal: &MispricingSignal) -> Result<()> {
    conn.execute(
        "INSERT INTO mispricing_signals (
            id, canonical_event_id, outcome, buy_venue, sell_venue,
            buy_market_id, sell_market_id, buy_price, sell_price,
            size_suggested, edge_raw, edge_after_costs, confidence,
            status, created_at
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
         ON CONFLICT(canonical_event_id, outcome, buy_venue, sell_venue) DO UPDATE SET
            buy_market_id=excluded.buy_market_id,
            sell_market_id=excluded.sell_market_id,
            buy_price=excluded.buy_price,
            sell_price=excluded.sell_price,
            size_suggested=excluded.size_suggested,
            edge_raw=excluded.edge_raw,
            edge_after_costs=excluded.edge_after_costs,
            confidence=excluded.confidence,
            status=excluded.status,
            created_at=excluded.created_at",
        params![
            signal.id,
            signal.canonical_event_id,
            signal.outcome,
            signal.buy_venue.as_str(),
            signal.sell_venue.as_str(),
            signal.buy_market_id,
            signal.sell_market_id,
            signal.buy_price,
            signal.sell_price,
            signal.size_suggested,
            signal.edge_raw,
            signal.edge_after_costs,
            signal.confidence,
            signal.status,
            signal.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_signal(conn: &Connection, id: &str) -> Result<Option<MispricingSignal>> {
    let mut stmt = conn.prepare(&format!("{SIGNAL_SELECT} WHERE id=?1"))?;
    let mut rows = stmt.query_map(params![id], map_signal)?;
    Ok(rows.next().transpose()?)
}

/// OPEN signals ordered by after-cost edge, best first.
pub fn list_open_signals(
    conn: &Connection,
    min_edge: f64,
    limit: i64,
    exclude_demo: bool,
) -> Result<Vec<MispricingSignal>> {
    let mut stmt = conn.prepare(&format!(
        "{SIGNAL_SELECT}
         WHERE status='OPEN'
           AND edge_after_costs >= ?1
           AND (?3 = 0 OR (buy_market_id NOT LIKE '%demo%' AND sell_market_id NOT LIKE '%demo%'))
         ORDER BY edge_after_costs DESC LIMIT ?2"
    ))?;
    let signals = stmt
        .query_map(params![min_edge, limit, exclude_demo as i64], map_signal)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(signals)
}

// ── Paper positions / fills / snapshots ──────────────────────────────────────

pub fn insert_position(conn: &Connection, position: &PaperPosition) -> Result<()> {
    conn.execute(
        "INSERT INTO paper_positions (
            id, canonical_event_id, signal_id, outcome, buy_venue, sell_venue,
            buy_market_id, sell_market_id, size, entry_buy_price,
            entry_sell_price, fill_ratio, status, opened_at, closed_at,
            realized_pnl, unrealized_pnl
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
        params![
            position.id,
            position.canonical_event_id,
            position.signal_id,
            position.outcome,
            position.buy_venue.as_str(),
            position.sell_venue.as_str(),
            position.buy_market_id,
            position.sell_market_id,
            position.size,
            position.entry_buy_price,
            position.entry_sell_price,
            position.fill_ratio,
            position.status.as_str(),
            position.opened_at,
            position.closed_at,
            position.realized_pnl,
            position.unrealized_pnl,
        ],
    )?;
    Ok(())
}

pub fn get_position(conn: &Connection, id: &str) -> Result<Option<PaperPosition>> {
    let mut stmt = conn.prepare(&format!("{POSITION_SELECT} WHERE id=?1"))?;
    let mut rows = stmt.query_map(params![id], map_position)?;
    Ok(rows.next().transpose()?)
}

pub fn list_positions(conn: &Connection, status: Option<PositionStatus>) -> Result<Vec<PaperPosition>> {
    let mut stmt = conn.prepare(&format!(
        "{POSITION_SELECT}
         WHERE (?1 IS NULL OR status=?1)
         ORDER BY opened_at DESC"
    ))?;
    let positions = stmt
        .query_map(params![status.map(|s| s.as_str())], map_position)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(positions)
}

pub fn set_position_unrealized(conn: &Connection, id: &str, unrealized_pnl: f64) -> Result<()> {
    conn.execute(
        "UPDATE paper_positions SET unrealized_pnl=?1 WHERE id=?2",
        params![unrealized_pnl, id],
    )?;
    Ok(())
}

pub fn close_position_row(
    conn: &Connection,
    id: &str,
    realized_pnl: f64,
    closed_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE paper_positions
         SET status='CLOSED', realized_pnl=?1, unrealized_pnl=0.0, closed_at=?2
         WHERE id=?3",
        params![realized_pnl, closed_at, id],
    )?;
    Ok(())
}

pub fn insert_fill(conn: &Connection, fill: &PaperFill) -> Result<()> {
    conn.execute(
        "INSERT INTO paper_fills (
            id, position_id, leg, limit_price, fill_price,
            requested_size, filled_size, probability, ts
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
        params![
            fill.id,
            fill.position_id,
            fill.leg,
            fill.limit_price,
            fill.fill_price,
            fill.requested_size,
            fill.filled_size,
            fill.probability,
            fill.ts,
        ],
    )?;
    Ok(())
}

pub fn list_fills(conn: &Connection, position_id: &str) -> Result<Vec<PaperFill>> {
    let mut stmt = conn.prepare(
        "SELECT id, position_id, leg, limit_price, fill_price,
                requested_size, filled_size, probability, ts
         FROM paper_fills WHERE position_id=?1 ORDER BY ts ASC",
    )?;
    let fills = stmt
        .query_map(params![position_id], |row| {
            Ok(PaperFill {
                id: row.get(0)?,
                position_id: row.get(1)?,
                leg: row.get(2)?,
                limit_price: row.get(3)?,
                fill_price: row.get(4)?,
                requested_size: row.get(5)?,
                filled_size: row.get(6)?,
                probability: row.get(7)?,
                ts: row.get(8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(fills)
}

pub fn insert_snapshot(conn: &Connection, snapshot: &PortfolioSnapshot) -> Result<()> {
    conn.execute(
        "INSERT INTO portfolio_snapshots (ts, equity, realized_pnl, unrealized_pnl)
         VALUES (?1,?2,?3,?4)",
        params![
            snapshot.ts,
            snapshot.equity,
            snapshot.realized_pnl,
            snapshot.unrealized_pnl
        ],
    )?;
    Ok(())
}

/// Most recent snapshots, returned oldest-first for charting.
pub fn recent_snapshots(conn: &Connection, limit: i64) -> Result<Vec<PortfolioSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT ts, equity, realized_pnl, unrealized_pnl
         FROM portfolio_snapshots ORDER BY ts DESC LIMIT ?1",
    )?;
    let mut snapshots = stmt
        .query_map(params![limit], |row| {
            Ok(PortfolioSnapshot {
                ts: row.get(0)?,
                equity: row.get(1)?,
                realized_pnl: row.get(2)?,
                unrealized_pnl: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    snapshots.reverse();
    Ok(snapshots)
}

pub fn sum_realized_closed(conn: &Connection) -> Result<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(realized_pnl),0) FROM paper_positions WHERE status='CLOSED'",
        [],
        |row| row.get(0),
    )?;
    Ok(total)
}

pub fn sum_unrealized_open(conn: &Connection) -> Result<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(unrealized_pnl),0) FROM paper_positions WHERE status='OPEN'",
        [],
        |row| row.get(0),
    )?;
    Ok(total)
}

// ── Demo cleanup ─────────────────────────────────────────────────────────────

/// Remove rows carrying the demo marker, then drop events left unbound.
pub fn purge_demo_rows(conn: &Connection) -> Result<()> {
    conn.execute(
        "DELETE FROM mispricing_signals
         WHERE buy_market_id LIKE '%demo%' OR sell_market_id LIKE '%demo%'",
        [],
    )?;
    conn.execute(
        "DELETE FROM orderbook_tops WHERE venue_market_id LIKE '%demo%'",
        [],
    )?;
    conn.execute(
        "DELETE FROM market_bindings WHERE venue_market_id LIKE '%demo%'",
        [],
    )?;
    conn.execute(
        "DELETE FROM canonical_events
         WHERE id NOT IN (SELECT DISTINCT canonical_event_id FROM market_bindings)",
        [],
    )?;
    Ok(())
}

// ── SQL helpers ──────────────────────────────────────────────────────────────

const BINDING_SELECT: &str = "SELECT id, canonical_event_id, venue, venue_market_id, outcome_schema,
        market_type, status, confidence, evidence_json, updated_at
 FROM market_bindings";

const SIGNAL_SELECT: &str = "SELECT id, canonical_event_id, outcome, buy_venue, sell_venue,
        buy_market_id, sell_market_id, buy_price, sell_price,
        size_suggested, edge_raw, edge_after_costs, confidence,
        status, created_at
 FROM mispricing_signals";

const POSITION_SELECT: &str = "SELECT id, canonical_event_id, signal_id, outcome, buy_venue, sell_venue,
        buy_market_id, sell_market_id, size, entry_buy_price,
        entry_sell_price, fill_ratio, status, opened_at, closed_at,
        realized_pnl, unrealized_pnl
 FROM paper_positions";

fn column_enum<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let text: String = row.get(idx)?;
    text.parse::<T>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            err.to_string().into(),
        )
    })
}

fn map_event(row: &rusqlite::Row) -> rusqlite::Result<CanonicalEvent> {
    Ok(CanonicalEvent {
        id: row.get(0)?,
        sport: column_enum(row, 1)?,
        competition: row.get(2)?,
        start_time_utc: row.get(3)?,
        home_team: row.get(4)?,
        away_team: row.get(5)?,
        title_canonical: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_binding(row: &rusqlite::Row) -> rusqlite::Result<MarketBinding> {
    Ok(MarketBinding {
        id: row.get(0)?,
        canonical_event_id: row.get(1)?,
        venue: column_enum(row, 2)?,
        venue_market_id: row.get(3)?,
        outcome_schema: row.get(4)?,
        market_type: column_enum(row, 5)?,
        status: column_enum(row, 6)?,
        confidence: row.get(7)?,
        evidence_json: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn map_top(row: &rusqlite::Row) -> rusqlite::Result<OrderBookTop> {
    Ok(OrderBookTop {
        venue: column_enum(row, 0)?,
        venue_market_id: row.get(1)?,
        outcome: row.get(2)?,
        best_bid: row.get(3)?,
        best_ask: row.get(4)?,
        bid_size: row.get(5)?,
        ask_size: row.get(6)?,
        ts: row.get(7)?,
    })
}

fn map_signal(row: &rusqlite::Row) -> rusqlite::Result<MispricingSignal> {
    Ok(MispricingSignal {
        id: row.get(0)?,
        canonical_event_id: row.get(1)?,
        outcome: row.get(2)?,
        buy_venue: column_enum(row, 3)?,
        sell_venue: column_enum(row, 4)?,
        buy_market_id: row.get(5)?,
        sell_market_id: row.get(6)?,
        buy_price: row.get(7)?,
        sell_price: row.get(8)?,
        size_suggested: row.get(9)?,
        edge_raw: row.get(10)?,
        edge_after_costs: row.get(11)?,
        confidence: row.get(12)?,
        status: row.get(13)?,
        created_at: row.get(14)?,
    })
}

fn map_position(row: &rusqlite::Row) -> rusqlite::Result<PaperPosition> {
    Ok(PaperPosition {
        id: row.get(0)?,
        canonical_event_id: row.get(1)?,
        signal_id: row.get(2)?,
        outcome: row.get(3)?,
        buy_venue: column_enum(row, 4)?,
        sell_venue: column_enum(row, 5)?,
        buy_market_id: row.get(6)?,
        sell_market_id: row.get(7)?,
        size: row.get(8)?,
        entry_buy_price: row.get(9)?,
        entry_sell_price: row.get(10)?,
        fill_ratio: row.get(11)?,
        status: column_enum(row, 12)?,
        opened_at: row.get(13)?,
        closed_at: row.get(14)?,
        realized_pnl: row.get(15)?,
        unrealized_pnl: row.get(16)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS).
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS canonical_events (
    id              TEXT PRIMARY KEY,
    sport           TEXT NOT NULL,
    competition     TEXT,
    start_time_utc  TEXT NOT NULL,
    home_team       TEXT NOT NULL,
    away_team       TEXT NOT NULL,
    title_canonical TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS market_bindings (
    id                 TEXT PRIMARY KEY,
    canonical_event_id TEXT NOT NULL,
    venue              TEXT NOT NULL,
    venue_market_id    TEXT NOT NULL,
    outcome_schema     TEXT NOT NULL DEFAULT 'YES_NO',
    market_type        TEXT NOT NULL,
    status             TEXT NOT NULL,
    confidence         REAL NOT NULL DEFAULT 0.0,
    evidence_json      TEXT NOT NULL DEFAULT '{}',
    updated_at         TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_binding_venue_market
    ON market_bindings(venue, venue_market_id);
CREATE UNIQUE INDEX IF NOT EXISTS uq_binding_event_venue
    ON market_bindings(canonical_event_id, venue);

CREATE TABLE IF NOT EXISTS orderbook_tops (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    venue           TEXT NOT NULL,
    venue_market_id TEXT NOT NULL,
    outcome         TEXT NOT NULL,
    best_bid        REAL NOT NULL,
    best_ask        REAL NOT NULL,
    bid_size        REAL NOT NULL DEFAULT 0.0,
    ask_size        REAL NOT NULL DEFAULT 0.0,
    ts              TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_orderbook_side
    ON orderbook_tops(venue, venue_market_id, outcome);

CREATE TABLE IF NOT EXISTS mispricing_signals (
    id                 TEXT PRIMARY KEY,
    canonical_event_id TEXT NOT NULL,
    outcome            TEXT NOT NULL,
    buy_venue          TEXT NOT NULL,
    sell_venue         TEXT NOT NULL,
    buy_market_id      TEXT NOT NULL,
    sell_market_id     TEXT NOT NULL,
    buy_price          REAL NOT NULL,
    sell_price         REAL NOT NULL,
    size_suggested     REAL NOT NULL,
    edge_raw           REAL NOT NULL,
    edge_after_costs   REAL NOT NULL,
    confidence         REAL NOT NULL,
    status             TEXT NOT NULL DEFAULT 'OPEN',
    created_at         TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_signal_event_outcome_direction
    ON mispricing_signals(canonical_event_id, outcome, buy_venue, sell_venue);
CREATE INDEX IF NOT EXISTS idx_signals_edge
    ON mispricing_signals(edge_after_costs);

CREATE TABLE IF NOT EXISTS paper_positions (
    id                 TEXT PRIMARY KEY,
    canonical_event_id TEXT NOT NULL,
    signal_id          TEXT NOT NULL,
    outcome            TEXT NOT NULL,
    buy_venue          TEXT NOT NULL,
    sell_venue         TEXT NOT NULL,
    buy_market_id      TEXT NOT NULL,
    sell_market_id     TEXT NOT NULL,
    size               REAL NOT NULL,
    entry_buy_price    REAL NOT NULL,
    entry_sell_price   REAL NOT NULL,
    fill_ratio         REAL NOT NULL DEFAULT 1.0,
    status             TEXT NOT NULL DEFAULT 'OPEN',
    opened_at          TEXT NOT NULL,
    closed_at          TEXT,
    realized_pnl       REAL NOT NULL DEFAULT 0.0,
    unrealized_pnl     REAL NOT NULL DEFAULT 0.0
);
CREATE INDEX IF NOT EXISTS idx_positions_status ON paper_positions(status);

CREATE TABLE IF NOT EXISTS paper_fills (
    id             TEXT PRIMARY KEY,
    position_id    TEXT NOT NULL,
    leg            TEXT NOT NULL,
    limit_price    REAL NOT NULL,
    fill_price     REAL NOT NULL,
    requested_size REAL NOT NULL,
    filled_size    REAL NOT NULL,
    probability    REAL NOT NULL,
    ts             TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fills_position ON paper_fills(position_id);

CREATE TABLE IF NOT EXISTS portfolio_snapshots (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    ts             TEXT NOT NULL,
    equity         REAL NOT NULL DEFAULT 0.0,
    realized_pnl   REAL NOT NULL DEFAULT 0.0,
    unrealized_pnl REAL NOT NULL DEFAULT 0.0
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_event(id: &str) -> CanonicalEvent {
        CanonicalEvent {
            id: id.to_string(),
            sport: Sport::Nba,
            competition: Some("NBA".to_string()),
            start_time_utc: Utc::now() + Duration::hours(4),
            home_team: "boston celtics".to_string(),
            away_team: "new york knicks".to_string(),
            title_canonical: "boston celtics vs new york knicks".to_string(),
            created_at: Utc::now(),
        }
    }

    fn sample_binding(event_id: &str, venue: Venue, market_id: &str) -> MarketBinding {
        MarketBinding {
            id: uuid::Uuid::new_v4().to_string(),
            canonical_event_id: event_id.to_string(),
            venue,
            venue_market_id: market_id.to_string(),
            outcome_schema: "YES_NO".to_string(),
            market_type: MarketType::WinnerBinary,
            status: BindingStatus::Auto,
            confidence: 0.95,
            evidence_json: "{}".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_upsert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let event = sample_event("evt-1");
        db.with_conn(|conn| {
            upsert_event(conn, &event)?;
            upsert_event(conn, &event)?;
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM canonical_events", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_binding_upsert_replaces_by_venue_market() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            upsert_event(conn, &sample_event("evt-1"))?;
            let mut binding = sample_binding("evt-1", Venue::Poly, "poly-1");
            upsert_binding(conn, &binding)?;

            binding.status = BindingStatus::Review;
            binding.confidence = 0.82;
            upsert_binding(conn, &binding)?;

            let rows = list_bindings(conn, None)?;
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].status, BindingStatus::Review);
            assert!((rows[0].confidence - 0.82).abs() < 1e-9);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_orderbook_upsert_overwrites_same_key() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            upsert_top(conn, Venue::Poly, "m1", "YES", 0.40, 0.42, 100.0, 90.0)?;
            upsert_top(conn, Venue::Poly, "m1", "YES", 0.41, 0.43, 120.0, 95.0)?;

            let top = get_top(conn, Venue::Poly, "m1", "YES")?.unwrap();
            assert!((top.best_bid - 0.41).abs() < 1e-9);
            assert!((top.ask_size - 95.0).abs() < 1e-9);

            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM orderbook_tops", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_signal_upsert_keeps_one_row_per_direction() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let mut signal = MispricingSignal {
                id: "sig-1".to_string(),
                canonical_event_id: "evt-1".to_string(),
                outcome: "YES".to_string(),
                buy_venue: Venue::Poly,
                sell_venue: Venue::Kalshi,
                buy_market_id: "poly-1".to_string(),
                sell_market_id: "kalshi-1".to_string(),
                buy_price: 0.41,
                sell_price: 0.49,
                size_suggested: 100.0,
                edge_raw: 0.08,
                edge_after_costs: 0.06,
                confidence: 0.95,
                status: "OPEN".to_string(),
                created_at: Utc::now(),
            };
            upsert_signal(conn, &signal)?;

            signal.id = "sig-2".to_string();
            signal.edge_after_costs = 0.05;
            signal.created_at = Utc::now();
            upsert_signal(conn, &signal)?;

            let signals = list_open_signals(conn, 0.0, 10, false)?;
            assert_eq!(signals.len(), 1);
            assert_eq!(signals[0].id, "sig-1");
            assert!((signals[0].edge_after_costs - 0.05).abs() < 1e-9);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_purge_demo_rows_drops_unbound_events() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            upsert_event(conn, &sample_event("evt-demo"))?;
            upsert_event(conn, &sample_event("evt-live"))?;
            upsert_binding(conn, &sample_binding("evt-demo", Venue::Poly, "poly-demo-1"))?;
            upsert_binding(conn, &sample_binding("evt-live", Venue::Poly, "poly-live-1"))?;
            upsert_top(conn, Venue::Poly, "poly-demo-1", "YES", 0.5, 0.52, 10.0, 10.0)?;

            purge_demo_rows(conn)?;

            assert!(get_top(conn, Venue::Poly, "poly-demo-1", "YES")?.is_none());
            assert!(get_event(conn, "evt-demo")?.is_none());
            assert!(get_event(conn, "evt-live")?.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.transaction(|conn| {
            upsert_event(conn, &sample_event("evt-tx"))?;
            anyhow::bail!("boom");
        });
        assert!(result.is_err());
        db.with_conn(|conn| {
            assert!(get_event(conn, "evt-tx")?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
