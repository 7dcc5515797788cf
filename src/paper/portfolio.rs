//! Portfolio lifecycle: mark-to-market, event-start auto-settlement and
//! aggregate paper-trading statistics.

use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::db;
use crate::db::models::{PortfolioSnapshot, PositionStatus};

/// Refresh unrealized PnL on every open position from current top-of-book,
/// then append a portfolio snapshot. Positions with a missing book mark at
/// zero rather than holding a stale value.
pub fn mark_to_market(conn: &Connection) -> Result<()> {
    for position in db::list_positions(conn, Some(PositionStatus::Open))? {
        let buy_book = db::get_top(
            conn,
            position.buy_venue,
            &position.buy_market_id,
            &position.outcome,
        )?;
        let sell_book = db::get_top(
            conn,
            position.sell_venue,
            &position.sell_market_id,
            &position.outcome,
        )?;

        let unrealized = match (buy_book, sell_book) {
            (Some(buy), Some(sell)) => {
                (buy.best_bid - position.entry_buy_price) * position.size
                    + (position.entry_sell_price - sell.best_ask) * position.size
            }
            _ => 0.0,
        };
        db::set_position_unrealized(conn, &position.id, unrealized)?;
    }

    let realized = db::sum_realized_closed(conn)?;
    let unrealized = db::sum_unrealized_open(conn)?;
    db::insert_snapshot(
        conn,
        &PortfolioSnapshot {
            ts: Utc::now(),
            equity: realized + unrealized,
            realized_pnl: realized,
            unrealized_pnl: unrealized,
        },
    )?;
    Ok(())
}

/// Close every open position whose event has started. Settlement
/// simplification: the pair payout nets to the locked entry spread.
pub fn auto_close_started_events(conn: &Connection) -> Result<usize> {
    let now = Utc::now();
    let mut closed = 0;

    for position in db::list_positions(conn, Some(PositionStatus::Open))? {
        let Some(event) = db::get_event(conn, &position.canonical_event_id)? else {
            continue;
        };
        if event.start_time_utc > now {
            continue;
        }

        let realized = (position.entry_sell_price - position.entry_buy_price) * position.size;
        db::close_position_row(conn, &position.id, realized, now)?;
        closed += 1;
    }

    if closed > 0 {
        info!("auto-closed {closed} positions on event start");
    }
    Ok(closed)
}

#[derive(Debug, Clone, Serialize)]
pub struct PaperStats {
    pub as_of: chrono::DateTime<Utc>,
    pub open_positions: usize,
    pub closed_positions: usize,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub equity: f64,
    pub win_rate: f64,
    pub avg_fill_ratio: f64,
    pub avg_edge_captured: f64,
    pub avg_slippage: f64,
    pub equity_curve: Vec<PortfolioSnapshot>,
}

/// Aggregate execution-quality stats: realized/unrealized totals, win rate,
/// fill ratios and captured-vs-signalled spread.
pub fn paper_stats(conn: &Connection) -> Result<PaperStats> {
    let open = db::list_positions(conn, Some(PositionStatus::Open))?;
    let closed = db::list_positions(conn, Some(PositionStatus::Closed))?;

    let realized: f64 = closed.iter().map(|p| p.realized_pnl).sum();
    let unrealized: f64 = open.iter().map(|p| p.unrealized_pnl).sum();
    let wins = closed.iter().filter(|p| p.realized_pnl > 0.0).count();
    let win_rate = if closed.is_empty() {
        0.0
    } else {
        wins as f64 / closed.len() as f64
    };

    let all_count = open.len() + closed.len();
    let avg_fill_ratio = if all_count == 0 {
        0.0
    } else {
        open.iter()
            .chain(closed.iter())
            .map(|p| p.fill_ratio)
            .sum::<f64>()
            / all_count as f64
    };

    // Captured spread vs the spread the signal promised, as a rough
    // execution quality measure.
    let mut captured_edges = Vec::new();
    let mut slippages = Vec::new();
    for position in open.iter().chain(closed.iter()) {
        let captured = position.entry_sell_price - position.entry_buy_price;
        captured_edges.push(captured);
        if let Some(signal) = db::get_signal(conn, &position.signal_id)? {
            slippages.push((signal.sell_price - signal.buy_price) - captured);
        }
    }
    let avg_edge_captured = if captured_edges.is_empty() {
        0.0
    } else {
        captured_edges.iter().sum::<f64>() / captured_edges.len() as f64
    };
    let avg_slippage = if slippages.is_empty() {
        0.0
    } else {
        slippages.iter().sum::<f64>() / slippages.len() as f64
    };

    let equity_curve = db::recent_snapshots(conn, 200)?;
    let equity = equity_curve
        .last()
        .map(|s| s.equity)
        .unwrap_or(realized + unrealized);

    Ok(PaperStats {
        as_of: Utc::now(),
        open_positions: open.len(),
        closed_positions: closed.len(),
        realized_pnl: realized,
        unrealized_pnl: unrealized,
        equity,
        win_rate,
        avg_fill_ratio,
        avg_edge_captured,
        avg_slippage,
        equity_curve,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{CanonicalEvent, MispricingSignal, PaperPosition, Sport, Venue};
    use crate::db::Database;
    use chrono::{DateTime, Duration};
    use uuid::Uuid;

    fn insert_event(conn: &Connection, id: &str, start: DateTime<Utc>) {
        db::upsert_event(
            conn,
            &CanonicalEvent {
                id: id.to_string(),
                sport: Sport::Nba,
                competition: Some("NBA".to_string()),
                start_time_utc: start,
                home_team: "boston celtics".to_string(),
                away_team: "new york knicks".to_string(),
                title_canonical: "boston celtics vs new york knicks".to_string(),
                created_at: Utc::now(),
            },
        )
        .unwrap();
    }

    fn insert_open_position(
        conn: &Connection,
        event_id: &str,
        buy_market: &str,
        sell_market: &str,
        size: f64,
        entry_buy: f64,
        entry_sell: f64,
    ) -> String {
        let position = PaperPosition {
            id: Uuid::new_v4().to_string(),
            canonical_event_id: event_id.to_string(),
            signal_id: Uuid::new_v4().to_string(),
            outcome: "YES".to_string(),
            buy_venue: Venue::Poly,
            sell_venue: Venue::Kalshi,
            buy_market_id: buy_market.to_string(),
            sell_market_id: sell_market.to_string(),
            size,
            entry_buy_price: entry_buy,
            entry_sell_price: entry_sell,
            fill_ratio: 1.0,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
        };
        db::insert_position(conn, &position).unwrap();
        position.id
    }

    #[test]
    fn test_mark_to_market_updates_positions_and_appends_snapshot() {
        let database = Database::open_in_memory().unwrap();
        database
            .with_conn(|conn| {
                insert_event(conn, "evt-1", Utc::now() + Duration::hours(4));
                let position_id =
                    insert_open_position(conn, "evt-1", "poly-1", "kalshi-1", 100.0, 0.41, 0.49);

                db::upsert_top(conn, Venue::Poly, "poly-1", "YES", 0.44, 0.45, 100.0, 100.0)?;
                db::upsert_top(conn, Venue::Kalshi, "kalshi-1", "YES", 0.47, 0.48, 100.0, 100.0)?;

                mark_to_market(conn)?;

                let position = db::get_position(conn, &position_id)?.unwrap();
                // (0.44 - 0.41)*100 + (0.49 - 0.48)*100 = 4.0
                assert!((position.unrealized_pnl - 4.0).abs() < 1e-9);

                let snapshots = db::recent_snapshots(conn, 10)?;
                assert_eq!(snapshots.len(), 1);
                assert!((snapshots[0].equity - 4.0).abs() < 1e-9);
                assert!((snapshots[0].unrealized_pnl - 4.0).abs() < 1e-9);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_mark_to_market_zeroes_when_book_missing() {
        let database = Database::open_in_memory().unwrap();
        database
            .with_conn(|conn| {
                insert_event(conn, "evt-1", Utc::now() + Duration::hours(4));
                let position_id =
                    insert_open_position(conn, "evt-1", "poly-1", "kalshi-1", 100.0, 0.41, 0.49);
                db::set_position_unrealized(conn, &position_id, 7.5)?;

                mark_to_market(conn)?;

                let position = db::get_position(conn, &position_id)?.unwrap();
                assert!((position.unrealized_pnl - 0.0).abs() < 1e-9);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_auto_close_settles_started_events_at_locked_spread() {
        let database = Database::open_in_memory().unwrap();
        database
            .with_conn(|conn| {
                insert_event(conn, "evt-started", Utc::now() - Duration::minutes(5));
                insert_event(conn, "evt-future", Utc::now() + Duration::hours(4));

                let started_id =
                    insert_open_position(conn, "evt-started", "poly-1", "kalshi-1", 100.0, 0.41, 0.49);
                let future_id =
                    insert_open_position(conn, "evt-future", "poly-2", "kalshi-2", 50.0, 0.30, 0.35);

                let closed = auto_close_started_events(conn)?;
                assert_eq!(closed, 1);

                let started = db::get_position(conn, &started_id)?.unwrap();
                assert_eq!(started.status, PositionStatus::Closed);
                assert!((started.realized_pnl - 8.0).abs() < 1e-9);
                assert!(started.closed_at.is_some());

                let future = db::get_position(conn, &future_id)?.unwrap();
                assert_eq!(future.status, PositionStatus::Open);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_paper_stats_aggregates() {
        let database = Database::open_in_memory().unwrap();
        database
            .with_conn(|conn| {
                insert_event(conn, "evt-1", Utc::now() - Duration::minutes(5));
                let signal_id = "sig-stats".to_string();
                db::upsert_signal(
                    conn,
                    &MispricingSignal {
                        id: signal_id.clone(),
                        canonical_event_id: "evt-1".to_string(),
                        outcome: "YES".to_string(),
                        buy_venue: Venue::Poly,
                        sell_venue: Venue::Kalshi,
                        buy_market_id: "poly-1".to_string(),
                        sell_market_id: "kalshi-1".to_string(),
                        buy_price: 0.40,
                        sell_price: 0.50,
                        size_suggested: 100.0,
                        edge_raw: 0.10,
                        edge_after_costs: 0.08,
                        confidence: 0.95,
                        status: "OPEN".to_string(),
                        created_at: Utc::now(),
                    },
                )?;

                let mut position = PaperPosition {
                    id: "pos-1".to_string(),
                    canonical_event_id: "evt-1".to_string(),
                    signal_id,
                    outcome: "YES".to_string(),
                    buy_venue: Venue::Poly,
                    sell_venue: Venue::Kalshi,
                    buy_market_id: "poly-1".to_string(),
                    sell_market_id: "kalshi-1".to_string(),
                    size: 100.0,
                    entry_buy_price: 0.41,
                    entry_sell_price: 0.49,
                    fill_ratio: 0.8,
                    status: PositionStatus::Open,
                    opened_at: Utc::now(),
                    closed_at: None,
                    realized_pnl: 0.0,
                    unrealized_pnl: 0.0,
                };
                db::insert_position(conn, &position)?;

                position.id = "pos-2".to_string();
                position.fill_ratio = 1.0;
                db::insert_position(conn, &position)?;
                db::close_position_row(conn, "pos-2", 8.0, Utc::now())?;

                auto_close_started_events(conn)?;
                mark_to_market(conn)?;

                let stats = paper_stats(conn)?;
                assert_eq!(stats.open_positions, 0);
                assert_eq!(stats.closed_positions, 2);
                assert!((stats.win_rate - 1.0).abs() < 1e-9);
                assert!((stats.avg_fill_ratio - 0.9).abs() < 1e-9);
                // Signal promised 0.10, both entries captured 0.08.
                assert!((stats.avg_edge_captured - 0.08).abs() < 1e-9);
                assert!((stats.avg_slippage - 0.02).abs() < 1e-9);
                assert_eq!(stats.equity_curve.len(), 1);
                Ok(())
            })
            .unwrap();
    }
}
