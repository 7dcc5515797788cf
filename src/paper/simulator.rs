//! Paper execution of mispricing signals: one simulated buy leg and one
//! simulated sell leg, recorded as a hedged position with its fills.

use anyhow::Context;
use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use crate::db;
use crate::db::models::{PaperFill, PaperPosition, PositionStatus};
use crate::paper::fills::{fill_rng, simulate_limit_fill, FillOutcome, Leg};
use crate::paper::PaperError;

/// Simulate both legs of a signal. `requested_size` defaults to the
/// signal's suggested size and is clamped to it.
pub fn simulate_signal(
    conn: &Connection,
    signal_id: &str,
    requested_size: Option<f64>,
) -> Result<PaperPosition, PaperError> {
    let signal = db::get_signal(conn, signal_id)
        .context("loading signal")?
        .ok_or(PaperError::NotFound("signal"))?;

    let target_size = requested_size
        .unwrap_or(signal.size_suggested)
        .min(signal.size_suggested)
        .max(0.0);
    if target_size <= 0.0 {
        return Err(PaperError::Invalid("size must be positive".to_string()));
    }

    let buy_top = db::get_top(conn, signal.buy_venue, &signal.buy_market_id, &signal.outcome)
        .context("loading buy-side book")?;
    let sell_top = db::get_top(conn, signal.sell_venue, &signal.sell_market_id, &signal.outcome)
        .context("loading sell-side book")?;
    let (Some(buy_top), Some(sell_top)) = (buy_top, sell_top) else {
        return Err(PaperError::Invalid(
            "orderbook unavailable for simulation".to_string(),
        ));
    };

    let mut rng = fill_rng(&signal.id, target_size);
    let buy_fill = simulate_limit_fill(
        Leg::Buy,
        signal.buy_price,
        buy_top.best_bid,
        buy_top.best_ask,
        buy_top.ask_size,
        target_size,
        &mut rng,
    );
    let sell_fill = simulate_limit_fill(
        Leg::Sell,
        signal.sell_price,
        sell_top.best_bid,
        sell_top.best_ask,
        sell_top.bid_size,
        target_size,
        &mut rng,
    );

    let filled_size = buy_fill.filled_size.min(sell_fill.filled_size);
    if filled_size <= 0.0 {
        return Err(PaperError::Invalid("simulated fills were zero".to_string()));
    }

    let position = PaperPosition {
        id: Uuid::new_v4().to_string(),
        canonical_event_id: signal.canonical_event_id.clone(),
        signal_id: signal.id.clone(),
        outcome: signal.outcome.clone(),
        buy_venue: signal.buy_venue,
        sell_venue: signal.sell_venue,
        buy_market_id: signal.buy_market_id.clone(),
        sell_market_id: signal.sell_market_id.clone(),
        size: filled_size,
        entry_buy_price: buy_fill.fill_price,
        entry_sell_price: sell_fill.fill_price,
        fill_ratio: filled_size / target_size,
        status: PositionStatus::Open,
        opened_at: Utc::now(),
        closed_at: None,
        realized_pnl: 0.0,
        unrealized_pnl: 0.0,
    };
    db::insert_position(conn, &position).context("recording position")?;

    record_fill(conn, &position.id, Leg::Buy, signal.buy_price, &buy_fill, target_size, filled_size)?;
    record_fill(conn, &position.id, Leg::Sell, signal.sell_price, &sell_fill, target_size, filled_size)?;

    Ok(position)
}

fn record_fill(
    conn: &Connection,
    position_id: &str,
    leg: Leg,
    limit_price: f64,
    fill: &FillOutcome,
    requested_size: f64,
    filled_size: f64,
) -> Result<(), PaperError> {
    db::insert_fill(
        conn,
        &PaperFill {
            id: Uuid::new_v4().to_string(),
            position_id: position_id.to_string(),
            leg: leg.as_str().to_string(),
            limit_price,
            fill_price: fill.fill_price,
            requested_size,
            filled_size,
            probability: fill.probability,
            ts: Utc::now(),
        },
    )
    .context("recording fill")?;
    Ok(())
}

/// Manually close an open position at current quotes; falls back to the
/// locked entry spread when either book is gone. Closing a closed position
/// is a no-op.
pub fn close_position(conn: &Connection, position_id: &str) -> Result<PaperPosition, PaperError> {
    let position = db::get_position(conn, position_id)
        .context("loading position")?
        .ok_or(PaperError::NotFound("position"))?;
    if position.status == PositionStatus::Closed {
        return Ok(position);
    }

    let buy_top = db::get_top(
        conn,
        position.buy_venue,
        &position.buy_market_id,
        &position.outcome,
    )
    .context("loading buy-side book")?;
    let sell_top = db::get_top(
        conn,
        position.sell_venue,
        &position.sell_market_id,
        &position.outcome,
    )
    .context("loading sell-side book")?;

    let realized = match (buy_top, sell_top) {
        (Some(buy), Some(sell)) => {
            (buy.best_bid - position.entry_buy_price) * position.size
                + (position.entry_sell_price - sell.best_ask) * position.size
        }
        _ => (position.entry_sell_price - position.entry_buy_price) * position.size,
    };

    let closed_at = Utc::now();
    db::close_position_row(conn, &position.id, realized, closed_at).context("closing position")?;

    Ok(PaperPosition {
        status: PositionStatus::Closed,
        realized_pnl: realized,
        unrealized_pnl: 0.0,
        closed_at: Some(closed_at),
        ..position
    })
}
