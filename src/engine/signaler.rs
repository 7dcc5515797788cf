//! Signal generation: evaluate every tradeable cross-venue pair in both
//! directions and upsert the better one under its idempotent key.

use anyhow::Result;
use chrono::{Duration, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db;
use crate::db::models::{
    BindingStatus, CanonicalEvent, MarketBinding, MarketType, MispricingSignal, Venue,
};
use crate::engine::pricing::{compute_edge, suggested_size, Quote};
use crate::engine::EngineParams;

struct BindingPair {
    event: CanonicalEvent,
    poly: MarketBinding,
    kalshi: MarketBinding,
}

/// Recompute and upsert signals for every bound pair. Runs inside the
/// caller's transaction.
pub fn refresh_signals(conn: &Connection, params: &EngineParams) -> Result<Vec<MispricingSignal>> {
    let earliest = Utc::now() + Duration::seconds(params.min_seconds_to_start);

    let mut created = Vec::new();
    for pair in load_binding_pairs(conn)? {
        if pair.event.start_time_utc < earliest {
            continue;
        }

        for outcome in ["YES", "NO"] {
            let Some(signal) = evaluate_pair(conn, params, &pair, outcome)? else {
                continue;
            };
            db::upsert_signal(conn, &signal)?;
            created.push(signal);
        }
    }

    Ok(created)
}

fn load_binding_pairs(conn: &Connection) -> Result<Vec<BindingPair>> {
    let mut pairs = Vec::new();
    for event in db::list_events(conn, None, None)? {
        let bindings = db::bindings_for_event(conn, &event.id)?;

        let poly = bindings
            .iter()
            .find(|b| b.venue == Venue::Poly && b.status.is_tradeable());
        let kalshi = bindings
            .iter()
            .find(|b| b.venue == Venue::Kalshi && b.status.is_tradeable());
        let (Some(poly), Some(kalshi)) = (poly, kalshi) else {
            continue;
        };
        if poly.market_type != MarketType::WinnerBinary
            || kalshi.market_type != MarketType::WinnerBinary
        {
            continue;
        }

        pairs.push(BindingPair {
            event,
            poly: poly.clone(),
            kalshi: kalshi.clone(),
        });
    }
    Ok(pairs)
}

/// Quote for one side. Binary markets may only expose YES; the NO quote is
/// derived conservatively from it (bid = 1 - yes.ask, ask = 1 - yes.bid,
/// sizes swapped).
fn get_quote(
    conn: &Connection,
    venue: Venue,
    market_id: &str,
    outcome: &str,
) -> Result<Option<Quote>> {
    if let Some(top) = db::get_top(conn, venue, market_id, outcome)? {
        return Ok(Some(Quote {
            bid: top.best_bid,
            ask: top.best_ask,
            bid_size: top.bid_size,
            ask_size: top.ask_size,
        }));
    }

    if outcome == "NO" {
        if let Some(yes_top) = db::get_top(conn, venue, market_id, "YES")? {
            return Ok(Some(Quote {
                bid: (1.0 - yes_top.best_ask).max(0.0),
                ask: (1.0 - yes_top.best_bid).max(0.0),
                bid_size: yes_top.ask_size,
                ask_size: yes_top.bid_size,
            }));
        }
    }
    Ok(None)
}

fn evaluate_pair(
    conn: &Connection,
    params: &EngineParams,
    pair: &BindingPair,
    outcome: &str,
) -> Result<Option<MispricingSignal>> {
    let poly_quote = get_quote(conn, Venue::Poly, &pair.poly.venue_market_id, outcome)?;
    let kalshi_quote = get_quote(conn, Venue::Kalshi, &pair.kalshi.venue_market_id, outcome)?;
    let (Some(poly_quote), Some(kalshi_quote)) = (poly_quote, kalshi_quote) else {
        return Ok(None);
    };

    let poly_to_kalshi = compute_edge(&poly_quote, &kalshi_quote, Venue::Poly, Venue::Kalshi, params);
    let kalshi_to_poly = compute_edge(&kalshi_quote, &poly_quote, Venue::Kalshi, Venue::Poly, params);

    // Ties favour buying on POLY.
    let (buy_venue, sell_venue, buy_market_id, sell_market_id, buy_quote, sell_quote, edge) =
        if poly_to_kalshi.edge_after_costs >= kalshi_to_poly.edge_after_costs {
            (
                Venue::Poly,
                Venue::Kalshi,
                pair.poly.venue_market_id.clone(),
                pair.kalshi.venue_market_id.clone(),
                poly_quote,
                kalshi_quote,
                poly_to_kalshi,
            )
        } else {
            (
                Venue::Kalshi,
                Venue::Poly,
                pair.kalshi.venue_market_id.clone(),
                pair.poly.venue_market_id.clone(),
                kalshi_quote,
                poly_quote,
                kalshi_to_poly,
            )
        };

    let size = suggested_size(
        &buy_quote,
        &sell_quote,
        params.max_notional_per_event,
        params.depth_multiplier,
    );
    if size <= 0.0 {
        return Ok(None);
    }
    if buy_quote.ask_size < size * params.depth_multiplier {
        return Ok(None);
    }
    if sell_quote.bid_size < size * params.depth_multiplier {
        return Ok(None);
    }
    if edge.edge_after_costs < params.min_edge {
        return Ok(None);
    }

    let confidence =
        (pair.poly.confidence.min(pair.kalshi.confidence) * 10_000.0).round() / 10_000.0;

    Ok(Some(MispricingSignal {
        id: Uuid::new_v4().to_string(),
        canonical_event_id: pair.event.id.clone(),
        outcome: outcome.to_string(),
        buy_venue,
        sell_venue,
        buy_market_id,
        sell_market_id,
        buy_price: buy_quote.ask,
        sell_price: sell_quote.bid,
        size_suggested: size,
        edge_raw: edge.edge_raw,
        edge_after_costs: edge.edge_after_costs,
        confidence,
        status: "OPEN".to_string(),
        created_at: Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::{DateTime, Duration};

    fn insert_event(conn: &Connection, id: &str, start: DateTime<Utc>) {
        db::upsert_event(
            conn,
            &CanonicalEvent {
                id: id.to_string(),
                sport: crate::db::models::Sport::Nba,
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

    fn insert_binding(
        conn: &Connection,
        event_id: &str,
        venue: Venue,
        market_id: &str,
        status: BindingStatus,
        confidence: f64,
    ) {
        db::upsert_binding(
            conn,
            &MarketBinding {
                id: Uuid::new_v4().to_string(),
                canonical_event_id: event_id.to_string(),
                venue,
                venue_market_id: market_id.to_string(),
                outcome_schema: "YES_NO".to_string(),
                market_type: MarketType::WinnerBinary,
                status,
                confidence,
                evidence_json: "{}".to_string(),
                updated_at: Utc::now(),
            },
        )
        .unwrap();
    }

    fn frictionless() -> EngineParams {
        EngineParams {
            min_edge: 0.001,
            slippage_k: 0.0,
            fee_poly_bps: 0.0,
            fee_kalshi_bps: 0.0,
            ..EngineParams::default()
        }
    }

    #[test]
    fn test_only_tradeable_binding_pairs_produce_signals() {
        let database = Database::open_in_memory().unwrap();
        database
            .with_conn(|conn| {
                let start = Utc::now() + Duration::hours(4);

                insert_event(conn, "evt-auto", start);
                insert_binding(conn, "evt-auto", Venue::Poly, "poly-a", BindingStatus::Auto, 0.95);
                insert_binding(conn, "evt-auto", Venue::Kalshi, "kalshi-a", BindingStatus::Override, 1.0);

                insert_event(conn, "evt-review", start);
                insert_binding(conn, "evt-review", Venue::Poly, "poly-r", BindingStatus::Review, 0.83);
                insert_binding(conn, "evt-review", Venue::Kalshi, "kalshi-r", BindingStatus::Auto, 0.91);

                db::upsert_top(conn, Venue::Poly, "poly-a", "YES", 0.40, 0.41, 300.0, 250.0)?;
                db::upsert_top(conn, Venue::Kalshi, "kalshi-a", "YES", 0.49, 0.50, 300.0, 250.0)?;
                db::upsert_top(conn, Venue::Poly, "poly-r", "YES", 0.35, 0.36, 300.0, 250.0)?;
                db::upsert_top(conn, Venue::Kalshi, "kalshi-r", "YES", 0.47, 0.48, 300.0, 250.0)?;

                let created = refresh_signals(conn, &frictionless())?;
                assert!(!created.is_empty());
                assert!(created.iter().all(|s| s.canonical_event_id == "evt-auto"));

                let stored = db::list_open_signals(conn, 0.0, 100, false)?;
                assert!(stored.iter().all(|s| s.canonical_event_id == "evt-auto"));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_signal_confidence_is_min_of_bindings() {
        let database = Database::open_in_memory().unwrap();
        database
            .with_conn(|conn| {
                let start = Utc::now() + Duration::hours(4);
                insert_event(conn, "evt-1", start);
                insert_binding(conn, "evt-1", Venue::Poly, "poly-1", BindingStatus::Auto, 0.92);
                insert_binding(conn, "evt-1", Venue::Kalshi, "kalshi-1", BindingStatus::Auto, 0.88);

                db::upsert_top(conn, Venue::Poly, "poly-1", "YES", 0.40, 0.41, 300.0, 250.0)?;
                db::upsert_top(conn, Venue::Kalshi, "kalshi-1", "YES", 0.49, 0.50, 300.0, 250.0)?;

                let created = refresh_signals(conn, &frictionless())?;
                assert!(!created.is_empty());
                assert!(created.iter().all(|s| (s.confidence - 0.88).abs() < 1e-9));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_events_starting_too_soon_are_skipped() {
        let database = Database::open_in_memory().unwrap();
        database
            .with_conn(|conn| {
                // Starts in 60s, inside the 300s pre-start cutoff.
                insert_event(conn, "evt-soon", Utc::now() + Duration::seconds(60));
                insert_binding(conn, "evt-soon", Venue::Poly, "poly-s", BindingStatus::Auto, 0.95);
                insert_binding(conn, "evt-soon", Venue::Kalshi, "kalshi-s", BindingStatus::Auto, 0.95);

                db::upsert_top(conn, Venue::Poly, "poly-s", "YES", 0.40, 0.41, 300.0, 250.0)?;
                db::upsert_top(conn, Venue::Kalshi, "kalshi-s", "YES", 0.49, 0.50, 300.0, 250.0)?;

                let created = refresh_signals(conn, &frictionless())?;
                assert!(created.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_no_quote_is_derived_from_yes_side() {
        let database = Database::open_in_memory().unwrap();
        database
            .with_conn(|conn| {
                let start = Utc::now() + Duration::hours(4);
                insert_event(conn, "evt-1", start);
                insert_binding(conn, "evt-1", Venue::Poly, "poly-1", BindingStatus::Auto, 0.95);
                insert_binding(conn, "evt-1", Venue::Kalshi, "kalshi-1", BindingStatus::Auto, 0.95);

                // Only YES rows exist; the NO evaluation must derive its quotes.
                db::upsert_top(conn, Venue::Poly, "poly-1", "YES", 0.55, 0.56, 300.0, 250.0)?;
                db::upsert_top(conn, Venue::Kalshi, "kalshi-1", "YES", 0.47, 0.48, 300.0, 250.0)?;

                let created = refresh_signals(conn, &frictionless())?;
                let no_signal = created.iter().find(|s| s.outcome == "NO");
                assert!(no_signal.is_some(), "expected a NO-outcome signal");
                // Buying NO on POLY costs 1 - yes_bid = 0.44; selling NO on
                // KALSHI earns 1 - yes_ask = 0.52.
                let signal = no_signal.unwrap();
                assert_eq!(signal.buy_venue, Venue::Poly);
                assert!((signal.buy_price - 0.45).abs() < 1e-9);
                assert!((signal.sell_price - 0.52).abs() < 1e-9);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_second_refresh_is_idempotent() {
        let database = Database::open_in_memory().unwrap();
        database
            .with_conn(|conn| {
                let start = Utc::now() + Duration::hours(4);
                insert_event(conn, "evt-1", start);
                insert_binding(conn, "evt-1", Venue::Poly, "poly-1", BindingStatus::Auto, 0.95);
                insert_binding(conn, "evt-1", Venue::Kalshi, "kalshi-1", BindingStatus::Auto, 0.95);
                db::upsert_top(conn, Venue::Poly, "poly-1", "YES", 0.40, 0.41, 300.0, 250.0)?;
                db::upsert_top(conn, Venue::Kalshi, "kalshi-1", "YES", 0.49, 0.50, 300.0, 250.0)?;

                refresh_signals(conn, &frictionless())?;
                let first = db::list_open_signals(conn, 0.0, 100, false)?;
                refresh_signals(conn, &frictionless())?;
                let second = db::list_open_signals(conn, 0.0, 100, false)?;

                assert_eq!(first.len(), second.len());
                for (a, b) in first.iter().zip(second.iter()) {
                    assert_eq!(a.id, b.id);
                    assert_eq!(a.buy_market_id, b.buy_market_id);
                    assert!((a.edge_after_costs - b.edge_after_costs).abs() < 1e-9);
                }
                Ok(())
            })
            .unwrap();
    }
}
