pub mod pricing;
pub mod signaler;

use crate::db::models::Venue;

/// Knobs shared by edge computation, sizing and signal gating. Lifted out of
/// the full runtime config so the engine stays testable in isolation.
#[derive(Debug, Clone)]
pub struct EngineParams {
    pub min_edge: f64,
    pub slippage_k: f64,
    pub max_notional_per_event: f64,
    pub depth_multiplier: f64,
    pub min_seconds_to_start: i64,
    pub fee_poly_bps: f64,
    pub fee_kalshi_bps: f64,
}

impl Default for EngineParams {
    fn default() -> Self {
        EngineParams {
            min_edge: 0.008,
            slippage_k: 0.20,
            max_notional_per_event: 250.0,
            depth_multiplier: 1.5,
            min_seconds_to_start: 300,
            fee_poly_bps: 40.0,
            fee_kalshi_bps: 35.0,
        }
    }
}

impl EngineParams {
    pub fn venue_fee_rate(&self, venue: Venue) -> f64 {
        match venue {
            Venue::Poly => self.fee_poly_bps / 10_000.0,
            Venue::Kalshi => self.fee_kalshi_bps / 10_000.0,
        }
    }

    pub fn total_fee_rate(&self, buy_venue: Venue, sell_venue: Venue) -> f64 {
        self.venue_fee_rate(buy_venue) + self.venue_fee_rate(sell_venue)
    }
}
