//! After-cost edge computation and depth-aware sizing.

use crate::db::models::Venue;
use crate::engine::EngineParams;

/// One price tick; slippage is never estimated below this.
pub const TICK_SIZE: f64 = 0.01;

/// Top-of-book quote for one outcome on one venue.
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct EdgeBreakdown {
    pub edge_raw: f64,
    pub edge_after_costs: f64,
    pub fee_component: f64,
    pub slippage_component: f64,
}

/// Edge of buying at `buy_quote.ask` and selling at `sell_quote.bid`, net of
/// venue fees and a spread-scaled slippage estimate.
pub fn compute_edge(
    buy_quote: &Quote,
    sell_quote: &Quote,
    buy_venue: Venue,
    sell_venue: Venue,
    params: &EngineParams,
) -> EdgeBreakdown {
    let edge_raw = sell_quote.bid - buy_quote.ask;
    let spread = (buy_quote.ask - buy_quote.bid)
        .max(sell_quote.ask - sell_quote.bid)
        .max(0.0);
    let slippage = (spread * params.slippage_k).max(TICK_SIZE);
    let fees = (buy_quote.ask + sell_quote.bid) * params.total_fee_rate(buy_venue, sell_venue);

    EdgeBreakdown {
        edge_raw,
        edge_after_costs: edge_raw - fees - slippage,
        fee_component: fees,
        slippage_component: slippage,
    }
}

/// Size against visible depth and the per-event notional cap. Floors to
/// 4 decimals so strict depth checks cannot be overrun by rounding.
pub fn suggested_size(
    buy_quote: &Quote,
    sell_quote: &Quote,
    max_notional_per_event: f64,
    depth_multiplier: f64,
) -> f64 {
    let visible_depth = buy_quote.ask_size.min(sell_quote.bid_size);
    if visible_depth <= 0.0 {
        return 0.0;
    }

    let by_depth = visible_depth / depth_multiplier.max(1.0);
    let best_price = buy_quote.ask.max(0.01);
    let by_notional = max_notional_per_event / best_price;
    let raw_size = by_depth.min(by_notional).max(0.0);

    (raw_size * 10_000.0).floor() / 10_000.0
}
