use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sport classification derived from titles, categories and tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sport {
    #[serde(rename = "NBA")]
    Nba,
    #[serde(rename = "SOCCER")]
    Soccer,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Sport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Nba => "NBA",
            Sport::Soccer => "SOCCER",
            Sport::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NBA" => Ok(Sport::Nba),
            "SOCCER" => Ok(Sport::Soccer),
            "UNKNOWN" => Ok(Sport::Unknown),
            other => Err(format!("unknown sport: {other}")),
        }
    }
}

/// Trading venue. POLY is the order-book probability market, KALSHI the
/// event-ticker binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    #[serde(rename = "POLY")]
    Poly,
    #[serde(rename = "KALSHI")]
    Kalshi,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Poly => "POLY",
            Venue::Kalshi => "KALSHI",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POLY" => Ok(Venue::Poly),
            "KALSHI" => Ok(Venue::Kalshi),
            other => Err(format!("unknown venue: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketType {
    #[serde(rename = "WINNER_BINARY")]
    WinnerBinary,
    #[serde(rename = "WINNER_3WAY")]
    Winner3Way,
    #[serde(rename = "OTHER")]
    Other,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::WinnerBinary => "WINNER_BINARY",
            MarketType::Winner3Way => "WINNER_3WAY",
            MarketType::Other => "OTHER",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WINNER_BINARY" => Ok(MarketType::WinnerBinary),
            "WINNER_3WAY" => Ok(MarketType::Winner3Way),
            "OTHER" => Ok(MarketType::Other),
            other => Err(format!("unknown market type: {other}")),
        }
    }
}

/// Confidence gate on a cross-venue pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingStatus {
    #[serde(rename = "AUTO")]
    Auto,
    #[serde(rename = "REVIEW")]
    Review,
    #[serde(rename = "OVERRIDE")]
    Override,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl BindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingStatus::Auto => "AUTO",
            BindingStatus::Review => "REVIEW",
            BindingStatus::Override => "OVERRIDE",
            BindingStatus::Rejected => "REJECTED",
        }
    }

    /// Only AUTO and OVERRIDE bindings may feed signal generation.
    pub fn is_tradeable(&self) -> bool {
        matches!(self, BindingStatus::Auto | BindingStatus::Override)
    }
}

impl fmt::Display for BindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTO" => Ok(BindingStatus::Auto),
            "REVIEW" => Ok(BindingStatus::Review),
            "OVERRIDE" => Ok(BindingStatus::Override),
            "REJECTED" => Ok(BindingStatus::Rejected),
            other => Err(format!("unknown binding status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSED" => Ok(PositionStatus::Closed),
            other => Err(format!("unknown position status: {other}")),
        }
    }
}

/// A normalized market listing from one venue, as produced by the
/// connector pipeline. Transient: never persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueMarket {
    pub venue: Venue,
    pub venue_market_id: String,
    pub title: String,
    pub sport: Sport,
    pub competition: Option<String>,
    pub start_time_utc: Option<DateTime<Utc>>,
    /// Canonicalized team names parsed from the title.
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub market_type: MarketType,
    /// Ordered outcome labels as listed by the vendor.
    pub outcomes: Vec<String>,
    /// Vendor payload attribute bag; keys vary per venue.
    pub raw: BTreeMap<String, serde_json::Value>,
}

/// A single real-world game, identified deterministically by
/// (sport, competition, start, home, away) regardless of venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: String,
    pub sport: Sport,
    pub competition: Option<String>,
    pub start_time_utc: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    pub title_canonical: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted link between a canonical event and one venue's market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketBinding {
    pub id: String,
    pub canonical_event_id: String,
    pub venue: Venue,
    pub venue_market_id: String,
    pub outcome_schema: String,
    pub market_type: MarketType,
    pub status: BindingStatus,
    pub confidence: f64,
    /// Serialized match scores and override details.
    pub evidence_json: String,
    pub updated_at: DateTime<Utc>,
}

/// Best bid/ask with displayed sizes for one (venue, market, outcome).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookTop {
    pub venue: Venue,
    pub venue_market_id: String,
    pub outcome: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MispricingSignal {
    pub id: String,
    pub canonical_event_id: String,
    pub outcome: String,
    pub buy_venue: Venue,
    pub sell_venue: Venue,
    pub buy_market_id: String,
    pub sell_market_id: String,
    /// Ask on the buy side at signal time (probability, 0.0-1.0).
    pub buy_price: f64,
    /// Bid on the sell side at signal time.
    pub sell_price: f64,
    pub size_suggested: f64,
    pub edge_raw: f64,
    pub edge_after_costs: f64,
    /// min of the two binding confidences, rounded to 4 decimals.
    pub confidence: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// A simulated hedged pair opened from a signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPosition {
    pub id: String,
    pub canonical_event_id: String,
    pub signal_id: String,
    pub outcome: String,
    pub buy_venue: Venue,
    pub sell_venue: Venue,
    pub buy_market_id: String,
    pub sell_market_id: String,
    pub size: f64,
    pub entry_buy_price: f64,
    pub entry_sell_price: f64,
    /// filled / requested, in (0.0, 1.0].
    pub fill_ratio: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperFill {
    pub id: String,
    pub position_id: String,
    /// "BUY" or "SELL".
    pub leg: String,
    pub limit_price: f64,
    pub fill_price: f64,
    pub requested_size: f64,
    pub filled_size: f64,
    /// Fill probability used by the stochastic model for this leg.
    pub probability: f64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub ts: DateTime<Utc>,
    pub equity: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}
