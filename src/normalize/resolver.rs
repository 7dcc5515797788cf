//! Cross-venue market pairing.
//!
//! For every POLY market in scope, scores every KALSHI candidate on team,
//! time and title similarity, keeps the best one and decides a binding
//! status. Manual overrides short-circuit the decision.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::db::models::{BindingStatus, MarketType, Sport, VenueMarket};
use crate::normalize::canonical::deterministic_event_id;
use crate::normalize::competitions::is_supported_soccer_competition;
use crate::normalize::fuzzy::token_set_similarity;

/// One matched POLY/KALSHI pair with its canonical event fields.
#[derive(Debug, Clone)]
pub struct ResolvedPair {
    pub event_id: String,
    pub sport: Sport,
    pub competition: Option<String>,
    pub start_time_utc: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    pub title_canonical: String,
    pub poly: VenueMarket,
    pub kalshi: VenueMarket,
    pub status: BindingStatus,
    pub confidence: f64,
    pub evidence_json: String,
}

/// Operator-supplied pair decision, keyed by (poly_market_id, kalshi_market_id).
#[derive(Debug, Clone)]
pub struct PairOverride {
    pub status: BindingStatus,
    pub confidence: f64,
    pub notes: String,
}

pub type Overrides = HashMap<(String, String), PairOverride>;

#[derive(Debug, Deserialize)]
struct OverrideFile {
    #[serde(default)]
    overrides: Vec<OverrideRow>,
}

#[derive(Debug, Deserialize)]
struct OverrideRow {
    #[serde(alias = "poly")]
    poly_market_id: Option<String>,
    #[serde(alias = "kalshi")]
    kalshi_market_id: Option<String>,
    status: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    notes: String,
}

/// Load the override file. A missing file is an empty set, not an error.
pub fn load_overrides(path: &Path) -> Result<Overrides> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read overrides file {}", path.display()))?;
    let parsed: OverrideFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse overrides file {}", path.display()))?;

    let mut overrides = HashMap::new();
    for row in parsed.overrides {
        let poly = row.poly_market_id.unwrap_or_default().trim().to_string();
        let kalshi = row.kalshi_market_id.unwrap_or_default().trim().to_string();
        if poly.is_empty() || kalshi.is_empty() {
            continue;
        }

        let status = match row.status.as_deref() {
            Some(text) => BindingStatus::from_str(text).unwrap_or_else(|err| {
                warn!("override for ({poly}, {kalshi}) has {err}; using OVERRIDE");
                BindingStatus::Override
            }),
            None => BindingStatus::Override,
        };

        overrides.insert(
            (poly, kalshi),
            PairOverride {
                status,
                confidence: row.confidence.unwrap_or(1.0),
                notes: row.notes,
            },
        );
    }
    Ok(overrides)
}

fn team_similarity(poly: &VenueMarket, kalshi: &VenueMarket) -> (f64, bool) {
    let (Some(ph), Some(pa), Some(kh), Some(ka)) = (
        poly.home_team.as_deref(),
        poly.away_team.as_deref(),
        kalshi.home_team.as_deref(),
        kalshi.away_team.as_deref(),
    ) else {
        return (0.0, false);
    };

    let aligned = 0.5 * (token_set_similarity(ph, kh) + token_set_similarity(pa, ka));
    let flipped = 0.5 * (token_set_similarity(ph, ka) + token_set_similarity(pa, kh));

    let is_flipped = flipped > aligned + 0.05;
    (aligned.max(flipped), is_flipped)
}

fn matching_window_hours(sport: Sport) -> f64 {
    if sport == Sport::Nba {
        6.0
    } else {
        12.0
    }
}

fn start_delta_hours(poly: &VenueMarket, kalshi: &VenueMarket) -> Option<f64> {
    let (Some(a), Some(b)) = (poly.start_time_utc, kalshi.start_time_utc) else {
        return None;
    };
    Some((a - b).num_seconds().abs() as f64 / 3600.0)
}

fn time_score(poly: &VenueMarket, kalshi: &VenueMarket) -> f64 {
    match start_delta_hours(poly, kalshi) {
        Some(delta) => (1.0 - delta / matching_window_hours(poly.sport)).max(0.0),
        None => 0.0,
    }
}

/// Null starts pass the window; the missing time forces REVIEW later.
fn within_time_window(poly: &VenueMarket, kalshi: &VenueMarket) -> bool {
    match start_delta_hours(poly, kalshi) {
        Some(delta) => delta <= matching_window_hours(poly.sport),
        None => true,
    }
}

fn is_supported_competition(market: &VenueMarket) -> bool {
    match market.sport {
        Sport::Nba => market.competition.as_deref() == Some("NBA"),
        Sport::Soccer => market
            .competition
            .as_deref()
            .is_some_and(is_supported_soccer_competition),
        Sport::Unknown => false,
    }
}

fn decide_status(
    score: f64,
    poly: &VenueMarket,
    kalshi: &VenueMarket,
    orientation_flipped: bool,
    override_row: Option<&PairOverride>,
) -> BindingStatus {
    if let Some(row) = override_row {
        return row.status;
    }

    if poly.market_type != MarketType::WinnerBinary || kalshi.market_type != MarketType::WinnerBinary {
        return BindingStatus::Review;
    }
    if orientation_flipped {
        return BindingStatus::Review;
    }
    if poly.start_time_utc.is_none() || kalshi.start_time_utc.is_none() {
        return BindingStatus::Review;
    }

    if score >= 0.86 {
        BindingStatus::Auto
    } else if score >= 0.80 {
        BindingStatus::Review
    } else {
        BindingStatus::Rejected
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Pair every in-scope POLY market with its best KALSHI counterpart.
pub fn resolve_markets(
    poly_markets: &[VenueMarket],
    kalshi_markets: &[VenueMarket],
    overrides: &Overrides,
) -> Vec<ResolvedPair> {
    let now = Utc::now();
    let mut pairs = Vec::new();

    for poly in poly_markets {
        if poly.sport == Sport::Unknown || !is_supported_competition(poly) {
            continue;
        }

        struct Candidate<'a> {
            total: f64,
            kalshi: &'a VenueMarket,
            orientation_flipped: bool,
            team: f64,
            time: f64,
            title: f64,
        }

        let mut best: Option<Candidate> = None;
        for kalshi in kalshi_markets {
            if kalshi.sport != poly.sport || !is_supported_competition(kalshi) {
                continue;
            }
            if poly.sport == Sport::Soccer && poly.competition != kalshi.competition {
                continue;
            }
            if !within_time_window(poly, kalshi) {
                continue;
            }

            let (team, orientation_flipped) = team_similarity(poly, kalshi);
            let time = time_score(poly, kalshi);
            let title = token_set_similarity(&poly.title, &kalshi.title);
            let total = 0.5 * team + 0.3 * time + 0.2 * title;

            if best.as_ref().map_or(true, |b| total > b.total) {
                best = Some(Candidate {
                    total,
                    kalshi,
                    orientation_flipped,
                    team,
                    time,
                    title,
                });
            }
        }

        let Some(candidate) = best else {
            continue;
        };
        let kalshi = candidate.kalshi;

        let start_time = match (poly.start_time_utc, kalshi.start_time_utc) {
            (Some(a), Some(b)) => a.min(b),
            (a, b) => a.or(b).unwrap_or(now),
        };

        let home_team = poly
            .home_team
            .clone()
            .or_else(|| kalshi.home_team.clone())
            .unwrap_or_else(|| "unknown-home".to_string());
        let away_team = poly
            .away_team
            .clone()
            .or_else(|| kalshi.away_team.clone())
            .unwrap_or_else(|| "unknown-away".to_string());

        let event_id = deterministic_event_id(
            poly.sport,
            poly.competition.as_deref(),
            start_time,
            &home_team,
            &away_team,
        );

        let override_row = overrides.get(&(
            poly.venue_market_id.clone(),
            kalshi.venue_market_id.clone(),
        ));
        let status = decide_status(
            candidate.total,
            poly,
            kalshi,
            candidate.orientation_flipped,
            override_row,
        );
        let confidence = override_row
            .map(|row| row.confidence)
            .unwrap_or(candidate.total);

        let three_way = poly.market_type == MarketType::Winner3Way
            || kalshi.market_type == MarketType::Winner3Way;
        let evidence = serde_json::json!({
            "poly_title": poly.title,
            "kalshi_title": kalshi.title,
            "poly_start": poly.start_time_utc.map(|t| t.to_rfc3339()),
            "kalshi_start": kalshi.start_time_utc.map(|t| t.to_rfc3339()),
            "score": round4(candidate.total),
            "score_parts": {
                "team": round4(candidate.team),
                "time": round4(candidate.time),
                "title": round4(candidate.title),
            },
            "orientation_flipped": candidate.orientation_flipped,
            "override": override_row.map(|row| serde_json::json!({
                "status": row.status.as_str(),
                "confidence": row.confidence,
                "notes": row.notes,
            })),
            "unsupported_reason": if three_way {
                Some("WINNER_3WAY currently unsupported")
            } else {
                None
            },
        });

        pairs.push(ResolvedPair {
            event_id,
            sport: poly.sport,
            competition: poly.competition.clone(),
            start_time_utc: start_time,
            home_team: home_team.clone(),
            away_team: away_team.clone(),
            title_canonical: format!("{home_team} vs {away_team}"),
            poly: poly.clone(),
            kalshi: kalshi.clone(),
            status,
            confidence: round4(confidence),
            evidence_json: evidence.to_string(),
        });
    }

    pairs
}
