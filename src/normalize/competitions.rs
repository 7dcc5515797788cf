//! Supported soccer competitions and the keyword table used when a listing
//! carries no usable league hint.

/// Keyword -> competition code. Checked with whole-word matching against the
/// joined title/tag text, in order.
pub const SOCCER_COMPETITION_KEYWORDS: &[(&str, &str)] = &[
    ("epl", "EPL"),
    ("premier league", "EPL"),
    ("english premier league", "EPL"),
    ("ucl", "UCL"),
    ("champions league", "UCL"),
    ("uefa champions league", "UCL"),
    ("uel", "UEL"),
    ("europa league", "UEL"),
    ("uefa europa league", "UEL"),
    ("laliga", "LALIGA"),
    ("la liga", "LALIGA"),
    ("primera division", "LALIGA"),
    ("mls", "MLS"),
];

/// Competitions we actually trade. Keywords may resolve to others (e.g. MLS)
/// which then fail this check and drop the market.
pub const SUPPORTED_SOCCER_COMPETITIONS: &[&str] = &["EPL", "UCL", "UEL", "LALIGA"];

pub fn is_supported_soccer_competition(competition: &str) -> bool {
    SUPPORTED_SOCCER_COMPETITIONS.contains(&competition)
}
