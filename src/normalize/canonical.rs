//! Title, team, time and sport normalization plus the deterministic
//! canonical event id.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::db::models::{MarketType, Sport, Venue, VenueMarket};
use crate::normalize::competitions::{
    is_supported_soccer_competition, SOCCER_COMPETITION_KEYWORDS,
};
use crate::normalize::teams::{aliases_for_sport, STOPWORDS};

/// Inputs for building a normalized venue market from one vendor listing.
#[derive(Debug, Clone, Default)]
pub struct MarketDraft {
    pub venue_market_id: String,
    pub title: String,
    pub outcomes: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub sport_hint: Option<Sport>,
    pub competition_hint: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub raw: BTreeMap<String, serde_json::Value>,
}

/// Normalize a market listing: detect sport and competition, parse and
/// canonicalize teams, classify the market type.
pub fn build_market(venue: Venue, draft: MarketDraft) -> VenueMarket {
    let sport = draft.sport_hint.unwrap_or_else(|| {
        detect_sport(&draft.title, draft.category.as_deref(), &draft.tags)
    });
    let competition = detect_competition(
        sport,
        &draft.title,
        &draft.tags,
        draft.competition_hint.as_deref(),
    );

    let (raw_home, raw_away) = parse_teams_from_title(&draft.title);
    let home_team = canonicalize_team(sport, raw_home.as_deref());
    let away_team = canonicalize_team(sport, raw_away.as_deref());

    let market_type = detect_market_type(&draft.outcomes);

    VenueMarket {
        venue,
        venue_market_id: draft.venue_market_id,
        title: draft.title,
        sport,
        competition,
        start_time_utc: draft.start_time,
        home_team,
        away_team,
        market_type,
        outcomes: draft.outcomes,
        raw: draft.raw,
    }
}

// ── Text helpers ─────────────────────────────────────────────────────────────

/// Lowercase, strip punctuation, drop filler tokens.
pub fn normalize_text(value: &str) -> String {
    value
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty() && !STOPWORDS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-word containment: `needle` must be delimited by string edges or
/// whitespace inside `haystack` ("den" must not match inside "golden").
fn contains_word(haystack: &str, needle: &str) -> bool {
    let padded_haystack = format!(" {haystack} ");
    let padded_needle = format!(" {needle} ");
    padded_haystack.contains(&padded_needle)
}

/// Map a raw team string to its canonical per-sport name. Exact alias match
/// first, then longest-first whole-word alias containment, else the
/// normalized input unchanged.
pub fn canonicalize_team(sport: Sport, raw_team: Option<&str>) -> Option<String> {
    let raw_team = raw_team?;
    if raw_team.trim().is_empty() {
        return None;
    }

    let normalized = normalize_text(raw_team);
    if normalized.is_empty() {
        return None;
    }

    let aliases = aliases_for_sport(sport);
    if let Some((_, canonical)) = aliases.iter().find(|(alias, _)| *alias == normalized) {
        return Some((*canonical).to_string());
    }

    let mut by_length: Vec<&(&str, &str)> = aliases.iter().collect();
    by_length.sort_by_key(|(alias, _)| std::cmp::Reverse(alias.len()));
    for (alias, canonical) in by_length {
        if contains_word(&normalized, alias) {
            return Some((*canonical).to_string());
        }
    }

    Some(normalized)
}

const TEAM_SEPARATORS: &[&str] = &["vs", "vs.", "v", "@", "at"];

/// Split a market title into (home, away). Tries "X vs|v|@|at Y" on the
/// first separator token, then "X - Y".
pub fn parse_teams_from_title(title: &str) -> (Option<String>, Option<String>) {
    let words: Vec<&str> = title.split_whitespace().collect();
    if words.len() >= 3 {
        for (index, word) in words.iter().enumerate() {
            if index == 0 || index == words.len() - 1 {
                continue;
            }
            let lowered = word.to_lowercase();
            if TEAM_SEPARATORS.contains(&lowered.as_str()) {
                let home = strip_capture(&words[..index].join(" "));
                let away = strip_capture(&words[index + 1..].join(" "));
                if !home.is_empty() && !away.is_empty() {
                    return (Some(home), Some(away));
                }
            }
        }
        for (index, word) in words.iter().enumerate() {
            if *word == "-" && index > 0 && index < words.len() - 1 {
                let home = strip_capture(&words[..index].join(" "));
                let away = strip_capture(&words[index + 1..].join(" "));
                if !home.is_empty() && !away.is_empty() {
                    return (Some(home), Some(away));
                }
            }
        }
    }
    (None, None)
}

fn strip_capture(value: &str) -> String {
    value
        .trim_matches(|c: char| c == ' ' || c == '-' || c == ':' || c == '|')
        .to_string()
}

// ── Sport & competition detection ────────────────────────────────────────────

fn text_chunks(title: &str, category: Option<&str>, tags: &[String]) -> Vec<String> {
    let mut chunks = vec![title.to_lowercase()];
    if let Some(category) = category {
        if !category.is_empty() {
            chunks.push(category.to_lowercase());
        }
    }
    chunks.extend(tags.iter().filter(|t| !t.is_empty()).map(|t| t.to_lowercase()));
    chunks
}

fn token_set(chunks: &[String]) -> Vec<String> {
    let mut tokens: Vec<String> = chunks
        .iter()
        .flat_map(|chunk| {
            chunk
                .split(|c: char| !c.is_ascii_alphanumeric())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        })
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

const SOCCER_TOKENS: &[&str] = &["soccer", "football", "epl", "ucl", "uel", "laliga", "mls"];
const SOCCER_PREFIXES: &[&str] = &["epl-", "ucl-", "uel-", "lal-", "laliga-"];
const SOCCER_PHRASES: &[&str] = &[
    "premier league",
    "champions league",
    "europa league",
    "la liga",
];

/// Classify a listing's sport from its title, category and tags.
pub fn detect_sport(title: &str, category: Option<&str>, tags: &[String]) -> Sport {
    let chunks = text_chunks(title, category, tags);
    let joined = chunks.join(" ");
    let tokens = token_set(&chunks);

    if tokens.iter().any(|t| t == "nba" || t == "basketball")
        || chunks.iter().any(|chunk| chunk.starts_with("nba-"))
    {
        return Sport::Nba;
    }

    if tokens.iter().any(|t| SOCCER_TOKENS.contains(&t.as_str()))
        || SOCCER_PHRASES.iter().any(|phrase| joined.contains(phrase))
        || chunks
            .iter()
            .any(|chunk| SOCCER_PREFIXES.iter().any(|prefix| chunk.starts_with(prefix)))
    {
        return Sport::Soccer;
    }

    Sport::Unknown
}

/// Resolve the competition code. An explicit hint wins when it names a
/// supported competition; otherwise token and phrase rules apply, with the
/// keyword table as a last resort. Unsupported competitions return None.
pub fn detect_competition(
    sport: Sport,
    title: &str,
    tags: &[String],
    explicit: Option<&str>,
) -> Option<String> {
    if let Some(explicit) = explicit {
        let normalized = explicit.trim().to_uppercase();
        if normalized == "NBA" {
            return Some("NBA".to_string());
        }
        if is_supported_soccer_competition(&normalized) {
            return Some(normalized);
        }
    }

    match sport {
        Sport::Nba => return Some("NBA".to_string()),
        Sport::Soccer => {}
        Sport::Unknown => return None,
    }

    let chunks = text_chunks(title, None, tags);
    let joined = chunks.join(" ");
    let tokens = token_set(&chunks);
    let has_token = |token: &str| tokens.iter().any(|t| t == token);

    if has_token("epl") || joined.contains("premier league") {
        return Some("EPL".to_string());
    }
    if has_token("ucl") || joined.contains("champions league") {
        return Some("UCL".to_string());
    }
    if has_token("uel") || joined.contains("europa league") {
        return Some("UEL".to_string());
    }
    if has_token("laliga")
        || joined.contains("la liga")
        || chunks.iter().any(|chunk| chunk.starts_with("lal-"))
    {
        return Some("LALIGA".to_string());
    }

    for (keyword, competition) in SOCCER_COMPETITION_KEYWORDS {
        if contains_word(&joined, keyword) {
            if is_supported_soccer_competition(competition) {
                return Some((*competition).to_string());
            }
            return None;
        }
    }
    None
}

/// {yes, no} two-element -> WINNER_BINARY; three outcomes -> WINNER_3WAY.
pub fn detect_market_type(outcomes: &[String]) -> MarketType {
    let lowered: Vec<String> = outcomes.iter().map(|o| o.to_lowercase()).collect();
    if outcomes.len() == 2
        && lowered.iter().any(|o| o == "yes")
        && lowered.iter().any(|o| o == "no")
    {
        return MarketType::WinnerBinary;
    }
    if outcomes.len() == 3 {
        return MarketType::Winner3Way;
    }
    MarketType::Other
}

// ── Time parsing ─────────────────────────────────────────────────────────────

/// Permissive timestamp parsing: RFC 3339, a handful of ISO-ish layouts,
/// bare dates. Naive values are tagged UTC rather than rejected.
pub fn parse_time_str(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }

    None
}

/// Accepts JSON numbers (epoch seconds) and strings.
pub fn parse_time_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => {
            let secs = n.as_f64()?;
            Utc.timestamp_opt(secs as i64, 0).single()
        }
        serde_json::Value::String(s) => parse_time_str(s),
        _ => None,
    }
}

// ── Deterministic event id ───────────────────────────────────────────────────

/// SHA-1 over `sport|competition|start|home|away` (lowercased), then UUIDv5
/// of the hex digest in the DNS namespace. Stable across runs for identical
/// inputs.
pub fn deterministic_event_id(
    sport: Sport,
    competition: Option<&str>,
    start_time_utc: DateTime<Utc>,
    home_team: &str,
    away_team: &str,
) -> String {
    let payload = format!(
        "{}|{}|{}|{}|{}",
        sport,
        competition.unwrap_or(""),
        start_time_utc.to_rfc3339_opts(SecondsFormat::Secs, false),
        home_team,
        away_team
    )
    .to_lowercase();

    let mut hasher = Sha1::new();
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();
    let hex_digest: String = digest.iter().map(|b| format!("{b:02x}")).collect();

    Uuid::new_v5(&Uuid::NAMESPACE_DNS, hex_digest.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn yes_no() -> Vec<String> {
        vec!["YES".to_string(), "NO".to_string()]
    }

    #[test]
    fn test_market_type_binary_iff_yes_no() {
        assert_eq!(detect_market_type(&yes_no()), MarketType::WinnerBinary);
        assert_eq!(
            detect_market_type(&vec!["Yes".to_string(), "No".to_string()]),
            MarketType::WinnerBinary
        );
        assert_eq!(
            detect_market_type(&vec!["Over".to_string(), "Under".to_string()]),
            MarketType::Other
        );
        assert_eq!(
            detect_market_type(&vec![
                "HOME".to_string(),
                "DRAW".to_string(),
                "AWAY".to_string()
            ]),
            MarketType::Winner3Way
        );
        assert_eq!(
            detect_market_type(&vec!["Yes".to_string()]),
            MarketType::Other
        );
    }

    #[test]
    fn test_event_id_is_pure_and_collision_free() {
        let start = Utc.with_ymd_and_hms(2030, 1, 1, 19, 0, 0).unwrap();
        let a = deterministic_event_id(Sport::Nba, Some("NBA"), start, "boston celtics", "new york knicks");
        let b = deterministic_event_id(Sport::Nba, Some("NBA"), start, "boston celtics", "new york knicks");
        assert_eq!(a, b);

        let flipped = deterministic_event_id(Sport::Nba, Some("NBA"), start, "new york knicks", "boston celtics");
        assert_ne!(a, flipped);

        let other_day = deterministic_event_id(
            Sport::Nba,
            Some("NBA"),
            start + chrono::Duration::days(1),
            "boston celtics",
            "new york knicks",
        );
        assert_ne!(a, other_day);
    }

    #[test]
    fn test_spurs_alias_disambiguates_by_sport() {
        assert_eq!(
            canonicalize_team(Sport::Nba, Some("Spurs")).as_deref(),
            Some("san antonio spurs")
        );
        assert_eq!(
            canonicalize_team(Sport::Soccer, Some("Spurs")).as_deref(),
            Some("tottenham hotspur")
        );
    }

    #[test]
    fn test_short_alias_requires_word_boundary() {
        // "den" is Denver, but must not fire inside "golden".
        assert_eq!(
            canonicalize_team(Sport::Nba, Some("DEN")).as_deref(),
            Some("denver nuggets")
        );
        assert_eq!(
            canonicalize_team(Sport::Nba, Some("Golden State Warriors")).as_deref(),
            Some("golden state warriors")
        );
    }

    #[test]
    fn test_unknown_team_passes_through_normalized() {
        assert_eq!(
            canonicalize_team(Sport::Soccer, Some("FC Midtjylland")).as_deref(),
            Some("midtjylland")
        );
        assert_eq!(canonicalize_team(Sport::Soccer, Some("   ")), None);
        assert_eq!(canonicalize_team(Sport::Soccer, None), None);
    }

    #[test]
    fn test_parse_teams_separators() {
        assert_eq!(
            parse_teams_from_title("Man Utd vs Arsenal"),
            (Some("Man Utd".to_string()), Some("Arsenal".to_string()))
        );
        assert_eq!(
            parse_teams_from_title("Lakers @ Celtics"),
            (Some("Lakers".to_string()), Some("Celtics".to_string()))
        );
        assert_eq!(
            parse_teams_from_title("Real Madrid  v  Barcelona"),
            (Some("Real Madrid".to_string()), Some("Barcelona".to_string()))
        );
        assert_eq!(
            parse_teams_from_title("Juventus - Napoli"),
            (Some("Juventus".to_string()), Some("Napoli".to_string()))
        );
        assert_eq!(parse_teams_from_title("Total points scored"), (None, None));
    }

    #[test]
    fn test_parse_time_variants() {
        let rfc = parse_time_str("2030-01-01T19:30:00Z").unwrap();
        assert_eq!(rfc, Utc.with_ymd_and_hms(2030, 1, 1, 19, 30, 0).unwrap());

        let offset = parse_time_str("2030-01-01T14:30:00-05:00").unwrap();
        assert_eq!(offset, Utc.with_ymd_and_hms(2030, 1, 1, 19, 30, 0).unwrap());

        // Naive timestamps are tagged UTC.
        let naive = parse_time_str("2030-01-01T19:30:00").unwrap();
        assert_eq!(naive, Utc.with_ymd_and_hms(2030, 1, 1, 19, 30, 0).unwrap());

        let date_only = parse_time_str("2030-01-01").unwrap();
        assert_eq!(date_only, Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());

        let epoch = parse_time_value(&serde_json::json!(1_893_456_000)).unwrap();
        assert_eq!(epoch, Utc.timestamp_opt(1_893_456_000, 0).unwrap());

        assert!(parse_time_str("not a time").is_none());
    }

    #[test]
    fn test_detect_sport_rules() {
        assert_eq!(detect_sport("Celtics vs Knicks", Some("basketball"), &[]), Sport::Nba);
        assert_eq!(
            detect_sport("Who wins?", None, &["nba-2030-bos-nyk".to_string()]),
            Sport::Nba
        );
        assert_eq!(
            detect_sport("Arsenal vs Chelsea", Some("Premier League"), &[]),
            Sport::Soccer
        );
        assert_eq!(
            detect_sport("Who advances?", None, &["ucl-r16".to_string()]),
            Sport::Soccer
        );
        assert_eq!(detect_sport("Rate hike in March?", None, &[]), Sport::Unknown);
    }

    #[test]
    fn test_detect_competition_rules() {
        assert_eq!(
            detect_competition(Sport::Soccer, "Arsenal vs Chelsea", &[], Some("epl")).as_deref(),
            Some("EPL")
        );
        assert_eq!(
            detect_competition(Sport::Nba, "Celtics vs Knicks", &[], None).as_deref(),
            Some("NBA")
        );
        assert_eq!(
            detect_competition(
                Sport::Soccer,
                "Real Madrid vs Barcelona",
                &["la liga matchday".to_string()],
                None
            )
            .as_deref(),
            Some("LALIGA")
        );
        // MLS resolves through the keyword table but is not supported.
        assert_eq!(
            detect_competition(Sport::Soccer, "LA Galaxy vs Inter Miami MLS clash", &[], None),
            None
        );
    }

    #[test]
    fn test_build_market_canonicalizes_teams() {
        let market = build_market(
            Venue::Poly,
            MarketDraft {
                venue_market_id: "poly-1".to_string(),
                title: "Man Utd vs Arsenal".to_string(),
                outcomes: yes_no(),
                start_time: Some(Utc.with_ymd_and_hms(2030, 1, 1, 20, 0, 0).unwrap()),
                sport_hint: Some(Sport::Soccer),
                competition_hint: Some("EPL".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(market.sport, Sport::Soccer);
        assert_eq!(market.competition.as_deref(), Some("EPL"));
        assert_eq!(market.home_team.as_deref(), Some("manchester united"));
        assert_eq!(market.away_team.as_deref(), Some("arsenal"));
        assert_eq!(market.market_type, MarketType::WinnerBinary);
    }
}
