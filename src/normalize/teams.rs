//! Per-sport team alias tables.
//!
//! Keys are normalized alias strings (lowercase, punctuation stripped,
//! stopwords removed), values are the canonical team name in the same
//! normalized form. The same alias may resolve differently per sport
//! ("spurs" is San Antonio in the NBA and Tottenham in soccer).

use crate::db::models::Sport;

/// Filler tokens stripped before alias lookup. Club suffixes like "fc" are
/// here so "Arsenal FC" and "Arsenal" normalize identically.
pub const STOPWORDS: &[&str] = &["fc", "cf", "sc", "afc", "cfc", "bc", "club", "the"];

const NBA_ALIASES: &[(&str, &str)] = &[
    ("atlanta hawks", "atlanta hawks"),
    ("hawks", "atlanta hawks"),
    ("atl", "atlanta hawks"),
    ("boston celtics", "boston celtics"),
    ("celtics", "boston celtics"),
    ("bos", "boston celtics"),
    ("brooklyn nets", "brooklyn nets"),
    ("nets", "brooklyn nets"),
    ("bkn", "brooklyn nets"),
    ("charlotte hornets", "charlotte hornets"),
    ("hornets", "charlotte hornets"),
    ("cha", "charlotte hornets"),
    ("chicago bulls", "chicago bulls"),
    ("bulls", "chicago bulls"),
    ("chi", "chicago bulls"),
    ("cleveland cavaliers", "cleveland cavaliers"),
    ("cavaliers", "cleveland cavaliers"),
    ("cavs", "cleveland cavaliers"),
    ("cle", "cleveland cavaliers"),
    ("dallas mavericks", "dallas mavericks"),
    ("mavericks", "dallas mavericks"),
    ("mavs", "dallas mavericks"),
    ("dal", "dallas mavericks"),
    ("denver nuggets", "denver nuggets"),
    ("nuggets", "denver nuggets"),
    ("den", "denver nuggets"),
    ("detroit pistons", "detroit pistons"),
    ("pistons", "detroit pistons"),
    ("det", "detroit pistons"),
    ("golden state warriors", "golden state warriors"),
    ("warriors", "golden state warriors"),
    ("golden state", "golden state warriors"),
    ("gsw", "golden state warriors"),
    ("houston rockets", "houston rockets"),
    ("rockets", "houston rockets"),
    ("hou", "houston rockets"),
    ("indiana pacers", "indiana pacers"),
    ("pacers", "indiana pacers"),
    ("ind", "indiana pacers"),
    ("la clippers", "los angeles clippers"),
    ("los angeles clippers", "los angeles clippers"),
    ("clippers", "los angeles clippers"),
    ("lac", "los angeles clippers"),
    ("la lakers", "los angeles lakers"),
    ("los angeles lakers", "los angeles lakers"),
    ("lakers", "los angeles lakers"),
    ("lal", "los angeles lakers"),
    ("memphis grizzlies", "memphis grizzlies"),
    ("grizzlies", "memphis grizzlies"),
    ("mem", "memphis grizzlies"),
    ("miami heat", "miami heat"),
    ("heat", "miami heat"),
    ("mia", "miami heat"),
    ("milwaukee bucks", "milwaukee bucks"),
    ("bucks", "milwaukee bucks"),
    ("mil", "milwaukee bucks"),
    ("minnesota timberwolves", "minnesota timberwolves"),
    ("timberwolves", "minnesota timberwolves"),
    ("wolves", "minnesota timberwolves"),
    ("min", "minnesota timberwolves"),
    ("new orleans pelicans", "new orleans pelicans"),
    ("pelicans", "new orleans pelicans"),
    ("nop", "new orleans pelicans"),
    ("new york knicks", "new york knicks"),
    ("knicks", "new york knicks"),
    ("nyk", "new york knicks"),
    ("oklahoma city thunder", "oklahoma city thunder"),
    ("thunder", "oklahoma city thunder"),
    ("okc", "oklahoma city thunder"),
    ("orlando magic", "orlando magic"),
    ("magic", "orlando magic"),
    ("orl", "orlando magic"),
    ("philadelphia 76ers", "philadelphia 76ers"),
    ("76ers", "philadelphia 76ers"),
    ("sixers", "philadelphia 76ers"),
    ("phi", "philadelphia 76ers"),
    ("phoenix suns", "phoenix suns"),
    ("suns", "phoenix suns"),
    ("phx", "phoenix suns"),
    ("portland trail blazers", "portland trail blazers"),
    ("trail blazers", "portland trail blazers"),
    ("blazers", "portland trail blazers"),
    ("por", "portland trail blazers"),
    ("sacramento kings", "sacramento kings"),
    ("kings", "sacramento kings"),
    ("sac", "sacramento kings"),
    ("san antonio spurs", "san antonio spurs"),
    ("spurs", "san antonio spurs"),
    ("sas", "san antonio spurs"),
    ("toronto raptors", "toronto raptors"),
    ("raptors", "toronto raptors"),
    ("tor", "toronto raptors"),
    ("utah jazz", "utah jazz"),
    ("jazz", "utah jazz"),
    ("uta", "utah jazz"),
    ("washington wizards", "washington wizards"),
    ("wizards", "washington wizards"),
    ("was", "washington wizards"),
];

const SOCCER_ALIASES: &[(&str, &str)] = &[
    // EPL
    ("arsenal", "arsenal"),
    ("gunners", "arsenal"),
    ("aston villa", "aston villa"),
    ("villa", "aston villa"),
    ("bournemouth", "bournemouth"),
    ("brentford", "brentford"),
    ("brighton", "brighton and hove albion"),
    ("brighton and hove albion", "brighton and hove albion"),
    ("chelsea", "chelsea"),
    ("crystal palace", "crystal palace"),
    ("palace", "crystal palace"),
    ("everton", "everton"),
    ("fulham", "fulham"),
    ("leeds united", "leeds united"),
    ("leeds", "leeds united"),
    ("liverpool", "liverpool"),
    ("manchester city", "manchester city"),
    ("man city", "manchester city"),
    ("mcfc", "manchester city"),
    ("manchester united", "manchester united"),
    ("man united", "manchester united"),
    ("man utd", "manchester united"),
    ("manchester utd", "manchester united"),
    ("mufc", "manchester united"),
    ("newcastle united", "newcastle united"),
    ("newcastle", "newcastle united"),
    ("nottingham forest", "nottingham forest"),
    ("forest", "nottingham forest"),
    ("tottenham hotspur", "tottenham hotspur"),
    ("tottenham", "tottenham hotspur"),
    ("spurs", "tottenham hotspur"),
    ("west ham united", "west ham united"),
    ("west ham", "west ham united"),
    ("wolverhampton wanderers", "wolverhampton wanderers"),
    ("wolverhampton", "wolverhampton wanderers"),
    ("wolves", "wolverhampton wanderers"),
    // LALIGA
    ("athletic bilbao", "athletic bilbao"),
    ("athletic", "athletic bilbao"),
    ("atletico madrid", "atletico madrid"),
    ("atletico", "atletico madrid"),
    ("atleti", "atletico madrid"),
    ("barcelona", "barcelona"),
    ("barca", "barcelona"),
    ("fcb", "barcelona"),
    ("celta vigo", "celta vigo"),
    ("celta", "celta vigo"),
    ("getafe", "getafe"),
    ("girona", "girona"),
    ("osasuna", "osasuna"),
    ("real betis", "real betis"),
    ("betis", "real betis"),
    ("real madrid", "real madrid"),
    ("rma", "real madrid"),
    ("real sociedad", "real sociedad"),
    ("sevilla", "sevilla"),
    ("valencia", "valencia"),
    ("villarreal", "villarreal"),
    // UCL / UEL regulars outside England and Spain
    ("ajax", "ajax"),
    ("as roma", "roma"),
    ("roma", "roma"),
    ("bayer leverkusen", "bayer leverkusen"),
    ("leverkusen", "bayer leverkusen"),
    ("bayern munich", "bayern munich"),
    ("bayern", "bayern munich"),
    ("benfica", "benfica"),
    ("borussia dortmund", "borussia dortmund"),
    ("dortmund", "borussia dortmund"),
    ("bvb", "borussia dortmund"),
    ("celtic", "celtic"),
    ("feyenoord", "feyenoord"),
    ("galatasaray", "galatasaray"),
    ("inter milan", "inter milan"),
    ("inter", "inter milan"),
    ("internazionale", "inter milan"),
    ("juventus", "juventus"),
    ("juve", "juventus"),
    ("lazio", "lazio"),
    ("ac milan", "ac milan"),
    ("milan", "ac milan"),
    ("napoli", "napoli"),
    ("paris saint germain", "paris saint germain"),
    ("paris sg", "paris saint germain"),
    ("psg", "paris saint germain"),
    ("fc porto", "porto"),
    ("porto", "porto"),
    ("rb leipzig", "rb leipzig"),
    ("leipzig", "rb leipzig"),
    ("sporting lisbon", "sporting lisbon"),
    ("sporting", "sporting lisbon"),
];

/// Alias table for a sport. Empty when the sport has no table.
pub fn aliases_for_sport(sport: Sport) -> &'static [(&'static str, &'static str)] {
    match sport {
        Sport::Nba => NBA_ALIASES,
        Sport::Soccer => SOCCER_ALIASES,
        Sport::Unknown => &[],
    }
}
