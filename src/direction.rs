// Direction labels for departures.
//
// A trip's direction is resolved from the cardinal in its static headsign,
// then the raw direction flag of the live feed, with a per-route override
// table keyed by cardinal direction.

use crate::config::{BoardConfig, OverrideEntry};
use crate::feed::TripUpdate;
use crate::schedule_cache::ScheduleCache;
use std::collections::HashMap;

pub const CARDINALS: [&str; 4] = ["North", "South", "East", "West"];

/// Compound forms come first so "Nord via X" is not read as plain "Nord".
const FRENCH_CARDINALS: [(&str, &str); 8] = [
    ("Nord via", "North via"),
    ("Sud via", "South via"),
    ("Est via", "East via"),
    ("Ouest via", "West via"),
    ("Nord", "North"),
    ("Sud", "South"),
    ("Est", "East"),
    ("Ouest", "West"),
];

/// Route whose southbound departures are never shown.
pub const SUPPRESSED_ROUTE: &str = "57";
/// Untranslated southbound label still found in older headsigns.
pub const LEGACY_SOUTH_MARKER: &str = "Sud";

// ============================================================================
// Override table
// ============================================================================

/// (route, cardinal) -> terminus label. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: HashMap<(String, String), String>,
}

impl OverrideTable {
    pub fn new(entries: impl IntoIterator<Item = OverrideEntry>) -> Self {
        OverrideTable {
            entries: entries
                .into_iter()
                .map(|e| ((e.route, e.direction), e.terminus))
                .collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new([
            OverrideEntry {
                route: "57".to_string(),
                direction: "North".to_string(),
                terminus: "Station Atwater".to_string(),
            },
            OverrideEntry {
                route: "107".to_string(),
                direction: "North".to_string(),
                terminus: "Station Verdun".to_string(),
            },
        ])
    }

    pub fn from_config(config: &BoardConfig) -> Self {
        match &config.transit.overrides {
            Some(entries) => Self::new(entries.iter().cloned()),
            None => Self::builtin(),
        }
    }

    pub fn lookup(&self, route_id: &str, cardinal: &str) -> Option<&str> {
        self.entries
            .get(&(route_id.to_string(), cardinal.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Headsign normalization
// ============================================================================

/// Rewrites a static headsign into the label shown on the board.
pub fn normalize_headsign(headsign: &str) -> String {
    let text = headsign.trim();

    if let Some(terminus) = after_destination_token(text) {
        return terminus.to_string();
    }
    if let Some(station) = station_name(text) {
        return station;
    }
    translate_cardinal(text).unwrap_or_else(|| text.to_string())
}

fn after_destination_token(text: &str) -> Option<&str> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let start = lower.find("destination")?;
    let rest = text[start + "destination".len()..]
        .trim_start_matches([':', ' '])
        .trim();
    (!rest.is_empty()).then_some(rest)
}

fn station_name(text: &str) -> Option<String> {
    let mut words = text.split_whitespace();
    words.find(|w| *w == "Station")?;
    words.next().map(|name| format!("Station {}", name))
}

fn translate_cardinal(text: &str) -> Option<String> {
    if let Some((_, english)) = FRENCH_CARDINALS.iter().find(|(french, _)| *french == text) {
        return Some(english.to_string());
    }

    FRENCH_CARDINALS.iter().find_map(|(french, english)| {
        let rest = strip_word_prefix(text, french)?;
        Some(format!("{}{}", english, rest))
    })
}

/// Strips `prefix` only when it ends on a word boundary.
fn strip_word_prefix<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(prefix)?;
    (rest.is_empty() || rest.starts_with(char::is_whitespace)).then_some(rest)
}

/// North/South/East/West when `text` is, or begins with, that word.
pub fn extract_cardinal(text: &str) -> Option<&'static str> {
    CARDINALS
        .iter()
        .copied()
        .find(|cardinal| strip_word_prefix(text.trim(), cardinal).is_some())
}

// ============================================================================
// Resolution pipeline
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Unresolved,
}

impl Resolution {
    fn or_else<F: FnOnce() -> Resolution>(self, next: F) -> Resolution {
        match self {
            Resolution::Resolved(_) => self,
            Resolution::Unresolved => next(),
        }
    }

    fn from_option(value: Option<String>) -> Resolution {
        value.map_or(Resolution::Unresolved, Resolution::Resolved)
    }

    pub fn into_option(self) -> Option<String> {
        match self {
            Resolution::Resolved(text) => Some(text),
            Resolution::Unresolved => None,
        }
    }
}

/// Everything the pipeline looks at for one trip.
#[derive(Debug, Clone, Copy)]
pub struct DirectionContext<'a> {
    pub route_id: Option<&'a str>,
    pub direction_id: Option<u32>,
    pub headsign: Option<&'a str>,
    /// Passed through to the result; never used to pick the direction.
    pub terminus: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDirection {
    pub direction: Option<String>,
    pub cardinal: Option<String>,
    pub terminus: Option<String>,
}

/// First match wins: override, cardinal, raw direction flag. Nothing
/// matching leaves the direction empty.
pub fn resolve(ctx: &DirectionContext<'_>, overrides: &OverrideTable) -> ResolvedDirection {
    let normalized = ctx.headsign.map(normalize_headsign).filter(|t| !t.is_empty());
    let cardinal = normalized.as_deref().and_then(extract_cardinal);

    let direction = from_override(ctx.route_id, cardinal, overrides)
        .or_else(|| Resolution::from_option(cardinal.map(str::to_string)))
        .or_else(|| from_direction_flag(ctx.direction_id));

    ResolvedDirection {
        direction: direction.into_option(),
        cardinal: cardinal.map(str::to_string),
        terminus: ctx.terminus.map(str::to_string),
    }
}

fn from_override(
    route_id: Option<&str>,
    cardinal: Option<&str>,
    overrides: &OverrideTable,
) -> Resolution {
    match (route_id, cardinal) {
        (Some(route), Some(cardinal)) => {
            Resolution::from_option(overrides.lookup(route, cardinal).map(str::to_string))
        }
        _ => Resolution::Unresolved,
    }
}

fn from_direction_flag(direction_id: Option<u32>) -> Resolution {
    match direction_id {
        Some(0) => Resolution::Resolved("Outbound".to_string()),
        Some(1) => Resolution::Resolved("Inbound".to_string()),
        _ => Resolution::Unresolved,
    }
}

/// Southbound departures of route 57 are dropped from every listing.
/// Any one of the three checks is enough.
pub fn is_suppressed(route_id: Option<&str>, resolved: &ResolvedDirection) -> bool {
    if route_id != Some(SUPPRESSED_ROUTE) {
        return false;
    }
    if resolved.cardinal.as_deref() == Some("South") {
        return true;
    }
    resolved.direction.as_deref().is_some_and(|direction| {
        direction.to_lowercase().contains("south") || direction.contains(LEGACY_SOUTH_MARKER)
    })
}

// ============================================================================
// Schedule-backed resolver
// ============================================================================

pub struct DirectionResolver<'a> {
    schedule: &'a ScheduleCache,
    overrides: &'a OverrideTable,
}

impl<'a> DirectionResolver<'a> {
    pub fn new(schedule: &'a ScheduleCache, overrides: &'a OverrideTable) -> Self {
        DirectionResolver {
            schedule,
            overrides,
        }
    }

    pub fn resolve_trip(&self, trip: &TripUpdate) -> ResolvedDirection {
        let (headsign, terminus) = self.schedule.lookup(&trip.trip_id);

        let ctx = DirectionContext {
            route_id: trip.route_id.as_deref(),
            direction_id: trip.direction_id,
            headsign: headsign.as_deref(),
            terminus: terminus.as_deref(),
        };
        resolve(&ctx, self.overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule_cache::tests::{cache_from_archive, sample_archive};

    fn ctx<'a>(route: &'a str, headsign: Option<&'a str>, flag: Option<u32>) -> DirectionContext<'a> {
        DirectionContext {
            route_id: Some(route),
            direction_id: flag,
            headsign,
            terminus: None,
        }
    }

    fn overrides(route: &str, direction: &str, terminus: &str) -> OverrideTable {
        OverrideTable::new([OverrideEntry {
            route: route.to_string(),
            direction: direction.to_string(),
            terminus: terminus.to_string(),
        }])
    }

    #[test]
    fn french_cardinals_translate() {
        assert_eq!(normalize_headsign("Nord"), "North");
        assert_eq!(normalize_headsign("Sud"), "South");
        assert_eq!(normalize_headsign("Est"), "East");
        assert_eq!(normalize_headsign("Ouest"), "West");
        assert_eq!(normalize_headsign("Ouest via Sherbrooke"), "West via Sherbrooke");
        assert_eq!(normalize_headsign("Nord via"), "North via");
        assert_eq!(normalize_headsign("Est  Côte-Vertu"), "East  Côte-Vertu");
    }

    #[test]
    fn unmatched_headsigns_pass_through() {
        assert_eq!(normalize_headsign("Estacade"), "Estacade");
        assert_eq!(normalize_headsign("Downtown"), "Downtown");
    }

    #[test]
    fn destination_token_keeps_the_rest_verbatim() {
        assert_eq!(
            normalize_headsign("Nord destination: Gare Centrale"),
            "Gare Centrale"
        );
        assert_eq!(normalize_headsign("Destination Côte-Vertu"), "Côte-Vertu");
    }

    #[test]
    fn station_token_takes_next_word() {
        assert_eq!(normalize_headsign("Vers Station Berri-UQAM"), "Station Berri-UQAM");
        assert_eq!(normalize_headsign("Station"), "Station");
    }

    #[test]
    fn cardinal_extraction_requires_a_whole_word() {
        assert_eq!(extract_cardinal("North"), Some("North"));
        assert_eq!(extract_cardinal("West via Sherbrooke"), Some("West"));
        assert_eq!(extract_cardinal("Westmount"), None);
        assert_eq!(extract_cardinal("Station Berri"), None);
    }

    #[test]
    fn headsign_nord_resolves_to_north() {
        let resolved = resolve(&ctx("24", Some("Nord"), Some(1)), &OverrideTable::default());
        assert_eq!(resolved.direction.as_deref(), Some("North"));
        assert_eq!(resolved.cardinal.as_deref(), Some("North"));
    }

    #[test]
    fn override_beats_cardinal() {
        let table = overrides("24", "North", "Station Sherbrooke");
        let resolved = resolve(&ctx("24", Some("Nord"), None), &table);
        assert_eq!(resolved.direction.as_deref(), Some("Station Sherbrooke"));
        assert_eq!(resolved.cardinal.as_deref(), Some("North"));

        // Other routes are unaffected.
        let other = resolve(&ctx("55", Some("Nord"), None), &table);
        assert_eq!(other.direction.as_deref(), Some("North"));
    }

    #[test]
    fn headsign_without_cardinal_falls_to_flag() {
        let table = OverrideTable::default();

        let text = resolve(&ctx("24", Some("Vers Station Lionel-Groulx"), Some(0)), &table);
        assert_eq!(text.direction.as_deref(), Some("Outbound"));
        assert_eq!(text.cardinal, None);

        let inbound = resolve(&ctx("24", Some("Destination Côte-Vertu"), Some(1)), &table);
        assert_eq!(inbound.direction.as_deref(), Some("Inbound"));
    }

    #[test]
    fn non_cardinal_southern_headsign_on_route_57_is_shown() {
        let resolved = resolve(
            &ctx("57", Some("Destination Sud-Ouest"), Some(0)),
            &OverrideTable::builtin(),
        );
        assert_eq!(resolved.direction.as_deref(), Some("Outbound"));
        assert_eq!(resolved.cardinal, None);
        assert!(!is_suppressed(Some("57"), &resolved));
    }

    #[test]
    fn flag_maps_to_outbound_and_inbound() {
        let table = OverrideTable::default();
        let outbound = resolve(&ctx("24", None, Some(0)), &table);
        assert_eq!(outbound.direction.as_deref(), Some("Outbound"));
        let inbound = resolve(&ctx("24", None, Some(1)), &table);
        assert_eq!(inbound.direction.as_deref(), Some("Inbound"));
    }

    #[test]
    fn nothing_known_leaves_direction_empty() {
        let resolved = resolve(&ctx("24", None, None), &OverrideTable::default());
        assert_eq!(resolved.direction, None);
        assert_eq!(resolved.cardinal, None);

        let odd_flag = resolve(&ctx("24", Some("   "), Some(7)), &OverrideTable::default());
        assert_eq!(odd_flag.direction, None);
    }

    #[test]
    fn suppression_checks_each_detection_path() {
        let by_cardinal = ResolvedDirection {
            direction: Some("Station Charlevoix".to_string()),
            cardinal: Some("South".to_string()),
            terminus: None,
        };
        let by_text = ResolvedDirection {
            direction: Some("southbound".to_string()),
            cardinal: None,
            terminus: None,
        };
        let by_marker = ResolvedDirection {
            direction: Some("Sud-Ouest".to_string()),
            cardinal: None,
            terminus: None,
        };
        let north = ResolvedDirection {
            direction: Some("North".to_string()),
            cardinal: Some("North".to_string()),
            terminus: None,
        };

        for resolved in [&by_cardinal, &by_text, &by_marker] {
            assert!(is_suppressed(Some("57"), resolved));
            assert!(!is_suppressed(Some("58"), resolved));
        }
        assert!(!is_suppressed(Some("57"), &north));
        assert!(!is_suppressed(None, &by_cardinal));
    }

    #[test]
    fn resolver_reads_the_schedule_cache() {
        let schedule = cache_from_archive("resolver", Some(sample_archive()));
        let table = OverrideTable::builtin();
        let resolver = DirectionResolver::new(&schedule, &table);

        let trip = |trip_id: &str| TripUpdate {
            trip_id: trip_id.to_string(),
            route_id: Some("57".to_string()),
            direction_id: Some(0),
            stop_time_updates: Vec::new(),
        };

        // "Nord" on route 57 hits the built-in override.
        let north = resolver.resolve_trip(&trip("T1"));
        assert_eq!(north.direction.as_deref(), Some("Station Atwater"));
        assert_eq!(north.terminus.as_deref(), Some("Atwater / Sainte-Catherine"));

        let south = resolver.resolve_trip(&trip("T2"));
        assert_eq!(south.direction.as_deref(), Some("South"));
        assert!(is_suppressed(Some("57"), &south));

        // No headsign: the feed flag is used.
        let t3 = resolver.resolve_trip(&trip("T3"));
        assert_eq!(t3.direction.as_deref(), Some("Outbound"));
        assert_eq!(t3.terminus.as_deref(), Some("Station Charlevoix"));

        let unknown = resolver.resolve_trip(&trip("nope"));
        assert_eq!(unknown.direction.as_deref(), Some("Outbound"));
    }

    #[test]
    fn resolver_falls_back_when_schedule_is_unavailable() {
        let schedule = cache_from_archive("resolver_offline", None);
        let table = OverrideTable::builtin();
        let resolver = DirectionResolver::new(&schedule, &table);

        let trip = TripUpdate {
            trip_id: "T1".to_string(),
            route_id: Some("57".to_string()),
            direction_id: Some(1),
            stop_time_updates: Vec::new(),
        };
        assert_eq!(
            resolver.resolve_trip(&trip).direction.as_deref(),
            Some("Inbound")
        );
    }
}
