//! Canonical team vocabulary and per-site name translations.
//!
//! Scraped sources and competition sites disagree on team names, so all
//! ingested names are normalized to the canonical vocabulary, and names are
//! translated back to each site's display form at submission time.

/// Canonical team names used throughout storage and predictions.
pub const CANONICAL_TEAMS: [&str; 18] = [
    "Adelaide",
    "Brisbane",
    "Carlton",
    "Collingwood",
    "Essendon",
    "Fremantle",
    "GWS",
    "Geelong",
    "Gold Coast",
    "Hawthorn",
    "Melbourne",
    "North Melbourne",
    "Port Adelaide",
    "Richmond",
    "St Kilda",
    "Sydney",
    "West Coast",
    "Western Bulldogs",
];

// Variants seen in scraped fixture/result pages, mapped to canonical names.
const INGEST_ALIASES: [(&str, &str); 10] = [
    ("GWS Giants", "GWS"),
    ("Greater Western Sydney", "GWS"),
    ("Brisbane Lions", "Brisbane"),
    ("West Coast Eagles", "West Coast"),
    ("Gold Coast Suns", "Gold Coast"),
    ("Sydney Swans", "Sydney"),
    ("Geelong Cats", "Geelong"),
    ("Adelaide Crows", "Adelaide"),
    ("Kangaroos", "North Melbourne"),
    ("Footscray", "Western Bulldogs"),
];

// Competition sites display a few teams differently from the canonical names.
const SITE_DISPLAY_NAMES: [(&str, &str); 3] = [
    ("GWS", "GWS Giants"),
    ("Brisbane", "Brisbane Lions"),
    ("West Coast", "West Coast Eagles"),
];

/// Normalize a scraped team name to the canonical vocabulary.
///
/// Returns `None` for names that match neither the vocabulary nor a known
/// alias, so callers can reject the row instead of storing junk.
pub fn normalize_team_name(raw: &str) -> Option<&'static str> {
    let trimmed = raw.trim();

    if let Some(name) = CANONICAL_TEAMS.iter().find(|name| **name == trimmed) {
        return Some(name);
    }

    INGEST_ALIASES
        .iter()
        .find(|(alias, _)| *alias == trimmed)
        .map(|(_, canonical)| *canonical)
}

/// Translate a canonical team name into the form a competition site displays.
pub fn display_name_for_site(canonical: &str) -> &str {
    SITE_DISPLAY_NAMES
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, display)| *display)
        .unwrap_or(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_aliases() {
        assert_eq!(normalize_team_name("GWS Giants"), Some("GWS"));
        assert_eq!(normalize_team_name("Footscray"), Some("Western Bulldogs"));
        assert_eq!(normalize_team_name(" Richmond "), Some("Richmond"));
    }

    #[test]
    fn rejects_unknown_names() {
        assert_eq!(normalize_team_name("Fitzroy Lions"), None);
        assert_eq!(normalize_team_name(""), None);
    }

    #[test]
    fn site_display_round_trip() {
        assert_eq!(display_name_for_site("GWS"), "GWS Giants");
        assert_eq!(display_name_for_site("Richmond"), "Richmond");
        // Every site display name normalizes back to its canonical form.
        for team in CANONICAL_TEAMS {
            assert_eq!(normalize_team_name(display_name_for_site(team)), Some(team));
        }
    }
}
