//! Deterministic entity extraction.
//!
//! Produces an initial superset of candidate entities by text analysis,
//! narrowing the space the routing model must choose from. Identical
//! question + vocabulary always yields identical output: candidate lists are
//! ordered by score then name, with no randomness anywhere.

use std::sync::Arc;

use regex::Regex;

use crate::store::vocab::Vocabulary;
use crate::types::{Castell, Entities};

pub mod castell;

/// Words stripped before team-name matching.
const TEAM_STOPWORDS: &[&str] = &[
    "castellera",
    "castellers",
    "colla",
    "colles",
    "de",
    "del",
    "dels",
    "la",
    "el",
    "les",
    "els",
    "xiquets",
];

/// Words stripped before place matching.
const PLACE_STOPWORDS: &[&str] = &[
    "lloc",
    "llocs",
    "ciutat",
    "ciutats",
    "població",
    "poblacions",
    "de",
    "del",
    "dels",
    "la",
    "el",
    "les",
    "els",
];

/// Words stripped before event-name matching.
const EVENT_STOPWORDS: &[&str] = &[
    "diada",
    "diades",
    "festival",
    "festivals",
    "actuació",
    "actuacions",
    "de",
    "del",
    "dels",
    "la",
    "el",
    "les",
    "els",
    "festa",
    "festiu",
    "major",
    "local",
    "locals",
];

/// Fuzzy threshold and cap per entity kind.
const TEAM_THRESHOLD: u32 = 85;
const TEAM_TOP_N: usize = 5;
const PLACE_THRESHOLD: u32 = 50;
const PLACE_TOP_N: usize = 3;
const EVENT_THRESHOLD: u32 = 50;
const EVENT_TOP_N: usize = 4;
const CASTELL_THRESHOLD: u32 = 30;
const CASTELL_TOP_N: usize = 5;
const YEAR_TOP_N: usize = 5;

/// Partial-ratio similarity on a 0–100 scale.
///
/// The shorter string slides across same-length windows of the longer one;
/// the best normalized Levenshtein similarity wins. An empty side scores 0.
pub fn partial_ratio(a: &str, b: &str) -> u32 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let long_chars: Vec<char> = long.chars().collect();
    let window = short.chars().count();

    let mut best: f64 = 0.0;
    let last_start = long_chars.len().saturating_sub(window);
    for start in 0..=last_start {
        let slice: String = long_chars[start..start.saturating_add(window)].iter().collect();
        let score = strsim::normalized_levenshtein(short, &slice);
        if score > best {
            best = score;
        }
        if best >= 1.0 {
            break;
        }
    }
    scale_to_percent(best)
}

/// Scale a similarity ratio to the 0–100 integer range the thresholds use.
fn scale_to_percent(ratio: f64) -> u32 {
    let percent = (ratio.clamp(0.0, 1.0) * 100.0).round();
    // The clamp bounds `percent` to [0, 100].
    #[allow(clippy::cast_possible_truncation)]
    let truncated = percent as i64;
    u32::try_from(truncated).unwrap_or(100)
}

/// Lowercase, strip stopwords and digits, collapse whitespace.
pub fn clean_for_matching(text: &str, stopwords: &[&str]) -> String {
    let mut cleaned = text.to_lowercase();
    for word in stopwords {
        let pattern = format!(r"\b{}\b", regex::escape(word));
        if let Ok(re) = Regex::new(&pattern) {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }
    }
    if let Ok(digits) = Regex::new(r"\d+") {
        cleaned = digits.replace_all(&cleaned, "").into_owned();
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fuzzy_candidates(
    question: &str,
    values: &[String],
    stopwords: &[&str],
    threshold: u32,
    top_n: usize,
) -> Vec<String> {
    let question_clean = clean_for_matching(question, stopwords);
    if question_clean.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(u32, &String)> = values
        .iter()
        .filter(|value| !value.is_empty())
        .filter_map(|value| {
            let value_clean = clean_for_matching(value, stopwords);
            if value_clean.is_empty() {
                return None;
            }
            let score = partial_ratio(&question_clean, &value_clean);
            (score >= threshold).then_some((score, value))
        })
        .collect();

    // Stable output: score descending, then name.
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(top_n)
        .map(|(_, value)| value.clone())
        .collect()
}

/// Extract four-digit years, `del XX` shorthands, and range endpoints.
pub fn extract_years(question: &str) -> Vec<u16> {
    let lowered = question.to_lowercase();
    let mut years: Vec<u16> = Vec::new();

    // Direct four-digit years 1900–2099; range forms like `2023-2024` or
    // `2023–2024` contribute both endpoints here since the separator is a
    // word boundary.
    if let Ok(re) = Regex::new(r"\b((?:19|20)\d{2})\b") {
        for caps in re.captures_iter(&lowered) {
            if let Some(year) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                years.push(year);
            }
        }
    }

    // Two-digit shorthand: "del 23" → 2023, "del 96" → 1996.
    if let Ok(re) = Regex::new(r"\bdels?\s+(\d{2})\b") {
        for caps in re.captures_iter(&lowered) {
            if let Some(two) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) {
                let full = if two <= 30 {
                    2000u16.saturating_add(two)
                } else {
                    1900u16.saturating_add(two)
                };
                years.push(full);
            }
        }
    }

    years.sort_unstable();
    years.dedup();
    years.truncate(YEAR_TOP_N);
    years
}

/// Deterministic extractor over one vocabulary snapshot.
pub struct EntityExtractor {
    vocabulary: Arc<Vocabulary>,
}

impl EntityExtractor {
    /// Create an extractor over a vocabulary snapshot.
    pub fn new(vocabulary: Arc<Vocabulary>) -> Self {
        Self { vocabulary }
    }

    /// Candidate team names, best match first.
    pub fn teams(&self, question: &str) -> Vec<String> {
        fuzzy_candidates(
            question,
            &self.vocabulary.teams,
            TEAM_STOPWORDS,
            TEAM_THRESHOLD,
            TEAM_TOP_N,
        )
    }

    /// Candidate place names.
    pub fn places(&self, question: &str) -> Vec<String> {
        fuzzy_candidates(
            question,
            &self.vocabulary.places,
            PLACE_STOPWORDS,
            PLACE_THRESHOLD,
            PLACE_TOP_N,
        )
    }

    /// Candidate event names.
    pub fn events(&self, question: &str) -> Vec<String> {
        fuzzy_candidates(
            question,
            &self.vocabulary.events,
            EVENT_STOPWORDS,
            EVENT_THRESHOLD,
            EVENT_TOP_N,
        )
    }

    /// Years mentioned in the question.
    pub fn years(&self, question: &str) -> Vec<u16> {
        extract_years(question)
    }

    /// Candidate castells with any status word found in the question.
    ///
    /// Deterministic parsing wins; fuzzy matching against the canonical
    /// codes is the fallback.
    pub fn constructions(&self, question: &str) -> Vec<Castell> {
        let status = castell::extract_status(question);

        if let Some(code) = castell::parse_castell_code(question) {
            let mut parsed = Castell::new(code);
            parsed.status = status;
            return vec![parsed];
        }

        let mut scored: Vec<(u32, &String)> = self
            .vocabulary
            .construction_codes
            .iter()
            .filter(|code| !code.is_empty())
            .filter_map(|code| {
                let score = partial_ratio(question, code);
                (score >= CASTELL_THRESHOLD).then_some((score, code))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

        scored
            .into_iter()
            .take(CASTELL_TOP_N)
            .map(|(_, code)| {
                let mut candidate = Castell::new(code.clone());
                candidate.status = status;
                candidate
            })
            .collect()
    }

    /// Run every extractor; contest-only kinds stay empty here (they come
    /// from the classification model).
    pub fn extract_all(&self, question: &str) -> Entities {
        Entities {
            teams: self.teams(question),
            constructions: self.constructions(question),
            years: self.years(question),
            places: self.places(question),
            events: self.events(question),
            editions: Vec::new(),
            tracks: Vec::new(),
            positions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::vocab::Vocabulary;
    use crate::types::CastellStatus;

    fn extractor() -> EntityExtractor {
        EntityExtractor::new(Arc::new(Vocabulary {
            teams: vec![
                "Castellers de Vilafranca".to_owned(),
                "Castellers de Sabadell".to_owned(),
                "Minyons de Terrassa".to_owned(),
                "Colla Vella dels Xiquets de Valls".to_owned(),
            ],
            construction_codes: vec![
                "3d9f".to_owned(),
                "3d10fm".to_owned(),
                "4d9af".to_owned(),
                "2d8f".to_owned(),
                "Pd7f".to_owned(),
            ],
            years: vec![2012, 2022, 2023],
            places: vec![
                "Vilafranca del Penedès".to_owned(),
                "Tarragona".to_owned(),
                "Terrassa".to_owned(),
            ],
            events: vec![
                "Diada de Sant Fèlix".to_owned(),
                "Diada de la Mercè".to_owned(),
            ],
        }))
    }

    #[test]
    fn test_partial_ratio_bounds() {
        assert_eq!(partial_ratio("", "x"), 0);
        assert_eq!(partial_ratio("vilafranca", "vilafranca"), 100);
        assert!(partial_ratio("vilafranca", "la festa de vilafranca va ser") >= 95);
        assert!(partial_ratio("abc", "xyz") < 40);
    }

    #[test]
    fn test_scale_to_percent_clamps() {
        assert_eq!(scale_to_percent(0.0), 0);
        assert_eq!(scale_to_percent(0.857), 86);
        assert_eq!(scale_to_percent(1.0), 100);
        // Out-of-range ratios clamp instead of wrapping.
        assert_eq!(scale_to_percent(-0.4), 0);
        assert_eq!(scale_to_percent(1.7), 100);
    }

    #[test]
    fn test_clean_for_matching() {
        let cleaned = clean_for_matching(
            "Quina és la millor colla castellera de Vilafranca el 2023?",
            TEAM_STOPWORDS,
        );
        assert!(!cleaned.contains("colla"));
        assert!(!cleaned.contains("castellera"));
        assert!(!cleaned.contains("2023"));
        assert!(cleaned.contains("vilafranca"));
    }

    #[test]
    fn test_team_extraction() {
        let teams = extractor().teams("La millor actuació dels Castellers de Vilafranca");
        assert!(!teams.is_empty());
        assert_eq!(teams[0], "Castellers de Vilafranca");
    }

    #[test]
    fn test_team_extraction_no_match() {
        let teams = extractor().teams("Què és un castell?");
        assert!(teams.is_empty());
    }

    #[test]
    fn test_place_extraction() {
        let places = extractor().places("Quins castells s'han fet a Tarragona?");
        assert!(places.contains(&"Tarragona".to_owned()));
    }

    #[test]
    fn test_event_extraction() {
        let events = extractor().events("Com va anar la diada de Sant Fèlix?");
        assert!(events.contains(&"Diada de Sant Fèlix".to_owned()));
    }

    #[test]
    fn test_year_extraction_forms() {
        assert_eq!(extract_years("la temporada 2023"), vec![2023]);
        assert_eq!(extract_years("la diada del 96"), vec![1996]);
        assert_eq!(extract_years("els anys del 12"), vec![2012]);
        assert_eq!(extract_years("entre 2022-2023"), vec![2022, 2023]);
        assert_eq!(extract_years("entre 2022–2023"), vec![2022, 2023]);
        assert!(extract_years("cap any aquí").is_empty());
        // Out-of-range numbers are not years.
        assert!(extract_years("el castell 3456").is_empty());
    }

    #[test]
    fn test_construction_parse_with_status() {
        let castells = extractor().constructions("Quants 3 de 9 amb folre descarregats?");
        assert_eq!(castells.len(), 1);
        assert_eq!(castells[0].code, "3d9f");
        assert_eq!(castells[0].status, Some(CastellStatus::Completed));
    }

    #[test]
    fn test_construction_direct_code() {
        let castells = extractor().constructions("m'interessa el 3d9f");
        assert_eq!(castells.len(), 1);
        assert_eq!(castells[0].code, "3d9f");
    }

    #[test]
    fn test_construction_fuzzy_fallback() {
        // No parseable pattern; the canonical codes are fuzzy-matched.
        let castells = extractor().constructions("parla'm del d9f");
        assert!(!castells.is_empty());
        assert_eq!(castells[0].code, "3d9f");
    }

    #[test]
    fn test_determinism() {
        let ex = extractor();
        let question = "La millor actuació dels Castellers de Vilafranca a Tarragona el 2023";
        let first = ex.extract_all(question);
        let second = ex.extract_all(question);
        assert_eq!(first, second);
    }
}
