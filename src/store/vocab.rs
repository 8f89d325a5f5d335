//! Canonical vocabularies and their process-wide cache.
//!
//! Loaded once at startup from the relational store, replaced atomically on
//! explicit reload. Every entity the router emits must match one of these
//! vocabularies; unknown values are dropped, not guessed.

use std::sync::{Arc, RwLock};

use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::{Database, StoreError};

/// Lowercase a string and strip diacritics (NFD, drop combining marks).
///
/// Both sides of a team-name comparison go through this so accent-less user
/// spellings still match; the canonical form is kept for display.
pub fn normalize_accents(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// The canonical value sets for every entity kind.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    /// Team (colla) names, original accented form.
    pub teams: Vec<String>,
    /// Castell short codes from the scoring table.
    pub construction_codes: Vec<String>,
    /// Years with at least one recorded event.
    pub years: Vec<u16>,
    /// City names.
    pub places: Vec<String>,
    /// Event (diada) names.
    pub events: Vec<String>,
}

impl Vocabulary {
    /// Find the canonical team for a possibly accent-less spelling.
    pub fn match_team(&self, name: &str) -> Option<&str> {
        if let Some(exact) = self.teams.iter().find(|t| t.as_str() == name) {
            return Some(exact);
        }
        let normalized = normalize_accents(name);
        self.teams
            .iter()
            .find(|t| normalize_accents(t) == normalized)
            .map(String::as_str)
    }

    /// True when `code` is a known castell code.
    pub fn has_construction(&self, code: &str) -> bool {
        self.construction_codes.iter().any(|c| c == code)
    }

    /// True when `year` has recorded activity.
    pub fn has_year(&self, year: u16) -> bool {
        self.years.contains(&year)
    }

    /// True when `place` is a known city, exact match.
    pub fn has_place(&self, place: &str) -> bool {
        self.places.iter().any(|p| p == place)
    }

    /// True when `event` is a known diada name, exact match.
    pub fn has_event(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }
}

/// Extract years (1900–2099) from stored `DD/MM/YYYY` date strings.
fn years_from_dates(dates: &[String]) -> Vec<u16> {
    let Ok(year_re) = Regex::new(r"\b((?:19|20)\d{2})\b") else {
        return Vec::new();
    };
    let mut years: Vec<u16> = dates
        .iter()
        .filter_map(|date| year_re.find(date))
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    years.sort_unstable();
    years.dedup();
    years
}

/// Process-wide vocabulary cache.
///
/// Readers clone an `Arc` snapshot; reload swaps the snapshot in one write,
/// so a reader never observes a torn view.
pub struct VocabCache {
    inner: RwLock<Arc<Vocabulary>>,
}

impl VocabCache {
    /// An empty cache; call [`Self::reload`] at startup to prewarm.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Vocabulary::default())),
        }
    }

    /// A cache pre-seeded with a vocabulary (for tests).
    #[doc(hidden)]
    pub fn with_vocabulary(vocabulary: Vocabulary) -> Self {
        Self {
            inner: RwLock::new(Arc::new(vocabulary)),
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<Vocabulary> {
        let guard = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Load all vocabularies from the store and swap the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] when any of the loads fails; the old
    /// snapshot stays in place.
    pub async fn reload(&self, db: &Database) -> Result<(), StoreError> {
        let teams = db
            .fetch_text_column("SELECT DISTINCT name FROM colles WHERE name IS NOT NULL")
            .await?;
        let construction_codes = db
            .fetch_text_column(
                "SELECT DISTINCT castell_code FROM puntuacions WHERE castell_code IS NOT NULL",
            )
            .await?;
        let dates = db
            .fetch_text_column("SELECT DISTINCT date FROM events WHERE date IS NOT NULL")
            .await?;
        let places = db
            .fetch_text_column("SELECT DISTINCT city FROM events WHERE city IS NOT NULL")
            .await?;
        let events = db
            .fetch_text_column("SELECT DISTINCT name FROM events WHERE name IS NOT NULL")
            .await?;

        let vocabulary = Vocabulary {
            teams,
            construction_codes,
            years: years_from_dates(&dates),
            places,
            events,
        };
        tracing::info!(
            teams = vocabulary.teams.len(),
            constructions = vocabulary.construction_codes.len(),
            years = vocabulary.years.len(),
            places = vocabulary.places.len(),
            events = vocabulary.events.len(),
            "vocabulary cache reloaded"
        );

        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(vocabulary);
        Ok(())
    }
}

impl Default for VocabCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vocabulary() -> Vocabulary {
        Vocabulary {
            teams: vec![
                "Castellers de Vilafranca".to_owned(),
                "Colla Vella dels Xiquets de Valls".to_owned(),
                "Minyons de Terrassa".to_owned(),
            ],
            construction_codes: vec!["3d9f".to_owned(), "3d10fm".to_owned(), "Pd7f".to_owned()],
            years: vec![2012, 2023, 2024],
            places: vec!["Vilafranca del Penedès".to_owned(), "Tarragona".to_owned()],
            events: vec!["Diada de Sant Fèlix".to_owned()],
        }
    }

    #[test]
    fn test_normalize_accents() {
        assert_eq!(normalize_accents("Fèlix"), "felix");
        assert_eq!(normalize_accents("Penedès"), "penedes");
        assert_eq!(normalize_accents("TARRAGONA"), "tarragona");
    }

    #[test]
    fn test_match_team_exact_and_accentless() {
        let vocab = sample_vocabulary();
        assert_eq!(
            vocab.match_team("Castellers de Vilafranca"),
            Some("Castellers de Vilafranca")
        );
        // Accent-less spelling recovers the canonical accented form.
        assert_eq!(
            vocab.match_team("colla vella dels xiquets de valls"),
            Some("Colla Vella dels Xiquets de Valls")
        );
        assert_eq!(vocab.match_team("Castellers de Sabadell"), None);
    }

    #[test]
    fn test_years_from_dates() {
        let dates = vec![
            "01/11/2023".to_owned(),
            "29/08/2012".to_owned(),
            "15/08/2023".to_owned(),
            "garbage".to_owned(),
        ];
        assert_eq!(years_from_dates(&dates), vec![2012, 2023]);
    }

    #[test]
    fn test_cache_snapshot_replacement() {
        let cache = VocabCache::new();
        assert!(cache.get().teams.is_empty());

        let cache = VocabCache::with_vocabulary(sample_vocabulary());
        let snapshot = cache.get();
        assert_eq!(snapshot.teams.len(), 3);
        assert!(snapshot.has_construction("3d9f"));
        assert!(snapshot.has_year(2023));
        assert!(!snapshot.has_year(1999));
        assert!(snapshot.has_place("Tarragona"));
        assert!(snapshot.has_event("Diada de Sant Fèlix"));
    }
}
