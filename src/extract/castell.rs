//! Castell code parsing from natural Catalan phrasings.
//!
//! Recognizes direct codes (`3d9f`), tower/pillar forms (`torre de 8` →
//! `2d8`, `pilar de 5` → `Pd5`), number-word forms (`tres de nou amb folre`
//! → `3d9f`) and digit forms (`3 de 7 amb agulla` → `3d7a`).
//!
//! Modifier letters always render in the order `f, m, p, a, s`, and the
//! hierarchy holds: `m` only with `f`, `p` only with `m`.

use regex::Regex;

use crate::types::CastellStatus;

/// Catalan number words accepted in word-form codes.
const NUMBER_WORDS: &[(&str, &str)] = &[
    ("zero", "0"),
    ("un", "1"),
    ("una", "1"),
    ("dos", "2"),
    ("dues", "2"),
    ("tres", "3"),
    ("quatre", "4"),
    ("cinc", "5"),
    ("sis", "6"),
    ("set", "7"),
    ("vuit", "8"),
    ("nou", "9"),
    ("deu", "10"),
];

/// Modifier words mapped to code letters. Longest phrases first so `amb
/// agulla` wins over the bare `agulla`, and `per sota` over nothing.
const MODIFIER_WORDS: &[(&str, char)] = &[
    ("per sota", 's'),
    ("amb agulla", 'a'),
    ("amb pilar", 'a'),
    ("manilles", 'm'),
    ("puntals", 'p'),
    ("agulla", 'a'),
    ("folre", 'f'),
    ("pilar", 'a'),
];

/// Canonical modifier emission order.
const MODIFIER_ORDER: &[char] = &['f', 'm', 'p', 'a', 's'];

/// Status words (with inflections) mapped to the status enum. Longest
/// phrases first so `intent desmuntat` is not swallowed by `intent`.
const STATUS_WORDS: &[(&str, CastellStatus)] = &[
    ("intents desmuntats", CastellStatus::AttemptDismantled),
    ("intent desmuntats", CastellStatus::AttemptDismantled),
    ("intent desmuntat", CastellStatus::AttemptDismantled),
    ("descarregades", CastellStatus::Completed),
    ("descarregats", CastellStatus::Completed),
    ("descarregada", CastellStatus::Completed),
    ("descarregat", CastellStatus::Completed),
    ("desmuntades", CastellStatus::AttemptDismantled),
    ("desmuntats", CastellStatus::AttemptDismantled),
    ("desmuntada", CastellStatus::AttemptDismantled),
    ("desmuntat", CastellStatus::AttemptDismantled),
    ("aconseguides", CastellStatus::Completed),
    ("aconseguits", CastellStatus::Completed),
    ("aconseguida", CastellStatus::Completed),
    ("aconseguit", CastellStatus::Completed),
    ("completades", CastellStatus::Completed),
    ("completats", CastellStatus::Completed),
    ("completada", CastellStatus::Completed),
    ("completat", CastellStatus::Completed),
    ("carregades", CastellStatus::Loaded),
    ("carregats", CastellStatus::Loaded),
    ("carregada", CastellStatus::Loaded),
    ("carregat", CastellStatus::Loaded),
    ("fallades", CastellStatus::AttemptDismantled),
    ("fallats", CastellStatus::AttemptDismantled),
    ("fallada", CastellStatus::AttemptDismantled),
    ("fallat", CastellStatus::AttemptDismantled),
    ("intents", CastellStatus::Attempt),
    ("intent", CastellStatus::Attempt),
    ("fetes", CastellStatus::Completed),
    ("fets", CastellStatus::Completed),
    ("feta", CastellStatus::Completed),
    ("fet", CastellStatus::Completed),
];

/// Collect modifier letters mentioned in `tail`, enforce the hierarchy, and
/// emit them in canonical order.
fn collect_modifiers(tail: &str) -> String {
    let mut remaining = tail.to_owned();
    let mut found: Vec<char> = Vec::new();

    for (word, code) in MODIFIER_WORDS {
        if let Some(pos) = remaining.find(word) {
            if !found.contains(code) {
                found.push(*code);
            }
            remaining.replace_range(pos..pos.saturating_add(word.len()), "");
        }
    }

    // Hierarchy: manilles needs folre; puntals needs manilles.
    if found.contains(&'m') && !found.contains(&'f') {
        found.retain(|c| *c != 'm');
    }
    if found.contains(&'p') && !found.contains(&'m') {
        found.retain(|c| *c != 'p');
    }

    MODIFIER_ORDER
        .iter()
        .filter(|c| found.contains(*c))
        .collect()
}

fn number_word(word: &str) -> Option<&'static str> {
    NUMBER_WORDS
        .iter()
        .find(|(w, _)| *w == word)
        .map(|(_, digit)| *digit)
}

/// Parse a castell code out of free text.
///
/// Returns `None` when no recognized pattern is present.
pub fn parse_castell_code(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let lowered = lowered.trim();

    // Direct code, e.g. `3d9f`, `pd7f` (the pillar prefix is case-folded).
    if let Ok(direct) = Regex::new(r"\b([0-9p]{1,2})d([0-9]{1,2})([fmpas]*)\b") {
        if let Some(caps) = direct.captures(lowered) {
            let width = caps.get(1).map_or("", |m| m.as_str());
            let height = caps.get(2).map_or("", |m| m.as_str());
            let modifiers = caps.get(3).map_or("", |m| m.as_str());
            let width = if width == "p" { "P" } else { width };
            let ordered: String = MODIFIER_ORDER
                .iter()
                .filter(|c| modifiers.contains(**c))
                .collect();
            return Some(format!("{width}d{height}{ordered}"));
        }
    }

    // Tower of K → 2dK.
    if let Ok(torre) = Regex::new(r"torre\s+de\s+([0-9]+)") {
        if let Some(caps) = torre.captures(lowered) {
            let height = caps.get(1).map_or("", |m| m.as_str());
            return Some(format!("2d{height}"));
        }
    }

    // Pillar of K → PdK. A bare "pilar de X" must not be confused with the
    // agulla modifier, which only appears after a width-height pair.
    if let Ok(pilar) = Regex::new(r"pilar\s+de\s+([0-9]+)") {
        if let Some(caps) = pilar.captures(lowered) {
            let height = caps.get(1).map_or("", |m| m.as_str());
            return Some(format!("Pd{height}"));
        }
    }

    // Number-word form: "tres de nou amb folre". Skip non-numeric
    // "X de Y" phrases ("colla de Vilafranca") and keep scanning.
    if let Ok(words) = Regex::new(r"([a-zàèéíòóú]+)\s+de\s+([a-zàèéíòóú]+)") {
        for caps in words.captures_iter(lowered) {
            let first = caps.get(1).map_or("", |m| m.as_str());
            let second = caps.get(2).map_or("", |m| m.as_str());
            if let Some(width) = number_word(first) {
                let height = number_word(second).unwrap_or(second);
                let match_end = caps.get(0).map_or(0, |m| m.end());
                let modifiers = collect_modifiers(&lowered[match_end..]);
                return Some(format!("{width}d{height}{modifiers}"));
            }
        }
    }

    // Digit form: "3 de 7 amb agulla".
    if let Ok(digits) = Regex::new(r"([0-9]+)\s+de\s+([0-9]+)") {
        if let Some(caps) = digits.captures(lowered) {
            let width = caps.get(1).map_or("", |m| m.as_str());
            let height = caps.get(2).map_or("", |m| m.as_str());
            let match_end = caps.get(0).map_or(0, |m| m.end());
            let modifiers = collect_modifiers(&lowered[match_end..]);
            return Some(format!("{width}d{height}{modifiers}"));
        }
    }

    None
}

/// Find a status word anywhere in the question.
pub fn extract_status(text: &str) -> Option<CastellStatus> {
    let lowered = text.to_lowercase();
    for (word, status) in STATUS_WORDS {
        let pattern = format!(r"\b{}\b", regex::escape(word));
        if let Ok(re) = Regex::new(&pattern) {
            if re.is_match(&lowered) {
                return Some(*status);
            }
        }
    }
    None
}

/// Display-name equivalents for the short codes (`3d9f` → `3de9f`), with
/// the historical `a`↔`p` suffix divergence between the two namings.
const CODE_TO_NAME: &[(&str, &str)] = &[
    ("2d6", "2de6"),
    ("2d6s", "2de6s"),
    ("2d7", "2de7"),
    ("2d8", "2de8"),
    ("2d8f", "2de8f"),
    ("2d9f", "2de9f"),
    ("2d9fm", "2de9fm"),
    ("3d10fm", "3de10fm"),
    ("3d6", "3de6"),
    ("3d6a", "3de6p"),
    ("3d6s", "3de6s"),
    ("3d7", "3de7"),
    ("3d7a", "3de7p"),
    ("3d7s", "3de7s"),
    ("3d8", "3de8"),
    ("3d8a", "3de8p"),
    ("3d8s", "3de8s"),
    ("3d9", "3de9"),
    ("3d9f", "3de9f"),
    ("3d9af", "3de9fp"),
    ("4d10fm", "4de10fm"),
    ("4d6", "4de6"),
    ("4d6a", "4de6p"),
    ("4d7", "4de7"),
    ("4d7a", "4de7p"),
    ("4d8", "4de8"),
    ("4d8a", "4de8p"),
    ("4d9", "4de9"),
    ("4d9f", "4de9f"),
    ("4d9af", "4de9fp"),
    ("5d6", "5de6"),
    ("5d6a", "5de6p"),
    ("5d7", "5de7"),
    ("5d7a", "5de7p"),
    ("5d8", "5de8"),
    ("5d8a", "5de8p"),
    ("5d9f", "5de9f"),
    ("7d6", "7de6"),
    ("7d6a", "7de6p"),
    ("7d7", "7de7"),
    ("7d7a", "7de7p"),
    ("7d8", "7de8"),
    ("7d8a", "7de8p"),
    ("7d9f", "7de9f"),
    ("9d6", "9de6"),
    ("9d7", "9de7"),
    ("9d8", "9de8"),
    ("9d9f", "9de9f"),
    ("Pd4", "Pde4"),
    ("Pd5", "Pde5"),
    ("Pd6", "Pde6"),
    ("Pd7f", "Pde7f"),
    ("Pd8fm", "Pde8fm"),
    ("Pd9fmp", "Pde9fmp"),
];

/// Convert a short code to its stored display name; unknown codes pass
/// through unchanged.
pub fn code_to_name(code: &str) -> &str {
    CODE_TO_NAME
        .iter()
        .find(|(short, _)| *short == code)
        .map_or(code, |(_, name)| *name)
}
