//! Error types and utilities for the siren routing toolkit
//!
//! Construction-time failures (graph, configuration) and request validation
//! failures live here. Expected routing outcomes such as "no feasible route"
//! are not errors and are reported by the planner as results.

use strsim::{jaro_winkler, normalized_levenshtein};
use thiserror::Error;

/// Minimum blended similarity for a name to be offered as a suggestion.
///
/// Empirically tuned: 0.65 catches typos like "ambulence" or "fireengin"
/// without proposing "police" for unrelated input.
const MIN_SUGGESTION_SCORE: f64 = 0.65;

/// Main error type for siren operations
#[derive(Debug, Error)]
pub enum Error {
    /// Road graph input is missing, malformed or inconsistent
    #[error("Graph load failed: {0}")]
    GraphLoad(String),

    /// Router configuration could not be parsed or is out of range
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Vehicle type is not one of the configured profiles
    #[error("Unknown vehicle type '{name}'{}", hint(.suggestion))]
    UnknownVehicle {
        name: String,
        suggestion: Option<String>,
    },

    /// Request refers to nodes or positions the graph does not contain
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(" (did you mean '{name}'?)"),
        None => String::new(),
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Build an `UnknownVehicle` error, attaching the closest known name
    pub fn unknown_vehicle<S: AsRef<str>>(name: &str, known: &[S]) -> Self {
        Error::UnknownVehicle {
            name: name.to_string(),
            suggestion: suggest_correction(name, known),
        }
    }
}

/// Suggest the closest candidate for a potentially misspelled name
///
/// Scores are 70% Jaro-Winkler (prefix and transposition typos) plus 30%
/// normalized Levenshtein (insertions and deletions). Underscores, dashes and
/// spaces are treated alike so "fire engine" matches "fire_engine".
/// Returns `None` for exact matches and for inputs with no close candidate.
pub fn suggest_correction<S: AsRef<str>>(input: &str, candidates: &[S]) -> Option<String> {
    let needle = normalize(input);
    if needle.is_empty() {
        return None;
    }

    if candidates
        .iter()
        .any(|c| normalize(c.as_ref()) == needle)
    {
        return None;
    }

    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let candidate = candidate.as_ref();
        let hay = normalize(candidate);

        let mut score = jaro_winkler(&needle, &hay) * 0.7 + normalized_levenshtein(&needle, &hay) * 0.3;

        // Compound names ("fire_engine") should match when the input is one part
        for part in hay.split(' ').filter(|p| p.len() >= 4) {
            let part_similarity = jaro_winkler(&needle, part);
            if part_similarity > 0.85 {
                score = score.max(part_similarity * 0.9);
            }
        }

        if score >= MIN_SUGGESTION_SCORE && best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }

    best.map(|(name, _)| name.to_string())
}

fn normalize(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect()
}

/// Convenience result type for siren operations
pub type Result<T> = std::result::Result<T, Error>;
