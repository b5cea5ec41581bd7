//! Error types for the synth engine.
//!
//! Out-of-range parameter values are never errors: they are clamped where
//! they enter the engine. Only malformed input that cannot be interpreted at
//! all is reported.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A string-encoded preset sub-object (or the record itself) is not valid JSON.
    #[error("invalid preset {group}: {source}")]
    PresetJson {
        group: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Engine configuration passed by the host is not valid JSON.
    #[error("invalid engine config: {0}")]
    Config(#[source] serde_json::Error),

    /// Parameter category name not recognised.
    #[error("unknown parameter category '{0}'")]
    UnknownCategory(String),

    /// Field name does not exist in the given category.
    #[error("unknown field '{field}' in category '{category}'")]
    UnknownField { category: &'static str, field: String },

    /// Note name could not be parsed (expected e.g. "C4", "F#3", "Bb5").
    #[error("invalid note '{0}'")]
    InvalidNote(String),
}

impl EngineError {
    pub(crate) fn preset_json(group: &'static str, source: serde_json::Error) -> Self {
        EngineError::PresetJson { group, source }
    }
}
