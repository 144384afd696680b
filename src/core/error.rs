//! Error types for the CLN core.
//!
//! The engine is deliberately tolerant of *data-shape* problems: a pattern graph that can
//! never complete is simply inert, a token with no matching pattern nodes produces no
//! constructions, and a growth cycle flags the node as malformed instead of failing.
//! Only truly invalid input (an empty token, an unparseable or structurally broken
//! pattern graph) surfaces as an error, leaving the state of prior columns untouched.

use thiserror::Error;

/// Errors produced by the CLN core.
#[derive(Debug, Error)]
pub enum ClnError {
    /// The incoming token cannot be processed at all (e.g. empty surface form).
    #[error("invalid input token: {0}")]
    InvalidToken(String),

    /// A pattern graph failed structural validation at load time.
    #[error("malformed pattern graph for construction `{construction}`: {reason}")]
    MalformedPattern {
        construction: String,
        reason: String,
    },

    /// A pattern graph could not be parsed from its persisted JSON form.
    #[error("failed to parse pattern graph: {0}")]
    PatternParse(#[from] serde_json::Error),

    /// A construction id was requested that the grammar does not contain.
    #[error("unknown construction `{0}`")]
    UnknownConstruction(String),

    /// A column in the `Activated` or `Confirmed` state received raw input without a reset.
    #[error("column at position {position} does not accept input in its current state")]
    ColumnNotAccepting { position: usize },
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, ClnError>;
