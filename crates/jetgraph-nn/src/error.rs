//! Error types for jetgraph.

use std::fmt;

use thiserror::Error;

/// Family of interchangeable components selected by a configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Adjacency,
    MatrixActivation,
    Distance,
    MessagePassing,
    Update,
    Aggregation,
    Schedule,
    Readout,
    Activation,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentKind::Adjacency => "adjacency",
            ComponentKind::MatrixActivation => "matrix activation",
            ComponentKind::Distance => "distance",
            ComponentKind::MessagePassing => "message passing",
            ComponentKind::Update => "update",
            ComponentKind::Aggregation => "aggregation",
            ComponentKind::Schedule => "schedule",
            ComponentKind::Readout => "readout",
            ComponentKind::Activation => "activation",
        };
        f.write_str(name)
    }
}

/// Jetgraph error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// A configuration key names no known variant.
    #[error("invalid config: unknown {kind} variant `{key}`")]
    UnknownVariant { kind: ComponentKind, key: String },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Tensor shape disagrees with the configured model.
    #[error("shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        got: String,
    },

    /// Config file could not be read or written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn unknown(kind: ComponentKind, key: &str) -> Self {
        Error::UnknownVariant {
            kind,
            key: key.to_string(),
        }
    }

    pub(crate) fn shape(what: &'static str, expected: impl fmt::Debug, got: impl fmt::Debug) -> Self {
        Error::ShapeMismatch {
            what,
            expected: format!("{expected:?}"),
            got: format!("{got:?}"),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
