//! Error types for flimari-core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for flimari operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by a [`SignalLoader`](crate::SignalLoader) implementation.
pub type LoadError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error types for flimari operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Input file does not exist.
    #[error("no such file or directory: {}", .0.display())]
    NotFound(PathBuf),

    /// Signal loader failed to read a file.
    #[error("failed to load {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },

    /// Operation requires a step that has not happened yet.
    #[error("invalid state: {0}")]
    State(String),

    /// Invalid configuration value (mode, parameter combination).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Unknown metric or statistic name.
    #[error("unknown {kind}: {key:?}")]
    UnknownKey { kind: &'static str, key: String },

    /// Harmonic index outside the computed harmonics.
    #[error("harmonic {harmonic} outside range 1..={available}")]
    HarmonicOutOfRange { harmonic: usize, available: usize },

    /// Index into a collection out of bounds.
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// Array shapes do not line up.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

impl Error {
    /// Shorthand for [`Error::State`].
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Shorthand for [`Error::InvalidConfiguration`].
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Returns `true` for range violations (harmonic or collection index).
    #[must_use]
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Self::HarmonicOutOfRange { .. } | Self::IndexOutOfRange { .. }
        )
    }
}
