//! Error types for the frame loop.

use tandem_core::CoreError;
use thiserror::Error;

/// Frame loop errors.
#[derive(Debug, Error)]
pub enum TandemError {
    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configuration file could not be read.
    #[error("configuration io: {0}")]
    Io(#[from] std::io::Error),

    /// No backend is registered under the configured name.
    #[error("render backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An earlier frame failed; the loop does not run again.
    #[error("frame loop halted after an earlier failure")]
    Halted,

    /// The core side failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for frame loop operations.
pub type TandemResult<T> = Result<T, TandemError>;
