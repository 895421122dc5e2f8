//! Error types for proxy-vet

use crate::proxy::probe::ProbeFailure;
use std::io;

/// Error type for registry, probe and validation operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad proxy URL or other top-level input, rejected before any network call
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    /// The direct (no-proxy) probe failed, so no anonymity verdict is possible
    #[error("Baseline origin unavailable: {0}")]
    BaselineUnavailable(ProbeFailure),
    /// The validation pass was cancelled by the caller
    #[error("Validation pass cancelled")]
    Cancelled,
    /// A single source adapter failed to produce proxies
    #[error("Source '{source_name}' failed: {message}")]
    Source {
        source_name: String,
        message: String,
    },
    /// Invalid settings
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a source failure for the named adapter
    pub fn source_failure(source_name: impl Into<String>, message: impl ToString) -> Self {
        Error::Source {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }
}

/// Result type for proxy-vet operations
pub type Result<T> = std::result::Result<T, Error>;
