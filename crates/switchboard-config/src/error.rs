//! Errors raised while loading Switchboard configuration.

use thiserror::Error;

/// Config loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer file could not be read.
    #[error("cannot read config file: {0}")]
    ReadFailed(#[from] std::io::Error),
    /// A layer is not valid JSON5.
    #[error("config is not valid JSON5: {0}")]
    ParseFailed(#[from] json5::Error),
    /// The merged document does not fit the config model.
    #[error("config does not match the expected shape: {0}")]
    DecodeFailed(#[from] serde_json::Error),
    /// A key is unknown, mistyped or out of range.
    #[error("invalid config at {path}: {message}")]
    InvalidField { path: String, message: String },
}
