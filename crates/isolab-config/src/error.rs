//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read .env file at {path}: {message}")]
    DotEnvError { path: PathBuf, message: String },

    #[error("Failed to render configuration as TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("XDG directory error: {0}")]
    XdgError(String),
}
