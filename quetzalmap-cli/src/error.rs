//! CLI error types.

use thiserror::Error;

use quetzalmap::{ConfigError, PipelineError};

/// Errors surfaced to the user by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load config: {0}")]
    ConfigFile(#[from] ConfigError),

    #[error("Failed to set up logging: {0}")]
    Logging(String),

    #[error("Failed to create Tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to open tile store: {0}")]
    Store(#[from] quetzalmap::tile::TileStoreError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("Failed to read tile statistics: {0}")]
    Stats(#[source] std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::ConfigFile(_) => 2,
            _ => 1,
        }
    }
}
