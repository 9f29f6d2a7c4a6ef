//! Crate-level error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::render::RenderError;
use crate::tile::{TileCoord, TileStoreError};
use crate::world::RegionError;

/// Errors from the tile pipeline.
///
/// `Clone` so one failed render can be handed to every caller that was
/// waiting on the same coordinate. Underlying errors are carried as text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Rendering the tile failed.
    #[error("failed to render tile {tile}: {message}")]
    Render { tile: TileCoord, message: String },

    /// Reading or writing the tile store failed.
    #[error("tile store error for {tile}: {message}")]
    Store { tile: TileCoord, message: String },

    /// A blocking task panicked or was cancelled.
    #[error("task for tile {tile} did not complete: {message}")]
    Task { tile: TileCoord, message: String },

    /// The render that this request was waiting on went away without a result.
    #[error("in-flight render of tile {0} was abandoned")]
    Abandoned(TileCoord),

    /// The pipeline no longer accepts work.
    #[error("tile pipeline is shut down")]
    Closed,

    /// A pre-generation run is already in progress.
    #[error("pre-generation is already running")]
    PregenRunning,
}

impl PipelineError {
    pub(crate) fn render(tile: &TileCoord, e: &RenderError) -> Self {
        PipelineError::Render {
            tile: tile.clone(),
            message: e.to_string(),
        }
    }

    pub(crate) fn store(tile: &TileCoord, e: &TileStoreError) -> Self {
        PipelineError::Store {
            tile: tile.clone(),
            message: e.to_string(),
        }
    }

    pub(crate) fn task(tile: &TileCoord, e: &tokio::task::JoinError) -> Self {
        PipelineError::Task {
            tile: tile.clone(),
            message: e.to_string(),
        }
    }
}

/// Any error the library can return.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("region error: {0}")]
    Region(#[from] RegionError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("tile store error: {0}")]
    Store(#[from] TileStoreError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Result alias over [`MapError`].
pub type Result<T> = std::result::Result<T, MapError>;
