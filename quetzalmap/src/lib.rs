//! QuetzalMap - live top-down web map tiles for block worlds
//!
//! This library turns region files into 512×512 PNG map tiles and keeps them
//! current as the world is edited:
//!
//! - [`world`] decodes region files into per-column surface samples
//! - [`render`] colors those samples into tile pixels
//! - [`tile`] holds tile coordinates, images, the tiered cache and the disk store
//! - [`pipeline`] fetches tiles through the cache and renders the missing ones
//! - [`scheduler`] debounces world edits into tile re-renders
//! - [`live`] pushes tile updates to connected map clients
//!
//! A typical server wires it up like this:
//!
//! ```no_run
//! use std::sync::Arc;
//! use quetzalmap::{MapConfig, SubscriberHub, TilePipeline, UpdateScheduler};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> quetzalmap::Result<()> {
//! let config = MapConfig::new("/srv/map/tiles", "/srv/server");
//! let pipeline = Arc::new(TilePipeline::from_config(&config)?);
//! let hub = Arc::new(SubscriberHub::new());
//! let scheduler = Arc::new(UpdateScheduler::from_config(
//!     Arc::clone(&pipeline),
//!     Arc::clone(&hub),
//!     &config,
//! ));
//!
//! let shutdown = CancellationToken::new();
//! let updates = scheduler.spawn(shutdown.clone());
//! hub.spawn_keepalive(config.keepalive, shutdown.clone());
//!
//! scheduler.schedule_chunk_update("world", 5, 5);
//!
//! shutdown.cancel();
//! let _ = updates.await;
//! pipeline.flush().await;
//! hub.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod live;
pub mod markers;
pub mod pipeline;
pub mod pregen;
pub mod render;
pub mod scheduler;
pub mod tile;
pub mod world;

pub use config::{ConfigError, MapConfig};
pub use error::{MapError, PipelineError, Result};
pub use live::{ChannelSink, EventSink, HubStats, SubscriberHub};
pub use markers::{Marker, MarkerRegistry, MarkerSource};
pub use pipeline::{PipelineStats, TilePipeline};
pub use pregen::{PregenStats, TilePreGenerator};
pub use scheduler::{BatchReport, ChunkUpdate, UpdateScheduler};
pub use tile::{TileCoord, TileImage};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
