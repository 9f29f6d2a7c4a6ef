//! Map tiles: coordinates, pixel grids, persistence, caching and dirty tracking.

mod cache;
mod coord;
mod dirty;
mod image;
mod store;

pub use cache::{TileCache, TileCacheConfig, TileCacheStats};
pub use coord::{
    ChunkPos, TileCoord, CHUNKS_PER_TILE, CHUNK_SIZE, TILE_EXTENSION, TILE_PIXELS, TILE_SIZE,
};
pub use dirty::DirtyTracker;
pub use image::{TileImage, TileImageError};
pub use store::{disk_tile_stats, DiskTileStore, TileStorage, TileStoreError};

#[cfg(test)]
pub(crate) use cache::tests::CountingStore;
