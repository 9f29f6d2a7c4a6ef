//! Reading terrain from region files.
//!
//! The decode path is: [`WorldPaths`] locates the region file,
//! [`RegionCache`] holds an opened [`RegionDocument`] per region, and each
//! document decodes chunks on demand through [`RegionDecoder`] into
//! [`ChunkSurface`]s of [`SurfaceSample`]s.

mod block;
mod cache;
mod chunk;
mod document;
mod paths;
mod region;

pub use block::{BlockId, BlockRegistry, BlockType, UNKNOWN_BLOCK_COLOR};
pub use cache::{RegionCache, RegionCacheConfig, RegionCacheStats};
pub use chunk::{
    bits_per_entry, block_index, palette_index, ChunkSurface, DecodeOptions, PackingLayout,
    SurfaceSample, CHUNK_COLUMNS, SECTION_VOLUME,
};
pub use document::RegionDocument;
pub use paths::{parse_region_file_name, WorldPaths};
pub use region::{
    ChunkLocation, RegionDecoder, RegionError, RegionHeader, COMPRESSION_GZIP, COMPRESSION_ZLIB,
    REGION_SLOTS, SECTOR_SIZE,
};

#[cfg(test)]
pub(crate) use region::fixture;
