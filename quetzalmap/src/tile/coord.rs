//! Tile and chunk coordinate types.
//!
//! A tile covers exactly one region file: 32×32 chunks of 16×16 columns, rendered
//! one pixel per column into a 512×512 image. The tile grid and the region grid are
//! therefore the same grid, which keeps every conversion a floor-division.

use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

/// Side length of a chunk in block columns.
pub const CHUNK_SIZE: usize = 16;

/// Number of chunks along one side of a tile (and of a region file).
pub const CHUNKS_PER_TILE: i32 = 32;

/// Side length of a tile in pixels.
pub const TILE_SIZE: usize = CHUNK_SIZE * CHUNKS_PER_TILE as usize;

/// Total pixels in one tile.
pub const TILE_PIXELS: usize = TILE_SIZE * TILE_SIZE;

/// File extension of persisted tiles.
pub const TILE_EXTENSION: &str = "png";

/// Position of a chunk in world chunk space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Region (and tile) grid position owning this chunk.
    #[inline]
    pub fn region(&self) -> (i32, i32) {
        (
            self.x.div_euclid(CHUNKS_PER_TILE),
            self.z.div_euclid(CHUNKS_PER_TILE),
        )
    }

    /// Position within the owning region, each axis in `0..32`.
    #[inline]
    pub fn local(&self) -> (usize, usize) {
        (
            self.x.rem_euclid(CHUNKS_PER_TILE) as usize,
            self.z.rem_euclid(CHUNKS_PER_TILE) as usize,
        )
    }

    /// Builds a global chunk position from a region and a local offset.
    #[inline]
    pub fn from_region_local(region_x: i32, region_z: i32, local_x: usize, local_z: usize) -> Self {
        Self {
            x: region_x * CHUNKS_PER_TILE + local_x as i32,
            z: region_z * CHUNKS_PER_TILE + local_z as i32,
        }
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Coordinate of one map tile.
///
/// Equality and hashing cover all four fields, which makes this the key used by
/// every cache tier, the disk store, the dirty set and live update events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub world: String,
    pub zoom: u8,
    pub x: i32,
    pub z: i32,
}

impl TileCoord {
    pub fn new(world: impl Into<String>, zoom: u8, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            zoom,
            x,
            z,
        }
    }

    /// Tile owning the given chunk.
    pub fn for_chunk(world: impl Into<String>, zoom: u8, chunk: ChunkPos) -> Self {
        let (x, z) = chunk.region();
        Self::new(world, zoom, x, z)
    }

    /// The tile offset by `(dx, dz)` in the same world and zoom level.
    pub fn offset(&self, dx: i32, dz: i32) -> Self {
        Self {
            world: self.world.clone(),
            zoom: self.zoom,
            x: self.x + dx,
            z: self.z + dz,
        }
    }

    /// Region file coordinates backing this tile.
    #[inline]
    pub fn region(&self) -> (i32, i32) {
        (self.x, self.z)
    }

    /// File name of this tile, e.g. `3_-2.png`.
    pub fn file_name(&self) -> String {
        format!("{}_{}.{}", self.x, self.z, TILE_EXTENSION)
    }

    /// Path relative to the tiles root: `{world}/{zoom}/{x}_{z}.png`.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.world)
            .join(self.zoom.to_string())
            .join(self.file_name())
    }

    /// Parses a fetch path of the form `/tiles/{world}/{zoom}/{x}_{z}.png`.
    ///
    /// Returns `None` for anything that does not match exactly.
    pub fn from_request_path(path: &str) -> Option<Self> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| Regex::new(r"^/tiles/([^/]+)/(\d+)/(-?\d+)_(-?\d+)\.png$").ok())
            .as_ref()?;

        let caps = pattern.captures(path)?;
        let world = caps.get(1)?.as_str();
        let zoom = caps.get(2)?.as_str().parse().ok()?;
        let x = caps.get(3)?.as_str().parse().ok()?;
        let z = caps.get(4)?.as_str().parse().ok()?;

        Some(Self::new(world, zoom, x, z))
    }

    /// Fetch path served for this tile.
    pub fn request_path(&self) -> String {
        format!("/tiles/{}/{}/{}", self.world, self.zoom, self.file_name())
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:({}, {})",
            self.world, self.zoom, self.x, self.z
        )
    }
}
