//! Durable tile persistence.
//!
//! Tiles are stored as PNG files at `{tiles_root}/{world}/{zoom}/{x}_{z}.png`.
//! Writes go to a uniquely named temporary sibling first and are then renamed
//! over the final path, so a reader never observes a partially written tile.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use image::{ImageFormat, RgbaImage};
use thiserror::Error;
use tracing::{debug, warn};

use super::coord::{TileCoord, TILE_PIXELS, TILE_SIZE};
use super::image::TileImage;

/// Errors from tile persistence.
#[derive(Debug, Error)]
pub enum TileStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("stored tile has dimensions {width}x{height}, expected {expected}x{expected}")]
    Dimensions {
        width: u32,
        height: u32,
        expected: u32,
    },
}

/// Persistence backend for tiles.
///
/// The tile cache depends on this trait rather than on the disk layout so the
/// cold tier can be swapped or observed.
pub trait TileStorage: Send + Sync {
    /// Persists a tile and marks it clean.
    fn save(&self, tile: &TileImage) -> Result<(), TileStoreError>;

    /// Loads a tile, returning `Ok(None)` when nothing is stored for `coord`.
    fn load(&self, coord: &TileCoord) -> Result<Option<TileImage>, TileStoreError>;

    /// Removes a stored tile. Returns whether a file existed.
    fn delete(&self, coord: &TileCoord) -> Result<bool, TileStoreError>;

    fn exists(&self, coord: &TileCoord) -> bool;

    fn last_modified(&self, coord: &TileCoord) -> Option<SystemTime>;

    /// Stored size in bytes.
    fn size(&self, coord: &TileCoord) -> Option<u64>;

    /// Raw encoded bytes of a stored tile.
    fn read_bytes(&self, coord: &TileCoord) -> Result<Option<Vec<u8>>, TileStoreError>;
}

/// Disk-backed tile store.
#[derive(Debug)]
pub struct DiskTileStore {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl DiskTileStore {
    /// Creates a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, TileStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of a tile file.
    pub fn tile_path(&self, coord: &TileCoord) -> PathBuf {
        self.root.join(coord.relative_path())
    }

    fn temp_path(&self, final_path: &Path) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        final_path.with_file_name(format!("{}.{}.{}.tmp", name, std::process::id(), n))
    }
}

/// Packed ARGB to RGBA byte order.
fn argb_to_rgba(pixels: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len() * 4);
    for &p in pixels {
        out.extend_from_slice(&[(p >> 16) as u8, (p >> 8) as u8, p as u8, (p >> 24) as u8]);
    }
    out
}

fn rgba_to_argb(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| {
            (c[3] as u32) << 24 | (c[0] as u32) << 16 | (c[1] as u32) << 8 | c[2] as u32
        })
        .collect()
}

impl TileStorage for DiskTileStore {
    fn save(&self, tile: &TileImage) -> Result<(), TileStoreError> {
        let path = self.tile_path(tile.coord());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let rgba = argb_to_rgba(&tile.read());
        let image = RgbaImage::from_raw(TILE_SIZE as u32, TILE_SIZE as u32, rgba).ok_or(
            TileStoreError::Dimensions {
                width: TILE_SIZE as u32,
                height: TILE_SIZE as u32,
                expected: TILE_SIZE as u32,
            },
        )?;

        let temp = self.temp_path(&path);
        if let Err(e) = image.save_with_format(&temp, ImageFormat::Png) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        tile.mark_clean();
        debug!(tile = %tile.coord(), path = %path.display(), "Tile saved");
        Ok(())
    }

    fn load(&self, coord: &TileCoord) -> Result<Option<TileImage>, TileStoreError> {
        let path = self.tile_path(coord);
        if !path.exists() {
            return Ok(None);
        }

        let decoded = image::open(&path)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        if width as usize != TILE_SIZE || height as usize != TILE_SIZE {
            warn!(tile = %coord, width, height, "Stored tile has wrong dimensions");
            return Err(TileStoreError::Dimensions {
                width,
                height,
                expected: TILE_SIZE as u32,
            });
        }

        let pixels = rgba_to_argb(decoded.as_raw());
        debug_assert_eq!(pixels.len(), TILE_PIXELS);
        let tile = TileImage::from_pixels(coord.clone(), pixels).map_err(|_| {
            TileStoreError::Dimensions {
                width,
                height,
                expected: TILE_SIZE as u32,
            }
        })?;
        Ok(Some(tile))
    }

    fn delete(&self, coord: &TileCoord) -> Result<bool, TileStoreError> {
        match fs::remove_file(self.tile_path(coord)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, coord: &TileCoord) -> bool {
        self.tile_path(coord).is_file()
    }

    fn last_modified(&self, coord: &TileCoord) -> Option<SystemTime> {
        fs::metadata(self.tile_path(coord))
            .and_then(|m| m.modified())
            .ok()
    }

    fn size(&self, coord: &TileCoord) -> Option<u64> {
        fs::metadata(self.tile_path(coord)).map(|m| m.len()).ok()
    }

    fn read_bytes(&self, coord: &TileCoord) -> Result<Option<Vec<u8>>, TileStoreError> {
        match fs::read(self.tile_path(coord)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Counts tile files and their total size under a tiles root.
pub fn disk_tile_stats(root: &Path) -> io::Result<(u64, u64)> {
    let mut files = 0u64;
    let mut bytes = 0u64;
    if !root.exists() {
        return Ok((0, 0));
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if entry.path().extension().is_some_and(|e| e == "png") {
                files += 1;
                bytes += entry.metadata()?.len();
            }
        }
    }
    Ok((files, bytes))
}
