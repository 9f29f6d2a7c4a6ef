//! In-memory tile raster.
//!
//! A [`TileImage`] owns a 512×512 grid of packed ARGB pixels behind a
//! read/write lock: any number of readers, or a single writer patching a chunk
//! or replacing the whole grid. The pixel buffer length is fixed at
//! construction and never changes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};

use super::coord::{TileCoord, CHUNK_SIZE, CHUNKS_PER_TILE, TILE_PIXELS, TILE_SIZE};

/// Errors from pixel writes with mismatched dimensions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TileImageError {
    #[error("expected {expected} pixels, got {actual}")]
    PixelCount { expected: usize, actual: usize },

    #[error("chunk offset ({x}, {z}) outside tile")]
    ChunkOutOfRange { x: usize, z: usize },
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One map tile's pixels plus its freshness state.
pub struct TileImage {
    coord: TileCoord,
    pixels: RwLock<Vec<u32>>,
    dirty: AtomicBool,
    last_modified: AtomicI64,
}

impl TileImage {
    /// Creates a fully transparent tile. New tiles start dirty.
    pub fn new(coord: TileCoord) -> Self {
        Self {
            coord,
            pixels: RwLock::new(vec![0; TILE_PIXELS]),
            dirty: AtomicBool::new(true),
            last_modified: AtomicI64::new(now_millis()),
        }
    }

    /// Creates a tile from a full pixel buffer, marked clean.
    pub fn from_pixels(coord: TileCoord, pixels: Vec<u32>) -> Result<Self, TileImageError> {
        if pixels.len() != TILE_PIXELS {
            return Err(TileImageError::PixelCount {
                expected: TILE_PIXELS,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            coord,
            pixels: RwLock::new(pixels),
            dirty: AtomicBool::new(false),
            last_modified: AtomicI64::new(now_millis()),
        })
    }

    pub fn coord(&self) -> &TileCoord {
        &self.coord
    }

    /// Copies a 16×16 chunk of pixels into the tile at chunk offset
    /// `(chunk_x, chunk_z)`, each in `0..32`.
    ///
    /// All 16 rows are written under one exclusive hold, so readers see either
    /// the old chunk or the new one.
    pub fn patch_chunk(
        &self,
        chunk_x: usize,
        chunk_z: usize,
        chunk_pixels: &[u32],
    ) -> Result<(), TileImageError> {
        if chunk_pixels.len() != CHUNK_SIZE * CHUNK_SIZE {
            return Err(TileImageError::PixelCount {
                expected: CHUNK_SIZE * CHUNK_SIZE,
                actual: chunk_pixels.len(),
            });
        }
        let span = CHUNKS_PER_TILE as usize;
        if chunk_x >= span || chunk_z >= span {
            return Err(TileImageError::ChunkOutOfRange {
                x: chunk_x,
                z: chunk_z,
            });
        }

        let offset_x = chunk_x * CHUNK_SIZE;
        let offset_z = chunk_z * CHUNK_SIZE;

        let mut pixels = self.pixels.write();
        for (row, src) in chunk_pixels.chunks_exact(CHUNK_SIZE).enumerate() {
            let dst = (offset_z + row) * TILE_SIZE + offset_x;
            pixels[dst..dst + CHUNK_SIZE].copy_from_slice(src);
        }
        drop(pixels);

        self.touch();
        Ok(())
    }

    /// Replaces every pixel of the tile.
    pub fn replace_pixels(&self, all_pixels: &[u32]) -> Result<(), TileImageError> {
        if all_pixels.len() != TILE_PIXELS {
            return Err(TileImageError::PixelCount {
                expected: TILE_PIXELS,
                actual: all_pixels.len(),
            });
        }
        self.pixels.write().copy_from_slice(all_pixels);
        self.touch();
        Ok(())
    }

    /// Shared read access to the pixel grid (row-major, `TILE_SIZE` stride).
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u32>> {
        self.pixels.read()
    }

    /// Copy of the pixel grid taken under the read lock.
    pub fn snapshot(&self) -> Vec<u32> {
        self.pixels.read().clone()
    }

    /// Pixel at `(x, z)`, or `None` outside the tile.
    pub fn pixel(&self, x: usize, z: usize) -> Option<u32> {
        if x >= TILE_SIZE || z >= TILE_SIZE {
            return None;
        }
        Some(self.pixels.read()[z * TILE_SIZE + x])
    }

    /// True when every pixel is fully transparent.
    pub fn is_blank(&self) -> bool {
        self.pixels.read().iter().all(|&p| p == 0)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Marks the tile dirty and stamps the modification time.
    pub fn touch(&self) {
        self.last_modified.store(now_millis(), Ordering::Release);
        self.dirty.store(true, Ordering::Release);
    }

    /// Last modification time in milliseconds since the Unix epoch.
    pub fn last_modified(&self) -> i64 {
        self.last_modified.load(Ordering::Acquire)
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_size(&self) -> usize {
        TILE_PIXELS * std::mem::size_of::<u32>()
    }
}

impl fmt::Debug for TileImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileImage")
            .field("coord", &self.coord)
            .field("dirty", &self.is_dirty())
            .field("last_modified", &self.last_modified())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    fn coord() -> TileCoord {
        TileCoord::new("world", 0, 0, 0)
    }

    #[test]
    fn test_new_tile_is_blank_and_dirty() {
        let tile = TileImage::new(coord());
        assert_eq!(tile.read().len(), TILE_PIXELS);
        assert!(tile.is_blank());
        assert!(tile.is_dirty());
    }

    #[test]
    fn test_from_pixels_is_clean() {
        let tile = TileImage::from_pixels(coord(), vec![7; TILE_PIXELS]).unwrap();
        assert!(!tile.is_dirty());
        assert_eq!(tile.pixel(511, 511), Some(7));
    }

    #[test]
    fn test_from_pixels_rejects_wrong_length() {
        let err = TileImage::from_pixels(coord(), vec![0; 10]).unwrap_err();
        assert_eq!(
            err,
            TileImageError::PixelCount {
                expected: TILE_PIXELS,
                actual: 10
            }
        );
    }

    #[test]
    fn test_patch_chunk_writes_only_its_region() {
        let tile = TileImage::from_pixels(coord(), vec![0; TILE_PIXELS]).unwrap();
        let chunk: Vec<u32> = (0..256).map(|i| 0xFF00_0000 | i).collect();

        tile.patch_chunk(1, 2, &chunk).unwrap();

        // Top-left of chunk (1, 2) is pixel (16, 32)
        assert_eq!(tile.pixel(16, 32), Some(0xFF00_0000));
        assert_eq!(tile.pixel(31, 47), Some(0xFF00_0000 | 255));
        assert_eq!(tile.pixel(15, 32), Some(0));
        assert_eq!(tile.pixel(32, 32), Some(0));
        assert_eq!(tile.pixel(16, 48), Some(0));
        assert!(tile.is_dirty());
    }

    #[test]
    fn test_patch_chunk_rejects_bad_input() {
        let tile = TileImage::new(coord());
        assert!(matches!(
            tile.patch_chunk(0, 0, &[0; 10]),
            Err(TileImageError::PixelCount { .. })
        ));
        assert!(matches!(
            tile.patch_chunk(32, 0, &[0; 256]),
            Err(TileImageError::ChunkOutOfRange { .. })
        ));
    }

    #[test]
    fn test_replace_pixels_updates_timestamp() {
        let tile = TileImage::from_pixels(coord(), vec![0; TILE_PIXELS]).unwrap();
        let before = tile.last_modified();
        thread::sleep(std::time::Duration::from_millis(5));

        tile.replace_pixels(&vec![1; TILE_PIXELS]).unwrap();

        assert!(tile.last_modified() >= before);
        assert!(tile.is_dirty());
        assert_eq!(tile.pixel(100, 100), Some(1));
    }

    #[test]
    fn test_concurrent_reader_never_sees_torn_chunk_row() {
        let tile = Arc::new(TileImage::new(coord()));
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let tile = Arc::clone(&tile);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut value = 1u32;
                while !stop.load(Ordering::Relaxed) {
                    tile.patch_chunk(3, 3, &[value; 256]).unwrap();
                    value = value.wrapping_add(1);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let tile = Arc::clone(&tile);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let pixels = tile.read();
                        let first = pixels[48 * TILE_SIZE + 48];
                        for row in 0..CHUNK_SIZE {
                            let start = (48 + row) * TILE_SIZE + 48;
                            for &p in &pixels[start..start + CHUNK_SIZE] {
                                assert_eq!(p, first, "torn chunk observed");
                            }
                        }
                    }
                })
            })
            .collect();

        for reader in readers {
            reader.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }
}
