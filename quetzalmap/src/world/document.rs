//! Lazily decoded region.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use super::chunk::ChunkSurface;
use super::region::{RegionDecoder, RegionError, RegionHeader, REGION_SLOTS};
use crate::tile::{ChunkPos, CHUNKS_PER_TILE};

/// One region file with its chunks decoded on first access.
///
/// The location table is read when the document is opened. Each chunk slot is
/// filled at most once: a decoded surface, or `None` for absent and corrupt
/// chunks. I/O failures are not remembered, so the next access retries.
pub struct RegionDocument {
    world: String,
    region_x: i32,
    region_z: i32,
    path: PathBuf,
    header: Option<RegionHeader>,
    decoder: Arc<RegionDecoder>,
    slots: Box<[OnceLock<Option<Arc<ChunkSurface>>>]>,
}

impl RegionDocument {
    /// Opens the region at `path`. A missing file gives a document whose
    /// chunks are all absent.
    pub fn open(
        world: impl Into<String>,
        region_x: i32,
        region_z: i32,
        path: impl Into<PathBuf>,
        decoder: Arc<RegionDecoder>,
    ) -> Result<Self, RegionError> {
        let path = path.into();
        let world = world.into();

        let header = match File::open(&path) {
            Ok(file) => Some(RegionHeader::read(&mut BufReader::new(file))?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(world = %world, region_x, region_z, "Region file not present");
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            world,
            region_x,
            region_z,
            path,
            header,
            decoder,
            slots: (0..REGION_SLOTS).map(|_| OnceLock::new()).collect(),
        })
    }

    pub fn world(&self) -> &str {
        &self.world
    }

    pub fn region(&self) -> (i32, i32) {
        (self.region_x, self.region_z)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the region file existed when the document was opened.
    pub fn exists(&self) -> bool {
        self.header.is_some()
    }

    /// Chunks listed in the location table.
    pub fn present_chunks(&self) -> usize {
        self.header.as_ref().map_or(0, RegionHeader::present_chunks)
    }

    /// Chunks decoded so far, including ones found absent or corrupt.
    pub fn decoded_chunks(&self) -> usize {
        self.slots.iter().filter(|s| s.get().is_some()).count()
    }

    /// Surface of the chunk at region-local `(local_x, local_z)`.
    pub fn chunk(
        &self,
        local_x: usize,
        local_z: usize,
    ) -> Result<Option<Arc<ChunkSurface>>, RegionError> {
        let span = CHUNKS_PER_TILE as usize;
        if local_x >= span || local_z >= span {
            return Ok(None);
        }
        let Some(header) = &self.header else {
            return Ok(None);
        };

        let slot = &self.slots[local_x + local_z * span];
        if let Some(cached) = slot.get() {
            return Ok(cached.clone());
        }

        let Some(location) = header.location(local_x, local_z) else {
            let _ = slot.set(None);
            return Ok(None);
        };

        let pos = ChunkPos::from_region_local(self.region_x, self.region_z, local_x, local_z);
        let mut reader = BufReader::new(File::open(&self.path)?);
        match self.decoder.decode_at(&mut reader, location, pos) {
            Ok(surface) => {
                let _ = slot.set(surface.map(Arc::new));
            }
            Err(e) if e.is_corrupt() => {
                if slot.set(None).is_ok() {
                    warn!(
                        world = %self.world,
                        chunk = %pos,
                        error = %e,
                        "Corrupt chunk skipped"
                    );
                }
            }
            Err(e) => return Err(e),
        }

        Ok(slot.get().cloned().flatten())
    }

    /// Surface of the chunk at a global position, if it belongs to this region.
    pub fn chunk_at(&self, chunk: ChunkPos) -> Result<Option<Arc<ChunkSurface>>, RegionError> {
        if chunk.region() != (self.region_x, self.region_z) {
            return Ok(None);
        }
        let (local_x, local_z) = chunk.local();
        self.chunk(local_x, local_z)
    }
}

impl fmt::Debug for RegionDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionDocument")
            .field("world", &self.world)
            .field("region", &(self.region_x, self.region_z))
            .field("exists", &self.exists())
            .field("decoded", &self.decoded_chunks())
            .finish()
    }
}
