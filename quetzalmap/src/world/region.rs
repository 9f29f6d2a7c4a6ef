//! Region file decoding.
//!
//! A region file holds a 32×32 grid of chunks. The first 4096 bytes are a
//! table of 1024 big-endian `u32` locations, `sector_offset << 8 | sector_count`,
//! indexed by `local_x + local_z * 32`. A zero entry means the chunk was never
//! generated. Each chunk payload starts at `sector_offset * 4096` with a
//! big-endian `u32` length (which counts the compression byte), a compression
//! tag and the compressed tagged-tree data.

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;

use flate2::read::{GzDecoder, ZlibDecoder};
use quartz_nbt::io::{read_nbt, Flavor};
use thiserror::Error;
use tracing::trace;

use super::block::BlockRegistry;
use super::chunk::{ChunkSurface, DecodeOptions};
use crate::tile::{ChunkPos, CHUNKS_PER_TILE};

/// Size of one file sector, and of the location table.
pub const SECTOR_SIZE: u64 = 4096;

/// Chunk slots in one region.
pub const REGION_SLOTS: usize = (CHUNKS_PER_TILE * CHUNKS_PER_TILE) as usize;

/// Compression tag for gzip payloads.
pub const COMPRESSION_GZIP: u8 = 1;

/// Compression tag for zlib payloads.
pub const COMPRESSION_ZLIB: u8 = 2;

/// Errors decoding a region file or one of its chunks.
///
/// Everything except [`RegionError::Io`] describes corrupt data confined to a
/// single chunk.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("chunk ({x}, {z}): payload truncated (declared {declared} bytes)")]
    Truncated { x: usize, z: usize, declared: u32 },

    #[error("chunk ({x}, {z}): declared length {length} exceeds {sectors} sectors")]
    InvalidLength {
        x: usize,
        z: usize,
        length: u32,
        sectors: u8,
    },

    #[error("chunk ({x}, {z}): unsupported compression type {tag}")]
    UnsupportedCompression { x: usize, z: usize, tag: u8 },

    #[error("chunk ({x}, {z}): decompression failed: {source}")]
    Decompress {
        x: usize,
        z: usize,
        #[source]
        source: io::Error,
    },

    #[error("chunk ({x}, {z}): malformed tagged data: {message}")]
    Nbt { x: usize, z: usize, message: String },

    #[error("chunk ({x}, {z}): no section list")]
    MissingSections { x: usize, z: usize },
}

impl RegionError {
    /// True for malformed data, false for I/O failures worth retrying.
    pub fn is_corrupt(&self) -> bool {
        !matches!(self, RegionError::Io(_))
    }
}

/// Where a chunk's payload lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub sector_offset: u32,
    pub sector_count: u8,
}

impl ChunkLocation {
    /// Decodes a table entry. Zero offset or zero count means absent.
    pub fn from_entry(entry: u32) -> Option<Self> {
        let location = Self {
            sector_offset: entry >> 8,
            sector_count: (entry & 0xFF) as u8,
        };
        (location.sector_offset != 0 && location.sector_count != 0).then_some(location)
    }

    pub fn byte_offset(&self) -> u64 {
        self.sector_offset as u64 * SECTOR_SIZE
    }
}

#[inline]
fn slot_index(local_x: usize, local_z: usize) -> usize {
    local_x + local_z * CHUNKS_PER_TILE as usize
}

/// The location table of a region file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionHeader {
    entries: Box<[u32]>,
}

impl RegionHeader {
    /// Reads the table from the start of `reader`.
    ///
    /// A file shorter than the table (including an empty file) yields zero
    /// entries for the missing part, so those chunks read as absent.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self, RegionError> {
        let mut raw = vec![0u8; SECTOR_SIZE as usize];
        let mut filled = 0;
        while filled < raw.len() {
            match reader.read(&mut raw[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let entries = raw
            .chunks_exact(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self { entries })
    }

    pub fn location(&self, local_x: usize, local_z: usize) -> Option<ChunkLocation> {
        let span = CHUNKS_PER_TILE as usize;
        if local_x >= span || local_z >= span {
            return None;
        }
        ChunkLocation::from_entry(self.entries[slot_index(local_x, local_z)])
    }

    /// Number of chunks with a location.
    pub fn present_chunks(&self) -> usize {
        self.entries
            .iter()
            .filter(|&&e| ChunkLocation::from_entry(e).is_some())
            .count()
    }
}

/// Decodes chunk surfaces from region data.
#[derive(Debug, Clone)]
pub struct RegionDecoder {
    registry: Arc<BlockRegistry>,
    options: DecodeOptions,
}

impl RegionDecoder {
    pub fn new(registry: Arc<BlockRegistry>, options: DecodeOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Decodes the chunk at global position `chunk` from a region stream.
    ///
    /// Returns `Ok(None)` when the chunk is not present in the file.
    pub fn decode_chunk<R: Read + Seek>(
        &self,
        reader: &mut R,
        chunk: ChunkPos,
    ) -> Result<Option<ChunkSurface>, RegionError> {
        let (local_x, local_z) = chunk.local();
        reader.seek(SeekFrom::Start(4 * slot_index(local_x, local_z) as u64))?;

        let mut entry = [0u8; 4];
        match reader.read_exact(&mut entry) {
            Ok(()) => {}
            // Short location table: treat as not generated
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        match ChunkLocation::from_entry(u32::from_be_bytes(entry)) {
            Some(location) => self.decode_at(reader, location, chunk),
            None => Ok(None),
        }
    }

    /// Decodes the chunk payload at a known location.
    pub fn decode_at<R: Read + Seek>(
        &self,
        reader: &mut R,
        location: ChunkLocation,
        chunk: ChunkPos,
    ) -> Result<Option<ChunkSurface>, RegionError> {
        let (x, z) = chunk.local();
        reader.seek(SeekFrom::Start(location.byte_offset()))?;

        let mut prefix = [0u8; 5];
        if let Err(e) = reader.read_exact(&mut prefix) {
            return Err(truncated_or_io(e, x, z, 0));
        }
        let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let tag = prefix[4];

        if length == 0 || tag == 0 {
            trace!(x, z, "Empty chunk payload");
            return Ok(None);
        }

        // The length prefix itself sits inside the allocated sectors
        let capacity = location.sector_count as u64 * SECTOR_SIZE;
        if length as u64 + 4 > capacity {
            return Err(RegionError::InvalidLength {
                x,
                z,
                length,
                sectors: location.sector_count,
            });
        }

        let mut compressed = vec![0u8; length as usize - 1];
        if let Err(e) = reader.read_exact(&mut compressed) {
            return Err(truncated_or_io(e, x, z, length));
        }

        let raw = decompress(&compressed, tag, x, z)?;
        let (root, _) = read_nbt(&mut Cursor::new(raw), Flavor::Uncompressed).map_err(|e| {
            RegionError::Nbt {
                x,
                z,
                message: e.to_string(),
            }
        })?;

        ChunkSurface::from_nbt(&root, chunk, &self.registry, &self.options)
            .map(Some)
            .ok_or(RegionError::MissingSections { x, z })
    }
}

fn truncated_or_io(e: io::Error, x: usize, z: usize, declared: u32) -> RegionError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        RegionError::Truncated { x, z, declared }
    } else {
        RegionError::Io(e)
    }
}

fn decompress(data: &[u8], tag: u8, x: usize, z: usize) -> Result<Vec<u8>, RegionError> {
    let mut out = Vec::with_capacity(data.len() * 4);
    let result = match tag {
        COMPRESSION_GZIP => GzDecoder::new(data).read_to_end(&mut out),
        COMPRESSION_ZLIB => ZlibDecoder::new(data).read_to_end(&mut out),
        other => return Err(RegionError::UnsupportedCompression { x, z, tag: other }),
    };
    result.map_err(|source| RegionError::Decompress { x, z, source })?;
    Ok(out)
}

/// Builders for synthetic region files used by tests across the crate.
#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use quartz_nbt::io::write_nbt;
    use quartz_nbt::NbtCompound;
    use std::io::Write;

    /// Serializes a chunk root and compresses it with the given tag.
    pub fn encode_chunk(root: &NbtCompound, tag: u8) -> Vec<u8> {
        let mut raw = Vec::new();
        write_nbt(&mut raw, None, root, Flavor::Uncompressed).unwrap();
        match tag {
            COMPRESSION_GZIP => {
                let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
                enc.write_all(&raw).unwrap();
                enc.finish().unwrap()
            }
            COMPRESSION_ZLIB => {
                let mut enc = ZlibEncoder::new(Vec::new(), Compression::fast());
                enc.write_all(&raw).unwrap();
                enc.finish().unwrap()
            }
            _ => raw,
        }
    }

    /// Assembles a region file from `(local_x, local_z, tag, payload)` entries.
    pub fn region_bytes(chunks: &[(usize, usize, u8, Vec<u8>)]) -> Vec<u8> {
        let mut header = vec![0u8; SECTOR_SIZE as usize];
        let mut body = Vec::new();
        let mut next_sector = 1u32;

        for (lx, lz, tag, payload) in chunks {
            let mut record = Vec::new();
            record.extend_from_slice(&(payload.len() as u32 + 1).to_be_bytes());
            record.push(*tag);
            record.extend_from_slice(payload);
            let sectors = record.len().div_ceil(SECTOR_SIZE as usize);
            record.resize(sectors * SECTOR_SIZE as usize, 0);

            let entry = (next_sector << 8) | sectors as u32;
            let at = 4 * slot_index(*lx, *lz);
            header[at..at + 4].copy_from_slice(&entry.to_be_bytes());

            body.extend_from_slice(&record);
            next_sector += sectors as u32;
        }

        header.extend_from_slice(&body);
        header
    }

    /// Region where every listed chunk is a single uniform section.
    pub fn uniform_region(chunks: &[(usize, usize, &str, i8)]) -> Vec<u8> {
        let encoded: Vec<_> = chunks
            .iter()
            .map(|(lx, lz, block, y)| {
                let root = crate::world::chunk::tests::chunk_root(vec![
                    crate::world::chunk::tests::section(*y, &[*block], None),
                ]);
                (*lx, *lz, COMPRESSION_ZLIB, encode_chunk(&root, COMPRESSION_ZLIB))
            })
            .collect();
        region_bytes(&encoded)
    }
}
