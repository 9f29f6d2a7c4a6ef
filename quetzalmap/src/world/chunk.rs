//! Chunk surface extraction.
//!
//! A chunk is stored as a list of 16-block-tall sections. Each section has a
//! palette of block states and, when the palette has more than one entry, an
//! array of 64-bit words holding one palette index per block. This module
//! unpacks those indices and keeps the highest non-air block of every column.

use quartz_nbt::{NbtCompound, NbtList, NbtTag};
use tracing::{debug, trace};

use super::block::{BlockId, BlockRegistry};
use crate::tile::{ChunkPos, CHUNK_SIZE};

/// Blocks in one section.
pub const SECTION_VOLUME: usize = 16 * 16 * 16;

/// Columns in one chunk.
pub const CHUNK_COLUMNS: usize = CHUNK_SIZE * CHUNK_SIZE;

/// How palette indices are laid out across 64-bit words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PackingLayout {
    /// Entries never straddle words; leftover high bits of each word are
    /// padding. Used by current world formats.
    #[default]
    Aligned,
    /// Entries are packed back-to-back and may span two words. Used by
    /// worlds written before the aligned layout was introduced.
    Spanning,
}

/// Parameters of the palette index decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub layout: PackingLayout,
    pub min_bits_per_entry: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            layout: PackingLayout::Aligned,
            min_bits_per_entry: 4,
        }
    }
}

impl DecodeOptions {
    pub fn with_layout(mut self, layout: PackingLayout) -> Self {
        self.layout = layout;
        self
    }
}

/// Bits used per palette index for a palette of `palette_len` entries.
pub fn bits_per_entry(palette_len: usize, min_bits: u32) -> u32 {
    let needed = if palette_len <= 1 {
        0
    } else {
        usize::BITS - (palette_len - 1).leading_zeros()
    };
    needed.max(min_bits)
}

/// Palette index of the block at `block_index` within a section.
///
/// A single-entry palette or missing data maps everything to index 0, as does
/// a word index past the end of `data`.
pub fn palette_index(
    data: &[i64],
    block_index: usize,
    palette_len: usize,
    options: &DecodeOptions,
) -> usize {
    if palette_len <= 1 || data.is_empty() {
        return 0;
    }

    let bits = bits_per_entry(palette_len, options.min_bits_per_entry);
    if bits >= 64 {
        return 0;
    }
    let mask = (1u64 << bits) - 1;

    match options.layout {
        PackingLayout::Aligned => {
            let per_word = (64 / bits) as usize;
            let word = block_index / per_word;
            let offset = (block_index % per_word) as u32 * bits;
            match data.get(word) {
                Some(&w) => ((w as u64 >> offset) & mask) as usize,
                None => 0,
            }
        }
        PackingLayout::Spanning => {
            let bit = block_index * bits as usize;
            let word = bit / 64;
            let offset = (bit % 64) as u32;
            let Some(&low) = data.get(word) else {
                return 0;
            };
            let mut value = low as u64 >> offset;
            if offset + bits > 64 {
                if let Some(&high) = data.get(word + 1) {
                    value |= (high as u64) << (64 - offset);
                }
            }
            (value & mask) as usize
        }
    }
}

/// Linear index of `(x, y, z)` inside a section.
#[inline]
pub fn block_index(x: usize, y: usize, z: usize) -> usize {
    y * 256 + z * 16 + x
}

/// Highest non-air block of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSample {
    pub block: BlockId,
    pub transparent: bool,
    pub elevation: i32,
}

/// Surface of one chunk: a 16×16 grid of optional samples, row-major by z.
///
/// Built once by the decoder and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSurface {
    pos: ChunkPos,
    columns: Box<[Option<SurfaceSample>]>,
}

impl ChunkSurface {
    /// A surface with no columns set.
    pub fn empty(pos: ChunkPos) -> Self {
        Self {
            pos,
            columns: vec![None; CHUNK_COLUMNS].into_boxed_slice(),
        }
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Sample at column `(x, z)`, `None` outside `0..16` or when no block was found.
    pub fn sample(&self, x: usize, z: usize) -> Option<&SurfaceSample> {
        if x >= CHUNK_SIZE || z >= CHUNK_SIZE {
            return None;
        }
        self.columns[z * CHUNK_SIZE + x].as_ref()
    }

    /// Samples in row-major order (index `z * 16 + x`).
    pub fn samples(&self) -> &[Option<SurfaceSample>] {
        &self.columns
    }

    /// Number of columns with a surface block.
    pub fn filled_columns(&self) -> usize {
        self.columns.iter().filter(|c| c.is_some()).count()
    }

    /// Keeps `sample` for column `(x, z)` if it is higher than what is there.
    fn offer(&mut self, x: usize, z: usize, sample: SurfaceSample) -> bool {
        let slot = &mut self.columns[z * CHUNK_SIZE + x];
        match slot {
            Some(existing) if existing.elevation >= sample.elevation => false,
            _ => {
                *slot = Some(sample);
                true
            }
        }
    }

    /// Extracts the surface from a parsed chunk root.
    ///
    /// Returns `None` when the root has no section list at all. Sections or
    /// palette entries that are malformed are skipped, leaving the affected
    /// columns to whatever other sections provide.
    pub fn from_nbt(
        root: &NbtCompound,
        pos: ChunkPos,
        registry: &BlockRegistry,
        options: &DecodeOptions,
    ) -> Option<Self> {
        let sections = section_list(root)?;
        let mut surface = Self::empty(pos);
        let mut processed = 0usize;

        for tag in sections.iter() {
            let NbtTag::Compound(section) = tag else {
                debug!(chunk = %pos, "Skipping non-compound section");
                continue;
            };
            if surface.apply_section(section, registry, options) {
                processed += 1;
            }
        }

        trace!(
            chunk = %pos,
            sections = processed,
            columns = surface.filled_columns(),
            "Chunk surface decoded"
        );
        Some(surface)
    }

    /// Folds one section into the surface. Returns `false` if it was skipped.
    fn apply_section(
        &mut self,
        section: &NbtCompound,
        registry: &BlockRegistry,
        options: &DecodeOptions,
    ) -> bool {
        let section_y = match section.get::<_, &NbtTag>("Y") {
            Ok(NbtTag::Byte(y)) => *y as i32,
            Ok(NbtTag::Int(y)) => *y,
            _ => {
                debug!(chunk = %self.pos, "Section without Y, skipping");
                return false;
            }
        };

        // Sections without block states are empty air
        let Ok(states) = section.get::<_, &NbtCompound>("block_states") else {
            return false;
        };
        let Ok(palette) = states.get::<_, &NbtList>("palette") else {
            return false;
        };
        if palette.is_empty() {
            return false;
        }

        // `None` marks a palette entry we could not read or that is air
        let entries: Vec<Option<(BlockId, bool)>> = palette
            .iter()
            .map(|entry| {
                let NbtTag::Compound(entry) = entry else {
                    return None;
                };
                let name = entry.get::<_, &str>("Name").ok()?;
                let id = registry.intern(name);
                let block = registry.get(id)?;
                (!block.is_air()).then_some((id, block.is_transparent()))
            })
            .collect();

        if entries.iter().all(Option::is_none) {
            return true;
        }

        let data: &[i64] = match states.get::<_, &NbtTag>("data") {
            Ok(NbtTag::LongArray(words)) => words.as_slice(),
            _ => &[],
        };

        // Walk top-down so the first hit per column is the section's highest
        let mut found = [false; CHUNK_COLUMNS];
        for y in (0..16).rev() {
            let elevation = section_y * 16 + y as i32;
            for z in 0..CHUNK_SIZE {
                for x in 0..CHUNK_SIZE {
                    let column = z * CHUNK_SIZE + x;
                    if found[column] {
                        continue;
                    }
                    let index = palette_index(data, block_index(x, y, z), entries.len(), options);
                    if let Some(Some((block, transparent))) = entries.get(index) {
                        found[column] = true;
                        self.offer(
                            x,
                            z,
                            SurfaceSample {
                                block: *block,
                                transparent: *transparent,
                                elevation,
                            },
                        );
                    }
                }
            }
        }
        true
    }
}

/// Section list at the chunk root, or under `Level.Sections` for older chunks.
fn section_list(root: &NbtCompound) -> Option<&NbtList> {
    if let Ok(sections) = root.get::<_, &NbtList>("sections") {
        return Some(sections);
    }
    root.get::<_, &NbtCompound>("Level")
        .and_then(|level| level.get::<_, &NbtList>("Sections"))
        .ok()
}
