//! Block types and their base map colors.
//!
//! Block identifiers are interned into a [`BlockRegistry`] so decoded chunks
//! carry a small [`BlockId`] per column instead of a string. Unknown
//! identifiers are added on first sight with a neutral gray and reused from
//! then on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// Color given to block identifiers not in the built-in table.
pub const UNKNOWN_BLOCK_COLOR: u32 = 0x808080;

/// Built-in base colors (RGB, no alpha).
const BASE_COLORS: &[(&str, u32)] = &[
    ("minecraft:air", 0x000000),
    ("minecraft:stone", 0x7F7F7F),
    ("minecraft:grass_block", 0x7CBD6B),
    ("minecraft:dirt", 0x8B5A3C),
    ("minecraft:cobblestone", 0x828282),
    ("minecraft:oak_planks", 0x9C7F4E),
    ("minecraft:sand", 0xDBD3A0),
    ("minecraft:gravel", 0x837B71),
    ("minecraft:oak_log", 0x6E5434),
    ("minecraft:oak_leaves", 0x52802E),
    ("minecraft:water", 0x3F76E4),
    ("minecraft:lava", 0xEA5C0F),
    ("minecraft:snow", 0xFFFFFE),
    ("minecraft:ice", 0x7DACFE),
    ("minecraft:clay", 0xA0A7B4),
    ("minecraft:pumpkin", 0xC07615),
    ("minecraft:netherrack", 0x723232),
    ("minecraft:soul_sand", 0x554134),
    ("minecraft:glowstone", 0xFFBC5E),
    ("minecraft:white_wool", 0xE9ECEC),
    ("minecraft:glass", 0xC0F0FF),
    ("minecraft:deepslate", 0x4D4D4D),
    ("minecraft:andesite", 0x868686),
    ("minecraft:diorite", 0xC8C8C8),
    ("minecraft:granite", 0x9B6D5B),
];

/// Index of an interned block type in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What the map needs to know about a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockType {
    name: Arc<str>,
    color: u32,
    air: bool,
    transparent: bool,
    known: bool,
}

impl BlockType {
    fn new(name: &str, color: u32, known: bool) -> Self {
        Self {
            name: Arc::from(name),
            color,
            air: name.contains("air"),
            transparent: name.contains("glass") || name.contains("ice"),
            known,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base RGB color.
    pub fn color(&self) -> u32 {
        self.color
    }

    /// Air never counts as a surface block.
    pub fn is_air(&self) -> bool {
        self.air
    }

    /// Glass- and ice-like blocks are drawn translucent.
    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    /// Whether the block came from the built-in color table.
    pub fn is_known(&self) -> bool {
        self.known
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{:06X})", self.name, self.color)
    }
}

#[derive(Debug, Default)]
struct Interned {
    by_name: HashMap<Arc<str>, BlockId>,
    types: Vec<BlockType>,
}

impl Interned {
    fn push(&mut self, block: BlockType) -> BlockId {
        let id = BlockId(self.types.len() as u32);
        self.by_name.insert(Arc::clone(&block.name), id);
        self.types.push(block);
        id
    }
}

/// Thread-safe interning table of block types.
#[derive(Debug)]
pub struct BlockRegistry {
    inner: RwLock<Interned>,
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRegistry {
    /// Registry preloaded with the built-in color table.
    pub fn new() -> Self {
        let mut interned = Interned::default();
        for (name, color) in BASE_COLORS {
            interned.push(BlockType::new(name, *color, true));
        }
        Self {
            inner: RwLock::new(interned),
        }
    }

    /// Returns the id for `name`, adding it with [`UNKNOWN_BLOCK_COLOR`] if
    /// it has not been seen before.
    pub fn intern(&self, name: &str) -> BlockId {
        if let Some(id) = self.inner.read().by_name.get(name) {
            return *id;
        }

        let mut inner = self.inner.write();
        // Another thread may have interned it between the two locks
        if let Some(id) = inner.by_name.get(name) {
            return *id;
        }
        debug!(block = name, "Registered unknown block type");
        inner.push(BlockType::new(name, UNKNOWN_BLOCK_COLOR, false))
    }

    /// Adds or recolors a block type.
    pub fn register(&self, name: &str, color: u32) -> BlockId {
        let mut inner = self.inner.write();
        match inner.by_name.get(name).copied() {
            Some(id) => {
                inner.types[id.index()] = BlockType::new(name, color, true);
                id
            }
            None => inner.push(BlockType::new(name, color, true)),
        }
    }

    pub fn get(&self, id: BlockId) -> Option<BlockType> {
        self.inner.read().types.get(id.index()).cloned()
    }

    pub fn lookup(&self, name: &str) -> Option<BlockId> {
        self.inner.read().by_name.get(name).copied()
    }

    /// Base color and transparency for `id`, without cloning the name.
    pub fn color_of(&self, id: BlockId) -> Option<(u32, bool)> {
        self.inner
            .read()
            .types
            .get(id.index())
            .map(|t| (t.color, t.transparent))
    }

    pub fn is_air(&self, id: BlockId) -> bool {
        self.inner
            .read()
            .types
            .get(id.index())
            .is_some_and(|t| t.air)
    }

    pub fn len(&self) -> usize {
        self.inner.read().types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of identifiers interned without a built-in color.
    pub fn unknown_count(&self) -> usize {
        self.inner.read().types.iter().filter(|t| !t.known).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_loaded() {
        let registry = BlockRegistry::new();
        assert_eq!(registry.len(), BASE_COLORS.len());

        let stone = registry.lookup("minecraft:stone").unwrap();
        assert_eq!(registry.color_of(stone), Some((0x7F7F7F, false)));
        assert_eq!(registry.unknown_count(), 0);
    }

    #[test]
    fn test_classification_by_name() {
        let registry = BlockRegistry::new();
        let glass = registry.get(registry.intern("minecraft:glass")).unwrap();
        assert!(glass.is_transparent());
        assert!(!glass.is_air());

        let ice = registry.get(registry.intern("minecraft:packed_ice")).unwrap();
        assert!(ice.is_transparent());

        let cave_air = registry.intern("minecraft:cave_air");
        assert!(registry.is_air(cave_air));
        assert!(registry.is_air(registry.intern("minecraft:air")));
    }

    #[test]
    fn test_unknown_block_interned_once() {
        let registry = BlockRegistry::new();
        let before = registry.len();

        let a = registry.intern("mod:strange_block");
        let b = registry.intern("mod:strange_block");

        assert_eq!(a, b);
        assert_eq!(registry.len(), before + 1);
        assert_eq!(registry.unknown_count(), 1);

        let block = registry.get(a).unwrap();
        assert_eq!(block.color(), UNKNOWN_BLOCK_COLOR);
        assert!(!block.is_known());
    }

    #[test]
    fn test_register_overrides_color() {
        let registry = BlockRegistry::new();
        let id = registry.intern("mod:ore");
        assert_eq!(registry.register("mod:ore", 0x112233), id);
        assert_eq!(registry.color_of(id), Some((0x112233, false)));
        assert_eq!(registry.unknown_count(), 0);
    }

    #[test]
    fn test_concurrent_interning_yields_one_id() {
        let registry = Arc::new(BlockRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.intern("mod:contended"))
            })
            .collect();
        let ids: Vec<BlockId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(registry.unknown_count(), 1);
    }
}
