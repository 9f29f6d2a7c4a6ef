//! Tracking of tiles that need re-rendering.

use std::collections::HashSet;
use std::mem;

use parking_lot::Mutex;
use tracing::trace;

use super::coord::{ChunkPos, TileCoord, CHUNKS_PER_TILE};

/// Set of tiles pending re-render.
///
/// Marking is safe from any thread; [`drain`](Self::drain) swaps the whole set
/// out under the lock, so a coordinate marked concurrently with a drain lands in
/// exactly one of the two generations.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    dirty: Mutex<HashSet<TileCoord>>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a single tile dirty. Returns `true` if it was not already marked.
    pub fn mark_tile_dirty(&self, coord: TileCoord) -> bool {
        self.dirty.lock().insert(coord)
    }

    /// Marks the tile owning a chunk dirty, plus neighbours when the chunk sits
    /// on a tile edge.
    ///
    /// A chunk on one edge adds the adjacent tile across that edge; a chunk in a
    /// corner adds both edge neighbours and the diagonal one.
    pub fn mark_chunk_dirty(&self, world: &str, chunk_x: i32, chunk_z: i32, zoom: u8) {
        let chunk = ChunkPos::new(chunk_x, chunk_z);
        let owner = TileCoord::for_chunk(world, zoom, chunk);
        let (local_x, local_z) = chunk.local();
        let last = (CHUNKS_PER_TILE - 1) as usize;

        let dx = match local_x {
            0 => -1,
            x if x == last => 1,
            _ => 0,
        };
        let dz = match local_z {
            0 => -1,
            z if z == last => 1,
            _ => 0,
        };

        let mut dirty = self.dirty.lock();
        if dx != 0 {
            dirty.insert(owner.offset(dx, 0));
        }
        if dz != 0 {
            dirty.insert(owner.offset(0, dz));
        }
        if dx != 0 && dz != 0 {
            dirty.insert(owner.offset(dx, dz));
        }
        dirty.insert(owner);
        trace!(world, chunk_x, chunk_z, zoom, pending = dirty.len(), "Chunk marked dirty");
    }

    /// Takes every pending coordinate, leaving the set empty.
    pub fn drain(&self) -> Vec<TileCoord> {
        let taken = mem::take(&mut *self.dirty.lock());
        taken.into_iter().collect()
    }

    /// Removes one coordinate. Returns `true` if it was pending.
    pub fn mark_clean(&self, coord: &TileCoord) -> bool {
        self.dirty.lock().remove(coord)
    }

    pub fn is_dirty(&self, coord: &TileCoord) -> bool {
        self.dirty.lock().contains(coord)
    }

    pub fn count(&self) -> usize {
        self.dirty.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn sorted(mut coords: Vec<TileCoord>) -> Vec<(i32, i32)> {
        coords.sort();
        coords.into_iter().map(|c| (c.x, c.z)).collect()
    }

    #[test]
    fn test_interior_chunk_marks_only_owner() {
        let tracker = DirtyTracker::new();
        tracker.mark_chunk_dirty("w", 5, 5, 0);
        assert_eq!(sorted(tracker.drain()), vec![(0, 0)]);
    }

    #[test]
    fn test_right_edge_chunk_marks_right_neighbour() {
        let tracker = DirtyTracker::new();
        tracker.mark_chunk_dirty("w", 31, 5, 0);
        assert_eq!(sorted(tracker.drain()), vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn test_left_edge_chunk_marks_left_neighbour() {
        let tracker = DirtyTracker::new();
        tracker.mark_chunk_dirty("w", 32, 10, 0);
        assert_eq!(sorted(tracker.drain()), vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn test_corner_chunk_marks_four_tiles() {
        let tracker = DirtyTracker::new();
        tracker.mark_chunk_dirty("w", 31, 31, 0);
        assert_eq!(sorted(tracker.drain()), vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_negative_corner_chunk() {
        let tracker = DirtyTracker::new();
        // Chunk (-32, -32) is local (0, 0) of tile (-1, -1)
        tracker.mark_chunk_dirty("w", -32, -32, 0);
        assert_eq!(
            sorted(tracker.drain()),
            vec![(-2, -2), (-2, -1), (-1, -2), (-1, -1)]
        );
    }

    #[test]
    fn test_duplicates_collapse_and_drain_clears() {
        let tracker = DirtyTracker::new();
        tracker.mark_chunk_dirty("w", 5, 5, 0);
        tracker.mark_chunk_dirty("w", 6, 7, 0);
        assert_eq!(tracker.count(), 1);

        assert_eq!(tracker.drain().len(), 1);
        assert!(tracker.is_empty());
        assert!(tracker.drain().is_empty());
    }

    #[test]
    fn test_zoom_levels_are_distinct_keys() {
        let tracker = DirtyTracker::new();
        tracker.mark_chunk_dirty("w", 5, 5, 0);
        tracker.mark_chunk_dirty("w", 5, 5, 1);
        assert_eq!(tracker.count(), 2);
    }

    #[test]
    fn test_mark_clean_and_is_dirty() {
        let tracker = DirtyTracker::new();
        let coord = TileCoord::new("w", 0, 2, 2);
        assert!(tracker.mark_tile_dirty(coord.clone()));
        assert!(!tracker.mark_tile_dirty(coord.clone()));
        assert!(tracker.is_dirty(&coord));
        assert!(tracker.mark_clean(&coord));
        assert!(!tracker.is_dirty(&coord));
    }

    #[test]
    fn test_concurrent_marks_and_drains_lose_nothing() {
        let tracker = Arc::new(DirtyTracker::new());

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    for i in 0..250 {
                        tracker.mark_tile_dirty(TileCoord::new("w", 0, t, i));
                    }
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for _ in 0..50 {
            seen.extend(tracker.drain());
        }
        for writer in writers {
            writer.join().unwrap();
        }
        seen.extend(tracker.drain());

        assert_eq!(seen.len(), 1000);
    }
}
