//! Integration tests for the tile pipeline.
//!
//! These tests drive the library through its public API only:
//! - region file on disk → rendered tile → PNG in the tiles root
//! - chunk edit → debounce tick → single re-render → live `tile_update`
//! - tiered cache promotion and eviction persistence
//!
//! Run with: `cargo test --test pipeline_integration`

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use quartz_nbt::io::{write_nbt, Flavor};
use quartz_nbt::{NbtCompound, NbtList, NbtTag};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use quetzalmap::tile::{TileCache, TileCacheConfig, TileStorage, TileStoreError};
use quetzalmap::{
    ChannelSink, MapConfig, SubscriberHub, TileCoord, TileImage, TilePipeline, UpdateScheduler,
};

// ============================================================================
// Helper Functions
// ============================================================================

/// Zlib-compressed chunk with one section of a single block at section `y`.
fn uniform_chunk(block: &str, y: i8) -> Vec<u8> {
    let mut entry = NbtCompound::new();
    entry.insert("Name", NbtTag::String(block.to_string()));
    let mut states = NbtCompound::new();
    states.insert(
        "palette",
        NbtTag::List(NbtList::from(vec![NbtTag::Compound(entry)])),
    );
    let mut section = NbtCompound::new();
    section.insert("Y", NbtTag::Byte(y));
    section.insert("block_states", NbtTag::Compound(states));
    let mut root = NbtCompound::new();
    root.insert(
        "sections",
        NbtTag::List(NbtList::from(vec![NbtTag::Compound(section)])),
    );

    let mut raw = Vec::new();
    write_nbt(&mut raw, None, &root, Flavor::Uncompressed).unwrap();
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&raw).unwrap();
    encoder.finish().unwrap()
}

/// Region file bytes holding the given `(local_x, local_z, block)` chunks.
fn region_file(chunks: &[(usize, usize, &str)]) -> Vec<u8> {
    let mut header = vec![0u8; 4096];
    let mut body = Vec::new();
    let mut sector = 1u32;

    for &(lx, lz, block) in chunks {
        let payload = uniform_chunk(block, 4);
        let mut record = (payload.len() as u32 + 1).to_be_bytes().to_vec();
        record.push(2);
        record.extend_from_slice(&payload);
        let sectors = record.len().div_ceil(4096);
        record.resize(sectors * 4096, 0);

        let at = 4 * (lx + lz * 32);
        header[at..at + 4].copy_from_slice(&((sector << 8) | sectors as u32).to_be_bytes());
        body.extend_from_slice(&record);
        sector += sectors as u32;
    }

    header.extend_from_slice(&body);
    header
}

fn write_region(worlds: &Path, world: &str, x: i32, z: i32, bytes: Vec<u8>) {
    let dir = worlds.join(world).join("region");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("r.{}.{}.mca", x, z)), bytes).unwrap();
}

fn config(root: &Path) -> MapConfig {
    MapConfig::new(root.join("tiles"), root.join("worlds"))
        .with_render_threads(2)
        .with_pixel_pool_size(16)
        .with_zoom_levels(vec![0])
        .with_debounce(Duration::from_millis(20))
}

async fn next_tile_update(rx: &mut UnboundedReceiver<Bytes>) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for tile update")
            .expect("event channel closed");
        let text = String::from_utf8(frame.to_vec()).unwrap();
        if text.starts_with("event: tile_update") {
            return text;
        }
    }
}

/// In-memory store that counts saves.
#[derive(Default)]
struct MemoryStore {
    tiles: Mutex<HashMap<TileCoord, Vec<u32>>>,
    saves: AtomicU64,
}

impl TileStorage for MemoryStore {
    fn save(&self, tile: &TileImage) -> Result<(), TileStoreError> {
        self.tiles.lock().insert(tile.coord().clone(), tile.snapshot());
        self.saves.fetch_add(1, Ordering::SeqCst);
        tile.mark_clean();
        Ok(())
    }

    fn load(&self, coord: &TileCoord) -> Result<Option<TileImage>, TileStoreError> {
        Ok(self
            .tiles
            .lock()
            .get(coord)
            .map(|pixels| TileImage::from_pixels(coord.clone(), pixels.clone()).unwrap()))
    }

    fn delete(&self, coord: &TileCoord) -> Result<bool, TileStoreError> {
        Ok(self.tiles.lock().remove(coord).is_some())
    }

    fn exists(&self, coord: &TileCoord) -> bool {
        self.tiles.lock().contains_key(coord)
    }

    fn last_modified(&self, _coord: &TileCoord) -> Option<SystemTime> {
        None
    }

    fn size(&self, _coord: &TileCoord) -> Option<u64> {
        None
    }

    fn read_bytes(&self, _coord: &TileCoord) -> Result<Option<Vec<u8>>, TileStoreError> {
        Ok(None)
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

/// An absent region renders to a transparent, clean tile saved at its path.
#[tokio::test]
async fn test_absent_region_renders_blank_tile_to_disk() {
    let dir = TempDir::new().unwrap();
    let pipeline = TilePipeline::from_config(&config(dir.path())).unwrap();

    let tile = pipeline
        .get_tile(&TileCoord::new("world", 0, 0, 0))
        .await
        .unwrap();

    assert!(tile.is_blank());
    assert!(!tile.is_dirty());
    assert_eq!(tile.snapshot().len(), 512 * 512);

    let path = dir.path().join("tiles/world/0/0_0.png");
    assert!(path.is_file());
    let decoded = image::open(&path).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (512, 512));
    assert!(decoded.pixels().all(|p| p.0[3] == 0));
}

/// Terrain present in the region file shows up at the chunk's pixel offset.
#[tokio::test]
async fn test_region_terrain_rendered_at_chunk_offsets() {
    let dir = TempDir::new().unwrap();
    write_region(
        &dir.path().join("worlds"),
        "world",
        -1,
        0,
        region_file(&[(0, 0, "minecraft:grass_block"), (31, 2, "minecraft:water")]),
    );
    let pipeline = TilePipeline::from_config(&config(dir.path())).unwrap();

    let tile = pipeline
        .get_tile(&TileCoord::new("world", 0, -1, 0))
        .await
        .unwrap();

    assert_eq!(tile.pixel(0, 0).map(|p| p >> 24), Some(0xFF));
    assert_eq!(tile.pixel(31 * 16 + 15, 2 * 16 + 15).map(|p| p >> 24), Some(0xFF));
    assert_eq!(tile.pixel(256, 256), Some(0));

    let png = pipeline
        .fetch_png(&TileCoord::from_request_path("/tiles/world/0/-1_0.png").unwrap())
        .await
        .unwrap();
    assert_eq!(&png[1..4], b"PNG");
}

/// One chunk edit plus one debounce tick gives one render and one event.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chunk_edit_renders_once_and_notifies() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let pipeline = Arc::new(TilePipeline::from_config(&config).unwrap());
    let hub = Arc::new(SubscriberHub::new());
    let (sink, mut events) = ChannelSink::channel();
    hub.register(Arc::new(sink));

    let scheduler = Arc::new(UpdateScheduler::from_config(
        Arc::clone(&pipeline),
        Arc::clone(&hub),
        &config,
    ));
    let shutdown = CancellationToken::new();
    let task = scheduler.spawn(shutdown.clone());

    scheduler.schedule_chunk_update("w", 5, 5);
    let update = next_tile_update(&mut events).await;
    assert_eq!(
        update,
        "event: tile_update\ndata: {\"type\":\"tile_update\",\"world\":\"w\",\"zoom\":0,\"x\":0,\"z\":0}\n\n"
    );

    shutdown.cancel();
    task.await.unwrap();

    assert_eq!(pipeline.stats().renders_completed, 1);
    assert_eq!(pipeline.renderer().stats().tiles_rendered, 1);
    assert!(events.try_recv().is_err());
}

/// A warm-only tile is promoted to hot on first access.
#[test]
fn test_warm_tile_promoted_to_hot() {
    let store = Arc::new(MemoryStore::default());
    let cache = TileCache::new(store, TileCacheConfig::default());
    let coord = TileCoord::new("world", 0, 2, 2);
    cache.put_warm(Arc::new(TileImage::new(coord.clone())));

    assert!(!cache.is_in_hot(&coord));
    assert!(cache.get(&coord).is_some());
    assert!(cache.is_in_hot(&coord));
    assert!(cache.get(&coord).is_some());

    let stats = cache.stats();
    assert_eq!(stats.warm_hits, 1);
    assert_eq!(stats.hot_hits, 1);
}

/// Expired warm tiles are saved only when dirty.
#[test]
fn test_warm_expiry_saves_only_dirty_tiles() {
    let store = Arc::new(MemoryStore::default());
    let config = TileCacheConfig::default().with_warm(100, Duration::from_millis(50));
    let cache = TileCache::new(Arc::clone(&store) as Arc<dyn TileStorage>, config);

    let dirty = TileImage::new(TileCoord::new("world", 0, 0, 0));
    let clean = TileImage::new(TileCoord::new("world", 0, 1, 0));
    clean.mark_clean();
    cache.put_warm(Arc::new(dirty));
    cache.put_warm(Arc::new(clean));

    std::thread::sleep(Duration::from_millis(150));
    cache.run_pending_tasks();

    assert_eq!(store.saves.load(Ordering::SeqCst), 1);
    assert!(store.exists(&TileCoord::new("world", 0, 0, 0)));
    assert!(!store.exists(&TileCoord::new("world", 0, 1, 0)));
}
