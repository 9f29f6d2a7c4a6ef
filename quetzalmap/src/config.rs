//! Map configuration.
//!
//! [`MapConfig`] gathers every tunable of the library. It can be built in code
//! with the `with_*` setters or loaded from an INI file:
//!
//! ```ini
//! [paths]
//! tiles_dir = /srv/map/tiles
//! worlds_dir = /srv/server
//!
//! [render]
//! threads = 6
//! zoom_levels = 0, 1, 2, 3
//! pool_size = 384
//! packing = aligned
//!
//! [cache]
//! region_max = 50
//! region_idle_secs = 300
//! hot_capacity = 500
//! hot_idle_secs = 300
//! warm_capacity = 2000
//! warm_idle_secs = 1800
//!
//! [updates]
//! debounce_ms = 100
//! keepalive_secs = 30
//! ```
//!
//! Missing sections and keys keep their defaults; unknown keys are ignored.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use crate::tile::TileCacheConfig;
use crate::world::{DecodeOptions, PackingLayout, RegionCacheConfig};

/// Default debounce window for world edits.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Default keepalive interval for live update channels.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Shortest debounce or keepalive period; timers reject a zero period.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Pixel buffers pooled per render thread.
pub const POOL_BUFFERS_PER_THREAD: usize = 64;

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] ini::ParseError),

    #[error("invalid value {value:?} for [{section}] {key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Render worker count for this machine: cores minus two, within `2..=16`.
pub fn default_render_threads() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cores.saturating_sub(2).clamp(2, 16)
}

/// `<config dir>/quetzalmap/config.ini`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("quetzalmap").join("config.ini"))
}

/// All library settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    pub tiles_root: PathBuf,
    pub worlds_root: PathBuf,
    pub zoom_levels: Vec<u8>,
    pub debounce: Duration,
    pub render_threads: usize,
    /// Explicit pool size; `None` sizes the pool from `render_threads`.
    pub pixel_pool_size: Option<usize>,
    pub region_cache: RegionCacheConfig,
    pub tile_cache: TileCacheConfig,
    pub keepalive: Duration,
    pub decode: DecodeOptions,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            tiles_root: PathBuf::from("tiles"),
            worlds_root: PathBuf::from("."),
            zoom_levels: vec![0, 1, 2, 3],
            debounce: DEFAULT_DEBOUNCE,
            render_threads: default_render_threads(),
            pixel_pool_size: None,
            region_cache: RegionCacheConfig::default(),
            tile_cache: TileCacheConfig::default(),
            keepalive: DEFAULT_KEEPALIVE,
            decode: DecodeOptions::default(),
        }
    }
}

impl MapConfig {
    pub fn new(tiles_root: impl Into<PathBuf>, worlds_root: impl Into<PathBuf>) -> Self {
        Self {
            tiles_root: tiles_root.into(),
            worlds_root: worlds_root.into(),
            ..Self::default()
        }
    }

    pub fn with_tiles_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.tiles_root = path.into();
        self
    }

    pub fn with_worlds_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.worlds_root = path.into();
        self
    }

    pub fn with_zoom_levels(mut self, levels: Vec<u8>) -> Self {
        self.zoom_levels = levels;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce.max(MIN_INTERVAL);
        self
    }

    pub fn with_render_threads(mut self, threads: usize) -> Self {
        self.render_threads = threads.max(1);
        self
    }

    pub fn with_pixel_pool_size(mut self, size: usize) -> Self {
        self.pixel_pool_size = Some(size);
        self
    }

    pub fn with_region_cache(mut self, config: RegionCacheConfig) -> Self {
        self.region_cache = config;
        self
    }

    pub fn with_tile_cache(mut self, config: TileCacheConfig) -> Self {
        self.tile_cache = config;
        self
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_decode_options(mut self, options: DecodeOptions) -> Self {
        self.decode = options;
        self
    }

    /// Effective pixel pool size.
    pub fn pool_size(&self) -> usize {
        self.pixel_pool_size
            .unwrap_or(self.render_threads * POOL_BUFFERS_PER_THREAD)
    }

    /// Loads a config file on top of the defaults.
    pub fn from_ini_file(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Loads config text on top of the defaults.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        Self::from_ini(&Ini::load_from_str(text)?)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(paths) = ini.section(Some("paths")) {
            if let Some(dir) = paths.get("tiles_dir") {
                config.tiles_root = PathBuf::from(dir);
            }
            if let Some(dir) = paths.get("worlds_dir") {
                config.worlds_root = PathBuf::from(dir);
            }
        }

        if let Some(render) = ini.section(Some("render")) {
            if let Some(threads) = parse::<usize>(render, "render", "threads")? {
                if threads == 0 {
                    return Err(invalid("render", "threads", "0", "must be at least 1"));
                }
                config.render_threads = threads;
            }
            if let Some(raw) = render.get("zoom_levels") {
                config.zoom_levels = parse_zoom_levels(raw)?;
            }
            if let Some(size) = parse::<usize>(render, "render", "pool_size")? {
                config.pixel_pool_size = Some(size);
            }
            if let Some(raw) = render.get("packing") {
                config.decode.layout = match raw.trim().to_ascii_lowercase().as_str() {
                    "aligned" => PackingLayout::Aligned,
                    "spanning" => PackingLayout::Spanning,
                    _ => {
                        return Err(invalid(
                            "render",
                            "packing",
                            raw,
                            "expected aligned or spanning",
                        ))
                    }
                };
            }
        }

        if let Some(cache) = ini.section(Some("cache")) {
            if let Some(n) = parse(cache, "cache", "region_max")? {
                config.region_cache.max_regions = n;
            }
            if let Some(secs) = parse(cache, "cache", "region_idle_secs")? {
                config.region_cache.idle_expiry = Duration::from_secs(secs);
            }
            if let Some(n) = parse(cache, "cache", "hot_capacity")? {
                config.tile_cache.hot_capacity = n;
            }
            if let Some(secs) = parse(cache, "cache", "hot_idle_secs")? {
                config.tile_cache.hot_idle = Duration::from_secs(secs);
            }
            if let Some(n) = parse(cache, "cache", "warm_capacity")? {
                config.tile_cache.warm_capacity = n;
            }
            if let Some(secs) = parse(cache, "cache", "warm_idle_secs")? {
                config.tile_cache.warm_idle = Duration::from_secs(secs);
            }
        }

        if let Some(updates) = ini.section(Some("updates")) {
            if let Some(ms) = parse::<u64>(updates, "updates", "debounce_ms")? {
                if ms == 0 {
                    return Err(invalid("updates", "debounce_ms", "0", "must be positive"));
                }
                config.debounce = Duration::from_millis(ms);
            }
            if let Some(secs) = parse::<u64>(updates, "updates", "keepalive_secs")? {
                if secs == 0 {
                    return Err(invalid("updates", "keepalive_secs", "0", "must be positive"));
                }
                config.keepalive = Duration::from_secs(secs);
            }
        }

        Ok(config)
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(props: &Properties, section: &str, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(section, key, raw, &e.to_string())),
    }
}

fn parse_zoom_levels(raw: &str) -> Result<Vec<u8>, ConfigError> {
    let mut levels = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let level = part
            .parse::<u8>()
            .map_err(|e| invalid("render", "zoom_levels", raw, &e.to_string()))?;
        if !levels.contains(&level) {
            levels.push(level);
        }
    }
    if levels.is_empty() {
        return Err(invalid("render", "zoom_levels", raw, "no zoom levels"));
    }
    Ok(levels)
}
