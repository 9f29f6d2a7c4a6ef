//! World directory layout.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Resolves region files under a root holding one directory per world.
///
/// Layout: `{worlds_root}/{world}/region/r.{x}.{z}.mca`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldPaths {
    worlds_root: PathBuf,
}

impl WorldPaths {
    pub fn new(worlds_root: impl Into<PathBuf>) -> Self {
        Self {
            worlds_root: worlds_root.into(),
        }
    }

    pub fn worlds_root(&self) -> &Path {
        &self.worlds_root
    }

    pub fn world_dir(&self, world: &str) -> PathBuf {
        self.worlds_root.join(world)
    }

    pub fn region_dir(&self, world: &str) -> PathBuf {
        self.world_dir(world).join("region")
    }

    pub fn region_file(&self, world: &str, region_x: i32, region_z: i32) -> PathBuf {
        self.region_dir(world)
            .join(format!("r.{}.{}.mca", region_x, region_z))
    }

    /// Region coordinates of every region file present for `world`, sorted.
    ///
    /// A world without a region directory has no regions.
    pub fn list_regions(&self, world: &str) -> io::Result<Vec<(i32, i32)>> {
        let dir = self.region_dir(world);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut regions = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(coords) = name.to_str().and_then(parse_region_file_name) {
                regions.push(coords);
            }
        }
        regions.sort_unstable();
        Ok(regions)
    }
}

/// Parses `r.{x}.{z}.mca` into region coordinates.
pub fn parse_region_file_name(name: &str) -> Option<(i32, i32)> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^r\.(-?\d+)\.(-?\d+)\.mca$").ok())
        .as_ref()?;

    let caps = pattern.captures(name)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}
