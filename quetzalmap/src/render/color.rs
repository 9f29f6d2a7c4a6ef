//! Surface sample to pixel mapping.

use std::sync::Arc;

use crate::world::{BlockRegistry, SurfaceSample};

/// Lowest block elevation of the world.
pub const MIN_WORLD_Y: i32 = -64;

/// Total world height in blocks.
pub const WORLD_HEIGHT: i32 = 384;

/// Alpha applied to glass- and ice-like blocks.
pub const TRANSLUCENT_ALPHA: u32 = 0xAA;

const OPAQUE: u32 = 0xFF00_0000;

/// Maps surface samples to packed ARGB pixels with height shading.
///
/// Higher terrain is drawn up to 10% brighter and lower terrain up to 10%
/// darker, which gives the flat map a sense of relief.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    registry: Arc<BlockRegistry>,
}

impl ColorMapper {
    pub fn new(registry: Arc<BlockRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    /// Pixel for one column. Absent samples and black base colors are fully
    /// transparent.
    pub fn pixel(&self, sample: Option<&SurfaceSample>) -> u32 {
        let Some(sample) = sample else {
            return 0;
        };
        let Some((base, _)) = self.registry.color_of(sample.block) else {
            return 0;
        };
        shade(base, sample.elevation, sample.transparent)
    }

    /// Maps a full chunk of samples (row-major) into `out`.
    pub fn fill(&self, samples: &[Option<SurfaceSample>], out: &mut [u32]) {
        for (pixel, sample) in out.iter_mut().zip(samples) {
            *pixel = self.pixel(sample.as_ref());
        }
    }
}

/// Shades a base RGB color for the given elevation.
pub fn shade(base: u32, elevation: i32, transparent: bool) -> u32 {
    if base & 0x00FF_FFFF == 0 {
        return 0;
    }

    let height = ((elevation - MIN_WORLD_Y) as f64 / WORLD_HEIGHT as f64).clamp(0.0, 1.0);
    let factor = 0.9 + height * 0.2;
    let scale = |channel: u32| ((channel as f64 * factor) as u32).min(255);

    let r = scale((base >> 16) & 0xFF);
    let g = scale((base >> 8) & 0xFF);
    let b = scale(base & 0xFF);
    let rgb = (r << 16) | (g << 8) | b;

    if transparent {
        (TRANSLUCENT_ALPHA << 24) | rgb
    } else {
        OPAQUE | rgb
    }
}
