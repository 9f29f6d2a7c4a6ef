//! Turning chunk surfaces into tile pixels.

mod color;
mod pool;
mod renderer;

pub use color::{shade, ColorMapper, MIN_WORLD_Y, TRANSLUCENT_ALPHA, WORLD_HEIGHT};
pub use pool::{PixelBufferPool, PoolStats, PooledPixels};
pub use renderer::{RenderError, RenderStats, TileRenderer};

#[cfg(test)]
pub(crate) use renderer::tests::{renderer_for, write_region};
