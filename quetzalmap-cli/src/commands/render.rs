//! Render command - render one tile to the tiles directory.

use std::time::Instant;

use quetzalmap::{TileCoord, TilePipeline};

use super::GlobalArgs;
use crate::error::CliError;

/// Arguments for the render command.
#[derive(Debug, Clone)]
pub struct RenderArgs {
    pub world: String,
    pub x: i32,
    pub z: i32,
    pub zoom: u8,
}

/// Run the render command.
pub fn run(globals: &GlobalArgs, args: RenderArgs) -> Result<(), CliError> {
    let config = globals.load_config()?;
    let runtime = super::runtime()?;
    let coord = TileCoord::new(args.world, args.zoom, args.x, args.z);
    let path = config.tiles_root.join(coord.relative_path());

    runtime.block_on(async {
        let pipeline = TilePipeline::from_config(&config)?;
        let started = Instant::now();
        let tile = pipeline.render_tile(&coord).await?;

        println!("Rendered tile {}", coord);
        println!("  File:    {}", path.display());
        println!("  Blank:   {}", tile.is_blank());
        println!("  Time:    {} ms", started.elapsed().as_millis());
        println!("  Render:  {}", pipeline.renderer().stats());
        Ok::<(), CliError>(())
    })
}
