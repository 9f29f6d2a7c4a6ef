//! Stats command - summarize the tile store.

use quetzalmap::tile::disk_tile_stats;

use super::{format_size, GlobalArgs};
use crate::error::CliError;

/// Run the stats command.
pub fn run(globals: &GlobalArgs) -> Result<(), CliError> {
    let config = globals.load_config()?;
    let (files, bytes) = disk_tile_stats(&config.tiles_root).map_err(CliError::Stats)?;

    println!("Tile store: {}", config.tiles_root.display());
    println!("  Files: {}", files);
    println!("  Size:  {}", format_size(bytes));
    Ok(())
}
