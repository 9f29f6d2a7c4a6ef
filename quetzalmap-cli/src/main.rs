//! QuetzalMap CLI - Command-line interface
//!
//! Drives the QuetzalMap library from a shell: render single tiles,
//! pre-generate areas and inspect the tile store.

mod commands;
mod error;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::GlobalArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "quetzalmap", version = quetzalmap::VERSION)]
#[command(about = "Live web map tiles for block worlds, rendered from region files")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory that holds rendered tiles
    #[arg(long, global = true, value_name = "DIR")]
    tiles_dir: Option<PathBuf>,

    /// Directory that holds the world folders
    #[arg(long, global = true, value_name = "DIR")]
    worlds_dir: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render one tile and write it to the tiles directory
    Render {
        /// World folder name
        #[arg(long)]
        world: String,
        /// Tile X (same as region X)
        #[arg(long, allow_hyphen_values = true)]
        x: i32,
        /// Tile Z (same as region Z)
        #[arg(long, allow_hyphen_values = true)]
        z: i32,
        #[arg(long, default_value_t = 0)]
        zoom: u8,
    },
    /// Render every tile within a radius of a center tile
    Pregen {
        #[arg(long)]
        world: String,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        center_x: i32,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        center_z: i32,
        /// Radius in tiles around the center
        #[arg(long)]
        radius: u32,
        #[arg(long, default_value_t = 0)]
        zoom: u8,
    },
    /// Show tile file count and size
    Stats,
}

fn run(cli: Cli) -> Result<(), CliError> {
    let _log_guard = logging::init(cli.log_file.as_deref())?;
    let globals = GlobalArgs {
        config: cli.config,
        tiles_dir: cli.tiles_dir,
        worlds_dir: cli.worlds_dir,
    };

    match cli.command {
        Command::Render { world, x, z, zoom } => commands::render::run(
            &globals,
            commands::render::RenderArgs { world, x, z, zoom },
        ),
        Command::Pregen {
            world,
            center_x,
            center_z,
            radius,
            zoom,
        } => commands::pregen::run(
            &globals,
            commands::pregen::PregenArgs {
                world,
                center_x,
                center_z,
                radius,
                zoom,
            },
        ),
        Command::Stats => commands::stats::run(&globals),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
