//! Pregen command - render an area of tiles ahead of time.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use quetzalmap::{TilePipeline, TilePreGenerator};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::GlobalArgs;
use crate::error::CliError;

/// Arguments for the pregen command.
#[derive(Debug, Clone)]
pub struct PregenArgs {
    pub world: String,
    pub center_x: i32,
    pub center_z: i32,
    pub radius: u32,
    pub zoom: u8,
}

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} tiles ({per_sec}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Run the pregen command.
pub fn run(globals: &GlobalArgs, args: PregenArgs) -> Result<(), CliError> {
    let config = globals.load_config()?;
    let runtime = super::runtime()?;

    let cancellation = CancellationToken::new();
    let on_signal = cancellation.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received shutdown signal, finishing in-flight tiles...");
        on_signal.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let side = 2 * args.radius as u64 + 1;
    println!(
        "Pre-generating {} tiles of '{}' around ({}, {}) at zoom {}",
        side * side,
        args.world,
        args.center_x,
        args.center_z,
        args.zoom
    );
    println!("Press Ctrl+C to stop");

    runtime.block_on(async {
        let pipeline = Arc::new(TilePipeline::from_config(&config)?);
        let generator = Arc::new(TilePreGenerator::new(
            Arc::clone(&pipeline),
            config.render_threads,
        ));

        let bar = progress_bar(side * side);
        let done = CancellationToken::new();
        let ticker = {
            let generator = Arc::clone(&generator);
            let bar = bar.clone();
            let done = done.clone();
            tokio::spawn(async move {
                loop {
                    let progress = generator.progress();
                    bar.set_position(progress.processed());
                    bar.set_message(format!(
                        "{} skipped, {} failed",
                        progress.skipped, progress.failed
                    ));
                    tokio::select! {
                        _ = done.cancelled() => break,
                        _ = tokio::time::sleep(PROGRESS_INTERVAL) => {}
                    }
                }
            })
        };

        let result = generator
            .pregenerate(
                &args.world,
                args.center_x,
                args.center_z,
                args.radius,
                args.zoom,
                &cancellation,
            )
            .await;
        done.cancel();
        if let Err(e) = ticker.await {
            warn!(error = %e, "Progress task failed");
        }

        let stats = result?;
        bar.set_position(stats.processed());
        if stats.cancelled {
            bar.abandon_with_message("cancelled");
        } else {
            bar.finish_with_message("done");
        }

        let flushed = pipeline.flush().await;
        println!();
        println!("Generated: {}", stats.generated);
        println!("Skipped:   {}", stats.skipped);
        println!("Failed:    {}", stats.failed);
        println!(
            "Duration:  {:.1}s ({:.1} tiles/s)",
            stats.duration.as_secs_f64(),
            stats.tiles_per_second()
        );
        if flushed > 0 {
            println!("Flushed {} unsaved tiles", flushed);
        }
        Ok::<(), CliError>(())
    })
}
