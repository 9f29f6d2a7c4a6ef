//! CLI subcommands.

pub mod pregen;
pub mod render;
pub mod stats;

use std::path::PathBuf;

use quetzalmap::config::default_config_path;
use quetzalmap::MapConfig;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::error::CliError;

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub tiles_dir: Option<PathBuf>,
    pub worlds_dir: Option<PathBuf>,
}

impl GlobalArgs {
    /// Resolves the effective config: explicit file, else the default file if
    /// present, else built-in defaults. Directory flags override the file.
    pub fn load_config(&self) -> Result<MapConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => {
                if !path.is_file() {
                    return Err(CliError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                MapConfig::from_ini_file(path)?
            }
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => {
                    debug!(path = %path.display(), "Using default config file");
                    MapConfig::from_ini_file(&path)?
                }
                None => MapConfig::default(),
            },
        };

        if let Some(dir) = &self.tiles_dir {
            config = config.with_tiles_root(dir);
        }
        if let Some(dir) = &self.worlds_dir {
            config = config.with_worlds_root(dir);
        }

        info!(
            tiles_root = %config.tiles_root.display(),
            worlds_root = %config.worlds_root.display(),
            "Configuration loaded"
        );
        Ok(config)
    }
}

/// Multi-threaded runtime for async subcommands.
pub fn runtime() -> Result<Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("quetzalmap")
        .build()
        .map_err(CliError::Runtime)
}

/// Formats a byte count with a binary unit suffix.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        fs::write(&path, "[paths]\ntiles_dir = /from/file\nworlds_dir = /worlds\n").unwrap();

        let args = GlobalArgs {
            config: Some(path),
            tiles_dir: Some(PathBuf::from("/from/flag")),
            worlds_dir: None,
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.tiles_root, PathBuf::from("/from/flag"));
        assert_eq!(config.worlds_root, PathBuf::from("/worlds"));
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = TempDir::new().unwrap();
        let args = GlobalArgs {
            config: Some(dir.path().join("missing.ini")),
            ..GlobalArgs::default()
        };
        assert!(matches!(args.load_config(), Err(CliError::Config(_))));
    }
}
