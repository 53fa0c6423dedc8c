//! Config command - show or write the relay configuration

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use relaycast_core::{Config, config};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Write the file with every default filled in
    #[arg(long)]
    pub write: bool,
}

/// Execute the config command.
///
/// `effective` includes environment overrides and is what gets printed.
/// `stored` is what `--write` persists, so overrides stay out of the file.
pub fn execute(
    args: ConfigArgs,
    path: Option<&Path>,
    stored: &Config,
    effective: &Config,
) -> Result<()> {
    print!("{}", config::render(effective)?);

    if args.write {
        let path = target_path(path)?;
        write_config(stored, &path)?;
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}

fn target_path(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => config::default_path().context("No configuration directory on this platform"),
    }
}

fn write_config(config: &Config, path: &Path) -> Result<()> {
    config::save_to(config, path).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycast_core::PlaybackMode;

    #[test]
    fn test_write_fills_defaults_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relay.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[playback]\ngap_ms = 250\n").unwrap();

        let stored = config::load_from(&path);
        let mut effective = stored.clone();
        effective.apply_overrides(|key| (key == "RELAY_REPLAY_MODE").then(|| "copy".to_string()));

        assert_eq!(effective.playback.mode, PlaybackMode::Copy);

        let args = ConfigArgs { write: true };
        execute(args, Some(&path), &stored, &effective).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("default_fps"));
        let reloaded = config::load_from(&path);
        assert_eq!(reloaded.playback.gap_ms, 250);
        assert_eq!(reloaded.playback.mode, PlaybackMode::default());
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Path::new("/tmp/custom.toml");
        assert_eq!(target_path(Some(path)).unwrap(), path);
    }
}
