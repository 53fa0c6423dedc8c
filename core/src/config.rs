//! Configuration management (relay.toml)
//!
//! Handles loading, saving, and providing defaults for relay settings.
//! Settings are stored in TOML format in the platform-specific config directory
//! and can be overridden per process through environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Config file name inside [`config_dir`].
pub const CONFIG_FILE: &str = "relay.toml";

/// Overrides `playback.mode`.
pub const ENV_REPLAY_MODE: &str = "RELAY_REPLAY_MODE";
/// Overrides `playback.gap_ms`.
pub const ENV_REPLAY_GAP_MS: &str = "RELAY_REPLAY_GAP_MS";

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Playback pacing and scheduling defaults
    #[serde(default)]
    pub playback: PlaybackConfig,
    /// Progress reporting
    #[serde(default)]
    pub progress: ProgressConfig,
    /// Replay index scanning
    #[serde(default)]
    pub index: IndexConfig,
}

/// How a task turns a source replay into an output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Re-emit records at the replay's own frame rate
    #[default]
    Stream,
    /// Copy the file in one go
    Copy,
}

impl FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" | "realtime" | "real-time" => Ok(PlaybackMode::Stream),
            "copy" | "instant" | "fast" => Ok(PlaybackMode::Copy),
            other => Err(format!("unknown playback mode '{other}'")),
        }
    }
}

/// Playback configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Frame rate used when neither task nor manifest sets one (default: 60)
    #[serde(default = "default_fps")]
    pub default_fps: f64,
    /// Delay between sequential tasks in milliseconds (default: 1500)
    #[serde(default = "default_gap_ms")]
    pub gap_ms: u64,
    /// Stream or copy (default: stream)
    #[serde(default)]
    pub mode: PlaybackMode,
}

/// Progress reporting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Minimum spacing of `progress` events per task (default: 1000)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

/// Replay index configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// File extensions scanned, without the dot (default: slp, slippi)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_fps() -> f64 {
    60.0
}
fn default_gap_ms() -> u64 {
    1500
}
fn default_interval_ms() -> u64 {
    1000
}
fn default_extensions() -> Vec<String> {
    vec!["slp".to_string(), "slippi".to_string()]
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_fps: default_fps(),
            gap_ms: default_gap_ms(),
            mode: PlaybackMode::default(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
        }
    }
}

impl PlaybackConfig {
    /// Replace an unusable frame rate with the default.
    fn sanitize(&mut self) {
        if !(self.default_fps.is_finite() && self.default_fps > 0.0) {
            tracing::warn!(
                "Ignoring playback.default_fps = {}; using {}",
                self.default_fps,
                default_fps()
            );
            self.default_fps = default_fps();
        }
    }
}

impl ProgressConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Apply `RELAY_REPLAY_MODE` / `RELAY_REPLAY_GAP_MS` from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(ENV_REPLAY_MODE) {
            match raw.parse() {
                Ok(mode) => self.playback.mode = mode,
                Err(e) => tracing::warn!("Ignoring {ENV_REPLAY_MODE}: {e}"),
            }
        }
        if let Some(raw) = lookup(ENV_REPLAY_GAP_MS) {
            match raw.trim().parse() {
                Ok(gap_ms) => self.playback.gap_ms = gap_ms,
                Err(_) => tracing::warn!("Ignoring {ENV_REPLAY_GAP_MS}: '{raw}' is not a number"),
            }
        }
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\Relaycast\config`
/// On macOS: `~/Library/Application Support/io.relaycast.Relaycast`
/// On Linux: `~/.config/Relaycast`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.relaycast", "", "Relaycast")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from disk.
///
/// Reads `relay.toml` from the platform's configuration directory.
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> Config {
    default_path().map(|path| load_from(&path)).unwrap_or_default()
}

/// `relay.toml` in the platform configuration directory.
pub fn default_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Loads the configuration from an explicit file, with the same fallback
/// behavior as [`load`].
pub fn load_from(path: &Path) -> Config {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Config::default();
    };
    match toml::from_str::<Config>(&content) {
        Ok(mut config) => {
            config.playback.sanitize();
            config
        }
        Err(e) => {
            tracing::warn!("Invalid config {}: {e}; using defaults", path.display());
            Config::default()
        }
    }
}

/// Saves the configuration to an explicit file.
pub fn save_to(config: &Config, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content =
        render(config).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, content)
}

/// The configuration as it would be written by [`save_to`].
pub fn render(config: &Config) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(config)
}
