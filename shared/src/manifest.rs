//! Task manifest
//!
//! The console hands the CLI a JSON document describing which replays to
//! stream and where to write them:
//!
//! ```json
//! {
//!   "fps": 60,
//!   "sequential": true,
//!   "gapMs": 1500,
//!   "streams": [
//!     { "replayPath": "replays/g1.slp", "outputDir": "spectate", "setId": 7,
//!       "replayIndex": 1, "replayTotal": 2 }
//!   ]
//! }
//! ```
//!
//! A bare array of tasks is accepted as shorthand for `streams`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One replay to stream into an output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTask {
    /// Source replay file
    pub replay_path: PathBuf,
    /// Directory the live copy is written into
    pub output_dir: PathBuf,
    /// Playback rate; falls back to the manifest rate, then the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Wall-clock instant (Unix ms) before which the task does not start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_ms: Option<u64>,
    /// Bracket set this replay belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_id: Option<u64>,
    /// 1-based position of this replay within its set
    #[serde(default = "default_index")]
    pub replay_index: u32,
    /// Number of replays in the set
    #[serde(default = "default_index")]
    pub replay_total: u32,
    /// Delay after this task in sequential mode; overrides the manifest gap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_ms: Option<u64>,
}

fn default_index() -> u32 {
    1
}

impl StreamTask {
    /// Create a task with default indices and no overrides.
    pub fn new(replay_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            replay_path: replay_path.into(),
            output_dir: output_dir.into(),
            fps: None,
            start_time_ms: None,
            set_id: None,
            replay_index: 1,
            replay_total: 1,
            gap_ms: None,
        }
    }
}

/// What a sequential batch does after a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the batch and report the failure
    #[default]
    Halt,
    /// Record the failure and move on to the next task
    Continue,
}

/// A batch of stream tasks plus scheduling options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskManifest {
    #[serde(alias = "tasks")]
    pub streams: Vec<StreamTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default)]
    pub sequential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_ms: Option<u64>,
    #[serde(default)]
    pub on_error: FailurePolicy,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestDocument {
    Full(TaskManifest),
    Bare(Vec<StreamTask>),
}

/// Manifest validation failure. Raised before any task starts.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid task manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task manifest contains no streams")]
    Empty,

    #[error("stream {index}: replay path is empty")]
    MissingReplayPath { index: usize },

    #[error("stream {index}: output directory is empty")]
    MissingOutputDir { index: usize },

    #[error("stream {index}: fps must be a positive number (got {fps})")]
    InvalidFps { index: usize, fps: f64 },

    #[error("manifest fps must be a positive number (got {0})")]
    InvalidManifestFps(f64),
}

impl TaskManifest {
    /// Parse and validate a manifest document.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let manifest = match serde_json::from_str::<ManifestDocument>(json)? {
            ManifestDocument::Full(manifest) => manifest,
            ManifestDocument::Bare(streams) => TaskManifest {
                streams,
                ..Default::default()
            },
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the manifest can be scheduled.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.streams.is_empty() {
            return Err(ManifestError::Empty);
        }
        if let Some(fps) = self.fps {
            if !is_valid_fps(fps) {
                return Err(ManifestError::InvalidManifestFps(fps));
            }
        }
        for (index, task) in self.streams.iter().enumerate() {
            if task.replay_path.as_os_str().is_empty() {
                return Err(ManifestError::MissingReplayPath { index });
            }
            if task.output_dir.as_os_str().is_empty() {
                return Err(ManifestError::MissingOutputDir { index });
            }
            if let Some(fps) = task.fps {
                if !is_valid_fps(fps) {
                    return Err(ManifestError::InvalidFps { index, fps });
                }
            }
        }
        Ok(())
    }

    /// Resolve the playback rate for one task.
    pub fn fps_for(&self, task: &StreamTask, default_fps: f64) -> f64 {
        task.fps.or(self.fps).unwrap_or(default_fps)
    }

    /// Resolve the delay that follows one task in sequential mode.
    pub fn gap_after(&self, task: &StreamTask, default_gap_ms: u64) -> u64 {
        task.gap_ms.or(self.gap_ms).unwrap_or(default_gap_ms)
    }
}

fn is_valid_fps(fps: f64) -> bool {
    fps.is_finite() && fps > 0.0
}
