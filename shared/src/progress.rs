//! Progress line protocol
//!
//! The CLI reports playback status to the console on stdout, one event per
//! line:
//!
//! ```text
//! SPOOF_PROGRESS:{"type":"progress","taskId":3,"setId":7,"frame":1200,...}
//! ```
//!
//! Each task produces exactly one `start`, zero or more `progress`, and exactly
//! one terminal event (`complete` or `error`).

use serde::{Deserialize, Serialize};

/// Prefix marking a progress line on stdout.
pub const PROGRESS_PREFIX: &str = "SPOOF_PROGRESS:";

/// Lifecycle stage carried by a [`ProgressEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Start,
    Progress,
    Complete,
    Error,
}

/// One status update for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    /// Process-unique handle of the task that produced the event
    pub task_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_id: Option<u64>,
    pub replay_index: u32,
    pub replay_total: u32,
    pub replay_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Latest frame written to the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<i32>,
    /// Highest frame number in the source replay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i32>,
    pub fps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Wall-clock time the event was produced (Unix ms)
    pub timestamp_ms: i64,
}

impl ProgressEvent {
    /// Render the event as a single protocol line (no trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{PROGRESS_PREFIX}{}", serde_json::to_string(self)?))
    }

    /// Parse a protocol line. Lines without the prefix or with a malformed
    /// payload yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let payload = line.trim_end().strip_prefix(PROGRESS_PREFIX)?;
        serde_json::from_str(payload).ok()
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: ProgressKind) -> ProgressEvent {
        ProgressEvent {
            kind,
            task_id: 3,
            set_id: Some(7),
            replay_index: 1,
            replay_total: 2,
            replay_path: "replays/g1.slp".to_string(),
            output_path: Some("out/Game_1.slp".to_string()),
            frame: Some(-123),
            total_frames: Some(8000),
            fps: 60.0,
            message: None,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_line_shape() {
        let line = sample(ProgressKind::Progress).to_line().unwrap();
        assert!(line.starts_with("SPOOF_PROGRESS:{"));
        assert!(line.contains(r#""type":"progress""#));
        assert!(line.contains(r#""setId":7"#));
        assert!(line.contains(r#""totalFrames":8000"#));
        assert!(!line.contains("message"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_parse_line() {
        let event = sample(ProgressKind::Complete);
        let line = event.to_line().unwrap();
        assert_eq!(ProgressEvent::parse_line(&format!("{line}\r\n")), Some(event));
        assert_eq!(ProgressEvent::parse_line("some other output"), None);
        assert_eq!(ProgressEvent::parse_line("SPOOF_PROGRESS:{not json"), None);
    }
}
