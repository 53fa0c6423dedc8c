//! Shared types for the relaycast replay relay.
//!
//! Everything here crosses a process boundary: the task manifest the console
//! writes, the progress lines the CLI prints back, and the connect-code keys
//! used to associate replays with bracket sets.

pub mod codes;
pub mod fs;
pub mod manifest;
pub mod progress;

pub use codes::{normalize_code, pair_key, split_pair_key};
pub use manifest::{FailurePolicy, ManifestError, StreamTask, TaskManifest};
pub use progress::{PROGRESS_PREFIX, ProgressEvent, ProgressKind};
