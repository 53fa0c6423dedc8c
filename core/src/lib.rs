//! Relaycast Core - replay demuxing and paced re-emission
//!
//! This crate reads recorded replays, re-emits them into new files at the
//! pace a live capture would have produced, and links replays to bracket sets.
//!
//! # Architecture
//!
//! - [`replay::ReplayReader`] - Header detection, size table and record demuxing
//! - [`replay::OutputSink`] - Uniquely named output written like a live capture
//! - [`replay::Player`] - Frame-paced playback of one task
//! - [`replay::Scheduler`] - Sequential or concurrent execution of a manifest
//! - [`linkage::ReplayIndex`] - Connect-code pair index over a replay directory

pub mod config;
pub mod linkage;
pub mod replay;
#[cfg(test)]
pub mod test_utils;

// Re-export configuration
pub use config::{Config, PlaybackMode};

// Re-export linkage types
pub use linkage::{
    BracketSet, IndexError, LinkedReplay, LinkedSet, ReplayIndex, SlotCode,
    extract_connect_codes, merge_into_config,
};

// Re-export replay types
pub use replay::{
    BatchReport, CancelRegistry, DemuxError, DemuxedReplay, OutputSink, Player, PlayerConfig,
    ProgressEmitter, ReplayReader, Scheduler, SchedulerConfig, StopReason, StreamError,
    TaskOutcome, TaskStatus,
};
