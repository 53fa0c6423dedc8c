//! Replay runtime
//!
//! This module contains the execution infrastructure for paced playback:
//! - **Sink**: Creates and finalizes uniquely named output replays
//! - **Player**: Drives one task, pacing writes by frame number
//! - **Scheduler**: Runs a manifest sequentially or concurrently
//! - **Cancel**: Per-task cancellation tokens and the registry resolving set ids
//! - **Telemetry**: Progress events and the line forwarder

mod cancel;
mod player;
mod scheduler;
mod sink;
mod telemetry;

pub use cancel::{CancelRegistry, CancelToken, TaskId};
pub use player::{Player, PlayerConfig, StreamError, TaskOutcome};
pub use scheduler::{BatchReport, Scheduler, SchedulerConfig, TaskReport, TaskStatus};
pub use sink::{NameSeed, OutputSink, SinkError, copy_into, create_unique};
pub use telemetry::{
    DEFAULT_PROGRESS_INTERVAL, ProgressEmitter, TaskReporter, forward_progress,
};
