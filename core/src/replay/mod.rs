//! Replay ingestion and paced re-emission
//!
//! Replays are framed binary event logs written by the game client. This
//! module reads them back into records and re-emits those records into a new
//! file at the pace a live capture would have produced them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Demux                                     │
//! │ .slp → ReplayReader → header + size table → Events          │
//! │                         split messages reassembled          │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Playback                                  │
//! │ StreamTask → Player → paced writes → OutputSink (.slp)      │
//! │                  ↓                                          │
//! │            ProgressEmitter → SPOOF_PROGRESS lines           │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Scheduling                                │
//! │ TaskManifest → Scheduler → sequential (gaps) | concurrent   │
//! │                  ↑                                          │
//! │            CancelRegistry (per-task tokens)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use relaycast_core::replay::{ReplayReader, command};
//!
//! let replay = ReplayReader::open(path)?.read_all()?;
//! println!("{} records, last frame {:?}", replay.records.len(), replay.last_frame);
//! ```

pub mod binary;
pub mod runtime;
pub mod types;

// Re-export core types
pub use types::{
    FormatHeader, HeaderKind, MessageSizeTable, RawEventRecord, SplitAccumulator, command,
    frame_of, split,
};

// Re-export binary format
pub use binary::{
    ContainerWriter, DemuxError, DemuxedReplay, Events, ReplayMetadata, ReplayReader, StopReason,
};

// Re-export runtime
pub use runtime::{
    BatchReport, CancelRegistry, CancelToken, NameSeed, OutputSink, Player, PlayerConfig,
    ProgressEmitter, Scheduler, SchedulerConfig, SinkError, StreamError, TaskId, TaskOutcome,
    TaskReport, TaskStatus, forward_progress,
};
