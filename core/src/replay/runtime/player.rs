//! Replay player
//!
//! Drives one [`StreamTask`]: demux the source once, then write its records
//! into a fresh output at the pace of the replay's own frame counter.
//!
//! The whole source is buffered before playback because the highest frame
//! must be known up front for progress reporting. Replays are at most a few
//! tens of MiB, so the memory cost is bounded, but nothing is written until
//! the scan finishes.

use crate::config::PlaybackMode;
use crate::replay::binary::{DemuxError, ReplayReader};
use crate::replay::types::RawEventRecord;
use relaycast_shared::StreamTask;
use relaycast_shared::fs::MAX_REPLAY_BYTES;
use relaycast_shared::progress::now_ms;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};

use super::cancel::{CancelToken, TaskId};
use super::sink::{NameSeed, OutputSink, SinkError, copy_into, create_unique};
use super::telemetry::{DEFAULT_PROGRESS_INTERVAL, ProgressEmitter, TaskReporter};

/// Task failure. Surfaced as an `error` event and a failed task outcome.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Demux(#[from] DemuxError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("task {0} stopped unexpectedly: {1}")]
    Aborted(TaskId, String),

    #[error("playback rate must be a positive number (got {0})")]
    InvalidFps(f64),
}

/// Playback configuration
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Frames per second used to convert frame deltas into delays
    pub fps: f64,
    /// Stream or copy
    pub mode: PlaybackMode,
    /// Minimum spacing of progress events
    pub progress_interval: Duration,
    /// Largest source replay buffered for streaming
    pub max_replay_bytes: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            fps: 60.0,
            mode: PlaybackMode::Stream,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            max_replay_bytes: MAX_REPLAY_BYTES,
        }
    }
}

/// How a task ended without failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Every record was written
    Completed {
        output: Option<PathBuf>,
        last_frame: Option<i32>,
    },
    /// Stopped on request; the output holds what was written so far
    Cancelled {
        output: Option<PathBuf>,
        last_frame: Option<i32>,
    },
}

impl TaskOutcome {
    pub fn output(&self) -> Option<&PathBuf> {
        match self {
            TaskOutcome::Completed { output, .. } | TaskOutcome::Cancelled { output, .. } => {
                output.as_ref()
            }
        }
    }

    pub fn last_frame(&self) -> Option<i32> {
        match self {
            TaskOutcome::Completed { last_frame, .. }
            | TaskOutcome::Cancelled { last_frame, .. } => *last_frame,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled { .. })
    }
}

// ============================================================================
// Pacing
// ============================================================================

/// Converts frame deltas into wall-clock deadlines.
///
/// The clock only moves forward: a frame at or below the current one adds no
/// delay. Deadlines accumulate from the first frame, so time spent writing
/// does not stretch the overall schedule.
#[derive(Debug)]
struct Pacer {
    frame_duration: Duration,
    current: Option<i32>,
    deadline: Option<Instant>,
}

impl Pacer {
    fn new(fps: f64) -> Result<Self, StreamError> {
        let frame_duration = (fps.is_finite() && fps > 0.0)
            .then(|| Duration::try_from_secs_f64(1.0 / fps).ok())
            .flatten()
            .ok_or(StreamError::InvalidFps(fps))?;
        Ok(Self {
            frame_duration,
            current: None,
            deadline: None,
        })
    }

    /// Advance to `frame`. Returns the instant the record may be written, or
    /// `None` if it may be written immediately.
    fn advance(&mut self, frame: i32) -> Option<Instant> {
        let Some(current) = self.current else {
            self.current = Some(frame);
            self.deadline = Some(Instant::now());
            return None;
        };
        if frame <= current {
            return None;
        }
        let delta = frame.abs_diff(current);
        self.current = Some(frame);
        let base = self.deadline.unwrap_or_else(Instant::now);
        let deadline = base + self.frame_duration * delta;
        self.deadline = Some(deadline);
        Some(deadline)
    }

    fn current(&self) -> Option<i32> {
        self.current
    }
}

// ============================================================================
// Player
// ============================================================================

/// Replay player for one task
pub struct Player {
    id: TaskId,
    task: StreamTask,
    config: PlayerConfig,
    token: CancelToken,
    reporter: TaskReporter,
    /// Highest frame written to the output so far
    last_written: Option<i32>,
}

impl Player {
    /// Create a new player for the given task
    pub fn new(
        id: TaskId,
        task: StreamTask,
        config: PlayerConfig,
        token: CancelToken,
        emitter: ProgressEmitter,
    ) -> Self {
        let reporter = TaskReporter::new(emitter, id, &task, config.fps, config.progress_interval);
        Self {
            id,
            task,
            config,
            token,
            reporter,
            last_written: None,
        }
    }

    fn seed(&self) -> NameSeed {
        NameSeed {
            set_id: self.task.set_id,
            replay_index: self.task.replay_index,
        }
    }

    /// Run the task to its terminal event.
    pub async fn run(mut self) -> Result<TaskOutcome, StreamError> {
        tracing::info!(
            task = %self.id,
            set_id = ?self.task.set_id,
            replay = %self.task.replay_path.display(),
            mode = ?self.config.mode,
            "Starting replay task"
        );

        let result = if self.token.is_cancelled() {
            // Cancelled while queued; the source is never touched
            Ok(TaskOutcome::Cancelled {
                output: None,
                last_frame: None,
            })
        } else {
            match self.config.mode {
                PlaybackMode::Stream => self.stream().await,
                PlaybackMode::Copy => self.copy().await,
            }
        };

        match &result {
            Ok(outcome) => {
                self.reporter.complete(outcome.last_frame());
                tracing::info!(
                    task = %self.id,
                    last_frame = ?outcome.last_frame(),
                    cancelled = outcome.is_cancelled(),
                    "Replay task finished"
                );
            }
            Err(e) => {
                self.reporter.error(self.last_written, e.to_string());
                tracing::warn!(task = %self.id, "Replay task failed: {e}");
            }
        }
        result
    }

    /// Suspend until the task's start time. Returns `false` if cancelled while
    /// waiting.
    async fn wait_for_start(&self) -> bool {
        let Some(start_ms) = self.task.start_time_ms else {
            return !self.token.is_cancelled();
        };
        let wait_ms = i64::try_from(start_ms)
            .unwrap_or(i64::MAX)
            .saturating_sub(now_ms());
        if wait_ms <= 0 {
            return !self.token.is_cancelled();
        }
        tracing::debug!(task = %self.id, wait_ms, "Waiting for scheduled start");
        tokio::select! {
            _ = sleep(Duration::from_millis(wait_ms as u64)) => !self.token.is_cancelled(),
            _ = self.token.cancelled() => false,
        }
    }

    async fn stream(&mut self) -> Result<TaskOutcome, StreamError> {
        let mut pacer = Pacer::new(self.config.fps)?;
        let replay = ReplayReader::open_with_limit(
            &self.task.replay_path,
            self.config.max_replay_bytes,
        )?
        .read_all()?;
        if replay.stop.is_early() {
            tracing::warn!(
                task = %self.id,
                "Replay {} ends early: {}",
                self.task.replay_path.display(),
                replay.stop
            );
        }
        tracing::debug!(
            task = %self.id,
            records = replay.records.len(),
            total_frames = ?replay.last_frame,
            "Replay demuxed"
        );
        self.reporter.set_total_frames(replay.last_frame);

        if !self.wait_for_start().await {
            return Ok(TaskOutcome::Cancelled {
                output: None,
                last_frame: None,
            });
        }

        let mut sink = OutputSink::new(&self.task.output_dir, self.seed(), &replay.sizes);
        let pumped = self.pump(&replay.records, &mut sink, &mut pacer).await;
        let finalized = sink.finalize(self.last_written).await;

        match (pumped, finalized) {
            (Ok(cancelled), Ok(output)) => {
                let last_frame = self.last_written;
                Ok(if cancelled {
                    TaskOutcome::Cancelled { output, last_frame }
                } else {
                    TaskOutcome::Completed { output, last_frame }
                })
            }
            (Err(e), finalized) => {
                if let Err(close_err) = finalized {
                    tracing::warn!(task = %self.id, "Could not finalize output: {close_err}");
                }
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e.into()),
        }
    }

    /// Write every record in order, pausing between frames. Returns whether the
    /// loop stopped because of cancellation.
    async fn pump(
        &mut self,
        records: &[RawEventRecord],
        sink: &mut OutputSink,
        pacer: &mut Pacer,
    ) -> Result<bool, StreamError> {
        let path = sink.open().await?;
        self.reporter.start(Some(&path));

        for record in records {
            if self.token.is_cancelled() {
                return Ok(true);
            }

            if let Some(frame) = record.frame {
                if let Some(deadline) = pacer.advance(frame) {
                    sink.flush().await?;
                    tokio::select! {
                        _ = sleep_until(deadline) => {}
                        _ = self.token.cancelled() => return Ok(true),
                    }
                }
            }

            sink.write_record(record).await?;

            if record.frame.is_some() {
                self.last_written = pacer.current();
                self.reporter.progress(self.last_written);
            }
        }
        sink.flush().await?;
        Ok(false)
    }

    async fn copy(&mut self) -> Result<TaskOutcome, StreamError> {
        // A missing source fails before any output exists
        let source = &self.task.replay_path;
        tokio::fs::metadata(source)
            .await
            .map_err(|e| DemuxError::Open {
                path: source.clone(),
                source: e,
            })?;

        if !self.wait_for_start().await {
            return Ok(TaskOutcome::Cancelled {
                output: None,
                last_frame: None,
            });
        }

        let (path, file) = create_unique(&self.task.output_dir, &self.seed()).await?;
        self.reporter.start(Some(&path));
        let copied = copy_into(source, &path, file).await?;
        tracing::debug!(task = %self.id, bytes = copied, "Copied replay to {}", path.display());

        Ok(TaskOutcome::Completed {
            output: Some(path),
            last_frame: None,
        })
    }
}
