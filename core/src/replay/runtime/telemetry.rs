//! Progress telemetry
//!
//! Tasks push [`ProgressEvent`]s into an unbounded channel; a single forwarder
//! renders them as protocol lines. A closed or broken output never reaches the
//! tasks.

use relaycast_shared::progress::now_ms;
use relaycast_shared::{ProgressEvent, ProgressKind, StreamTask};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::Instant;

use super::cancel::TaskId;

/// Default spacing between `progress` events of one task.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Sending half of the progress channel.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    tx: UnboundedSender<ProgressEvent>,
}

impl ProgressEmitter {
    /// Create an emitter and the receiver that drains it.
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Progress receiver closed, dropping event");
        }
    }
}

/// Write every received event as a protocol line until all emitters are gone.
///
/// Write failures are logged once and otherwise ignored; the channel keeps
/// draining so senders never notice.
pub async fn forward_progress<W>(mut rx: UnboundedReceiver<ProgressEvent>, mut out: W) -> u64
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    let mut broken = false;
    while let Some(event) = rx.recv().await {
        if broken {
            continue;
        }
        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to encode progress event: {e}");
                continue;
            }
        };
        let result = async {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await
        };
        match result.await {
            Ok(()) => written += 1,
            Err(e) => {
                tracing::warn!("Progress output closed ({e}); further events are dropped");
                broken = true;
            }
        }
    }
    written
}

/// Lifecycle reporter for one task.
///
/// Guarantees one `start` before anything else, exactly one terminal event,
/// and `progress` no more often than the configured interval.
#[derive(Debug)]
pub struct TaskReporter {
    emitter: ProgressEmitter,
    base: ProgressEvent,
    interval: Duration,
    last_progress: Option<Instant>,
    started: bool,
    finished: bool,
}

impl TaskReporter {
    pub fn new(
        emitter: ProgressEmitter,
        id: TaskId,
        task: &StreamTask,
        fps: f64,
        interval: Duration,
    ) -> Self {
        let base = ProgressEvent {
            kind: ProgressKind::Start,
            task_id: id.0,
            set_id: task.set_id,
            replay_index: task.replay_index,
            replay_total: task.replay_total,
            replay_path: task.replay_path.display().to_string(),
            output_path: None,
            frame: None,
            total_frames: None,
            fps,
            message: None,
            timestamp_ms: 0,
        };
        Self {
            emitter,
            base,
            interval,
            last_progress: None,
            started: false,
            finished: false,
        }
    }

    pub fn set_total_frames(&mut self, total_frames: Option<i32>) {
        self.base.total_frames = total_frames;
    }

    fn send(&self, kind: ProgressKind, frame: Option<i32>, message: Option<String>) {
        let mut event = self.base.clone();
        event.kind = kind;
        event.frame = frame;
        event.message = message;
        event.timestamp_ms = now_ms();
        self.emitter.emit(event);
    }

    /// Announce the task with its destination path.
    pub fn start(&mut self, output_path: Option<&Path>) {
        if self.started || self.finished {
            return;
        }
        self.base.output_path = output_path.map(|path| path.display().to_string());
        self.started = true;
        self.last_progress = Some(Instant::now());
        self.send(ProgressKind::Start, None, None);
    }

    /// Report the latest frame written, subject to the rate limit.
    pub fn progress(&mut self, frame: Option<i32>) {
        if !self.started || self.finished {
            return;
        }
        let now = Instant::now();
        let due = self
            .last_progress
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            self.last_progress = Some(now);
            self.send(ProgressKind::Progress, frame, None);
        }
    }

    /// Finish cleanly, reporting the last frame written.
    pub fn complete(&mut self, frame: Option<i32>) {
        self.finish(ProgressKind::Complete, frame, None);
    }

    /// Finish with a failure message.
    pub fn error(&mut self, frame: Option<i32>, message: String) {
        self.finish(ProgressKind::Error, frame, Some(message));
    }

    fn finish(&mut self, kind: ProgressKind, frame: Option<i32>, message: Option<String>) {
        if self.finished {
            return;
        }
        if !self.started {
            self.start(None);
        }
        self.finished = true;
        self.send(kind, frame, message);
    }
}
