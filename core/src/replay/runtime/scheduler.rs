//! Task scheduler
//!
//! Runs a validated [`TaskManifest`] either one task at a time with gaps in
//! between, or all at once. Every task is registered for cancellation before
//! the first one starts, so queued tasks can be cancelled too.

use crate::config::{Config, PlaybackMode};
use relaycast_shared::{FailurePolicy, ManifestError, StreamTask, TaskManifest};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::cancel::{CancelRegistry, CancelToken, TaskId};
use super::player::{Player, PlayerConfig, StreamError, TaskOutcome};
use super::telemetry::ProgressEmitter;

/// Defaults applied to tasks and manifests that leave a field unset.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub fps: f64,
    pub gap_ms: u64,
    pub mode: PlaybackMode,
    pub progress_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            fps: config.playback.default_fps,
            gap_ms: config.playback.gap_ms,
            mode: config.playback.mode,
            progress_interval: config.progress.interval(),
        }
    }
}

/// Final state of one task in a batch.
#[derive(Debug)]
pub enum TaskStatus {
    Finished(TaskOutcome),
    Failed(StreamError),
    /// Never started because an earlier sequential task failed
    Skipped,
}

#[derive(Debug)]
pub struct TaskReport {
    pub id: TaskId,
    pub set_id: Option<u64>,
    pub replay_path: PathBuf,
    pub status: TaskStatus,
}

/// Per-task results, in manifest order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub tasks: Vec<TaskReport>,
}

impl BatchReport {
    fn count(&self, predicate: impl Fn(&TaskStatus) -> bool) -> usize {
        self.tasks.iter().filter(|t| predicate(&t.status)).count()
    }

    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Finished(o) if !o.is_cancelled()))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Finished(o) if o.is_cancelled()))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Skipped))
    }

    /// True if no task failed or was skipped.
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped() == 0
    }
}

struct Entry {
    id: TaskId,
    token: CancelToken,
    task: StreamTask,
}

/// Runs manifests against a shared cancellation registry.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<CancelRegistry>,
    emitter: ProgressEmitter,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, registry: Arc<CancelRegistry>, emitter: ProgressEmitter) -> Self {
        Self {
            config,
            registry,
            emitter,
        }
    }

    /// Validate and run a manifest to completion.
    ///
    /// # Errors
    ///
    /// Only manifest validation fails the call; task failures are recorded in
    /// the returned report.
    pub async fn run(&self, manifest: TaskManifest) -> Result<BatchReport, ManifestError> {
        manifest.validate()?;
        tracing::info!(
            tasks = manifest.streams.len(),
            sequential = manifest.sequential,
            "Scheduling replay batch"
        );

        let entries: Vec<Entry> = manifest
            .streams
            .iter()
            .map(|task| {
                let (id, token) = self.registry.register(task.set_id);
                Entry {
                    id,
                    token,
                    task: task.clone(),
                }
            })
            .collect();

        let report = if manifest.sequential {
            self.run_sequential(&manifest, entries).await
        } else {
            self.run_concurrent(&manifest, entries).await
        };

        tracing::info!(
            completed = report.completed(),
            cancelled = report.cancelled(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Replay batch finished"
        );
        Ok(report)
    }

    fn player(&self, manifest: &TaskManifest, entry: &Entry) -> Player {
        let config = PlayerConfig {
            fps: manifest.fps_for(&entry.task, self.config.fps),
            mode: self.config.mode,
            progress_interval: self.config.progress_interval,
            ..PlayerConfig::default()
        };
        Player::new(
            entry.id,
            entry.task.clone(),
            config,
            entry.token.clone(),
            self.emitter.clone(),
        )
    }

    async fn run_sequential(&self, manifest: &TaskManifest, entries: Vec<Entry>) -> BatchReport {
        let mut report = BatchReport::default();
        let mut halted = false;
        let mut gap_before: Option<Duration> = None;

        for entry in entries {
            if halted {
                self.registry.unregister(entry.id);
                report.tasks.push(TaskReport {
                    id: entry.id,
                    set_id: entry.task.set_id,
                    replay_path: entry.task.replay_path,
                    status: TaskStatus::Skipped,
                });
                continue;
            }

            if let Some(gap) = gap_before.filter(|gap| !gap.is_zero()) {
                tracing::debug!(task = %entry.id, gap_ms = gap.as_millis() as u64, "Gap before next task");
                tokio::select! {
                    _ = tokio::time::sleep(gap) => {}
                    _ = entry.token.cancelled() => {}
                }
            }
            gap_before = Some(Duration::from_millis(
                manifest.gap_after(&entry.task, self.config.gap_ms),
            ));

            let result = self.player(manifest, &entry).run().await;
            self.registry.unregister(entry.id);

            let status = match result {
                Ok(outcome) => TaskStatus::Finished(outcome),
                Err(e) => {
                    if manifest.on_error == FailurePolicy::Halt {
                        tracing::warn!(task = %entry.id, "Halting batch after failure");
                        halted = true;
                    }
                    TaskStatus::Failed(e)
                }
            };
            report.tasks.push(TaskReport {
                id: entry.id,
                set_id: entry.task.set_id,
                replay_path: entry.task.replay_path,
                status,
            });
        }
        report
    }

    async fn run_concurrent(&self, manifest: &TaskManifest, entries: Vec<Entry>) -> BatchReport {
        let handles: Vec<_> = entries
            .into_iter()
            .map(|entry| {
                let player = self.player(manifest, &entry);
                (entry, tokio::spawn(player.run()))
            })
            .collect();

        let mut report = BatchReport::default();
        for (entry, handle) in handles {
            let status = match handle.await {
                Ok(Ok(outcome)) => TaskStatus::Finished(outcome),
                Ok(Err(e)) => TaskStatus::Failed(e),
                Err(join_err) => {
                    tracing::error!(task = %entry.id, "Replay task panicked: {join_err}");
                    TaskStatus::Failed(StreamError::Aborted(entry.id, join_err.to_string()))
                }
            };
            self.registry.unregister(entry.id);
            report.tasks.push(TaskReport {
                id: entry.id,
                set_id: entry.task.set_id,
                replay_path: entry.task.replay_path,
                status,
            });
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ReplayBuilder;
    use relaycast_shared::{ProgressEvent, ProgressKind};
    use std::path::Path;
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    type Log = JoinHandle<Vec<(Instant, ProgressEvent)>>;

    fn scheduler(registry: Arc<CancelRegistry>) -> (Scheduler, Log) {
        let (emitter, mut rx) = ProgressEmitter::channel();
        let collector = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push((Instant::now(), event));
            }
            events
        });
        (Scheduler::new(SchedulerConfig::default(), registry, emitter), collector)
    }

    async fn finish(scheduler: Scheduler, collector: Log) -> Vec<(Instant, ProgressEvent)> {
        drop(scheduler);
        collector.await.unwrap()
    }

    fn replay(dir: &Path, name: &str, frames: i32) -> PathBuf {
        ReplayBuilder::container()
            .game_start()
            .frames(0..frames)
            .write_to(dir, name)
    }

    fn manifest(tasks: Vec<StreamTask>, sequential: bool) -> TaskManifest {
        TaskManifest {
            streams: tasks,
            sequential,
            gap_ms: Some(200),
            ..Default::default()
        }
    }

    fn instants(events: &[(Instant, ProgressEvent)], kind: ProgressKind) -> Vec<(u64, Instant)> {
        events
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(at, e)| (e.task_id, *at))
            .collect()
    }

    // =============================================================
    // Validation
    // =============================================================

    #[tokio::test]
    async fn test_empty_manifest_is_rejected() {
        let registry = Arc::new(CancelRegistry::new());
        let (scheduler, collector) = scheduler(registry.clone());
        let err = scheduler.run(manifest(Vec::new(), true)).await.unwrap_err();
        assert!(matches!(err, ManifestError::Empty));
        assert!(registry.is_empty());
        assert!(finish(scheduler, collector).await.is_empty());
    }

    // =============================================================
    // Sequencing
    // =============================================================

    #[tokio::test(start_paused = true)]
    async fn test_sequential_gaps_between_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let tasks = (0..3)
            .map(|i| StreamTask::new(replay(dir.path(), &format!("g{i}.slp"), 6), &out))
            .collect();
        let (scheduler, collector) = scheduler(Arc::new(CancelRegistry::new()));

        let report = scheduler.run(manifest(tasks, true)).await.unwrap();
        assert_eq!(report.completed(), 3);
        assert!(report.is_success());

        let events = finish(scheduler, collector).await;
        let starts = instants(&events, ProgressKind::Start);
        let completes = instants(&events, ProgressKind::Complete);
        assert_eq!(starts.len(), 3);
        assert_eq!(completes.len(), 3);
        for n in 0..2 {
            assert_eq!(starts[n].0, completes[n].0);
            let gap = starts[n + 1].1 - completes[n].1;
            assert!(gap >= Duration::from_millis(200), "gap {gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_tasks_start_together() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let tasks = (0..3)
            .map(|i| StreamTask::new(replay(dir.path(), &format!("g{i}.slp"), 60), &out))
            .collect();
        let (scheduler, collector) = scheduler(Arc::new(CancelRegistry::new()));

        let started = Instant::now();
        let report = scheduler.run(manifest(tasks, false)).await.unwrap();
        assert_eq!(report.completed(), 3);
        // Three one-second replays in parallel take about one second
        assert!(started.elapsed() < Duration::from_millis(1500));

        let events = finish(scheduler, collector).await;
        let starts = instants(&events, ProgressKind::Start);
        assert_eq!(starts.len(), 3);
        let first = starts.iter().map(|(_, at)| *at).min().unwrap();
        let last = starts.iter().map(|(_, at)| *at).max().unwrap();
        assert!(last - first < Duration::from_millis(10));

        let outputs: Vec<_> = report
            .tasks
            .iter()
            .filter_map(|t| match &t.status {
                TaskStatus::Finished(outcome) => outcome.output().cloned(),
                _ => None,
            })
            .collect();
        assert_eq!(outputs.len(), 3);
        assert!(outputs.iter().all(|p| p.starts_with(&out)));
    }

    // =============================================================
    // Failure policy
    // =============================================================

    #[tokio::test(start_paused = true)]
    async fn test_sequential_halt_skips_remaining() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let tasks = vec![
            StreamTask::new(replay(dir.path(), "g1.slp", 3), &out),
            StreamTask::new(dir.path().join("missing.slp"), &out),
            StreamTask::new(replay(dir.path(), "g3.slp", 3), &out),
        ];
        let registry = Arc::new(CancelRegistry::new());
        let (scheduler, collector) = scheduler(registry.clone());

        let report = scheduler.run(manifest(tasks, true)).await.unwrap();
        assert_eq!(report.completed(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert!(!report.is_success());
        assert!(registry.is_empty());

        let events = finish(scheduler, collector).await;
        assert_eq!(instants(&events, ProgressKind::Error).len(), 1);
        assert_eq!(instants(&events, ProgressKind::Start).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_continue_runs_everything() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let tasks = vec![
            StreamTask::new(dir.path().join("missing.slp"), &out),
            StreamTask::new(replay(dir.path(), "g2.slp", 3), &out),
        ];
        let (scheduler, collector) = scheduler(Arc::new(CancelRegistry::new()));

        let mut manifest = manifest(tasks, true);
        manifest.on_error = FailurePolicy::Continue;
        let report = scheduler.run(manifest).await.unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.completed(), 1);
        assert_eq!(report.skipped(), 0);
        finish(scheduler, collector).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failure_does_not_touch_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let tasks = vec![
            StreamTask::new(dir.path().join("missing.slp"), &out),
            StreamTask::new(replay(dir.path(), "g2.slp", 30), &out),
        ];
        let (scheduler, collector) = scheduler(Arc::new(CancelRegistry::new()));

        let report = scheduler.run(manifest(tasks, false)).await.unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.completed(), 1);
        finish(scheduler, collector).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_default_fps_fails_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let tasks = vec![
            StreamTask::new(replay(dir.path(), "g1.slp", 3), &out),
            StreamTask::new(replay(dir.path(), "g2.slp", 3), &out),
        ];
        let (emitter, mut rx) = ProgressEmitter::channel();
        let config = SchedulerConfig {
            fps: 0.0,
            ..Default::default()
        };
        let scheduler = Scheduler::new(config, Arc::new(CancelRegistry::new()), emitter);

        let report = scheduler.run(manifest(tasks, true)).await.unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert!(matches!(
            report.tasks[0].status,
            TaskStatus::Failed(StreamError::InvalidFps(_))
        ));

        drop(scheduler);
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind);
        }
        assert_eq!(kinds, vec![ProgressKind::Start, ProgressKind::Error]);
    }

    // =============================================================
    // Cancellation
    // =============================================================

    #[tokio::test(start_paused = true)]
    async fn test_cancel_set_stops_only_that_set() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mut tasks = Vec::new();
        for (i, set_id) in [7, 7, 8].into_iter().enumerate() {
            let mut task = StreamTask::new(replay(dir.path(), &format!("g{i}.slp"), 120), &out);
            task.set_id = Some(set_id);
            tasks.push(task);
        }
        let registry = Arc::new(CancelRegistry::new());
        let (scheduler, collector) = scheduler(registry.clone());

        let canceller = tokio::spawn({
            let registry = registry.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                registry.cancel_set(7)
            }
        });
        let report = scheduler.run(manifest(tasks, false)).await.unwrap();
        assert!(canceller.await.unwrap());

        assert_eq!(report.cancelled(), 2);
        assert_eq!(report.completed(), 1);
        assert!(report.is_success());
        let events = finish(scheduler, collector).await;
        assert!(instants(&events, ProgressKind::Error).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_queued_sequential_task() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mut first = StreamTask::new(replay(dir.path(), "g1.slp", 120), &out);
        first.set_id = Some(1);
        // The queued task's source does not exist; it must never be opened
        let mut queued = StreamTask::new(dir.path().join("missing.slp"), &out);
        queued.set_id = Some(9);
        let registry = Arc::new(CancelRegistry::new());
        let (scheduler, collector) = scheduler(registry.clone());

        let canceller = tokio::spawn({
            let registry = registry.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                registry.cancel_set(9)
            }
        });
        let report = scheduler.run(manifest(vec![first, queued], true)).await.unwrap();
        assert!(canceller.await.unwrap());

        assert_eq!(report.completed(), 1);
        assert_eq!(report.cancelled(), 1);
        assert_eq!(report.failed(), 0);
        match &report.tasks[1].status {
            TaskStatus::Finished(outcome) => assert_eq!(outcome.output(), None),
            other => panic!("unexpected status {other:?}"),
        }

        let events = finish(scheduler, collector).await;
        assert!(instants(&events, ProgressKind::Error).is_empty());
        assert_eq!(instants(&events, ProgressKind::Complete).len(), 2);
    }
}
