//! Stream command - paced re-emission of a task batch
//!
//! Tasks come from a manifest file or from the replays a bracket
//! configuration lists for one set. While the batch runs, stdin accepts
//! control lines:
//!
//! - `cancel <setId>` - cancel every task of a set
//! - `cancel task <taskId>` - cancel one task
//! - `cancel all` - cancel everything
//!
//! Ctrl-C behaves like `cancel all`; partial outputs are finalized.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use relaycast_core::linkage::replays_for_set;
use relaycast_core::replay::{TaskId, TaskReport, forward_progress};
use relaycast_core::{
    BatchReport, CancelRegistry, Config, PlaybackMode, ProgressEmitter, Scheduler,
    SchedulerConfig, TaskStatus,
};
use relaycast_shared::fs::{MAX_DOCUMENT_BYTES, read_text_with_limit};
use relaycast_shared::{FailurePolicy, StreamTask, TaskManifest};

/// Arguments for the stream command
#[derive(Args)]
pub struct StreamArgs {
    /// Task manifest (JSON object with `streams`, or a bare array of tasks)
    #[arg(long, conflicts_with = "bracket", required_unless_present = "bracket")]
    pub tasks: Option<PathBuf>,

    /// Bracket configuration with a `referenceReplayMap`
    #[arg(long, requires_all = ["set", "out"])]
    pub bracket: Option<PathBuf>,

    /// Set whose replays are streamed (with --bracket)
    #[arg(long)]
    pub set: Option<u64>,

    /// Output directory (with --bracket)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Playback rate for tasks that do not set one
    #[arg(long)]
    pub fps: Option<f64>,

    /// Run tasks one at a time
    #[arg(long)]
    pub sequential: bool,

    /// Delay between sequential tasks in milliseconds
    #[arg(long)]
    pub gap_ms: Option<u64>,

    /// Playback mode: stream or copy
    #[arg(long)]
    pub mode: Option<PlaybackMode>,

    /// Keep going after a failed task in sequential mode
    #[arg(long)]
    pub continue_on_error: bool,
}

/// Control line read from stdin while a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlCommand {
    CancelSet(u64),
    CancelTask(u64),
    CancelAll,
}

fn parse_control(line: &str) -> Option<ControlCommand> {
    let mut words = line.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("cancel") {
        return None;
    }
    let target = words.next()?;
    let command = if target.eq_ignore_ascii_case("all") {
        ControlCommand::CancelAll
    } else if target.eq_ignore_ascii_case("task") {
        ControlCommand::CancelTask(words.next()?.parse().ok()?)
    } else {
        ControlCommand::CancelSet(target.parse().ok()?)
    };
    if words.next().is_some() {
        return None;
    }
    Some(command)
}

/// Execute the stream command
pub fn execute(args: StreamArgs, config: &Config) -> Result<()> {
    let mut manifest = load_manifest(&args)?;
    if args.sequential {
        manifest.sequential = true;
    }
    if args.continue_on_error {
        manifest.on_error = FailurePolicy::Continue;
    }

    let mut defaults = SchedulerConfig::from(config);
    if let Some(fps) = args.fps {
        anyhow::ensure!(fps.is_finite() && fps > 0.0, "--fps must be a positive number");
        defaults.fps = fps;
    }
    if let Some(gap_ms) = args.gap_ms {
        defaults.gap_ms = gap_ms;
    }
    if let Some(mode) = args.mode {
        defaults.mode = mode;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(run_batch(manifest, defaults));
    // The stdin reader blocks on a thread that cannot be interrupted
    runtime.shutdown_timeout(Duration::from_millis(100));
    let report = result?;

    print_summary(&report);
    if !report.is_success() {
        anyhow::bail!(
            "{} task(s) failed, {} skipped",
            report.failed(),
            report.skipped()
        );
    }
    Ok(())
}

fn load_manifest(args: &StreamArgs) -> Result<TaskManifest> {
    if let Some(path) = &args.tasks {
        let json = read_text_with_limit(path, MAX_DOCUMENT_BYTES)?;
        return TaskManifest::from_json(&json)
            .with_context(|| format!("Failed to load tasks from {}", path.display()));
    }

    let (Some(bracket), Some(set_id), Some(out)) = (&args.bracket, args.set, &args.out) else {
        anyhow::bail!("Either --tasks or --bracket with --set and --out is required");
    };
    manifest_for_set(bracket, set_id, out)
}

/// Build a sequential manifest from the replays a bracket config lists for one set.
fn manifest_for_set(bracket: &Path, set_id: u64, out: &Path) -> Result<TaskManifest> {
    let json = read_text_with_limit(bracket, MAX_DOCUMENT_BYTES)?;
    let doc: serde_json::Value = serde_json::from_str(&json)
        .with_context(|| format!("Invalid bracket config: {}", bracket.display()))?;
    let base_dir = bracket.parent().unwrap_or(Path::new("."));

    let replays: Vec<PathBuf> = replays_for_set(&doc, set_id, base_dir)
        .into_iter()
        .filter(|path| {
            let exists = path.is_file();
            if !exists {
                tracing::warn!("Skipping missing replay {}", path.display());
            }
            exists
        })
        .collect();
    anyhow::ensure!(!replays.is_empty(), "No replays found for set {set_id}");

    let total = replays.len() as u32;
    let streams = replays
        .into_iter()
        .enumerate()
        .map(|(i, path)| {
            let mut task = StreamTask::new(path, out);
            task.set_id = Some(set_id);
            task.replay_index = i as u32 + 1;
            task.replay_total = total;
            task
        })
        .collect();

    Ok(TaskManifest {
        streams,
        sequential: true,
        ..Default::default()
    })
}

async fn run_batch(manifest: TaskManifest, defaults: SchedulerConfig) -> Result<BatchReport> {
    let registry = Arc::new(CancelRegistry::new());
    let (emitter, rx) = ProgressEmitter::channel();
    let forwarder = tokio::spawn(forward_progress(rx, tokio::io::stdout()));
    let control = tokio::spawn(read_control(registry.clone()));
    let interrupt = tokio::spawn(watch_interrupt(registry.clone()));

    let scheduler = Scheduler::new(defaults, registry, emitter);
    let result = scheduler.run(manifest).await;

    control.abort();
    interrupt.abort();
    // Closing the last emitter ends the forwarder once it has drained
    drop(scheduler);
    match forwarder.await {
        Ok(lines) => tracing::debug!(lines, "Progress forwarder finished"),
        Err(e) => tracing::warn!("Progress forwarder stopped: {e}"),
    }

    Ok(result?)
}

async fn read_control(registry: Arc<CancelRegistry>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Stopped reading control input: {e}");
                return;
            }
        };
        match parse_control(&line) {
            Some(ControlCommand::CancelSet(set_id)) => {
                if !registry.cancel_set(set_id) {
                    tracing::info!(set = set_id, "No running task for set");
                }
            }
            Some(ControlCommand::CancelTask(id)) => {
                if !registry.cancel_task(TaskId(id)) {
                    tracing::info!(task = id, "No running task with that id");
                }
            }
            Some(ControlCommand::CancelAll) => {
                let cancelled = registry.cancel_all();
                tracing::info!(cancelled, running = registry.len(), "Cancelled all tasks");
            }
            None if line.trim().is_empty() => {}
            None => tracing::warn!("Ignoring control line: {line}"),
        }
    }
}

async fn watch_interrupt(registry: Arc<CancelRegistry>) {
    while tokio::signal::ctrl_c().await.is_ok() {
        let cancelled = registry.cancel_all();
        tracing::info!(cancelled, "Interrupted, finalizing outputs");
    }
}

fn describe(task: &TaskReport) -> String {
    match &task.status {
        TaskStatus::Finished(outcome) => {
            let state = if outcome.is_cancelled() { "cancelled" } else { "completed" };
            match outcome.output() {
                Some(output) => format!("{state} -> {}", output.display()),
                None => state.to_string(),
            }
        }
        TaskStatus::Failed(e) => format!("failed: {e}"),
        TaskStatus::Skipped => "skipped".to_string(),
    }
}

fn print_summary(report: &BatchReport) {
    // stdout is reserved for progress lines
    eprintln!();
    eprintln!("=== Stream Summary ===");
    for task in &report.tasks {
        eprintln!(
            "  {} {}: {}",
            task.id,
            task.replay_path.display(),
            describe(task)
        );
    }
    eprintln!();
    eprintln!(
        "Completed: {}  Cancelled: {}  Failed: {}  Skipped: {}",
        report.completed(),
        report.cancelled(),
        report.failed(),
        report.skipped()
    );
}
