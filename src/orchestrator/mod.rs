// tablebackup/src/orchestrator/mod.rs
//! Fan-out of external client processes, one per work item, bounded by a
//! fixed-size worker pool.
//!
//! Every process gets its own waiter task which owns the child, releases the pool
//! slot on exit and runs an optional completion hook. [`wait_all`] then drains a
//! batch in submission order without ever cancelling the remaining members.

use std::ffi::OsString;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkTarget {
    Table(String),
    File(PathBuf),
}

/// One unit of backup or restore work. Duplicates are not collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub database: String,
    pub target: WorkTarget,
}

impl WorkItem {
    pub fn table(database: &str, table: &str) -> Self {
        WorkItem {
            database: database.to_string(),
            target: WorkTarget::Table(table.to_string()),
        }
    }

    pub fn file(database: &str, path: &Path) -> Self {
        WorkItem {
            database: database.to_string(),
            target: WorkTarget::File(path.to_path_buf()),
        }
    }

    /// Table name, or the base name of the restore file.
    pub fn label(&self) -> String {
        match &self.target {
            WorkTarget::Table(table) => table.clone(),
            WorkTarget::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().trim().to_string())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            WorkTarget::Table(table) => write!(f, "{}.{}", self.database, table),
            WorkTarget::File(path) => write!(f, "{} <- {}", self.database, path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Truncate,
    Append,
}

/// An external invocation as an argument vector; nothing goes through a shell.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub stdin: Option<PathBuf>,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub output_mode: OutputMode,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, stdout: &Path, stderr: &Path) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            stdout: stdout.to_path_buf(),
            stderr: stderr.to_path_buf(),
            output_mode: OutputMode::Truncate,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin_from(mut self, path: &Path) -> Self {
        self.stdin = Some(path.to_path_buf());
        self
    }

    pub fn append_output(mut self) -> Self {
        self.output_mode = OutputMode::Append;
        self
    }

    fn build(&self) -> io::Result<Command> {
        let stdin = match &self.stdin {
            Some(path) => Stdio::from(File::open(path)?),
            None => Stdio::null(),
        };
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(stdin)
            .stdout(Stdio::from(open_output(&self.stdout, self.output_mode)?))
            .stderr(Stdio::from(open_output(&self.stderr, self.output_mode)?));
        Ok(cmd)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        if let Some(stdin) = &self.stdin {
            write!(f, " < {}", stdin.display())?;
        }
        Ok(())
    }
}

fn open_output(path: &Path, mode: OutputMode) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        OutputMode::Truncate => options.write(true).truncate(true),
        OutputMode::Append => options.append(true),
    };
    options.open(path)
}

/// Terminal state of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub item: WorkItem,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }

    fn from_wait(item: WorkItem, pid: Option<u32>, status: io::Result<ExitStatus>) -> Self {
        let (exit_code, error) = match status {
            Ok(status) => match status.code() {
                Some(code) => (Some(code), None),
                None => (None, Some(format!("terminated without exit code ({})", status))),
            },
            Err(e) => (None, Some(format!("failed while waiting: {}", e))),
        };
        ProcessOutcome {
            item,
            pid,
            exit_code,
            error,
        }
    }

    fn not_started(item: WorkItem, reason: String) -> Self {
        ProcessOutcome {
            item,
            pid: None,
            exit_code: None,
            error: Some(reason),
        }
    }

    fn describe(&self) -> String {
        match (&self.error, self.exit_code) {
            (Some(error), _) => error.clone(),
            (None, Some(code)) => format!("exit status {}", code),
            (None, None) => "no exit status".to_string(),
        }
    }
}

/// A spawned (or failed-to-spawn) process. Owned by whoever spawned it.
#[derive(Debug)]
pub struct ProcessHandle {
    pub item: WorkItem,
    pub command_line: String,
    pub pid: Option<u32>,
    task: JoinHandle<ProcessOutcome>,
}

impl ProcessHandle {
    /// `true` once the process has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Bounded worker pool: at most `limit` child processes run at once; further
/// submissions wait for a free slot.
#[derive(Debug, Clone)]
pub struct ProcessPool {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl ProcessPool {
    pub fn new(max_concurrent: usize) -> Self {
        let limit = max_concurrent.max(1);
        ProcessPool {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn spawn(&self, item: WorkItem, command: CommandSpec) -> ProcessHandle {
        self.spawn_observed(item, command, || |_: &ProcessOutcome| {})
            .await
    }

    /// Waits for a free slot, then starts `command` and returns immediately.
    ///
    /// `on_start` runs once the slot is held, just before the process is started,
    /// and returns the exit hook. The exit hook runs exactly once: when the process
    /// reaches a terminal state, or right away if it could not be started. Start
    /// failures (missing binary, unopenable redirect targets) surface as a failed
    /// outcome, never as an error from this call.
    pub async fn spawn_observed<S, F>(
        &self,
        item: WorkItem,
        command: CommandSpec,
        on_start: S,
    ) -> ProcessHandle
    where
        S: FnOnce() -> F,
        F: FnOnce(&ProcessOutcome) + Send + 'static,
    {
        let command_line = command.to_string();

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let on_exit = on_start();
                let outcome =
                    ProcessOutcome::not_started(item.clone(), "process pool is closed".to_string());
                return finished_handle(item, command_line, outcome, on_exit);
            }
        };

        let on_exit = on_start();
        let spawned = command.build().and_then(|mut cmd| cmd.spawn());
        match spawned {
            Ok(mut child) => {
                let pid = child.id();
                info!(item = %item, pid, command = %command_line, "Spawned process");
                let task_item = item.clone();
                let task = tokio::spawn(async move {
                    let status = child.wait().await;
                    drop(permit);
                    let outcome = ProcessOutcome::from_wait(task_item, pid, status);
                    on_exit(&outcome);
                    outcome
                });
                ProcessHandle {
                    item,
                    command_line,
                    pid,
                    task,
                }
            }
            Err(e) => {
                drop(permit);
                error!(item = %item, command = %command_line, error = %e, "Failed to start process");
                let outcome = ProcessOutcome::not_started(
                    item.clone(),
                    format!("failed to start {}: {}", command.program.display(), e),
                );
                finished_handle(item, command_line, outcome, on_exit)
            }
        }
    }
}

fn finished_handle<F>(
    item: WorkItem,
    command_line: String,
    outcome: ProcessOutcome,
    on_exit: F,
) -> ProcessHandle
where
    F: FnOnce(&ProcessOutcome) + Send + 'static,
{
    on_exit(&outcome);
    ProcessHandle {
        item,
        command_line,
        pid: None,
        task: tokio::spawn(async move { outcome }),
    }
}

/// Success/failure partition of a drained batch, in submission order.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<ProcessOutcome>,
    pub failed: Vec<ProcessOutcome>,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_labels(&self) -> Vec<String> {
        self.failed.iter().map(|o| o.item.label()).collect()
    }

    pub fn succeeded_labels(&self) -> Vec<String> {
        self.succeeded.iter().map(|o| o.item.label()).collect()
    }
}

/// Blocks until every handle has completed. No early exit: one failure never
/// stops the others from being drained.
pub async fn wait_all(handles: Vec<ProcessHandle>) -> BatchOutcome {
    let mut batch = BatchOutcome::default();

    for handle in handles {
        info!(
            item = %handle.item,
            command = %handle.command_line,
            finished = handle.is_finished(),
            "Waiting for process"
        );
        let outcome = match handle.task.await {
            Ok(outcome) => outcome,
            Err(e) => ProcessOutcome {
                item: handle.item,
                pid: handle.pid,
                exit_code: None,
                error: Some(format!("waiter task failed: {}", e)),
            },
        };

        if outcome.success() {
            info!(item = %outcome.item, pid = outcome.pid, "Process completed");
            batch.succeeded.push(outcome);
        } else {
            error!(
                item = %outcome.item,
                pid = outcome.pid,
                exit_code = outcome.exit_code,
                reason = %outcome.describe(),
                "Process failed"
            );
            batch.failed.push(outcome);
        }
    }

    info!(
        processed = batch.total(),
        succeeded = batch.succeeded.len(),
        failed = batch.failed.len(),
        "Batch drained"
    );
    batch
}
