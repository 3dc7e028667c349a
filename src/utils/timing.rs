// tablebackup/src/utils/timing.rs
//! Start/end/duration bookkeeping for long-running restores.
//!
//! All updates flow over a channel into one blocking writer task, which owns the
//! map and rewrites the JSON document after every event. Completion hooks running
//! on different tasks therefore never race on the file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::errors::{AppError, Result};
use crate::utils::{epoch_seconds, write_json_atomic};

/// Persisted as `[start]` while running and `[start, end, duration]` once done.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<f64>", try_from = "Vec<f64>")]
pub struct TimingRecord {
    pub start: f64,
    pub end: Option<f64>,
    pub duration: Option<f64>,
}

impl TimingRecord {
    fn started(start: f64) -> Self {
        TimingRecord {
            start,
            end: None,
            duration: None,
        }
    }

    fn finish(&mut self, at: f64) {
        let end = at.max(self.start);
        self.end = Some(end);
        self.duration = Some(end - self.start);
    }
}

impl From<TimingRecord> for Vec<f64> {
    fn from(record: TimingRecord) -> Self {
        match (record.end, record.duration) {
            (Some(end), Some(duration)) => vec![record.start, end, duration],
            _ => vec![record.start],
        }
    }
}

impl TryFrom<Vec<f64>> for TimingRecord {
    type Error = String;

    fn try_from(values: Vec<f64>) -> std::result::Result<Self, Self::Error> {
        match values.as_slice() {
            [start] => Ok(TimingRecord::started(*start)),
            [start, end, duration] => Ok(TimingRecord {
                start: *start,
                end: Some(*end),
                duration: Some(*duration),
            }),
            other => Err(format!("expected 1 or 3 timing values, got {}", other.len())),
        }
    }
}

pub type TimingMap = BTreeMap<String, TimingRecord>;

#[derive(Debug)]
enum TimingEvent {
    Started { file_name: String, at: f64 },
    Finished { file_name: String, at: f64 },
}

pub struct TimingTracker {
    sender: mpsc::UnboundedSender<TimingEvent>,
    writer: JoinHandle<Result<TimingMap>>,
    path: PathBuf,
}

/// Bound to one entry of the map; `finish` stamps its end time.
#[derive(Debug)]
pub struct TimingHandle {
    file_name: String,
    sender: mpsc::UnboundedSender<TimingEvent>,
}

impl TimingTracker {
    /// Spawns the writer task. The map starts empty and is persisted to `path`.
    pub fn start(path: PathBuf) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<TimingEvent>();
        let writer_path = path.clone();

        let writer = tokio::task::spawn_blocking(move || {
            let mut timings = TimingMap::new();
            let mut first_error: Option<AppError> = None;

            while let Some(event) = receiver.blocking_recv() {
                match event {
                    TimingEvent::Started { file_name, at } => {
                        info!(file = %file_name, start = at, "Restore start time recorded");
                        timings.insert(file_name, TimingRecord::started(at));
                    }
                    TimingEvent::Finished { file_name, at } => match timings.get_mut(&file_name) {
                        Some(record) => {
                            record.finish(at);
                            info!(
                                file = %file_name,
                                duration_secs = record.duration.unwrap_or_default(),
                                "Time taken to restore"
                            );
                        }
                        None => {
                            warn!(file = %file_name, "Finish recorded for unknown timing entry");
                            continue;
                        }
                    },
                }

                if let Err(e) = write_json_atomic(&writer_path, &timings) {
                    error!(path = %writer_path.display(), error = %e, "Failed to persist timing data");
                    first_error.get_or_insert(e);
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(timings),
            }
        });

        TimingTracker {
            sender,
            writer,
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Captures the start time now and records `{file_name: [start]}`.
    pub fn record(&self, file_name: &str) -> TimingHandle {
        self.send(TimingEvent::Started {
            file_name: file_name.to_string(),
            at: epoch_seconds(),
        });
        TimingHandle {
            file_name: file_name.to_string(),
            sender: self.sender.clone(),
        }
    }

    fn send(&self, event: TimingEvent) {
        if self.sender.send(event).is_err() {
            warn!("Timing writer has stopped; event dropped");
        }
    }

    /// Waits until every outstanding handle is finished or dropped, then returns
    /// the final map.
    pub async fn shutdown(self) -> Result<TimingMap> {
        drop(self.sender);
        self.writer
            .await
            .map_err(|e| AppError::Io(io::Error::other(e)))?
    }
}

impl TimingHandle {
    pub fn finish(self) {
        let event = TimingEvent::Finished {
            file_name: self.file_name,
            at: epoch_seconds(),
        };
        if self.sender.send(event).is_err() {
            warn!("Timing writer has stopped; finish event dropped");
        }
    }
}

#[cfg(test)]
pub fn load_timings(path: &Path) -> Result<TimingMap> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn assert_monotonic(timings: &TimingMap) {
        for (name, record) in timings {
            let end = record.end.unwrap_or_else(|| panic!("{} not finished", name));
            assert!(end >= record.start, "{} ends before it starts", name);
            assert_eq!(record.duration, Some(end - record.start));
        }
    }

    #[tokio::test]
    async fn test_record_and_finish_persists_full_entry() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("time_data_cluster.json");
        let tracker = TimingTracker::start(path.clone());

        tracker.record("schema/orders.sql").finish();
        let timings = tracker.shutdown().await?;

        assert_eq!(timings.len(), 1);
        assert_monotonic(&timings);
        assert_eq!(load_timings(&path)?, timings);
        Ok(())
    }

    #[tokio::test]
    async fn test_unfinished_entry_is_persisted_with_start_only() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("time_data.json");
        let tracker = TimingTracker::start(path.clone());

        drop(tracker.record("data/t1.sql"));
        tracker.shutdown().await?;

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(raw["data/t1.sql"].as_array().map(Vec::len), Some(1));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_completions_lose_no_updates() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("time_data.json");
        let tracker = TimingTracker::start(path.clone());

        let mut tasks = Vec::new();
        for i in 0..40 {
            let handle = tracker.record(&format!("data/t{}.sql", i));
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis((i % 5) as u64)).await;
                handle.finish();
            }));
        }
        for task in tasks {
            task.await?;
        }
        let timings = tracker.shutdown().await?;

        let persisted = load_timings(&path)?;
        assert_eq!(persisted.len(), 40);
        assert_eq!(persisted, timings);
        assert_monotonic(&persisted);
        Ok(())
    }

    #[test]
    fn test_record_rejects_malformed_arrays() {
        assert!(TimingRecord::try_from(vec![1.0, 2.0]).is_err());
        assert!(TimingRecord::try_from(vec![]).is_err());
        let record = TimingRecord::try_from(vec![10.0, 12.5, 2.5]).unwrap();
        assert_eq!(record.end, Some(12.5));
    }

    #[test]
    fn test_finish_clamps_backwards_clock() {
        let mut record = TimingRecord::started(100.0);
        record.finish(99.0);
        assert_eq!(record.end, Some(100.0));
        assert_eq!(record.duration, Some(0.0));
    }
}
