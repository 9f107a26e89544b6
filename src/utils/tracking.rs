//! Run tracking collaborator shared by the pipelines
//!
//! Steps report progress text, scalar metrics, run parameters, and tags
//! through the `RunTracker` trait instead of talking to a tracking backend
//! directly, so tests can swap in an in-memory recorder.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use anyhow::{anyhow, Result};
use log::Level;

/// One recorded tracking call, kept by `MemoryTracker` for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Text {
        message: String,
        level: Level,
    },
    Scalar {
        title: String,
        series: String,
        iteration: u64,
        value: f64,
    },
    Parameter {
        key: String,
        value: String,
    },
    Tags(Vec<String>),
}

/// Observer interface for pipeline progress and metrics.
pub trait RunTracker: Send + Sync {
    /// Reports a progress message. Implementations also mirror it to the
    /// console log at the given level.
    fn report_text(&self, message: &str, level: Level);

    /// Reports one point of a named metric series.
    fn report_scalar(&self, title: &str, series: &str, iteration: u64, value: f64);

    /// Records a run parameter.
    fn set_parameter(&self, key: &str, value: &str);

    /// Attaches tags to the run.
    fn add_tags(&self, tags: &[&str]);
}

/// Tracker that appends every event to a log file in the run directory.
pub struct FileTracker {
    file: Mutex<File>,
}

impl FileTracker {
    /// Creates the tracking log and writes the project and task headers.
    ///
    /// # Arguments
    ///
    /// * `path` - Destination for the tracking log file
    /// * `project` - Project name recorded in the header
    /// * `task` - Task name recorded in the header
    ///
    /// # Returns
    ///
    /// * `Result<FileTracker>` - Tracker writing to `path`, or an error if
    ///   the file cannot be created
    pub fn create(path: &Path, project: &str, task: &str) -> Result<FileTracker> {
        let mut file = File::create(path)
            .map_err(|e| anyhow!("Failed to create tracking log {}: {}", path.display(), e))?;
        writeln!(file, "PROJECT: {}", project)
            .map_err(|e| anyhow!("Failed to write tracking header: {}", e))?;
        writeln!(file, "TASK: {}", task)
            .map_err(|e| anyhow!("Failed to write tracking header: {}", e))?;
        Ok(FileTracker {
            file: Mutex::new(file),
        })
    }

    fn sink(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RunTracker for FileTracker {
    fn report_text(&self, message: &str, level: Level) {
        log::log!(level, "{}", message);
        let _ = writeln!(self.sink(), "TEXT [{}] {}", level, message);
    }

    fn report_scalar(&self, title: &str, series: &str, iteration: u64, value: f64) {
        let _ = writeln!(
            self.sink(),
            "SCALAR {}/{}[{}] = {}",
            title,
            series,
            iteration,
            value
        );
    }

    fn set_parameter(&self, key: &str, value: &str) {
        let _ = writeln!(self.sink(), "PARAM {} = {}", key, value);
    }

    fn add_tags(&self, tags: &[&str]) {
        let _ = writeln!(self.sink(), "TAGS {}", tags.join(","));
    }
}

/// Tracker that records events in memory, for tests.
#[derive(Default)]
pub struct MemoryTracker {
    events: Mutex<Vec<TrackerEvent>>,
}

impl MemoryTracker {
    pub fn new() -> MemoryTracker {
        MemoryTracker::default()
    }

    /// Snapshot of every event recorded so far, in call order.
    pub fn events(&self) -> Vec<TrackerEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn push(&self, event: TrackerEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

impl RunTracker for MemoryTracker {
    fn report_text(&self, message: &str, level: Level) {
        log::log!(level, "{}", message);
        self.push(TrackerEvent::Text {
            message: message.to_string(),
            level,
        });
    }

    fn report_scalar(&self, title: &str, series: &str, iteration: u64, value: f64) {
        self.push(TrackerEvent::Scalar {
            title: title.to_string(),
            series: series.to_string(),
            iteration,
            value,
        });
    }

    fn set_parameter(&self, key: &str, value: &str) {
        self.push(TrackerEvent::Parameter {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    fn add_tags(&self, tags: &[&str]) {
        self.push(TrackerEvent::Tags(
            tags.iter().map(|t| t.to_string()).collect(),
        ));
    }
}
