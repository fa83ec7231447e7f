//! Per-path counters and stop reasons
//!
//! Provides serializable snapshots of what each poll loop did.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Why a path's poll loop reached DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Watch mode disabled; one poll cycle only.
    SingleCycle,
    /// `max_images_per_path` successful loads emitted.
    MaxImages,
    /// `max_seconds_per_path` elapsed since the first poll.
    MaxDuration,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::SingleCycle => "single_cycle",
            StopReason::MaxImages => "max_images",
            StopReason::MaxDuration => "max_duration",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one poll loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathReport {
    pub watch_id: usize,
    pub path: PathBuf,
    /// Polls executed, including skipped ones
    pub polls: u64,
    /// Polls classified as unchanged
    pub skipped: u64,
    /// Successful loads
    pub emitted: u64,
    /// Records carrying an error
    pub failures: u64,
    /// Failures since the last success
    pub consecutive_failures: u64,
    pub stop: Option<StopReason>,
}

impl PathReport {
    pub fn new(watch_id: usize, path: PathBuf) -> Self {
        Self {
            watch_id,
            path,
            polls: 0,
            skipped: 0,
            emitted: 0,
            failures: 0,
            consecutive_failures: 0,
            stop: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.stop.is_some()
    }

    pub(crate) fn note_success(&mut self) {
        self.emitted += 1;
        self.consecutive_failures = 0;
    }

    pub(crate) fn note_failure(&mut self) {
        self.failures += 1;
        self.consecutive_failures += 1;
    }
}

/// Snapshot of every poll loop in an engine, in registration order
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatherReport {
    pub paths: Vec<PathReport>,
}

impl GatherReport {
    pub fn total_emitted(&self) -> u64 {
        self.paths.iter().map(|p| p.emitted).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.paths.iter().map(|p| p.failures).sum()
    }

    /// True once every loop has stopped.
    pub fn all_done(&self) -> bool {
        self.paths.iter().all(PathReport::is_done)
    }
}
