//! Session tracker: the scheduling cursor for one sweep.
//!
//! States and transitions:
//!
//! ```text
//! idle --start--> running --finish--> finished
//!                 running --mark_completed--> running
//! running | finished --reset--> idle
//! ```
//!
//! Any other transition is an `InvalidStateTransition`. The state is written
//! atomically (write to `.tmp`, fsync, then `rename()`) after every mutation.
//! A missing state file reads as idle.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::queue::Candidate;
use crate::core::errors::{QatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerStatus {
    #[default]
    Idle,
    Running,
    Finished,
}

impl TrackerStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted cursor of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub sweep_id: Option<String>,
    pub started_at: Option<String>,
    pub category: Option<String>,
    pub status: TrackerStatus,
    pub queue: Vec<Candidate>,
    pub completed: BTreeSet<String>,
    /// Queue position of the first candidate not yet completed.
    pub current_index: usize,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerReport {
    pub status: TrackerStatus,
    pub sweep_id: Option<String>,
    pub category: Option<String>,
    pub total_tests: usize,
    pub completed_count: usize,
    pub remaining_count: usize,
    pub is_finished: bool,
}

/// Owner of the [`SessionState`].
#[derive(Debug)]
pub struct SessionTracker {
    path: Option<PathBuf>,
    state: SessionState,
}

impl SessionTracker {
    /// Load the tracker persisted at `path`; a missing file is idle.
    pub fn open(path: &Path) -> Result<Self> {
        let state = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|error| QatError::Serialization {
                context: "session state",
                details: format!("{}: {error}", path.display()),
            })?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => SessionState::default(),
            Err(source) => return Err(QatError::io(path, source)),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            state,
        })
    }

    /// Tracker that never touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: SessionState::default(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `idle -> running` with a fresh queue.
    pub fn start(
        &mut self,
        queue: Vec<Candidate>,
        category: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.state.status != TrackerStatus::Idle {
            return Err(QatError::transition("start", self.state.status));
        }
        let mut next = SessionState {
            sweep_id: Some(format!("sweep-{}", at.timestamp_millis())),
            started_at: Some(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            category,
            status: TrackerStatus::Running,
            queue,
            completed: BTreeSet::new(),
            current_index: 0,
        };
        next.current_index = next_index(&next);
        self.commit(next)
    }

    /// Mark `identifier` done. Returns `false` when it already was.
    pub fn mark_completed(&mut self, identifier: &str) -> Result<bool> {
        if self.state.status != TrackerStatus::Running {
            return Err(QatError::transition("mark completed", self.state.status));
        }
        if self.state.completed.contains(identifier) {
            return Ok(false);
        }
        let mut next = self.state.clone();
        next.completed.insert(identifier.to_string());
        next.current_index = next_index(&next);
        self.commit(next)?;
        Ok(true)
    }

    /// `running -> finished`.
    pub fn finish(&mut self) -> Result<()> {
        if self.state.status != TrackerStatus::Running {
            return Err(QatError::transition("finish", self.state.status));
        }
        let mut next = self.state.clone();
        next.status = TrackerStatus::Finished;
        self.commit(next)
    }

    /// Back to idle from any state. Resetting an idle tracker changes nothing.
    pub fn reset(&mut self) -> Result<()> {
        if self.state.status == TrackerStatus::Idle {
            return Ok(());
        }
        self.commit(SessionState::default())
    }

    /// Persist `next`, then adopt it. A failed write leaves memory untouched.
    fn commit(&mut self, next: SessionState) -> Result<()> {
        if let Some(path) = &self.path {
            write_state_atomic(path, &next)?;
        }
        self.state = next;
        Ok(())
    }

    /// Queue entries not yet completed, in queue order.
    #[must_use]
    pub fn remaining(&self) -> Vec<&Candidate> {
        self.state
            .queue
            .iter()
            .filter(|candidate| !self.state.completed.contains(&candidate.identifier))
            .collect()
    }

    /// Every queued candidate has been completed (and there was at least one).
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        !self.state.queue.is_empty() && self.remaining().is_empty()
    }

    #[must_use]
    pub fn status(&self) -> TrackerReport {
        let remaining_count = self.remaining().len();
        let total_tests = self.state.queue.len();
        TrackerReport {
            status: self.state.status,
            sweep_id: self.state.sweep_id.clone(),
            category: self.state.category.clone(),
            total_tests,
            completed_count: self.state.completed.len(),
            remaining_count,
            is_finished: remaining_count == 0 && total_tests > 0,
        }
    }
}

fn next_index(state: &SessionState) -> usize {
    state
        .queue
        .iter()
        .position(|candidate| !state.completed.contains(&candidate.identifier))
        .unwrap_or(state.queue.len())
}

/// Write the state file atomically: write to .tmp, fsync, then rename.
fn write_state_atomic(path: &Path, state: &SessionState) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| QatError::io(parent, source))?;
    }

    let json = serde_json::to_string_pretty(state)?;

    let result = (|| {
        {
            use std::io::Write;
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    })();

    if let Err(source) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(QatError::io(path, source));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn queue(ids: &[&str]) -> Vec<Candidate> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Candidate::new(*id, format!("TC-NAV-{:03}", i + 1)))
            .collect()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 4, 8, 0, 0).unwrap()
    }

    #[test]
    fn missing_file_reads_as_idle() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = SessionTracker::open(&dir.path().join("state.json")).unwrap();
        assert_eq!(tracker.state().status, TrackerStatus::Idle);
        assert!(!tracker.is_exhausted());
    }

    #[test]
    fn corrupt_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(SessionTracker::open(&path).unwrap_err().code(), "QAT-3001");
    }

    #[test]
    fn full_lifecycle_persists_each_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut tracker = SessionTracker::open(&path).unwrap();
        tracker
            .start(queue(&["a", "b", "c"]), Some("map navigation".to_string()), at())
            .unwrap();
        assert!(tracker.mark_completed("a").unwrap());

        let reloaded = SessionTracker::open(&path).unwrap();
        assert_eq!(reloaded.state(), tracker.state());
        assert_eq!(reloaded.state().current_index, 1);
        assert_eq!(reloaded.state().sweep_id.as_deref(), Some("sweep-1770192000000"));

        tracker.mark_completed("b").unwrap();
        tracker.mark_completed("c").unwrap();
        assert!(tracker.is_exhausted());
        tracker.finish().unwrap();
        assert_eq!(SessionTracker::open(&path).unwrap().state().status, TrackerStatus::Finished);

        tracker.reset().unwrap();
        assert_eq!(SessionTracker::open(&path).unwrap().state(), &SessionState::default());
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn mark_completed_is_idempotent() {
        let mut tracker = SessionTracker::in_memory();
        tracker.start(queue(&["a", "b"]), None, at()).unwrap();
        assert!(tracker.mark_completed("a").unwrap());
        assert!(!tracker.mark_completed("a").unwrap());
        let report = tracker.status();
        assert_eq!(report.completed_count, 1);
        assert_eq!(report.remaining_count, 1);
        assert!(!report.is_finished);
    }

    #[test]
    fn out_of_order_completion_keeps_cursor_on_first_remaining() {
        let mut tracker = SessionTracker::in_memory();
        tracker.start(queue(&["a", "b", "c"]), None, at()).unwrap();
        tracker.mark_completed("b").unwrap();
        assert_eq!(tracker.state().current_index, 0);
        tracker.mark_completed("a").unwrap();
        assert_eq!(tracker.state().current_index, 2);
        let remaining: Vec<&str> = tracker
            .remaining()
            .iter()
            .map(|c| c.identifier.as_str())
            .collect();
        assert_eq!(remaining, vec!["c"]);
    }

    #[test]
    fn guarded_transitions() {
        let mut tracker = SessionTracker::in_memory();
        assert!(matches!(
            tracker.mark_completed("a").unwrap_err(),
            QatError::InvalidStateTransition { .. }
        ));
        assert!(tracker.finish().is_err());
        tracker.reset().unwrap();

        tracker.start(queue(&["a"]), None, at()).unwrap();
        let err = tracker.start(queue(&["b"]), None, at()).unwrap_err();
        assert!(err.to_string().contains("running"));

        tracker.finish().unwrap();
        assert!(tracker.mark_completed("a").is_err());
        assert!(tracker.finish().is_err());
        assert!(tracker.start(queue(&["b"]), None, at()).is_err());

        tracker.reset().unwrap();
        tracker.start(queue(&["b"]), None, at()).unwrap();
        assert_eq!(tracker.state().status, TrackerStatus::Running);
    }

    /// Replace the state directory with a plain file so every write fails.
    fn break_state_dir(dir: &Path) {
        fs::remove_dir_all(dir).unwrap();
        fs::write(dir, "not a directory").unwrap();
    }

    #[test]
    fn failed_save_leaves_completion_retryable() {
        let root = tempfile::tempdir().unwrap();
        let state_dir = root.path().join("d");
        let path = state_dir.join("state.json");
        let mut tracker = SessionTracker::open(&path).unwrap();
        tracker.start(queue(&["a", "b"]), None, at()).unwrap();

        break_state_dir(&state_dir);
        assert_eq!(tracker.mark_completed("a").unwrap_err().code(), "QAT-3003");
        assert!(tracker.state().completed.is_empty());
        assert_eq!(tracker.status().remaining_count, 2);
        // The retry must hit disk again rather than report "already done".
        assert!(tracker.mark_completed("a").is_err());

        fs::remove_file(&state_dir).unwrap();
        assert!(tracker.mark_completed("a").unwrap());
        let reloaded = SessionTracker::open(&path).unwrap();
        assert!(reloaded.state().completed.contains("a"));
    }

    #[test]
    fn failed_save_keeps_every_transition_unapplied() {
        let root = tempfile::tempdir().unwrap();
        let state_dir = root.path().join("d");
        fs::create_dir(&state_dir).unwrap();
        let path = state_dir.join("state.json");
        let mut tracker = SessionTracker::open(&path).unwrap();

        break_state_dir(&state_dir);
        assert!(tracker.start(queue(&["a"]), None, at()).is_err());
        assert_eq!(tracker.state(), &SessionState::default());

        fs::remove_file(&state_dir).unwrap();
        tracker.start(queue(&["a"]), None, at()).unwrap();
        break_state_dir(&state_dir);
        assert!(tracker.finish().is_err());
        assert_eq!(tracker.state().status, TrackerStatus::Running);
        assert!(tracker.reset().is_err());
        assert_eq!(tracker.state().status, TrackerStatus::Running);
    }

    #[test]
    fn empty_queue_is_never_exhausted() {
        let mut tracker = SessionTracker::in_memory();
        tracker.start(Vec::new(), None, at()).unwrap();
        assert!(!tracker.is_exhausted());
        assert!(!tracker.status().is_finished);
    }
}
