//! Stop requests between tests: a stop file containing `STOP`, or SIGINT/SIGTERM.
//!
//! Uses the `signal-hook` crate for safe signal registration. The sweep polls
//! [`StopSignal::should_stop`] before each test; nothing is interrupted mid-test.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::core::errors::{QatError, Result};

const STOP_MARKER: &str = "STOP";

/// Why a sweep was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StopFile,
    Signal,
}

/// Shared stop state: file marker plus an OS-signal flag.
#[derive(Clone)]
pub struct StopSignal {
    path: PathBuf,
    signal_flag: Arc<AtomicBool>,
}

impl StopSignal {
    /// Watch `path` only; no OS signal hooks.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            signal_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Watch `path` and register SIGINT/SIGTERM.
    ///
    /// Registration is best-effort; failures are reported on stderr.
    #[must_use]
    pub fn with_os_signals(path: impl Into<PathBuf>) -> Self {
        let stop = Self::new(path);
        for (name, signal) in [("SIGTERM", SIGTERM), ("SIGINT", SIGINT)] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&stop.signal_flag)) {
                eprintln!("[QAT-SIGNAL] failed to register {name}: {e}");
            }
        }
        stop
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reason to stop now, if any. A missing or unreadable stop file is "keep going".
    #[must_use]
    pub fn should_stop(&self) -> Option<StopReason> {
        if self.signal_flag.load(Ordering::Relaxed) {
            return Some(StopReason::Signal);
        }
        fs::read_to_string(&self.path)
            .ok()
            .filter(|content| content.contains(STOP_MARKER))
            .map(|_| StopReason::StopFile)
    }

    /// Programmatically raise the signal flag (same effect as SIGINT).
    pub fn request_stop(&self) {
        self.signal_flag.store(true, Ordering::Relaxed);
    }

    /// Write the stop file.
    pub fn create(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| QatError::io(parent, source))?;
        }
        fs::write(&self.path, STOP_MARKER).map_err(|source| QatError::io(&self.path, source))
    }

    /// Remove the stop file. Returns `false` when there was none.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(QatError::io(&self.path, source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_file_means_keep_going() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopSignal::new(dir.path().join("stop-signal.txt"));
        assert_eq!(stop.should_stop(), None);
    }

    #[test]
    fn file_must_contain_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stop-signal.txt");
        fs::write(&path, "keep going").unwrap();
        let stop = StopSignal::new(&path);
        assert_eq!(stop.should_stop(), None);
        fs::write(&path, "please STOP now").unwrap();
        assert_eq!(stop.should_stop(), Some(StopReason::StopFile));
    }

    #[test]
    fn create_and_clear_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopSignal::new(dir.path().join("nested").join("stop-signal.txt"));
        stop.create().unwrap();
        assert_eq!(stop.should_stop(), Some(StopReason::StopFile));
        assert!(stop.clear().unwrap());
        assert!(!stop.clear().unwrap());
        assert_eq!(stop.should_stop(), None);
    }

    #[test]
    fn programmatic_request_is_shared_between_clones() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopSignal::new(dir.path().join("stop-signal.txt"));
        let clone = stop.clone();
        clone.request_stop();
        assert_eq!(stop.should_stop(), Some(StopReason::Signal));
    }
}
