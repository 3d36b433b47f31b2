//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use qa_tracker::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{QatError, Result};

// Catalog
pub use crate::catalog::intake::{ImportTask, TaskParser};
pub use crate::catalog::{Category, Priority, TestCase, TestCode};

// Store
pub use crate::store::Store;
pub use crate::store::bugs::{BugSeverity, BugStatus, KnownBug, KnownBugRegistry};
pub use crate::store::catalog::TestCatalog;
pub use crate::store::sessions::{Session, SessionLedger, TestStatus};
pub use crate::store::stats::StatsEngine;

// Tracker
pub use crate::tracker::classify::{Classification, RawOutcome, classify};
pub use crate::tracker::queue::{Candidate, load_queue};
pub use crate::tracker::recorder::{RecordRequest, ResultRecorder};
pub use crate::tracker::schedule::{BatchPlan, plan_batch};
pub use crate::tracker::state::{SessionTracker, TrackerStatus};
pub use crate::tracker::stop::StopSignal;
pub use crate::tracker::sweep::{ExecutionReport, Sweep, TestExecutor};

// Logging
pub use crate::logger::jsonl::ActivityLog;
