#![forbid(unsafe_code)]

//! QA tracker (qat): bookkeeping for agent-driven manual testing of a web
//! application.
//!
//! Four concerns, all backed by one SQLite file:
//! 1. **Catalog**: test cases keyed by `TC-<SEGMENT>-<NNN>` codes
//! 2. **Sessions**: runs of results with incrementally maintained counters
//! 3. **Known bugs**: one open bug per test case, deduplicated per day
//! 4. **Tracker**: a persisted sweep cursor that schedules batches and
//!    defers tests whose bug was already reported today
//!
//! # Library usage
//!
//! ```rust,no_run
//! use qa_tracker::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use qa_tracker::core::config::Config;
//! use qa_tracker::tracker::schedule::{BatchPlan, plan_batch};
//! ```

pub mod prelude;

pub mod catalog;
pub mod core;
pub mod logger;
pub mod store;
pub mod tracker;
