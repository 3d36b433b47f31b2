//! Property-based tests for tracker and recording invariants.
//!
//! Completion is idempotent, scheduling partitions its input, classification
//! is total, session counters always agree with stored results, and repeated
//! failures collapse into one open bug.

use std::collections::{BTreeSet, HashMap};

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;

use super::classify::classify_text;
use super::queue::Candidate;
use super::recorder::{RecordRequest, ResultRecorder};
use super::schedule::plan_batch;
use super::state::SessionTracker;
use crate::core::config::RecordingConfig;
use crate::store::Store;
use crate::store::bugs::{BugStatus, KnownBugRegistry};
use crate::store::sessions::{SessionLedger, TestStatus};

// ──────────────────── strategies ────────────────────

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 4).unwrap()
}

fn arb_status() -> impl Strategy<Value = TestStatus> {
    prop_oneof![
        Just(TestStatus::Passed),
        Just(TestStatus::Failed),
        Just(TestStatus::Blocked),
        Just(TestStatus::Skipped),
    ]
}

fn arb_queue() -> impl Strategy<Value = Vec<Candidate>> {
    (0usize..30).prop_map(|n| {
        (0..n)
            .map(|i| Candidate::new(format!("g{i}"), format!("TC-UI-{i:03}")))
            .collect()
    })
}

/// Queue plus a bug index keyed by some of its codes, with last_seen offsets
/// in days relative to `base_day()` (negative = past, positive = future).
fn arb_queue_with_bugs() -> impl Strategy<Value = (Vec<Candidate>, HashMap<String, NaiveDate>)> {
    arb_queue().prop_flat_map(|queue| {
        let n = queue.len();
        let offsets = prop::collection::vec(prop::option::of(-5i64..3), n);
        (Just(queue), offsets).prop_map(|(queue, offsets)| {
            let bugs = queue
                .iter()
                .zip(offsets)
                .filter_map(|(candidate, offset)| {
                    offset.map(|days| (candidate.code.clone(), base_day() + Duration::days(days)))
                })
                .collect();
            (queue, bugs)
        })
    })
}

// ──────────────────── properties ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Marking any sequence of queued ids keeps completed and remaining a
    /// partition of the queue, and a repeat mark is a no-op.
    #[test]
    fn completion_is_idempotent(
        queue in arb_queue(),
        picks in prop::collection::vec(0usize..30, 0..60),
    ) {
        let mut tracker = SessionTracker::in_memory();
        tracker.start(queue.clone(), None, Utc::now()).unwrap();
        let mut marked = BTreeSet::new();

        for pick in picks {
            let Some(candidate) = queue.get(pick) else { continue };
            let newly = tracker.mark_completed(&candidate.identifier).unwrap();
            prop_assert_eq!(newly, marked.insert(candidate.identifier.clone()));

            let report = tracker.status();
            prop_assert_eq!(report.completed_count, marked.len());
            prop_assert_eq!(report.completed_count + report.remaining_count, queue.len());
            prop_assert!(tracker
                .remaining()
                .iter()
                .all(|c| !marked.contains(&c.identifier)));
        }
        prop_assert_eq!(tracker.is_exhausted(), !queue.is_empty() && marked.len() == queue.len());
    }

    /// The batch is the ordered prefix of eligible candidates; everything
    /// else eligible is left for later and everything deferred has a bug
    /// stamped today or later.
    #[test]
    fn scheduling_partitions_candidates(
        (queue, bugs) in arb_queue_with_bugs(),
        batch_size in 0usize..12,
    ) {
        let today = base_day();
        let plan = plan_batch(&queue, &bugs, today, batch_size);

        prop_assert_eq!(plan.deferred.len() + plan.eligible_total, queue.len());
        prop_assert_eq!(plan.batch.len(), plan.eligible_total.min(batch_size));

        for deferred in &plan.deferred {
            prop_assert!(deferred.last_seen >= today);
        }
        for test in &plan.batch {
            match bugs.get(&test.candidate.code) {
                Some(seen) => {
                    prop_assert!(*seen < today);
                    prop_assert!(test.retest);
                }
                None => prop_assert!(!test.retest),
            }
        }

        let eligible: Vec<&str> = queue
            .iter()
            .filter(|c| bugs.get(&c.code).is_none_or(|seen| *seen < today))
            .map(|c| c.identifier.as_str())
            .take(batch_size)
            .collect();
        prop_assert_eq!(plan.identifiers(), eligible);
    }

    /// Every input maps to a status, the same way every time.
    #[test]
    fn classification_is_total_and_deterministic(text in ".{0,80}") {
        let first = classify_text(Some(&text));
        let second = classify_text(Some(&text));
        prop_assert_eq!(&first, &second);
        prop_assert!(!first.1.is_empty());
        if text.trim().is_empty() {
            prop_assert_eq!(first.0, TestStatus::Blocked);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Running counters equal the stored results before and after completion.
    #[test]
    fn session_counters_match_results(statuses in prop::collection::vec(arb_status(), 0..25)) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("props.sqlite3")).unwrap();
        let ledger = SessionLedger::new(&store);
        let start = Utc.with_ymd_and_hms(2026, 2, 4, 9, 0, 0).unwrap();
        let session = ledger.start(start, None).unwrap();
        let recorder = ResultRecorder::new(&store, &RecordingConfig::default());

        for (i, status) in statuses.iter().enumerate() {
            recorder.record(&RecordRequest {
                session_id: session.session_id.clone(),
                code: format!("TC-NAV-{i:03}"),
                status: *status,
                started_at: start,
                finished_at: start + Duration::seconds(1),
                error_message: Some("boom".to_string()),
                screenshot_path: None,
                notes: None,
            }).unwrap();
        }

        let running = ledger.get(&session.session_id).unwrap().counters;
        prop_assert_eq!(running.total as usize, statuses.len());
        for status in TestStatus::ALL {
            let expected = statuses.iter().filter(|s| **s == status).count();
            prop_assert_eq!(running.get(status) as usize, expected);
        }

        let completed = ledger
            .complete(&session.session_id, start + Duration::hours(1), None)
            .unwrap()
            .counters;
        prop_assert_eq!(completed, running);
        prop_assert_eq!(ledger.results(&session.session_id).unwrap().len(), statuses.len());
    }

    /// Any sequence of failure days leaves exactly one open bug whose
    /// occurrences count the days that moved `last_seen` forward.
    #[test]
    fn repeated_failures_collapse_into_one_bug(offsets in prop::collection::vec(0i64..6, 1..15)) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("props.sqlite3")).unwrap();
        let ledger = SessionLedger::new(&store);
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap();
        let session = ledger.start(start, None).unwrap();
        let recorder = ResultRecorder::new(&store, &RecordingConfig::default());

        let mut last_seen = None;
        let mut occurrences = 0u32;
        for offset in &offsets {
            let at = start + Duration::days(*offset);
            recorder.record(&RecordRequest {
                session_id: session.session_id.clone(),
                code: "TC-PROJ-004".to_string(),
                status: TestStatus::Failed,
                started_at: at,
                finished_at: at,
                error_message: Some("save button missing".to_string()),
                screenshot_path: None,
                notes: None,
            }).unwrap();
            let day = at.date_naive();
            if last_seen.is_none_or(|seen| day > seen) {
                last_seen = Some(day);
                occurrences += 1;
            }
        }

        let bugs = KnownBugRegistry::new(&store).list(None).unwrap();
        prop_assert_eq!(bugs.len(), 1);
        prop_assert_eq!(bugs[0].status, BugStatus::Open);
        prop_assert_eq!(Some(bugs[0].last_seen), last_seen);
        prop_assert_eq!(bugs[0].occurrences, occurrences);
        prop_assert_eq!(bugs[0].first_seen, (start + Duration::days(offsets[0])).date_naive());
    }
}
