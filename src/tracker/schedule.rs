//! Batch selection with known-bug suppression.
//!
//! A candidate whose open bug was already seen today (or is stamped in the
//! future) is deferred so the same failure is not re-run and re-reported in
//! one day. A bug last seen before today makes the candidate a retest.
//! No wall clock is read here: `today` is always supplied by the caller.

#![allow(missing_docs)]

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use super::queue::Candidate;
use crate::store::bugs::KnownBugIndex;

/// Lookup of `last_seen` per test code for open bugs.
pub trait BugIndex {
    fn last_seen(&self, code: &str) -> Option<NaiveDate>;
}

impl BugIndex for KnownBugIndex {
    fn last_seen(&self, code: &str) -> Option<NaiveDate> {
        self.get(code)
    }
}

impl BugIndex for HashMap<String, NaiveDate> {
    fn last_seen(&self, code: &str) -> Option<NaiveDate> {
        self.get(code).copied()
    }
}

/// An eligible candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledTest {
    pub candidate: Candidate,
    /// An open bug exists and was last seen before today.
    pub retest: bool,
    pub last_seen: Option<NaiveDate>,
}

/// A candidate held back because its bug was already seen today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredTest {
    pub candidate: Candidate,
    pub last_seen: NaiveDate,
}

/// Outcome of [`plan_batch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    /// Eligible candidates in input order, at most `batch_size` long.
    pub batch: Vec<ScheduledTest>,
    pub deferred: Vec<DeferredTest>,
    /// Eligible count before truncation.
    pub eligible_total: usize,
}

impl BatchPlan {
    /// Identifiers of the batch, in order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        self.batch
            .iter()
            .map(|test| test.candidate.identifier.as_str())
            .collect()
    }

    #[must_use]
    pub fn retest_count(&self) -> usize {
        self.batch.iter().filter(|test| test.retest).count()
    }
}

/// Split `candidates` into an ordered batch and a deferred list.
pub fn plan_batch<'c, I, B>(candidates: I, bugs: &B, today: NaiveDate, batch_size: usize) -> BatchPlan
where
    I: IntoIterator<Item = &'c Candidate>,
    B: BugIndex + ?Sized,
{
    let mut batch = Vec::new();
    let mut deferred = Vec::new();
    let mut eligible_total = 0;

    for candidate in candidates {
        match bugs.last_seen(&candidate.code) {
            Some(last_seen) if last_seen >= today => deferred.push(DeferredTest {
                candidate: candidate.clone(),
                last_seen,
            }),
            last_seen => {
                eligible_total += 1;
                if batch.len() < batch_size {
                    batch.push(ScheduledTest {
                        candidate: candidate.clone(),
                        retest: last_seen.is_some(),
                        last_seen,
                    });
                }
            }
        }
    }

    BatchPlan {
        batch,
        deferred,
        eligible_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn bugs(pairs: &[(&str, &str)]) -> HashMap<String, NaiveDate> {
        pairs
            .iter()
            .map(|(code, seen)| ((*code).to_string(), day(seen)))
            .collect()
    }

    #[test]
    fn defers_bugs_seen_today_and_retests_older_ones() {
        let index = bugs(&[
            ("TC-PROJ-003", "2026-02-03"),
            ("TC-LOGIN-008", "2026-02-04"),
            ("TC-NAV-007", "2026-01-28"),
            ("TC-IMPORT-012", "2026-02-04"),
        ]);
        let candidates = vec![
            Candidate::new("1", "TC-LOGIN-008"),
            Candidate::new("2", "TC-PROJ-003"),
            Candidate::new("3", "TC-UI-001"),
            Candidate::new("4", "TC-IMPORT-012"),
            Candidate::new("5", "TC-NAV-007"),
        ];

        let plan = plan_batch(&candidates, &index, day("2026-02-04"), 25);
        assert_eq!(plan.identifiers(), vec!["2", "3", "5"]);
        assert_eq!(plan.eligible_total, 3);
        assert_eq!(plan.retest_count(), 2);
        assert!(!plan.batch[1].retest);
        let deferred: Vec<&str> = plan
            .deferred
            .iter()
            .map(|d| d.candidate.code.as_str())
            .collect();
        assert_eq!(deferred, vec!["TC-LOGIN-008", "TC-IMPORT-012"]);
    }

    #[test]
    fn future_last_seen_is_deferred() {
        let index = bugs(&[("TC-UI-001", "2026-03-01")]);
        let candidates = vec![Candidate::new("1", "TC-UI-001")];
        let plan = plan_batch(&candidates, &index, day("2026-02-04"), 25);
        assert!(plan.batch.is_empty());
        assert_eq!(plan.deferred.len(), 1);
    }

    #[test]
    fn truncates_but_counts_all_eligible() {
        let candidates: Vec<Candidate> = (1..=10)
            .map(|i| Candidate::new(i.to_string(), format!("TC-TOOL-{i:03}")))
            .collect();
        let plan = plan_batch(&candidates, &bugs(&[]), day("2026-02-04"), 4);
        assert_eq!(plan.identifiers(), vec!["1", "2", "3", "4"]);
        assert_eq!(plan.eligible_total, 10);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn zero_batch_size_yields_empty_batch() {
        let candidates = vec![Candidate::new("1", "TC-TOOL-001")];
        let plan = plan_batch(&candidates, &bugs(&[]), day("2026-02-04"), 0);
        assert!(plan.batch.is_empty());
        assert_eq!(plan.eligible_total, 1);
    }

    #[test]
    fn known_bug_index_is_a_bug_index() {
        let index: KnownBugIndex = [("TC-PUB-001".to_string(), day("2026-02-04"))]
            .into_iter()
            .collect();
        let candidates = vec![Candidate::new("1", "TC-PUB-001")];
        let plan = plan_batch(&candidates, &index, day("2026-02-04"), 5);
        assert_eq!(plan.deferred.len(), 1);
    }
}
