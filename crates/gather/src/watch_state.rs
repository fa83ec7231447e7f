//! Per-path dedup state.
//!
//! Each watched path remembers the modification time of its last successful
//! load. A poll compares the current modification time against it to decide
//! whether the path holds new work.

use std::time::SystemTime;

/// What a single stat of a watched path found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Path does not exist (or is not a regular file).
    Missing,
    /// Path exists with the given modification time.
    Present(SystemTime),
}

/// Outcome of comparing an observation against the stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Path does not exist now; reported as a failed attempt.
    NotFound,
    /// Modification time equals the last successful load; nothing to emit.
    Unchanged,
    /// Modification time differs from the last successful load.
    Changed {
        /// Modification time that triggered the load.
        mtime: SystemTime,
        /// No successful load has happened for this path yet.
        first: bool,
    },
}

/// Dedup memory for one watched path.
///
/// Distinct writes inside one filesystem timestamp tick share an mtime and
/// classify as [`Classification::Unchanged`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathWatchState {
    last_seen_mtime: Option<SystemTime>,
    emitted_count: u64,
}

impl PathWatchState {
    /// Fresh state: nothing loaded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Modification time of the last successful load.
    pub fn last_seen_mtime(&self) -> Option<SystemTime> {
        self.last_seen_mtime
    }

    /// Number of successful loads so far.
    pub fn emitted_count(&self) -> u64 {
        self.emitted_count
    }

    /// Classify an observation. Does not mutate the state.
    pub fn classify(&self, observation: Observation) -> Classification {
        match observation {
            Observation::Missing => Classification::NotFound,
            Observation::Present(mtime) => match self.last_seen_mtime {
                Some(last) if last == mtime => Classification::Unchanged,
                last => Classification::Changed {
                    mtime,
                    first: last.is_none(),
                },
            },
        }
    }

    /// Record a successful load of the file at `mtime`.
    ///
    /// Failed loads must not call this, so the same mtime is retried.
    pub fn record_success(&mut self, mtime: SystemTime) {
        self.last_seen_mtime = Some(mtime);
        self.emitted_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_missing_is_not_found_and_keeps_state() {
        let mut state = PathWatchState::new();
        state.record_success(at(10));

        assert_eq!(state.classify(Observation::Missing), Classification::NotFound);
        assert_eq!(state.last_seen_mtime(), Some(at(10)));
        assert_eq!(state.emitted_count(), 1);
    }

    #[test]
    fn test_first_observation_is_changed() {
        let state = PathWatchState::new();
        assert_eq!(
            state.classify(Observation::Present(at(5))),
            Classification::Changed {
                mtime: at(5),
                first: true
            }
        );
    }

    #[test]
    fn test_same_mtime_after_success_is_unchanged() {
        let mut state = PathWatchState::new();
        state.record_success(at(5));
        assert_eq!(
            state.classify(Observation::Present(at(5))),
            Classification::Unchanged
        );
    }

    #[test]
    fn test_older_mtime_counts_as_changed() {
        // A file replaced by an older copy is still new work.
        let mut state = PathWatchState::new();
        state.record_success(at(50));
        assert_eq!(
            state.classify(Observation::Present(at(40))),
            Classification::Changed {
                mtime: at(40),
                first: false
            }
        );
    }

    #[test]
    fn test_failed_load_is_retried() {
        // Nothing recorded after a failed decode, so the same mtime stays Changed.
        let state = PathWatchState::new();
        let first = state.classify(Observation::Present(at(7)));
        let again = state.classify(Observation::Present(at(7)));
        assert_eq!(first, again);
        assert!(matches!(again, Classification::Changed { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        // Replaying a sequence of mtimes where every Changed load succeeds:
        // exactly one emission per distinct consecutive mtime, and the state
        // ends on the last mtime seen.
        #[test]
        fn prop_one_emission_per_change(mtimes in proptest::collection::vec(0u64..5, 1..40)) {
            let mut state = PathWatchState::new();
            let mut emitted = 0u64;

            for (i, secs) in mtimes.iter().enumerate() {
                match state.classify(Observation::Present(at(*secs))) {
                    Classification::Changed { mtime, first } => {
                        prop_assert_eq!(first, i == 0);
                        state.record_success(mtime);
                        emitted += 1;
                        prop_assert_eq!(state.last_seen_mtime(), Some(mtime));
                    }
                    Classification::Unchanged => {
                        prop_assert_eq!(mtimes[i - 1], *secs);
                    }
                    Classification::NotFound => prop_assert!(false, "file is present"),
                }
            }

            let expected = 1 + mtimes.windows(2).filter(|w| w[0] != w[1]).count() as u64;
            prop_assert_eq!(emitted, expected);
            prop_assert_eq!(state.emitted_count(), expected);
        }

        // Missing observations never disturb the stored state.
        #[test]
        fn prop_missing_never_mutates(seen in proptest::option::of(0u64..1000), count in 0u64..50) {
            let mut state = PathWatchState::new();
            for _ in 0..count {
                state.record_success(at(seen.unwrap_or(1)));
            }
            let before = state.clone();
            prop_assert_eq!(state.classify(Observation::Missing), Classification::NotFound);
            prop_assert_eq!(state, before);
        }
    }
}
