//! # Course Draw Testing
//!
//! Testing utilities for the course draw crates.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `ManualClock`)
//! - Deterministic seed sources for the lottery (`FixedSeed`, `SeedSequence`)
//! - A Given-When-Then harness for reducers (`ReducerTest`)
//!
//! ## Example
//!
//! ```ignore
//! use coursedraw_testing::{ManualClock, SeedSequence};
//!
//! let clock = Arc::new(ManualClock::new(draw_at - Duration::minutes(1)));
//! let seeds = Arc::new(SeedSequence::starting_at(7));
//! let engine = AllocationEngine::new(storage, ledger, seeds.clone(), clock.clone(), round_locks);
//! clock.advance(Duration::minutes(2));
//! assert_eq!(seeds.issued(), 0);
//! ```

use chrono::{DateTime, Duration, Utc};
use coursedraw_core::environment::{Clock, RandomSource};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod reducer_test;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{AtomicU64, Clock, DateTime, Duration, Mutex, Ordering, RandomSource, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// # Example
    ///
    /// ```
    /// use coursedraw_testing::mocks::FixedClock;
    /// use coursedraw_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test tells it to
    ///
    /// Used to walk a round from "before the draw instant" to "after it"
    /// between scheduler ticks.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start the clock at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Seed source that returns the same seed every round
    #[derive(Debug, Clone, Copy)]
    pub struct FixedSeed(pub u64);

    impl RandomSource for FixedSeed {
        fn next_seed(&self) -> u64 {
            self.0
        }
    }

    /// Seed source yielding `start, start + 1, start + 2, ...`
    ///
    /// Each lottery round consumes one seed, so a draw over `n` rounds is
    /// fully determined by `start`.
    #[derive(Debug)]
    pub struct SeedSequence {
        next: AtomicU64,
        issued: AtomicU64,
    }

    impl SeedSequence {
        /// Begin the sequence at `start`
        #[must_use]
        pub const fn starting_at(start: u64) -> Self {
            Self {
                next: AtomicU64::new(start),
                issued: AtomicU64::new(0),
            }
        }

        /// How many seeds have been handed out
        #[must_use]
        pub fn issued(&self) -> u64 {
            self.issued.load(Ordering::SeqCst)
        }
    }

    impl RandomSource for SeedSequence {
        fn next_seed(&self) -> u64 {
            self.issued.fetch_add(1, Ordering::SeqCst);
            self.next.fetch_add(1, Ordering::SeqCst)
        }
    }

    /// Default instant for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_instant() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_instant())
    }
}

pub use mocks::{FixedClock, FixedSeed, ManualClock, SeedSequence, test_clock, test_instant};
pub use reducer_test::ReducerTest;
