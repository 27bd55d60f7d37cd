//! # Shackles Testing
//!
//! Test support for the registration workflows:
//!
//! - [`ReducerTest`]: Given/When/Then harness for reducers
//! - [`mocks::FixedClock`] and [`mocks::ManualClock`]: deterministic time
//! - [`init_test_tracing`]: opt-in log output for a test run
//!
//! ## Example
//!
//! ```ignore
//! use shackles_testing::{assertions, test_clock, ReducerTest};
//!
//! ReducerTest::new(CheckInReducer)
//!     .with_env(environment_with(test_clock()))
//!     .given_state(CheckInState::for_participant(participant))
//!     .when_action(CheckInAction::CheckIn { target, staff })
//!     .then_state(|state| assert!(state.last_error.is_some()))
//!     .then_effects(assertions::assert_no_effects)
//!     .run();
//! ```

use chrono::{DateTime, Duration, Utc};
use shackles_core::environment::Clock;

/// Reducer test harness.
pub mod reducer_test;

pub use reducer_test::{assertions, ReducerTest};

/// Deterministic clocks.
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use shackles_testing::mocks::FixedClock;
    /// use shackles_core::environment::Clock;
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

    /// A clock tests move forward explicitly.
    ///
    /// Useful where ordering of timestamps matters, e.g. asserting that a
    /// repeated check-in reports the *first* check-in time.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start the clock at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward.
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

    /// The instant every test clock starts at: 2025-03-14 09:00:00 UTC, the
    /// morning of the workshop day.
    #[must_use]
    pub fn symposium_morning() -> DateTime<Utc> {
        DateTime::from_timestamp(1_741_942_800, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(symposium_morning())
    }
}

pub use mocks::{test_clock, FixedClock, ManualClock};

/// Install a `tracing` subscriber for the current test binary.
///
/// Honors `RUST_LOG`; silently does nothing if a subscriber is already set,
/// so every test may call it.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}
