//! Bounded fixed-backoff retry policy.
//!
//! Operations are retried only while they fail with a recoverable error and
//! attempts remain. Fatal errors are returned on the spot; running out of
//! attempts is reported as its own variant so callers can tell the two apart.

use std::fmt;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::provider::MarketDataError;

/// Errors that know whether retrying can help.
pub trait Recoverable {
    fn is_recoverable(&self) -> bool;
}

impl Recoverable for MarketDataError {
    fn is_recoverable(&self) -> bool {
        MarketDataError::is_recoverable(self)
    }
}

/// Outcome of a retried operation that did not succeed.
#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display> {
    #[error("{0}")]
    Fatal(E),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

/// Fixed number of attempts with a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Gateway connection policy: 5 attempts, 30 seconds apart.
    pub fn connect_default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }

    /// Single attempt, no retry.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run<T, E, F>(&self, operation: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Recoverable + fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_recoverable() => return Err(RetryError::Fatal(e)),
                Err(e) => {
                    warn!(operation, attempt, max_attempts = self.max_attempts, error = %e, "attempt failed");
                    if attempt >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: e,
                        });
                    }
                    if !self.delay.is_zero() {
                        info!(operation, delay_secs = self.delay.as_secs_f64(), "retrying");
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    enum TestError {
        Flaky,
        Broken,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TestError::Flaky => f.write_str("flaky"),
                TestError::Broken => f.write_str("broken"),
            }
        }
    }

    impl Recoverable for TestError {
        fn is_recoverable(&self) -> bool {
            matches!(self, TestError::Flaky)
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let calls = Cell::new(0);
        let result: Result<u32, RetryError<TestError>> = policy.run("op", |attempt| {
            calls.set(calls.get() + 1);
            if attempt < 3 {
                Err(TestError::Flaky)
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let calls = Cell::new(0);
        let result: Result<(), _> = policy.run("op", |_| {
            calls.set(calls.get() + 1);
            Err(TestError::Flaky)
        });
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 5, .. })
        ));
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn fatal_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let calls = Cell::new(0);
        let result: Result<(), _> = policy.run("op", |_| {
            calls.set(calls.get() + 1);
            Err(TestError::Broken)
        });
        assert!(matches!(result, Err(RetryError::Fatal(TestError::Broken))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_attempts_clamps_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(RetryPolicy::once().max_attempts, 1);
    }

    #[test]
    fn connect_default_matches_gateway_policy() {
        let policy = RetryPolicy::connect_default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_secs(30));
    }
}
