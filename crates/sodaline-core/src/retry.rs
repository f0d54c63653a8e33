//! Bounded retry with a fixed delay between attempts

use std::fmt;
use std::time::Duration;

use indicatif::ProgressBar;

/// How many times to try a remote call and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total invocations, including the first one (never zero)
    pub attempts: u32,
    /// Pause after each failed attempt except the last
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(10))
    }
}

/// Every attempt failed; carries the error from the final one.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed after {} attempts: {}", self.attempts, self.last)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last)
    }
}

/// Run `attempt_fn` until it succeeds or `policy.attempts` invocations failed.
///
/// Each failure is logged as a warning and shown on the progress bar. The
/// caller decides what exhaustion means: the row count treats it as fatal,
/// a batch fetch records it and moves on.
pub fn retry<T, E: fmt::Display>(
    label: &str,
    policy: &RetryPolicy,
    pb: &ProgressBar,
    mut attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, RetryError<E>> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                log::warn!("{label}: attempt {attempt}/{attempts} failed: {e}");
                pb.set_message(format!("retry {attempt}/{attempts}..."));
                if !policy.delay.is_zero() {
                    std::thread::sleep(policy.delay);
                }
            }
            Err(e) => {
                log::warn!("{label}: attempt {attempt}/{attempts} failed: {e}");
                return Err(RetryError { attempts, last: e });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    #[test]
    fn first_success_calls_once() {
        let mut calls = 0;
        let out: Result<u32, RetryError<String>> =
            retry("t", &instant(3), &ProgressBar::hidden(), || {
                calls += 1;
                Ok(7)
            });
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn recovers_after_transient_failures() {
        let mut calls = 0;
        let out = retry("t", &instant(5), &ProgressBar::hidden(), || {
            calls += 1;
            if calls < 3 {
                Err("flaky")
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out.unwrap(), 3);
    }

    #[test]
    fn exhaustion_makes_exactly_policy_attempts() {
        let mut calls = 0;
        let out: Result<(), _> = retry("t", &instant(3), &ProgressBar::hidden(), || {
            calls += 1;
            Err(format!("boom {calls}"))
        });
        let err = out.unwrap_err();
        assert_eq!(calls, 3);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, "boom 3");
        assert_eq!(err.to_string(), "failed after 3 attempts: boom 3");
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.attempts, 1);
        let mut calls = 0;
        let _: Result<(), _> = retry("t", &policy, &ProgressBar::hidden(), || {
            calls += 1;
            Err("no")
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn default_policy_matches_downloader_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.delay, Duration::from_secs(10));
    }
}
