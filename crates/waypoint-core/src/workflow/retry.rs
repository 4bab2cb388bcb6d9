//! Retry decisions and exponential backoff for step execution.
//!
//! Stateless: all logic lives in associated functions that take the
//! configuration as a parameter. The executor owns the actual retry loop.

use std::time::Duration;

use waypoint_types::config::RetryConfig;

use super::worker::StepError;

/// Stateless retry handler for step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Determine whether another attempt should be made.
    ///
    /// `attempt` is 1-based (first execution is attempt 1). Retries while
    /// `attempt < max_attempts` and the error's kind is retryable: every kind
    /// when `retryable_errors` is unset, otherwise only the listed kinds.
    /// Cancellation is never retried.
    pub fn should_retry(config: &RetryConfig, attempt: u32, error: &StepError) -> bool {
        if attempt >= config.max_attempts || error.is_cancelled() {
            return false;
        }
        match &config.retryable_errors {
            None => true,
            Some(kinds) => kinds.iter().any(|k| k == error.kind()),
        }
    }

    /// Backoff before the attempt following `attempt`, in seconds.
    ///
    /// `min(initial * multiplier^(attempt-1), max_backoff)`: non-decreasing in
    /// `attempt` for multipliers >= 1 and never above `max_backoff_seconds`.
    pub fn get_backoff_seconds(config: &RetryConfig, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = config.initial_backoff_seconds * config.backoff_multiplier.powi(exponent);
        let capped = raw.min(config.max_backoff_seconds);
        if capped.is_finite() { capped.max(0.0) } else { config.max_backoff_seconds.max(0.0) }
    }

    /// `get_backoff_seconds` as a `Duration`, saturating at `Duration::MAX`.
    pub fn backoff_duration(config: &RetryConfig, attempt: u32) -> Duration {
        Duration::try_from_secs_f64(Self::get_backoff_seconds(config, attempt))
            .unwrap_or(Duration::MAX)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_seconds: 1.0,
            backoff_multiplier: 2.0,
            max_backoff_seconds: 10.0,
            retryable_errors: None,
        }
    }

    fn io_error() -> StepError {
        StepError::failed("io", "connection reset")
    }

    // -------------------------------------------------------------------
    // should_retry
    // -------------------------------------------------------------------

    #[test]
    fn test_should_retry_within_limit() {
        let config = config(3);
        assert!(RetryHandler::should_retry(&config, 1, &io_error()));
        assert!(RetryHandler::should_retry(&config, 2, &io_error()));
    }

    #[test]
    fn test_should_not_retry_at_or_beyond_max() {
        let config = config(3);
        for attempt in 3..10 {
            assert!(!RetryHandler::should_retry(&config, attempt, &io_error()));
        }
    }

    #[test]
    fn test_should_retry_single_attempt() {
        // With max_attempts=1, attempt 1 is the only one; no retry
        assert!(!RetryHandler::should_retry(&config(1), 1, &io_error()));
    }

    #[test]
    fn test_retryable_errors_filter() {
        let config = RetryConfig {
            retryable_errors: Some(vec!["io".to_string(), "timeout".to_string()]),
            ..config(5)
        };
        assert!(RetryHandler::should_retry(&config, 1, &io_error()));
        assert!(RetryHandler::should_retry(&config, 1, &StepError::TimedOut { secs: 1.0 }));
        assert!(!RetryHandler::should_retry(
            &config,
            1,
            &StepError::failed("validation", "bad input")
        ));
    }

    #[test]
    fn test_cancellation_never_retried() {
        assert!(!RetryHandler::should_retry(&config(5), 1, &StepError::Cancelled));
    }

    // -------------------------------------------------------------------
    // Backoff
    // -------------------------------------------------------------------

    #[test]
    fn test_backoff_exponential_then_capped() {
        let config = config(10);
        let delays: Vec<f64> = (1..=6)
            .map(|a| RetryHandler::get_backoff_seconds(&config, a))
            .collect();
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 8.0, 10.0, 10.0]);
    }

    #[test]
    fn test_backoff_non_decreasing_and_bounded() {
        for (initial, multiplier, max) in [(0.5, 1.5, 30.0), (2.0, 1.0, 5.0), (1.0, 3.0, 7.5)] {
            let config = RetryConfig {
                initial_backoff_seconds: initial,
                backoff_multiplier: multiplier,
                max_backoff_seconds: max,
                ..config(100)
            };
            let mut previous = 0.0;
            for attempt in 1..200 {
                let delay = RetryHandler::get_backoff_seconds(&config, attempt);
                assert!(delay >= previous, "attempt {attempt}: {delay} < {previous}");
                assert!(delay <= max);
                previous = delay;
            }
        }
    }

    #[test]
    fn test_backoff_huge_attempt_stays_finite() {
        let config = config(u32::MAX);
        assert_eq!(RetryHandler::get_backoff_seconds(&config, u32::MAX), 10.0);
        assert_eq!(
            RetryHandler::backoff_duration(&config, 2),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_backoff_duration_saturates_on_huge_config() {
        let config = RetryConfig {
            initial_backoff_seconds: 1e300,
            max_backoff_seconds: 1e300,
            ..config(3)
        };
        assert_eq!(RetryHandler::backoff_duration(&config, 1), Duration::MAX);

        let config = RetryConfig {
            max_backoff_seconds: f64::INFINITY,
            ..config
        };
        assert_eq!(RetryHandler::backoff_duration(&config, 4), Duration::MAX);
    }

    #[test]
    fn test_default_max_attempts_is_three() {
        let config = RetryConfig::default();
        assert!(RetryHandler::should_retry(&config, 1, &io_error()));
        assert!(RetryHandler::should_retry(&config, 2, &io_error()));
        assert!(!RetryHandler::should_retry(&config, 3, &io_error()));
    }
}
