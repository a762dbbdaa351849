//! Bounded retry with a fixed escalating delay schedule

use std::time::Duration;
use tracing::debug;

/// Retry schedule for sinks that talk to remote services
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before retry `n` is `delays[min(n, len - 1)]`
    pub delays: Vec<Duration>,
    /// Total attempts including the first
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Policy used by the HTTP sink: 1, 2, 4, 8, 16, 30 s, five attempts
    pub fn http() -> Self {
        Self {
            delays: [1, 2, 4, 8, 16, 30].into_iter().map(Duration::from_secs).collect(),
            max_attempts: 5,
        }
    }

    /// Retry without waiting
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            delays: vec![Duration::ZERO],
            max_attempts,
        }
    }

    /// Delay after the failed attempt with zero-based index `attempt`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(index).copied().unwrap_or_default()
    }

    /// Run `op` until it succeeds or the attempts run out, returning the last error
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    debug!(attempt = attempt + 1, ?delay, "Attempt failed, retrying: {}", e);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
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

    #[test]
    fn test_http_schedule() {
        let policy = RetryPolicy::http();
        let delays: Vec<u64> = (0..7).map(|a| policy.delay_after(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn test_succeeds_after_failures() {
        let policy = RetryPolicy::immediate(5);
        let mut calls = 0;
        let result: Result<u32, String> = policy.run(|attempt| {
            calls += 1;
            if attempt < 2 {
                Err(format!("attempt {attempt}"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(2));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_gives_up_with_last_error() {
        let policy = RetryPolicy::immediate(3);
        let mut calls = 0;
        let result: Result<(), String> = policy.run(|attempt| {
            calls += 1;
            Err(format!("attempt {attempt}"))
        });
        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::immediate(0);
        let mut calls = 0;
        let _: Result<(), &str> = policy.run(|_| {
            calls += 1;
            Err("down")
        });
        assert_eq!(calls, 1);
    }
}
