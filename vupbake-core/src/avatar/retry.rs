//! Bounded retry with increasing backoff, as an explicit state machine.
//!
//! ```text
//! Attempt(n) ──ok──────────────────────────▶ Succeeded(n)
//!     │
//!     └─err─▶ n < max && retryable ─▶ Backoff(n) ─sleep(base × n)─▶ Attempt(n + 1)
//!             otherwise ──────────────────────────────────────────▶ Exhausted(n)
//! ```

use std::time::Duration;

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempt(u32),
    Backoff(u32),
    Succeeded(u32),
    Exhausted(u32),
}

/// All attempts failed. Carries the last error.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait between attempt `n` and attempt `n + 1`. Saturates instead of
    /// overflowing.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.checked_mul(attempt).unwrap_or(Duration::MAX)
    }

    /// Transition out of `Attempt(n)` given that attempt's result.
    pub fn after_attempt(&self, attempt: u32, succeeded: bool, retryable: bool) -> RetryState {
        if succeeded {
            RetryState::Succeeded(attempt)
        } else if retryable && attempt < self.max_attempts {
            RetryState::Backoff(attempt)
        } else {
            RetryState::Exhausted(attempt)
        }
    }

    /// Run `op` under this policy, sleeping with `std::thread::sleep`.
    pub fn run<T, E, F>(&self, op: F) -> Result<T, RetryExhausted<E>>
    where
        E: Retryable,
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_with(std::thread::sleep, op)
    }

    /// Run `op` under this policy with an injected sleeper.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run_with<T, E, S, F>(&self, mut sleep: S, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        E: Retryable,
        S: FnMut(Duration),
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            let error = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            match self.after_attempt(attempt, false, error.is_retryable()) {
                RetryState::Backoff(n) => {
                    let delay = self.delay_after(n);
                    if !delay.is_zero() {
                        sleep(delay);
                    }
                    attempt = n + 1;
                }
                _ => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: error,
                    })
                }
            }
        }
    }
}
