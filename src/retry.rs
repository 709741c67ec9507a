//! Retries an async operation a bounded number of times. When the budget
//! runs out the caller gets the last error back inside [`Exhausted`].

use std::future::Future;
use std::time::Duration;

/// Returned when every attempt of a [`RetryPolicy`] failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E: std::fmt::Display> std::fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed {} attempts, last error: {}", self.attempts, self.last)
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for Exhausted<E> {}

/// Fixed attempt budget with a constant pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `op` until it succeeds or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number. `on_failure` sees every
    /// failed attempt before the pause; there is no pause after the last one.
    pub async fn run<T, E, F, Fut, N>(&self, mut op: F, mut on_failure: N) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        N: FnMut(u32, &E),
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    on_failure(attempt, &err);

                    if attempt >= self.attempts {
                        return Err(Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                }
            }

            tokio::time::sleep(self.delay).await;
            attempt += 1;
        }
    }
}
