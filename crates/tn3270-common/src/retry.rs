//! Bounded retry with fixed backoff.
//!
//! The emulator side of this system is asynchronous in the worst way: the
//! host unlocks the keyboard whenever it pleases, and freshly extracted
//! binaries can report "text file busy" while a sibling instance is still
//! writing them. Every command the driver issues therefore runs under a
//! finite retry budget with a fixed inter-attempt delay. This module is the
//! single implementation of that loop; call sites only choose a budget and
//! classify each attempt.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Outcome of a single attempt inside [`RetryPolicy::run`].
pub enum Attempt<T, E> {
    /// The attempt succeeded; the loop stops.
    Ok(T),
    /// The attempt failed but a later one may succeed.
    Transient(E),
    /// The attempt failed in a way retrying cannot fix; the loop stops.
    Fatal(E),
}

/// Why a retry loop ended without a value.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt in the budget failed transiently.
    Exhausted { attempts: u32, last: Option<E> },
    /// An attempt failed with a final error.
    Fatal(E),
}

/// A finite attempt budget with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy of `attempts` tries, sleeping `delay` between them.
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Runs `attempt` until it succeeds, fails fatally, or the budget is
    /// spent. No delay is taken after the final attempt.
    ///
    /// The closure receives the 1-based attempt number, which call sites
    /// use for log context only.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
        E: std::fmt::Display,
    {
        let mut last = None;
        for n in 1..=self.attempts {
            match attempt(n).await {
                Attempt::Ok(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(RetryError::Fatal(err)),
                Attempt::Transient(err) => {
                    debug!(
                        operation = %operation,
                        attempt = n,
                        budget = self.attempts,
                        error = %err,
                        "Retriable failure"
                    );
                    last = Some(err);
                }
            }
            if n < self.attempts {
                tokio::time::sleep(self.delay).await;
            }
        }
        Err(RetryError::Exhausted {
            attempts: self.attempts,
            last,
        })
    }
}
