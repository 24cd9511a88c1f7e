use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::BackendError;

/// Bounded retries with a fixed pause between attempts. Only transient
/// failures are retried; anything else is returned on the spot.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn run<T>(
        &self,
        operation: &str,
        mut call: impl FnMut() -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match call() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() => {
                    if attempt >= self.max_attempts {
                        return Err(BackendError::Exhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last: error.to_string(),
                        });
                    }
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %error,
                        "transient backend failure, retrying"
                    );
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(10))
    }
}

/// Wraps a backend so every call goes through a [`RetryPolicy`].
pub struct Retrying<B> {
    pub(super) inner: B,
    pub(super) policy: RetryPolicy,
}

impl<B> Retrying<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}
