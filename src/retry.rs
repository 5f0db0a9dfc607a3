use std::time::Duration;

/// Bounded attempts with a linearly growing delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn no_delay(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    /// Run `op` until it succeeds or the attempts are used up. The closure gets
    /// the 1-based attempt number. The last error is returned with the attempt
    /// count attached.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut(u32) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= attempts => {
                    return Err(err.context(format!("{what}: gave up after {attempts} attempt(s)")));
                }
                Err(err) => {
                    tracing::warn!(what, attempt, attempts, err = %format!("{err:#}"), "attempt failed; retrying");
                    let delay = self.delay.saturating_mul(attempt);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
