use std::time::Duration;

use tracing::debug;

use super::sink::SinkError;

/// Exponential backoff shared by the importer and the replayer.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            ..Self::default()
        }
    }

    /// No waiting between attempts.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Wait after failed attempt number `attempt` (1-based).
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()).max(0.0))
    }

    pub fn should_retry(&self, attempt: u32, error: &SinkError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    /// Runs `op` until it succeeds, fails persistently or runs out of
    /// attempts. The error carries the number of attempts made.
    pub fn run<T>(
        &self,
        mut op: impl FnMut() -> Result<T, SinkError>,
    ) -> Result<T, (SinkError, u32)> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(attempt, &err) => {
                    let wait = self.calculate_backoff(attempt);
                    debug!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "retrying sink write");
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                    attempt += 1;
                }
                Err(err) => return Err((err, attempt)),
            }
        }
    }
}
