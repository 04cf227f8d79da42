//! Bounded retry for transient storage contention.
//!
//! SQLite reports write contention as a "database is locked/busy" error.
//! Ledger writes, audit writes, and generator writes all share this one
//! policy: retry a bounded number of times with a short delay, then give up.
//! Deterministic validation/business errors are never retried.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Retry policy: at most `max_attempts` tries, `delay` apart.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying while `is_transient` says the error may clear.
    ///
    /// The final error is returned unchanged once attempts are exhausted or
    /// a non-transient error occurs.
    pub async fn run<T, E, F, Fut>(&self, is_transient: impl Fn(&E) -> bool, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < self.max_attempts => {
                    warn!(attempt, error = %e, "transient storage error, retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Whether an error chain bottoms out in a SQLite busy/locked condition.
pub fn is_busy(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(sqlx::Error::Database(db)) = cause.downcast_ref::<sqlx::Error>() {
            let msg = db.message();
            msg.contains("database is locked") || msg.contains("database table is locked")
        } else {
            false
        }
    })
}
