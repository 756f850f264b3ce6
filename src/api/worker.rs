//! Blocking-work offload for the async handlers.
//!
//! Image decoding, the forward pass, SQLite and Argon2 all block. They run
//! on tokio's blocking pool so the reactor threads keep serving requests.
//! Inference is additionally gated by a semaphore and bounded by a deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::LesionError;

/// Runs inference jobs with bounded concurrency and a deadline.
#[derive(Debug, Clone)]
pub struct InferenceWorker {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl InferenceWorker {
    #[must_use]
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// Run `job` on the blocking pool once a permit is free.
    ///
    /// The deadline covers both waiting for a permit and running. A job that
    /// overruns keeps its permit until it actually finishes, so timed-out
    /// work still counts against the concurrency limit.
    ///
    /// # Errors
    /// Returns `LesionError::Unavailable` on timeout, `LesionError::Internal`
    /// if the job panicked, or whatever the job itself returns.
    pub async fn run<F, T>(&self, job: F) -> Result<T, LesionError>
    where
        F: FnOnce() -> Result<T, LesionError> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let work = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| LesionError::Unavailable("inference worker closed".into()))?;

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job()
            })
            .await
            .map_err(|e| LesionError::Internal(format!("inference task failed: {e}")))?
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Inference exceeded {:?}", self.timeout);
                Err(LesionError::Unavailable(format!(
                    "inference did not finish within {} ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    /// Permits not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Run a blocking storage or hashing job off the reactor.
///
/// # Errors
/// Returns `LesionError::Internal` if the job panicked, or whatever the job
/// itself returns.
pub async fn run_blocking<F, T>(job: F) -> Result<T, LesionError>
where
    F: FnOnce() -> Result<T, LesionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| LesionError::Internal(format!("blocking task failed: {e}")))?
}
