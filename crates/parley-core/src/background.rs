//! Background job executor for post-response work.
//!
//! Jobs run detached from the request that submitted them. Each job gets its
//! own error boundary: an `Err` is logged at `warn`, a panic at `error`, and
//! neither reaches the submitter. Tests await completion through
//! [`BackgroundTasks::wait_idle`] instead of sleeping.

use std::fmt::Display;
use std::future::Future;

use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info_span, warn};

#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a fire-and-forget job.
    pub fn submit<F, E>(&self, job: &'static str, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let span = info_span!("background_job", job);
        self.tracker.spawn(
            async move {
                match tokio::spawn(future).await {
                    Ok(Ok(())) => debug!("Background job finished"),
                    Ok(Err(e)) => warn!(error = %e, "Background job failed"),
                    Err(e) if e.is_panic() => error!("Background job panicked"),
                    Err(e) => warn!(error = %e, "Background job cancelled"),
                }
            }
            .instrument(span),
        );
    }

    /// Number of jobs still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every submitted job has finished.
    ///
    /// Meant for a single waiter (tests, shutdown). The tracker is closed
    /// while waiting and reopened after, so a second concurrent waiter can
    /// reopen it early and leave the first blocked on jobs submitted later.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
