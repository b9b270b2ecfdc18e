use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{JobOutcome, UploadJob, COMPLETED_MESSAGE, FAILED_MESSAGE};
use crate::api::ReportsApi;
use crate::notify::Notifier;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1200);

/// Handle to a background task that fetches a job's status on a fixed
/// interval.
///
/// The first fetch happens immediately. The task publishes only the latest
/// snapshot, so a slow or absent reader never holds polling back. On the
/// first terminal snapshot the task notifies once and exits, which closes
/// the receiver returned by [`JobPoller::start`]. Dropping the handle stops
/// the task.
#[derive(Debug)]
pub struct JobPoller {
    job_id: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl JobPoller {
    pub fn start(
        api: Arc<dyn ReportsApi>,
        notifier: Arc<dyn Notifier>,
        job_id: impl Into<String>,
        interval: Duration,
    ) -> (Self, watch::Receiver<UploadJob>) {
        let job_id = job_id.into();
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(UploadJob::placeholder(&job_id));

        info!(job_id = %job_id, interval_ms = interval.as_millis() as u64, "polling job status");
        let handle = tokio::spawn(poll_loop(
            api,
            notifier,
            job_id.clone(),
            interval,
            cancel.clone(),
            tx,
        ));

        (
            Self {
                job_id,
                cancel,
                handle: Some(handle),
            },
            rx,
        )
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stop(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!(job_id = %self.job_id, "stopping poller");
            self.cancel.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    /// Waits for the background task to exit.
    pub async fn finished(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Adapts a snapshot receiver into a [`Stream`] of the snapshots published
/// after it was created. Completes with the poller.
pub fn into_stream(rx: watch::Receiver<UploadJob>) -> impl Stream<Item = UploadJob> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok()?;
        let next = rx.borrow_and_update().clone();
        Some((next, rx))
    })
}

async fn poll_loop(
    api: Arc<dyn ReportsApi>,
    notifier: Arc<dyn Notifier>,
    job_id: String,
    interval: Duration,
    cancel: CancellationToken,
    tx: watch::Sender<UploadJob>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = api.job_status(&job_id) => result,
        };

        let response = match fetched {
            Ok(response) => response,
            Err(err) => {
                // transient; the next tick retries
                debug!(job_id = %job_id, error = %err, "status fetch failed");
                continue;
            }
        };

        let snapshot = UploadJob::from_response(&job_id, response);
        let outcome = snapshot.outcome();
        debug!(
            job_id = %job_id,
            status = snapshot.status.as_str(),
            processed = snapshot.processed,
            total = snapshot.total,
            "status snapshot"
        );
        tx.send_replace(snapshot);

        if let Some(outcome) = outcome {
            match outcome {
                JobOutcome::Completed => {
                    info!(job_id = %job_id, "job completed");
                    notifier.success(COMPLETED_MESSAGE);
                }
                JobOutcome::Failed => {
                    warn!(job_id = %job_id, "job failed");
                    notifier.error(FAILED_MESSAGE);
                }
            }
            break;
        }
    }

    debug!(job_id = %job_id, "poller exited");
}
