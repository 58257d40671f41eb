//! Rate-limited, best-effort progress reporting.
//!
//! At most one network call per 500 ms per job. Calls inside the window
//! overwrite a pending slot; the first throttled call arms a delayed
//! send, and the latest value wins when the window opens. `close()`
//! drains a final pending report once. Network errors are swallowed with
//! a warning - progress never fails a job.

use obscura_protocol::{defaults, Guid, ProgressUpdate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::api_client::ApiClient;

pub const MIN_REPORT_INTERVAL: Duration = Duration::from_millis(defaults::MIN_REPORT_INTERVAL_MS);

struct ReporterInner {
    last_sent: Option<Instant>,
    pending: Option<ProgressUpdate>,
    delayed: Option<JoinHandle<()>>,
    closed: bool,
}

pub struct ProgressReporter {
    client: Arc<ApiClient>,
    job_guid: Guid,
    inner: Arc<Mutex<ReporterInner>>,
}

impl ProgressReporter {
    pub fn new(client: Arc<ApiClient>, job_guid: Guid) -> Self {
        Self {
            client,
            job_guid,
            inner: Arc::new(Mutex::new(ReporterInner {
                last_sent: None,
                pending: None,
                delayed: None,
                closed: false,
            })),
        }
    }

    /// Report progress. Sends immediately when the rate-limit window is
    /// open; otherwise parks the update in the pending slot (latest wins)
    /// and arms a delayed send if none is armed.
    pub async fn report(&self, update: ProgressUpdate) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }

        let now = Instant::now();
        let window_open = match inner.last_sent {
            Some(last) => now.duration_since(last) >= MIN_REPORT_INTERVAL,
            None => true,
        };

        if window_open {
            inner.last_sent = Some(now);
            drop(inner);
            self.send(&update).await;
            return;
        }

        inner.pending = Some(update);
        let armed = inner
            .delayed
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if !armed {
            let delay = match inner.last_sent {
                Some(last) => MIN_REPORT_INTERVAL.saturating_sub(now.duration_since(last)),
                None => Duration::ZERO,
            };
            let client = Arc::clone(&self.client);
            let job_guid = self.job_guid;
            let shared = Arc::clone(&self.inner);
            inner.delayed = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let update = {
                    let mut inner = shared.lock().await;
                    if inner.closed {
                        return;
                    }
                    let Some(update) = inner.pending.take() else {
                        return;
                    };
                    inner.last_sent = Some(Instant::now());
                    update
                };
                if let Err(err) = client.report_progress(job_guid, &update).await {
                    warn!("Failed to report progress: {}", err);
                }
            }));
        }
    }

    async fn send(&self, update: &ProgressUpdate) {
        match self.client.report_progress(self.job_guid, update).await {
            Ok(()) => debug!("Progress reported for job {}: {}", self.job_guid, update.stage),
            Err(err) => warn!("Failed to report progress: {}", err),
        }
    }

    /// Close the reporter: cancel any armed send and drain the final
    /// pending report once.
    pub async fn close(&self) {
        let pending = {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            if let Some(handle) = inner.delayed.take() {
                handle.abort();
            }
            inner.pending.take()
        };
        if let Some(update) = pending {
            self.send(&update).await;
        }
    }
}
