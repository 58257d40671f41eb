//! The job polling loop: claim, execute, report, repeat.
//!
//! One cooperative task, at most one in-flight job. The queue is drained
//! without sleeping between jobs; an empty claim waits out the poll
//! interval or a shutdown signal. Failure handling turns error kinds
//! into process exit codes; the consecutive-failure counter resets on
//! any success.

use obscura_protocol::{defaults, exit_codes, AgentError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::api_client::ApiClient;
use crate::executor::JobExecutor;

pub struct JobPollingLoop {
    client: Arc<ApiClient>,
    executor: JobExecutor,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
    consecutive_failures: u32,
}

impl JobPollingLoop {
    pub fn new(
        client: Arc<ApiClient>,
        executor: JobExecutor,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            executor,
            poll_interval,
            shutdown,
            consecutive_failures: 0,
        }
    }

    /// Run until shutdown or a fatal condition. Returns the process exit
    /// code.
    pub async fn run(&mut self) -> i32 {
        info!(
            "Starting job polling loop (interval: {}s)",
            self.poll_interval.as_secs()
        );

        while !*self.shutdown.borrow() {
            match self.poll_and_execute().await {
                Ok(executed) => {
                    self.consecutive_failures = 0;
                    if !executed {
                        // Queue empty: wait out the interval. A claimed
                        // job loops straight back to drain the queue.
                        self.wait_for_next_poll().await;
                    }
                }
                Err(AgentError::Connection(message)) => {
                    self.consecutive_failures += 1;
                    warn!(
                        "Connection error during poll: {} (attempt {}/{})",
                        message,
                        self.consecutive_failures,
                        defaults::MAX_POLL_FAILURES
                    );
                    if self.consecutive_failures >= defaults::MAX_POLL_FAILURES {
                        error!("Too many consecutive connection failures");
                        return exit_codes::CONNECTION_FAILURES;
                    }
                    self.wait_for_next_poll().await;
                }
                Err(AgentError::Revoked(_)) => {
                    error!("Agent has been revoked");
                    return exit_codes::REVOKED;
                }
                Err(AgentError::Authentication(message)) => {
                    error!("Authentication error: {}", message);
                    return exit_codes::AUTHENTICATION;
                }
                Err(err) => {
                    self.consecutive_failures += 1;
                    error!(
                        "Unexpected error in polling loop: {} (attempt {}/{})",
                        err, self.consecutive_failures, defaults::MAX_POLL_FAILURES
                    );
                    if self.consecutive_failures >= defaults::MAX_POLL_FAILURES {
                        error!("Too many consecutive errors");
                        return exit_codes::INTERNAL_ERRORS;
                    }
                    self.wait_for_next_poll().await;
                }
            }
        }

        info!("Polling loop stopped");
        exit_codes::SUCCESS
    }

    /// Claim one job and execute it. `Ok(false)` means the queue was
    /// empty.
    async fn poll_and_execute(&mut self) -> Result<bool, AgentError> {
        let Some(claim) = self.client.claim_job().await? else {
            return Ok(false);
        };

        let job = claim.job;
        info!("Claimed job {} ({})", job.guid, job.tool);
        self.executor
            .execute(&job, &claim.signing_secret_b64)
            .await?;
        info!("Job {} finished", job.guid);
        Ok(true)
    }

    /// Wait for the poll interval or a shutdown signal, whichever first.
    async fn wait_for_next_poll(&mut self) {
        let sleep = tokio::time::sleep(self.poll_interval);
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut sleep => {}
            _ = self.shutdown.changed() => {}
        }
    }
}
