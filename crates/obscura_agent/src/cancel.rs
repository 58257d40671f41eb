//! Cooperative cancellation of job execution.

use obscura_protocol::Guid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Token for cooperative cancellation of job execution.
///
/// Uses an AtomicBool internally. Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// The single execution slot, shared between the polling loop (which
/// fills it) and the heartbeat task (which routes cancel commands into
/// it). A cancel for a job that is not currently executing is a no-op.
#[derive(Default)]
pub struct ExecutionSlot {
    current: Mutex<Option<(Guid, CancellationToken)>>,
}

impl ExecutionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, job_guid: Guid) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            *current = Some((job_guid, token.clone()));
        }
        token
    }

    pub fn finish(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }

    /// Cancel the running job if it matches. Returns whether it did.
    pub fn cancel_if_current(&self, job_guid: Guid) -> bool {
        if let Ok(current) = self.current.lock() {
            if let Some((running, token)) = current.as_ref() {
                if *running == job_guid {
                    token.cancel();
                    return true;
                }
            }
        }
        false
    }
}
