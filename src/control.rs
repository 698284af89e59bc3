// Control plane: admission control
//
// Bounds how many payments may be in flight at once. Each payment holds its
// permit from invoice decoding until final resolution.
//
// Numan Thabit 2025 Nov

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Clone)]
pub struct AdmissionControl {
    max_inflight: Arc<Semaphore>,
    limit: usize,
}

impl AdmissionControl {
    pub fn new(max_inflight: usize) -> Self {
        let limit = max_inflight.max(1);
        Self {
            max_inflight: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Acquire an admission permit, waiting while the limit is reached.
    pub async fn acquire(&self) -> AdmissionPermit {
        if self.max_inflight.available_permits() == 0 {
            debug!(limit = self.limit, "payment admission saturated; waiting");
        }
        let permit = self
            .max_inflight
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore not closed");
        AdmissionPermit { _permit: permit }
    }

    pub fn in_flight(&self) -> usize {
        self.limit - self.max_inflight.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}
