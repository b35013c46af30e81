//! Per-user pipeline slots.
//!
//! Each user may have at most N response pipelines in flight. A request
//! arriving with no free slot is rejected immediately rather than queued —
//! the client can retry once a stream finishes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Per-user slot pools. Each user key maps to a `Semaphore(limit)`; holding
/// a permit means one pipeline is running. Permits release on drop.
pub struct PipelineSlots {
    limit: usize,
    slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl PipelineSlots {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Claim a slot for one response pipeline. Hold the permit for the
    /// pipeline's lifetime.
    pub fn try_acquire(&self, user_id: &str) -> Result<OwnedSemaphorePermit, SlotsExhausted> {
        let sem = {
            let mut slots = self.slots.lock();
            slots
                .entry(user_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(self.limit)))
                .clone()
        };

        sem.try_acquire_owned().map_err(|_| SlotsExhausted {
            limit: self.limit,
        })
    }

    /// Number of tracked users (for monitoring).
    pub fn user_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Drop pools for users with nothing in flight.
    pub fn prune_idle(&self) {
        let mut slots = self.slots.lock();
        slots.retain(|_, sem| sem.available_permits() < self.limit);
    }
}

/// The user's concurrent-pipeline limit is already reached.
#[derive(Debug)]
pub struct SlotsExhausted {
    pub limit: usize,
}

impl std::fmt::Display for SlotsExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "too many concurrent responses in flight (limit {})",
            self.limit
        )
    }
}

impl std::error::Error for SlotsExhausted {}
