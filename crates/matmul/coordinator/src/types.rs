use maskmul_core::SessionHandle;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::CoordinatorError;

/// Response object of the /info API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    /// Current version of the coordinator
    pub version: String,
    /// Whether cells are split into masked shares
    pub privacy: bool,
    /// Ids of the currently registered workers
    pub workers: Vec<String>,
    /// Number of tasks that have not been handed out yet
    pub pending_tasks: usize,
}

/// Global data that needs to be shared with the axum handlers
#[derive(Clone)]
pub struct CoordinatorGlobals {
    /// Handle to the aggregation session of the current run
    pub session: SessionHandle,
    /// Registered workers
    pub registry: WorkerRegistry,
    /// Cancelled once aggregation is over
    pub shutdown: CancellationToken,
}

impl CoordinatorGlobals {
    pub fn new(session: SessionHandle, concurrency: usize, shutdown: CancellationToken) -> Self {
        Self {
            session,
            registry: WorkerRegistry::new(concurrency),
            shutdown,
        }
    }
}

/// Bounded table of connected workers.
#[derive(Clone, Debug)]
pub struct WorkerRegistry {
    workers: Arc<Mutex<BTreeSet<String>>>,
    /// A semaphore to acquire a permit for each registered worker
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            workers: Default::default(),
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Registers `worker_id`. The worker is deregistered when the returned
    /// guard is dropped.
    pub fn register(&self, worker_id: String) -> Result<Registration, CoordinatorError> {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| CoordinatorError::TooManyWorkers(self.capacity))?;

        if !self.lock().insert(worker_id.clone()) {
            return Err(CoordinatorError::DuplicateWorker(worker_id));
        }

        Ok(Registration {
            worker_id,
            registry: self.clone(),
            _permit: permit,
        })
    }

    /// Returns the ids of the registered workers, sorted.
    pub fn worker_ids(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A registered worker.
#[derive(Debug)]
pub struct Registration {
    worker_id: String,
    registry: WorkerRegistry,
    _permit: OwnedSemaphorePermit,
}

impl Registration {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.worker_id);
    }
}
