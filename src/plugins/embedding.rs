//! Background embedding worker pool.
//!
//! A small fixed set of threads drains an owned queue of record ids that need
//! vectors. The queue is separate from the read/write path: enqueueing never
//! blocks on the embedder, and a failed embedding is logged and counted,
//! never returned to the writer that triggered it.

use crate::core::error::PalaceError;
use crate::core::store::Store;
use crate::plugins::semantic::{self, Collaborators};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_WORKERS: usize = 2;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    /// Ids queued or in flight; an id is never queued twice at once.
    queued: FxHashSet<String>,
    in_flight: usize,
    processed: u64,
    failed: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when work arrives or shutdown starts.
    work: Condvar,
    /// Signalled when the queue drains.
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub processed: u64,
    pub failed: u64,
}

pub struct EmbeddingQueue {
    shared: Arc<Shared>,
    store: Store,
    enabled: bool,
    workers: Vec<thread::JoinHandle<()>>,
}

impl EmbeddingQueue {
    /// Spawn `workers` threads embedding records of `store`.
    ///
    /// Without an embedder the queue accepts nothing and spawns no threads.
    pub fn start(
        store: Store,
        collaborators: Collaborators,
        workers: usize,
    ) -> Result<Self, PalaceError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work: Condvar::new(),
            idle: Condvar::new(),
        });
        let enabled = collaborators.embedder.is_some();

        let mut handles = Vec::new();
        if enabled {
            for n in 0..workers.max(1) {
                let shared = Arc::clone(&shared);
                let store = store.clone();
                let collaborators = collaborators.clone();
                let handle = thread::Builder::new()
                    .name(format!("palace-embed-{}", n))
                    .spawn(move || worker_loop(&shared, &store, &collaborators))?;
                handles.push(handle);
            }
        }

        Ok(Self {
            shared,
            store,
            enabled,
            workers: handles,
        })
    }

    /// Queue a record for embedding. Returns false when the id is already
    /// queued, the queue is shutting down, or no embedder is configured.
    pub fn enqueue(&self, record_id: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let mut state = self.shared.lock();
        if state.shutdown || !state.queued.insert(record_id.to_string()) {
            return false;
        }
        state.pending.push_back(record_id.to_string());
        drop(state);
        self.shared.work.notify_one();
        true
    }

    /// Queue every live record that has no stored vector. Returns how many
    /// ids were newly queued.
    pub fn backfill_missing(&self) -> Result<usize, PalaceError> {
        if !self.enabled {
            return Ok(0);
        }
        let missing = semantic::records_missing_embeddings(&self.store)?;
        Ok(missing.iter().filter(|id| self.enqueue(id)).count())
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.lock();
        QueueStats {
            pending: state.pending.len(),
            in_flight: state.in_flight,
            processed: state.processed,
            failed: state.failed,
        }
    }

    /// Block until nothing is pending or in flight, or `timeout` elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while !state.pending.is_empty() || state.in_flight > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.shared.idle.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Stop accepting work, let the workers drain what is queued, and join them.
    pub fn shutdown(mut self) -> QueueStats {
        self.stop();
        self.stats()
    }

    fn stop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.work.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("embedding worker panicked");
            }
        }
    }
}

impl Drop for EmbeddingQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared, store: &Store, collaborators: &Collaborators) {
    loop {
        let record_id = {
            let mut state = shared.lock();
            loop {
                if let Some(id) = state.pending.pop_front() {
                    state.in_flight += 1;
                    break id;
                }
                if state.shutdown {
                    return;
                }
                state = match shared.work.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            semantic::embed_record(store, collaborators, &record_id)
        }))
        .unwrap_or_else(|_| {
            Err(PalaceError::CollaboratorFailed(format!(
                "embedding {} panicked",
                record_id
            )))
        });
        if let Err(e) = &result {
            tracing::warn!(record = %record_id, error = %e, "embedding failed");
        }

        let mut state = shared.lock();
        state.in_flight -= 1;
        state.queued.remove(&record_id);
        match result {
            Ok(()) => state.processed += 1,
            Err(_) => state.failed += 1,
        }
        if state.pending.is_empty() && state.in_flight == 0 {
            shared.idle.notify_all();
        }
    }
}
