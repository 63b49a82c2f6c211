//! Fixed-size worker pools with round-robin selection.
//!
//! A pool never grows or shrinks after construction. Selection is a single
//! atomic counter; fairness across uneven workers is deliberately weak
//! because the fast/slow split is the real isolation mechanism.

use crate::error::WorkerError;
use crate::payload::{RequestPayload, ResponsePayload};
use crate::worker::{Worker, WorkerConfig};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Aggregated liveness counts for one pool.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub dead_workers: usize,
}

/// A fixed set of workers plus the round-robin counter.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Spawn `count` workers up front. Any spawn failure aborts pool
    /// construction and surfaces to the caller.
    pub fn new(count: usize, cfg: WorkerConfig) -> Result<Self, WorkerError> {
        let mut workers = Vec::with_capacity(count);
        for _ in 0..count {
            workers.push(Arc::new(Worker::new(cfg.clone())?));
        }
        Ok(Self {
            workers,
            next: AtomicUsize::new(0),
        })
    }

    /// Assemble a pool from existing workers.
    pub fn from_workers(workers: Vec<Arc<Worker>>) -> Self {
        Self {
            workers,
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Round-robin pick. The counter only ever increments; the index wraps
    /// modulo the fixed pool size.
    pub fn next_worker(&self) -> Arc<Worker> {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        Arc::clone(&self.workers[i % self.workers.len()])
    }

    /// Pick a worker and run the buffered exchange on it.
    pub fn dispatch(&self, req: &RequestPayload) -> Result<ResponsePayload, WorkerError> {
        self.next_worker().handle(req)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.len(),
            dead_workers: self.workers.iter().filter(|w| w.is_dead()).count(),
        }
    }

    /// Flag every worker dead; each respawns on its next dispatch.
    pub fn mark_all_dead(&self) {
        for worker in &self.workers {
            worker.mark_dead();
        }
    }
}
