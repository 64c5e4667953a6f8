//! Bounded concurrent dispatch over chunked work
//!
//! Items are split into contiguous chunks and handed to a fixed number of
//! workers sharing one FIFO queue. Workers are futures joined on the
//! caller's task, so "concurrent" means interleaved at the operation's
//! await points.
//!
//! A failing chunk raises the shutdown signal: no worker dequeues another
//! chunk afterwards, but chunks already in flight run to completion
//! (drain, not cancel). Every failure is logged and returned.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::error::AggregatedError;

pub const DEFAULT_POOL_SIZE: usize = 8;
pub const DEFAULT_CHUNK_SIZE: usize = 8;

/// Concurrency and batching limits of a [`DispatchPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers, i.e. maximum simultaneous operations
    pub pool_size: usize,
    /// Maximum items per operation call
    pub chunk_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Lifecycle of one pool worker.
///
/// Running → Stopped when the queue is exhausted, the shutdown signal is
/// up, or its own chunk failed. Running → Draining → Stopped when a chunk
/// it was running completed after another worker signalled shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Draining,
    Stopped,
}

/// Counters of a successful run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub chunks: usize,
    pub items: usize,
}

struct WorkQueue<T> {
    chunks: Mutex<VecDeque<(usize, Vec<T>)>>,
    shutdown: AtomicBool,
}

impl<T> WorkQueue<T> {
    fn new(chunks: Vec<Vec<T>>) -> Self {
        Self {
            chunks: Mutex::new(chunks.into_iter().enumerate().collect()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Next chunk, unless the queue is empty or shutting down
    fn next(&self) -> Option<(usize, Vec<T>)> {
        let mut chunks = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_shutdown() {
            return None;
        }
        chunks.pop_front()
    }

    fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

struct WorkerOutcome<E> {
    chunks_run: usize,
    failure: Option<(usize, E)>,
}

/// Bounded-concurrency executor with drain-on-error semantics
#[derive(Debug, Clone, Default)]
pub struct DispatchPool {
    config: PoolConfig,
}

impl DispatchPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config: PoolConfig {
                pool_size: config.pool_size.max(1),
                chunk_size: config.chunk_size.max(1),
            },
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Run `operation` once per chunk of `items`, at most `pool_size` at a
    /// time. `label` identifies the run in logs and errors.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        operation: F,
        items: impl IntoIterator<Item = T>,
    ) -> Result<DispatchSummary, AggregatedError<E>>
    where
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let chunks = into_chunks(items, self.config.chunk_size);
        let summary = DispatchSummary {
            chunks: chunks.len(),
            items: chunks.iter().map(Vec::len).sum(),
        };
        if chunks.is_empty() {
            debug!(label, "Nothing to dispatch");
            return Ok(summary);
        }

        debug!(
            label,
            chunks = summary.chunks,
            items = summary.items,
            pool_size = self.config.pool_size,
            "Starting dispatch"
        );
        let queue = WorkQueue::new(chunks);
        let workers = (0..self.config.pool_size).map(|id| work(id, label, &queue, &operation));
        let outcomes = join_all(workers).await;

        let chunks_started = outcomes.iter().map(|o| o.chunks_run).sum();
        let mut failures: Vec<(usize, E)> =
            outcomes.into_iter().filter_map(|o| o.failure).collect();
        if failures.is_empty() {
            info!(
                label,
                chunks = summary.chunks,
                items = summary.items,
                "Dispatch complete"
            );
            return Ok(summary);
        }

        failures.sort_by_key(|(index, _)| *index);
        for (index, err) in &failures {
            error!(label, chunk = index, error = %err, "Chunk failed");
        }
        Err(AggregatedError {
            label: label.to_string(),
            chunks_total: summary.chunks,
            chunks_started,
            errors: failures.into_iter().map(|(_, err)| err).collect(),
        })
    }
}

async fn work<T, E, F, Fut>(
    id: usize,
    label: &str,
    queue: &WorkQueue<T>,
    operation: &F,
) -> WorkerOutcome<E>
where
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    let mut outcome = WorkerOutcome {
        chunks_run: 0,
        failure: None,
    };
    let mut state = WorkerState::Running;

    loop {
        match state {
            WorkerState::Running => {
                let Some((index, chunk)) = queue.next() else {
                    state = WorkerState::Stopped;
                    continue;
                };
                debug!(
                    label,
                    worker = id,
                    chunk = index,
                    size = chunk.len(),
                    "Dispatching chunk"
                );
                let result = operation(chunk).await;
                outcome.chunks_run += 1;
                match result {
                    Ok(()) if queue.is_shutdown() => state = WorkerState::Draining,
                    Ok(()) => {}
                    Err(err) => {
                        queue.signal_shutdown();
                        warn!(
                            label,
                            worker = id,
                            chunk = index,
                            "Chunk failed, draining pool"
                        );
                        outcome.failure = Some((index, err));
                        state = WorkerState::Stopped;
                    }
                }
            }
            WorkerState::Draining => {
                debug!(
                    label,
                    worker = id,
                    "Finished in-flight chunk after shutdown"
                );
                state = WorkerState::Stopped;
            }
            WorkerState::Stopped => break,
        }
    }
    outcome
}

/// Split into contiguous chunks of at most `size` items, preserving order
fn into_chunks<T>(items: impl IntoIterator<Item = T>, size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
