//! Bounded pool of worker handles.
//!
//! The pool is the only component with concurrency-control responsibility:
//! it bounds live workers to `pool_size`, hands out exclusive leases, pings
//! idle handles before reuse, and discards anything that failed a protocol
//! exchange. Capacity is modeled as a semaphore of `pool_size` permits; the
//! idle queue and its counters live behind one mutex, so the invariant
//! `in_use + idle <= pool_size` is observed consistently by every caller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::client::{ProtocolError, SpawnError, WorkerHandle};
use crate::metadata::ExtractionResult;

/// Default number of concurrently-existing workers.
pub const DEFAULT_POOL_SIZE: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool has been shut down; acquiring fails fast instead of blocking
    /// forever.
    #[error("worker pool is shut down")]
    Closed,

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Pool configuration: a fixed size and the spawn command used verbatim for
/// every worker.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool_size: usize,
    pub command: Vec<String>,
}

impl PoolConfig {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            command,
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}

#[derive(Debug)]
struct PoolState {
    idle: VecDeque<WorkerHandle>,
    closed: bool,
}

#[derive(Debug)]
struct PoolShared {
    command: Vec<String>,
    pool_size: usize,
    /// One permit per potential live worker. Closed on shutdown so blocked
    /// acquires fail fast.
    capacity: Arc<Semaphore>,
    state: Mutex<PoolState>,
    in_use: AtomicUsize,
}

impl PoolShared {
    /// Lock the idle queue. A poisoned mutex only means another caller
    /// panicked between pushes; the queue itself is still coherent.
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive checkout of one worker. Holds the capacity permit for as long
/// as the lease lives.
///
/// A lease must go back through [`WorkerPool::release`]. Dropping it instead
/// closes the worker: an un-released handle is never silently returned to
/// the idle queue.
#[derive(Debug)]
pub struct WorkerLease {
    handle: Option<WorkerHandle>,
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<PoolShared>,
}

impl WorkerLease {
    pub fn handle_mut(&mut self) -> &mut WorkerHandle {
        // Present from construction until release() or drop consumes it.
        match self.handle.as_mut() {
            Some(handle) => handle,
            None => unreachable!("lease accessed after release"),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(WorkerHandle::pid)
    }

    /// Parse one document on the leased worker.
    pub async fn parse(&mut self, path: &std::path::Path) -> Result<ExtractionResult, ProtocolError> {
        self.handle_mut().parse(path).await
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::warn!(pid = ?handle.pid(), "lease dropped without release, closing worker");
            self.shared.in_use.fetch_sub(1, Ordering::AcqRel);
            tokio::spawn(async move { handle.close().await });
        }
        // The permit drops with the lease, waking one blocked acquire.
    }
}

/// Bounded, crash-tolerant pool of worker processes.
///
/// Cloning is cheap and shares the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                command: config.command,
                pool_size: config.pool_size,
                capacity: Arc::new(Semaphore::new(config.pool_size)),
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    closed: false,
                }),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Check out a worker, blocking cooperatively while the pool is at
    /// capacity. Idle handles are pinged before reuse; a dead one is closed
    /// and never handed to a caller. Fails fast with [`PoolError::Closed`]
    /// after [`shutdown`](Self::shutdown).
    pub async fn acquire(&self) -> Result<WorkerLease, PoolError> {
        let shared = &self.shared;
        let permit = Arc::clone(&shared.capacity)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        loop {
            let candidate = {
                let mut state = shared.state();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                state.idle.pop_front()
            };

            match candidate {
                Some(mut handle) => {
                    if handle.ping().await {
                        shared.in_use.fetch_add(1, Ordering::AcqRel);
                        return Ok(self.lease(handle, permit));
                    }
                    tracing::warn!(pid = ?handle.pid(), "idle worker failed ping, discarding");
                    handle.close().await;
                }
                None => {
                    let handle = WorkerHandle::spawn(&shared.command).await?;
                    shared.in_use.fetch_add(1, Ordering::AcqRel);
                    return Ok(self.lease(handle, permit));
                }
            }
        }
    }

    fn lease(&self, handle: WorkerHandle, permit: OwnedSemaphorePermit) -> WorkerLease {
        WorkerLease {
            handle: Some(handle),
            permit: Some(permit),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Return a lease. A healthy handle goes back to the idle queue if the
    /// pool is open and has room; everything else is closed permanently.
    /// Releasing wakes one blocked [`acquire`](Self::acquire).
    pub async fn release(&self, mut lease: WorkerLease, healthy: bool) {
        let shared = &self.shared;
        let Some(handle) = lease.handle.take() else {
            return;
        };
        let permit = lease.permit.take();
        drop(lease);

        let in_use_now = shared.in_use.fetch_sub(1, Ordering::AcqRel) - 1;

        if healthy {
            let mut state = shared.state();
            if !state.closed && state.idle.len() + in_use_now < shared.pool_size {
                state.idle.push_back(handle);
                drop(state);
                drop(permit);
                return;
            }
        }

        handle.close().await;
        drop(permit);
    }

    /// Parse one document: acquire, parse, release. The handle's health flag
    /// follows the outcome, so a protocol failure discards the worker while
    /// an application-level parse failure (error embedded in the result)
    /// keeps it.
    pub async fn parse(&self, path: &std::path::Path) -> Result<ExtractionResult, PoolError> {
        let mut lease = self.acquire().await?;
        match lease.parse(path).await {
            Ok(result) => {
                self.release(lease, true).await;
                Ok(result)
            }
            Err(e) => {
                self.release(lease, false).await;
                Err(PoolError::Protocol(e))
            }
        }
    }

    /// Shut the pool down: close every idle handle and refuse all further
    /// acquires. In-flight leases are not interrupted; their workers are
    /// closed when released.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        shared.capacity.close();

        let drained: Vec<WorkerHandle> = {
            let mut state = shared.state();
            state.closed = true;
            state.idle.drain(..).collect()
        };

        tracing::info!(idle = drained.len(), "shutting down worker pool");
        for handle in drained {
            handle.close().await;
        }
    }

    /// Number of handles currently checked out.
    pub fn in_use(&self) -> usize {
        self.shared.in_use.load(Ordering::Acquire)
    }

    /// Number of idle handles waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.shared.state().idle.len()
    }

    pub fn pool_size(&self) -> usize {
        self.shared.pool_size
    }
}
