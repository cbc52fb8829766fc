//! forklet: crash-resilient forked worker pool for untrusted document parsing.
//!
//! Each parse runs in a short-lived child process instead of in-process, so
//! an extraction engine that crashes, hangs, or exhausts memory takes down
//! only its worker. The pool bounds concurrent children, recycles healthy
//! ones, and converts protocol failures into typed errors; application-level
//! parse failures come back as data on the result itself.

pub mod client;
pub mod engine;
pub mod metadata;
pub mod pool;
pub mod protocol;
pub mod watchdog;
pub mod worker;

pub use client::{ProtocolError, SpawnError, WorkerHandle};
pub use engine::{EngineError, ExtractionEngine, StatEngine};
pub use metadata::{ExtractionResult, MetadataRecord, PARSE_ERROR_KEY};
pub use pool::{DEFAULT_POOL_SIZE, PoolConfig, PoolError, WorkerLease, WorkerPool};
pub use watchdog::{WATCHDOG_ENV, Watchdog};
pub use worker::{WorkerConfig, run_worker};
