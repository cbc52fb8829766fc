//! End-to-end tests against the real worker binary.
//!
//! These exercise the pool, handle, and worker across a genuine process
//! boundary: spawning, handshake, ping-before-reuse, watchdog
//! self-termination, and crash detection.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::time::{sleep, timeout};

use forklet::{PoolConfig, PoolError, WorkerHandle, WorkerPool};

fn worker_command(watchdog_ms: Option<u64>) -> Vec<String> {
    let mut command = vec![env!("CARGO_BIN_EXE_forklet-worker").to_string()];
    if let Some(ms) = watchdog_ms {
        command.push(ms.to_string());
    }
    command
}

fn pool_of(size: usize) -> WorkerPool {
    WorkerPool::new(PoolConfig::new(worker_command(None)).with_pool_size(size))
}

fn sample_document(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();
    file
}

#[tokio::test]
async fn parse_roundtrip_through_real_worker() {
    let doc = sample_document(b"some document bytes");
    let pool = pool_of(2);

    let result = pool.parse(doc.path()).await.unwrap();
    assert!(!result.is_empty());
    let record = result.first().unwrap();
    assert_eq!(record.get("Content-Length"), Some("19"));
    assert!(record.error().is_none());

    // The worker went back to the idle queue for reuse.
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.idle_count(), 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn third_caller_blocks_until_release() {
    let pool = pool_of(2);

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    assert_eq!(pool.in_use(), 2);

    let contended = pool.clone();
    let mut third = tokio::spawn(async move { contended.acquire().await });

    // At capacity: the third caller must still be waiting.
    assert!(timeout(Duration::from_millis(300), &mut third).await.is_err());

    pool.release(first, true).await;

    let lease = timeout(Duration::from_secs(5), third)
        .await
        .expect("third acquire should complete after release")
        .unwrap()
        .unwrap();

    pool.release(lease, true).await;
    pool.release(second, true).await;
    pool.shutdown().await;
}

#[tokio::test]
async fn watchdog_terminates_silent_worker() {
    let mut handle = WorkerHandle::spawn(&worker_command(Some(300))).await.unwrap();
    assert!(handle.ping().await);

    // No traffic for several watchdog intervals: the worker must exit on
    // its own.
    sleep(Duration::from_millis(1500)).await;
    assert!(!handle.ping().await);
    handle.close().await;
}

#[tokio::test]
async fn engine_failure_is_reported_as_data() {
    let pool = pool_of(1);

    let missing = PathBuf::from("/nonexistent/never-created.bin");
    let result = pool.parse(&missing).await.unwrap();

    assert!(result.len() >= 1);
    let error = result.first().unwrap().error().unwrap();
    assert!(!error.is_empty());

    // An application-level failure keeps the worker healthy and pooled.
    assert_eq!(pool.idle_count(), 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_idle_and_fails_acquire() {
    let doc = sample_document(b"x");
    let pool = pool_of(2);

    pool.parse(doc.path()).await.unwrap();
    assert_eq!(pool.idle_count(), 1);

    pool.shutdown().await;
    assert_eq!(pool.idle_count(), 0);

    assert!(matches!(pool.acquire().await.unwrap_err(), PoolError::Closed));
    assert!(matches!(
        pool.parse(doc.path()).await.unwrap_err(),
        PoolError::Closed
    ));
}

async fn kill_process(pid: u32) {
    let status = tokio::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .await
        .unwrap();
    assert!(status.success());
    // Give the OS a moment to tear the pipes down.
    sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn killed_worker_is_never_repooled() {
    let doc = sample_document(b"y");
    let pool = pool_of(1);

    let mut lease = pool.acquire().await.unwrap();
    let pid = lease.pid().unwrap();
    kill_process(pid).await;

    // The in-flight handle reports a fatal protocol failure.
    assert!(lease.parse(doc.path()).await.is_err());
    pool.release(lease, false).await;
    assert_eq!(pool.idle_count(), 0);

    // A fresh worker replaces it.
    let result = pool.parse(doc.path()).await.unwrap();
    assert!(result.first().unwrap().error().is_none());

    pool.shutdown().await;
}

#[tokio::test]
async fn idle_worker_killed_externally_is_discarded_on_acquire() {
    let doc = sample_document(b"z");
    let pool = pool_of(1);

    let lease = pool.acquire().await.unwrap();
    let pid = lease.pid().unwrap();
    pool.release(lease, true).await;
    assert_eq!(pool.idle_count(), 1);

    kill_process(pid).await;

    // Pre-flight ping catches the dead worker; acquire spawns a fresh one.
    let mut lease = pool.acquire().await.unwrap();
    assert_ne!(lease.pid().unwrap(), pid);
    assert!(lease.parse(doc.path()).await.is_ok());
    pool.release(lease, true).await;

    pool.shutdown().await;
}

#[tokio::test]
async fn ping_is_idempotent_on_healthy_worker() {
    let mut handle = WorkerHandle::spawn(&worker_command(None)).await.unwrap();
    for _ in 0..5 {
        assert!(handle.ping().await);
    }
    handle.close().await;
}

#[tokio::test]
async fn pool_invariant_holds_under_concurrent_load() {
    let pool = pool_of(2);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let doc = sample_document(format!("document {i}").as_bytes());
            pool.parse(doc.path()).await
        }));
    }

    for task in tasks {
        let result = task.await.unwrap().unwrap();
        assert!(result.first().unwrap().error().is_none());
    }

    assert_eq!(pool.in_use(), 0);
    assert!(pool.idle_count() <= pool.pool_size());

    pool.shutdown().await;
}

#[tokio::test]
async fn dropped_lease_closes_worker_and_frees_capacity() {
    let doc = sample_document(b"w");
    let pool = pool_of(1);

    let lease = pool.acquire().await.unwrap();
    let pid = lease.pid().unwrap();
    drop(lease);

    // Capacity came back and the old worker was not reused.
    let mut lease = timeout(Duration::from_secs(5), pool.acquire())
        .await
        .expect("capacity should be released by the dropped lease")
        .unwrap();
    assert_ne!(lease.pid().unwrap(), pid);
    assert!(lease.parse(doc.path()).await.is_ok());
    pool.release(lease, true).await;

    pool.shutdown().await;
}
