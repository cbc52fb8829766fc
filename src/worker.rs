//! Child-side request loop.
//!
//! Hosts exactly one extraction engine instance and serves requests from the
//! manager over stdin/stdout. Application-level failures (engine errors,
//! engine panics) are recovered here and reported as data; only a true
//! process failure — OS-level kill, the watchdog firing — terminates the
//! process abruptly.

use std::io;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Duration;

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::engine::ExtractionEngine;
use crate::metadata::ExtractionResult;
use crate::protocol::{self, read_frame, write_frame};
use crate::watchdog::{DEFAULT_TIMEOUT, Watchdog};

/// Worker configuration, resolved at launch.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Watchdog deadline; any protocol byte pushes it forward.
    pub watchdog_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl WorkerConfig {
    /// Read configuration from the environment (`FORKLET_WATCHDOG_MS`).
    pub fn from_env() -> Self {
        Self {
            watchdog_timeout: Watchdog::timeout_from_env(),
        }
    }
}

/// Run the worker over stdin/stdout until `DONE`, stream closure, or a
/// protocol violation. Stderr is left alone for diagnostic logging.
pub async fn run_worker<E: ExtractionEngine>(engine: E, config: WorkerConfig) -> io::Result<()> {
    run_loop(engine, config, tokio::io::stdin(), tokio::io::stdout()).await
}

/// The request loop proper, generic over the byte streams so it can be
/// exercised in-process over [`tokio::io::duplex`].
pub async fn run_loop<E, R, W>(
    mut engine: E,
    config: WorkerConfig,
    mut input: R,
    mut output: W,
) -> io::Result<()>
where
    E: ExtractionEngine,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let watchdog = Watchdog::new(config.watchdog_timeout);
    let watchdog_task = watchdog.spawn();
    let outcome = serve(&mut engine, &watchdog, config, &mut input, &mut output).await;
    watchdog_task.abort();
    outcome
}

async fn serve<E, R, W>(
    engine: &mut E,
    watchdog: &Watchdog,
    config: WorkerConfig,
    input: &mut R,
    output: &mut W,
) -> io::Result<()>
where
    E: ExtractionEngine,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Startup handshake: READY before anything else. A manager that reads
    // any other leading byte treats startup as failed.
    output.write_u8(protocol::READY).await?;
    output.flush().await?;
    watchdog.refresh();

    tracing::info!(
        watchdog_ms = config.watchdog_timeout.as_millis() as u64,
        "worker ready"
    );

    loop {
        let tag = match input.read_u8().await {
            Ok(tag) => tag,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                // Manager went away without DONE. Exit abruptly so the
                // manager-side detects an abnormal termination.
                break Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "request stream closed without DONE",
                ));
            }
            Err(e) => break Err(e),
        };
        watchdog.refresh();

        match tag {
            protocol::PING => {
                output.write_u8(protocol::PING).await?;
                output.flush().await?;
                watchdog.refresh();
            }
            protocol::CALL => {
                let path_bytes = read_frame(&mut *input).await?;
                watchdog.refresh();
                let path = match String::from_utf8(path_bytes) {
                    Ok(s) => PathBuf::from(s),
                    Err(_) => {
                        break fail(&mut *output, "document path is not valid UTF-8").await;
                    }
                };

                tracing::debug!(path = %path.display(), "extraction requested");
                let result = run_engine(engine, &path).await;
                engine.reset();

                let payload = match protocol::encode_result(&result) {
                    Ok(payload) => payload,
                    Err(e) => {
                        break fail(&mut *output, &format!("result encoding failed: {e}")).await;
                    }
                };
                output.write_u8(protocol::READY).await?;
                write_frame(&mut *output, &payload).await?;
                output.flush().await?;
                watchdog.refresh();
            }
            protocol::DONE => {
                tracing::info!("shutdown requested");
                break Ok(());
            }
            other => {
                // Unknown tag means the streams are desynced; framing cannot
                // be trusted any further.
                break fail(&mut *output, &format!("unknown control byte {other:#04x}")).await;
            }
        }
    }
}

/// Invoke the engine, recovering both `Err` returns and panics into a result
/// whose first record carries the error description.
async fn run_engine<E: ExtractionEngine>(engine: &mut E, path: &std::path::Path) -> ExtractionResult {
    match AssertUnwindSafe(engine.extract(path)).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            tracing::warn!(path = %path.display(), error = %err, "engine failed");
            let (message, mut partial) = err.into_parts();
            partial.attach_error(message);
            partial
        }
        Err(panic) => {
            let message = panic_description(panic);
            tracing::error!(path = %path.display(), %message, "engine panicked");
            let mut result = ExtractionResult::new();
            result.attach_error(format!("extraction panicked: {message}"));
            result
        }
    }
}

/// Report a fatal protocol condition: `ERROR` tag plus raw diagnostic text,
/// then an error return that terminates the process. The manager reads the
/// diagnostics until end-of-stream.
async fn fail<W>(output: &mut W, message: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    tracing::error!(%message, "fatal protocol condition");
    output.write_u8(protocol::ERROR).await?;
    output.write_all(message.as_bytes()).await?;
    output.flush().await?;
    Err(io::Error::new(io::ErrorKind::InvalidData, message.to_string()))
}

fn panic_description(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
