//! Manager-side proxy for one worker process.
//!
//! A [`WorkerHandle`] owns the spawned child and both pipe ends, and speaks
//! the wire protocol on behalf of a single caller at a time. The protocol is
//! strictly half-duplex, so a handle must never be shared between callers;
//! the pool's checkout discipline enforces that.

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::metadata::ExtractionResult;
use crate::protocol::{self, drain_diagnostics, read_frame, write_frame};

/// Fatal start-up failure. Non-retryable at this layer: a handle that failed
/// to spawn or handshake must not be kept.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("empty spawn command")]
    EmptyCommand,

    #[error("failed to launch worker process: {0}")]
    Launch(#[source] std::io::Error),

    #[error("worker {0} not captured")]
    Stdio(&'static str),

    #[error("worker handshake returned {byte:#04x} instead of READY: {diagnostics}")]
    Handshake { byte: u8, diagnostics: String },

    #[error("worker exited before handshake: {0}")]
    HandshakeIo(#[source] std::io::Error),
}

/// Fatal protocol failure during `ping` or `parse`. The handle is no longer
/// usable and must be discarded, never returned to the pool.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("worker i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker responded {byte:#04x} instead of READY: {diagnostics}")]
    UnexpectedResponse { byte: u8, diagnostics: String },

    #[error("document path is not valid UTF-8: {0}")]
    NonUtf8Path(std::path::PathBuf),
}

/// One live child worker process plus its two pipes.
///
/// Exactly one task may be in flight on a handle at a time.
pub struct WorkerHandle {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    /// Cleared on the first fatal protocol failure so later pings fail fast.
    alive: bool,
}

impl WorkerHandle {
    /// Spawn a worker from an ordered program-plus-arguments command, used
    /// verbatim, and wait for its `READY` handshake. Stderr is inherited:
    /// worker diagnostics are not part of the protocol.
    pub async fn spawn(command: &[String]) -> Result<Self, SpawnError> {
        let (program, args) = command.split_first().ok_or(SpawnError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(SpawnError::Launch)?;

        let stdin = child.stdin.take().ok_or(SpawnError::Stdio("stdin"))?;
        let mut stdout = child.stdout.take().ok_or(SpawnError::Stdio("stdout"))?;

        match stdout.read_u8().await {
            Ok(protocol::READY) => {}
            Ok(byte) => {
                let diagnostics = drain_diagnostics(&mut stdout).await;
                let _ = child.kill().await;
                return Err(SpawnError::Handshake { byte, diagnostics });
            }
            Err(e) => {
                let _ = child.kill().await;
                return Err(SpawnError::HandshakeIo(e));
            }
        }

        let pid = child.id();
        tracing::debug!(?pid, program = %program, "worker spawned and ready");

        Ok(Self {
            child,
            stdin,
            stdout,
            alive: true,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Best-effort liveness probe: true only if a `PING` comes straight back.
    /// Any I/O error or mismatched byte returns false; ping never errors.
    pub async fn ping(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        let healthy = self.ping_inner().await.unwrap_or(false);
        if !healthy {
            self.alive = false;
        }
        healthy
    }

    async fn ping_inner(&mut self) -> std::io::Result<bool> {
        self.stdin.write_u8(protocol::PING).await?;
        self.stdin.flush().await?;
        Ok(self.stdout.read_u8().await? == protocol::PING)
    }

    /// Parse one document in the worker.
    ///
    /// A `READY` response is success even when the result's first record
    /// carries an embedded error description: an application-level parse
    /// failure is not a protocol failure. Anything else invalidates the
    /// handle.
    ///
    /// There is no manager-side read timeout; the worker's watchdog is the
    /// defense against a wedged child. If the watchdog is configured much
    /// longer than callers expect, this call blocks accordingly.
    pub async fn parse(&mut self, path: &Path) -> Result<ExtractionResult, ProtocolError> {
        let outcome = self.parse_inner(path).await;
        if outcome.is_err() {
            self.alive = false;
        }
        outcome
    }

    async fn parse_inner(&mut self, path: &Path) -> Result<ExtractionResult, ProtocolError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| ProtocolError::NonUtf8Path(path.to_path_buf()))?;

        self.stdin.write_u8(protocol::CALL).await?;
        write_frame(&mut self.stdin, path_str.as_bytes()).await?;
        self.stdin.flush().await?;

        match self.stdout.read_u8().await? {
            protocol::READY => {
                let payload = read_frame(&mut self.stdout).await?;
                Ok(protocol::decode_result(&payload)?)
            }
            byte => {
                let diagnostics = drain_diagnostics(&mut self.stdout).await;
                tracing::warn!(
                    pid = ?self.child.id(),
                    byte,
                    %diagnostics,
                    "worker protocol failure"
                );
                Err(ProtocolError::UnexpectedResponse { byte, diagnostics })
            }
        }
    }

    /// Terminate the worker. A healthy child gets a best-effort `DONE` first,
    /// but correctness never depends on it cooperating: the process is killed
    /// unconditionally and reaped.
    pub async fn close(mut self) {
        if self.alive {
            let _ = self.stdin.write_u8(protocol::DONE).await;
            let _ = self.stdin.flush().await;
        }
        let pid = self.child.id();
        if let Err(e) = self.child.kill().await {
            tracing::debug!(?pid, error = %e, "worker already gone at close");
        } else {
            tracing::debug!(?pid, "worker closed");
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("pid", &self.child.id())
            .field("alive", &self.alive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into()]
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let err = WorkerHandle::spawn(&[]).await.unwrap_err();
        assert!(matches!(err, SpawnError::EmptyCommand));
    }

    #[tokio::test]
    async fn unlaunchable_program_is_a_launch_error() {
        let err = WorkerHandle::spawn(&["/nonexistent/no-such-worker".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, SpawnError::Launch(_)));
    }

    #[tokio::test]
    async fn exit_before_handshake_is_fatal() {
        let err = WorkerHandle::spawn(&sh("exit 1")).await.unwrap_err();
        assert!(matches!(err, SpawnError::HandshakeIo(_)));
    }

    #[tokio::test]
    async fn wrong_handshake_byte_is_fatal_with_diagnostics() {
        // A child that speaks something other than the protocol.
        let err = WorkerHandle::spawn(&sh("printf 'Xstartup went sideways'"))
            .await
            .unwrap_err();
        match err {
            SpawnError::Handshake { byte, diagnostics } => {
                assert_eq!(byte, b'X');
                assert!(diagnostics.contains("sideways"));
            }
            other => panic!("expected handshake error, got {other:?}"),
        }
    }
}
