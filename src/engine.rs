//! Evaluation engine process handle.
//!
//! Each session owns one engine: a long-lived interactive interpreter
//! child process. Input goes in through a line-oriented stdin channel;
//! stdout and stderr are pumped into the session's [`BoundedSink`] by
//! background reader tasks, at whatever pace the engine produces them.
//! The handle never interprets the engine's output.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sink::BoundedSink;
use crate::{AppError, Result};

const READ_BUF_SIZE: usize = 8192;

/// Handle to a spawned evaluation engine process.
///
/// `stdin` becomes `None` once [`EngineHandle::shutdown`] closes the
/// input channel to signal EOF.
#[derive(Debug)]
pub struct EngineHandle {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// Spawn the engine and start pumping its output into `sink`.
    ///
    /// The child starts with piped stdio and `kill_on_drop(true)`.
    /// `NODE_PATH` points at the session sandbox's module storage so
    /// units installed by the dependency resolver become loadable
    /// without restarting the engine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` if the process fails to spawn or its
    /// stdio handles cannot be captured.
    pub fn spawn(
        command: &str,
        args: &[String],
        sandbox_dir: &Path,
        sink: BoundedSink,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .env("NODE_PATH", sandbox_dir.join("node_modules"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Engine(format!("failed to spawn engine: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Engine("failed to capture engine stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Engine("failed to capture engine stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Engine("failed to capture engine stderr".into()))?;

        info!(
            command,
            pid = child.id().unwrap_or(0),
            "evaluation engine spawned"
        );

        let cancel = CancellationToken::new();
        tokio::spawn(pump_output("stdout", stdout, sink.clone(), cancel.clone()));
        tokio::spawn(pump_output("stderr", stderr, sink, cancel.clone()));

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(child),
            cancel,
        })
    }

    /// Push one line of input into the engine's stdin.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` if the write fails (typically because
    /// the engine has exited and closed its stdin).
    pub async fn send_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(AppError::Engine("engine stdin is closed".into()));
        };
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| AppError::Engine(format!("engine stdin write failed: {err}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|err| AppError::Engine(format!("engine stdin write failed: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| AppError::Engine(format!("engine stdin flush failed: {err}")))?;
        Ok(())
    }

    /// Non-blocking liveness probe.
    ///
    /// Returns `Some(status)` once the engine process has exited.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` if the process status cannot be read.
    pub async fn try_status(&self) -> Result<Option<ExitStatus>> {
        self.child
            .lock()
            .await
            .try_wait()
            .map_err(|err| AppError::Engine(format!("failed to poll engine status: {err}")))
    }

    /// Shut the engine down: close stdin so the engine sees EOF, wait
    /// up to `grace` for a natural exit, then force-kill. The output
    /// pumps stop either way.
    pub async fn shutdown(&self, grace: Duration) {
        // Most interactive engines exit on stdin EOF; give that path a
        // chance before reaching for the kill.
        drop(self.stdin.lock().await.take());

        let mut child = self.child.lock().await;
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(exit)) => {
                info!(?exit, "engine exited gracefully");
            }
            Ok(Err(err)) => {
                warn!(%err, "error waiting for engine process");
            }
            Err(_) => {
                warn!("engine did not exit within grace period, forcing kill");
                if let Err(err) = child.kill().await {
                    warn!(%err, "failed to force-kill engine process");
                }
            }
        }

        self.cancel.cancel();
    }
}

/// Read raw chunks from one engine output stream into the sink until
/// EOF or cancellation. Chunks are untyped bytes; framing is left to
/// whoever renders the transcript.
async fn pump_output<R>(
    stream: &'static str,
    mut reader: R,
    sink: BoundedSink,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(stream, "engine output pump cancelled");
                break;
            }

            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        debug!(stream, "engine output stream closed");
                        break;
                    }
                    Ok(n) => {
                        sink.write(bytes::Bytes::copy_from_slice(&buf[..n]));
                    }
                    Err(err) => {
                        warn!(stream, %err, "engine output read failed, stopping pump");
                        break;
                    }
                }
            }
        }
    }
}
