//! Evaluation session: one engine, one sink, one transcript, one sandbox.

use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::engine::EngineHandle;
use crate::resolver::{extract_requires, DependencyResolver};
use crate::sink::BoundedSink;
use crate::transcript::{TranscriptBuffer, TranscriptEntry};
use crate::{AppError, Result};

/// Sentinel script that terminates the session instead of evaluating.
pub const EXIT_COMMAND: &str = ".exit";

/// Sentinel script that clears the transcript instead of evaluating.
pub const CLEAR_COMMAND: &str = ".clear";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Engine running, accepting input.
    Active,
    /// Engine shut down; any further reference to the token creates a
    /// brand-new session.
    Terminated,
}

/// What a call to [`EvalSession::submit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The script was pushed to the engine and drained normally.
    Evaluated,
    /// The script was the exit sentinel; the session terminated and the
    /// caller must drop its registry entry.
    Terminated,
}

/// A live evaluation session.
///
/// Owns the engine child process, its bounded output sink, the
/// transcript, and the dependency resolver scoped to this session's
/// sandbox. All operations take `&self`; interior locks keep each
/// operation internally consistent, but two concurrent submissions to
/// the same session may interleave their settle/drain windows — output
/// attribution between them is best-effort by design.
#[derive(Debug)]
pub struct EvalSession {
    token: String,
    engine: EngineHandle,
    sink: BoundedSink,
    transcript: Mutex<TranscriptBuffer>,
    resolver: DependencyResolver,
    state: Mutex<SessionState>,
    engine_exit_reported: AtomicBool,
    shutdown_grace: Duration,
}

impl EvalSession {
    /// Spawn a fresh session for `token`: new engine, empty sink and
    /// transcript, resolver scoped to the token's sandbox.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` if the engine process fails to spawn.
    pub fn spawn(token: &str, config: &GlobalConfig) -> Result<Arc<Self>> {
        let sink = BoundedSink::new(config.max_output_chunks);
        let resolver = DependencyResolver::new(token, config);
        let engine = EngineHandle::spawn(
            &config.engine_command,
            &config.engine_args,
            resolver.sandbox_dir(),
            sink.clone(),
        )?;

        info!(token, "session created");

        Ok(Arc::new(Self {
            token: token.to_owned(),
            engine,
            sink,
            transcript: Mutex::new(TranscriptBuffer::new()),
            resolver,
            state: Mutex::new(SessionState::Active),
            engine_exit_reported: AtomicBool::new(false),
            shutdown_grace: config.shutdown_grace(),
        }))
    }

    /// The session's token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The session's dependency resolver.
    #[must_use]
    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit a script to the engine.
    ///
    /// A trimmed script equal to [`EXIT_COMMAND`] triggers termination
    /// instead of normal submission. Otherwise: dependencies referenced
    /// by the script are resolved first (a failed install lands in the
    /// transcript, not in the return value), the script plus a line
    /// terminator is pushed to the engine's stdin, the caller sleeps
    /// `settle` to let the engine react, an `input` entry is logged with
    /// `display_script` when given (else the script itself), and finally
    /// the sink is drained.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` when the session is terminated or the
    /// engine process has died.
    pub async fn submit(
        &self,
        script: &str,
        display_script: Option<&str>,
        settle: Duration,
    ) -> Result<SubmitOutcome> {
        if script.trim() == EXIT_COMMAND {
            self.terminate(settle).await;
            return Ok(SubmitOutcome::Terminated);
        }

        if self.state() == SessionState::Terminated {
            return Err(AppError::Engine("session is terminated".into()));
        }
        self.check_engine_alive().await?;

        info!(token = %self.token, "submitting script to engine");
        self.resolve_script_dependencies(script).await?;

        self.engine.send_line(script).await?;
        tokio::time::sleep(settle).await;

        let timestamp = Utc::now();
        let logged = display_script.unwrap_or(script);
        self.append(TranscriptEntry::input(format!("{logged}\n"), timestamp));
        self.drain(timestamp);

        Ok(SubmitOutcome::Evaluated)
    }

    /// Pull whatever output the sink has captured.
    ///
    /// When non-empty, the concatenated output becomes one `output`
    /// entry stamped with `timestamp` and the sink's epoch resets.
    /// No-op when the sink is empty.
    pub fn drain(&self, timestamp: DateTime<Utc>) {
        let output = self.sink.dump();
        if output.is_empty() {
            return;
        }
        self.append(TranscriptEntry::output(output, timestamp));
        self.sink.flush();
    }

    /// Drain once more, then snapshot the transcript.
    ///
    /// A read triggers a final best-effort capture so late-arriving
    /// output is not silently dropped before rendering. An engine that
    /// died since the last call is reported here as a one-time `output`
    /// entry.
    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        if let Ok(Some(status)) = self.engine.try_status().await {
            self.report_engine_exit(status);
        }
        self.drain(Utc::now());
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
            .to_vec()
    }

    /// Append an `output` entry directly, stamped now. Used by handlers
    /// to log installer output that did not pass through the engine.
    pub fn log_output(&self, content: String) {
        self.append(TranscriptEntry::output(content, Utc::now()));
    }

    /// Empty the transcript. Engine and sink state are untouched.
    pub fn clear(&self) {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Terminate the session: push the exit sentinel to the engine,
    /// wait `settle`, drain once more, clear the transcript, and shut
    /// the engine down with the configured grace period. Idempotent.
    ///
    /// The caller is responsible for removing the token from the
    /// registry afterwards; the sandbox directory stays on disk.
    pub async fn terminate(&self, settle: Duration) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Terminated {
                return;
            }
            *state = SessionState::Terminated;
        }

        if let Err(err) = self.engine.send_line(EXIT_COMMAND).await {
            warn!(token = %self.token, %err, "engine did not accept exit command");
        }
        tokio::time::sleep(settle).await;
        self.drain(Utc::now());
        self.clear();
        self.engine.shutdown(self.shutdown_grace).await;

        info!(token = %self.token, "session terminated");
    }

    /// Resolve every `require("...")` specifier in `script` before the
    /// engine sees it. Install output and install failures both land in
    /// the transcript as `output` entries; only non-install errors
    /// propagate.
    async fn resolve_script_dependencies(&self, script: &str) -> Result<()> {
        for spec in extract_requires(script) {
            match self.resolver.resolve(&spec).await {
                Ok(resolution) => {
                    if let Some(output) = resolution.install_output {
                        self.log_output(output);
                    }
                }
                Err(AppError::Install(msg)) => {
                    warn!(token = %self.token, module = %spec, "dependency install failed");
                    self.log_output(format!("install: {msg}\n"));
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    async fn check_engine_alive(&self) -> Result<()> {
        match self.engine.try_status().await? {
            None => Ok(()),
            Some(status) => {
                self.report_engine_exit(status);
                Err(AppError::Engine(format!(
                    "engine process has exited ({})",
                    exit_status_text(status)
                )))
            }
        }
    }

    /// Log the engine's unexpected exit exactly once. The session does
    /// not restart a dead engine; `.exit` releases the token and the
    /// next reference builds a fresh session.
    fn report_engine_exit(&self, status: ExitStatus) {
        if self.state() == SessionState::Terminated {
            return;
        }
        if self.engine_exit_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(token = %self.token, %status, "engine exited unexpectedly");
        self.log_output(format!("engine {}\n", exit_status_text(status)));
    }

    fn append(&self, entry: TranscriptEntry) {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(entry);
    }
}

fn exit_status_text(status: ExitStatus) -> String {
    status.code().map_or_else(
        || "terminated by signal".to_owned(),
        |code| format!("exited with code {code}"),
    )
}
