//! Process-wide session registry: token → live session.
//!
//! The registry is the only structure shared across sessions. It is an
//! explicit, injectable object owned by the service state — not ambient
//! global state — and serializes create/remove through one async lock,
//! giving tokens insert-if-absent semantics.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::GlobalConfig;
use crate::session::EvalSession;
use crate::{AppError, Result};

/// Length of a generated session token, in hex characters.
const TOKEN_LEN: usize = 16;

/// Maximum accepted length for a caller-supplied token.
const MAX_TOKEN_LEN: usize = 64;

/// In-memory mapping from session token to live [`EvalSession`].
///
/// Lives for the process lifetime; nothing persists across restarts.
#[derive(Debug)]
pub struct SessionRegistry {
    config: Arc<GlobalConfig>,
    sessions: Mutex<HashMap<String, Arc<EvalSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry bound to the given configuration.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration sessions are built from.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Return the session for `token`, constructing and storing a new
    /// one when the token is unknown. A token maps to at most one live
    /// session at a time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` for a malformed token, or
    /// `AppError::Engine` if a fresh engine fails to spawn.
    pub async fn get_or_create(&self, token: &str) -> Result<Arc<EvalSession>> {
        validate_token(token)?;

        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(token) {
            return Ok(Arc::clone(session));
        }

        let session = EvalSession::spawn(token, &self.config)?;
        sessions.insert(token.to_owned(), Arc::clone(&session));
        info!(token, total = sessions.len(), "session registered");
        Ok(session)
    }

    /// Look up an existing session without creating one.
    pub async fn get(&self, token: &str) -> Option<Arc<EvalSession>> {
        self.sessions.lock().await.get(token).map(Arc::clone)
    }

    /// Forget `token`, returning the session it mapped to, if any.
    ///
    /// Does not terminate the session; the caller terminates first.
    /// The sandbox directory on disk is never touched.
    pub async fn remove(&self, token: &str) -> Option<Arc<EvalSession>> {
        let removed = self.sessions.lock().await.remove(token);
        if removed.is_some() {
            info!(token, "session removed from registry");
        }
        removed
    }

    /// Remove and return every session, leaving the registry empty.
    /// Used at shutdown so each engine gets its grace period.
    pub async fn drain_all(&self) -> Vec<Arc<EvalSession>> {
        self.sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no sessions are registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Generate a collision-resistant random token: the SHA-256 digest
    /// of freshly generated random bytes, truncated to [`TOKEN_LEN`]
    /// lowercase hex characters. The token is the sole access-control
    /// mechanism for a session, so it is never derived from user input.
    #[must_use]
    pub fn new_token() -> String {
        let mut hasher = Sha256::new();
        hasher.update(uuid::Uuid::new_v4().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..TOKEN_LEN].to_owned()
    }
}

/// Accept only tokens safe to embed in a sandbox path: ASCII
/// alphanumerics, `-`, and `_`, at most [`MAX_TOKEN_LEN`] chars.
fn validate_token(token: &str) -> Result<()> {
    if token.is_empty() || token.len() > MAX_TOKEN_LEN {
        return Err(AppError::InvalidRequest("invalid session token".into()));
    }
    if token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(AppError::InvalidRequest("invalid session token".into()))
    }
}
