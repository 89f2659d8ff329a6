//! HTTP surface: request handlers for the session API.
//!
//! Stateless except for the token in the path. `GET /` allocates a
//! token and redirects; every other route resolves its token through
//! the registry, creating the session on first reference.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::SessionRegistry;
use crate::session::{EvalSession, CLEAR_COMMAND, EXIT_COMMAND};
use crate::{AppError, GlobalConfig, Result};

pub mod archive;
pub mod render;

/// Shared application state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Token → session registry.
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    /// Build state from configuration, with a fresh registry.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&config)));
        Self { config, registry }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Config(_) | Self::Engine(_) | Self::Install(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(create_session))
        .route("/health", get(health))
        .route(
            "/{token}",
            get(show_session).post(submit_script).delete(delete_session),
        )
        .route("/{token}/npm/install", post(npm_install))
        .with_state(state)
}

/// Serve the HTTP API until the cancellation token fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener fails to bind or the
/// server errors out.
pub async fn serve(state: AppState, ct: CancellationToken) -> Result<()> {
    let bind = format!("{}:{}", state.config.bind_address, state.config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {bind}: {err}")))?;

    info!(%bind, "starting HTTP transport");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Config(format!("server error: {err}")))?;

    info!("HTTP transport shut down");
    Ok(())
}

/// Handler for `GET /health` — liveness probe.
async fn health() -> &'static str {
    "ok"
}

/// `GET /` — allocate a fresh token, create its session, and redirect
/// (302) to the session page.
async fn create_session(State(state): State<AppState>) -> Result<Response> {
    let token = SessionRegistry::new_token();
    state.registry.get_or_create(&token).await?;
    info!(%token, "session allocated");
    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, format!("/{token}"))],
    )
        .into_response())
}

/// `GET /{token}` — render the transcript, creating the session if absent.
async fn show_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Html<String>> {
    let session = state.registry.get_or_create(&token).await?;
    Ok(render_transcript(&token, &session).await)
}

/// Request body for `POST /{token}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    script: String,
    #[serde(default)]
    display_script: Option<String>,
}

/// `POST /{token}` — dispatch on the trimmed script: `.exit` terminates,
/// `.clear` clears, empty is a no-op, anything else is evaluated.
async fn submit_script(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<Html<String>> {
    let session = state.registry.get_or_create(&token).await?;
    let script = request.script.trim();

    if script == EXIT_COMMAND {
        return terminate_session(&state, &token, &session).await;
    }

    if script == CLEAR_COMMAND {
        session.clear();
    } else if !script.is_empty() {
        session
            .submit(
                script,
                request.display_script.as_deref(),
                state.config.settle_delay(),
            )
            .await?;
    }

    Ok(render_transcript(&token, &session).await)
}

/// `DELETE /{token}` — equivalent to submitting `.exit`.
async fn delete_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Html<String>> {
    let session = state.registry.get_or_create(&token).await?;
    terminate_session(&state, &token, &session).await
}

/// Request body for `POST /{token}/npm/install`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallRequest {
    package_json: serde_json::Value,
}

/// `POST /{token}/npm/install` — seed the sandbox manifest when absent,
/// run a production-only install, log its output to the transcript, and
/// respond with a zip of the sandbox contents.
async fn npm_install(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<InstallRequest>,
) -> Result<Response> {
    if !request.package_json.is_object() {
        return Err(AppError::InvalidRequest(
            "packageJson must be an object".into(),
        ));
    }

    let session = state.registry.get_or_create(&token).await?;
    let resolver = session.resolver();

    if !resolver.sandbox_exists() {
        resolver.write_manifest_value(&request.package_json)?;
    }

    info!(%token, "manifest install requested");
    let output = resolver.install_from_manifest().await.inspect_err(|err| {
        warn!(%token, %err, "manifest install failed");
    })?;
    if !output.stderr.is_empty() {
        session.log_output(output.stderr.clone());
    }
    if !output.stdout.is_empty() {
        session.log_output(output.stdout.clone());
    }

    let archive = archive::zip_dir(resolver.sandbox_dir())?;
    Ok(([(header::CONTENT_TYPE, "application/zip")], archive).into_response())
}

/// Terminate `session`, drop its registry entry, and render the
/// (now empty) transcript.
async fn terminate_session(
    state: &AppState,
    token: &str,
    session: &Arc<EvalSession>,
) -> Result<Html<String>> {
    session.terminate(state.config.settle_delay()).await;
    state.registry.remove(token).await;
    Ok(render_transcript(token, session).await)
}

async fn render_transcript(token: &str, session: &Arc<EvalSession>) -> Html<String> {
    let entries = session.transcript().await;
    Html(render::transcript_page(token, &entries))
}
