use crate::{
    app::{App, Health},
    errors::{AppError, IngestError, MatchError},
    ingest::{ChangeNotification, MergeReport},
    matcher::{MatchResult, ScopeFilters, ScopeListing},
};
use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    app: Arc<App>,
}

pub fn router(app: Arc<App>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/api/search", post(search))
        .route("/api/scopes", get(scopes))
        .route("/api/scopes/values", post(scope_values))
        .route("/api/webhook", post(webhook))
        .route("/api/health", get(health))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(app: Arc<App>, listen_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("couldnt bind {listen_addr}"))?;
    log::info!("listening on {listen_addr}");

    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

pub fn start_daemon(app: App, listen_addr: &str) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(Arc::new(app), listen_addr).await })
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let message = self.0.to_string();
        match self.0 {
            // a miss, not a failure: still report the literal row if any
            AppError::Match(MatchError::NoSimilar { exact }) => (
                StatusCode::OK,
                Json(json!({"message": message, "exact": exact, "matched": [], "suggested": []})),
            ),
            AppError::Match(MatchError::ScopeEmpty | MatchError::KeywordNotFound) => {
                (StatusCode::NOT_FOUND, Json(json!({"error": message})))
            }
            AppError::Match(MatchError::EmptyQuery | MatchError::UnknownScope(_))
            | AppError::Ingest(IngestError::InvalidPayload(_)) => {
                (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
            }
            AppError::Match(MatchError::Embedding(_))
            | AppError::Ingest(IngestError::SourceUnavailable(_)) => {
                log::error!("{message}");
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": message})))
            }
            AppError::Ingest(_) | AppError::Other(_) => {
                log::error!("{message}");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": message})))
            }
        }
        .into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Run blocking core work (embedding, file io) off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, HttpError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| HttpError(AppError::Other(err.into())))?
        .map_err(HttpError)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub keyword: Option<String>,

    /// Older clients send a list and only the first entry is used.
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub scope: ScopeFilters,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<MatchResult>, HttpError> {
    log::debug!("payload: {payload:?}");

    let keyword = payload
        .keyword
        .or_else(|| payload.keywords.into_iter().next())
        .unwrap_or_default();

    let app = state.app.clone();
    let result = blocking(move || Ok(app.search(&keyword, &payload.scope)?)).await?;
    Ok(Json(result))
}

async fn scopes(State(state): State<Arc<SharedState>>) -> Result<Json<ScopeListing>, HttpError> {
    let app = state.app.clone();
    let listing = blocking(move || Ok(app.scopes())).await?;
    Ok(Json(listing))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopeValuesRequest {
    pub dimension: String,

    #[serde(default)]
    pub within: ScopeFilters,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeValuesResponse {
    pub dimension: String,
    pub values: Vec<String>,
}

async fn scope_values(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ScopeValuesRequest>,
) -> Result<Json<ScopeValuesResponse>, HttpError> {
    let app = state.app.clone();
    let dimension = payload.dimension.clone();
    let values = blocking(move || Ok(app.scope_values(&payload.dimension, &payload.within)?)).await?;
    Ok(Json(ScopeValuesResponse { dimension, values }))
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub updated: Option<String>,
    pub report: MergeReport,
}

async fn webhook(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ChangeNotification>,
) -> Result<Json<WebhookResponse>, HttpError> {
    let updated = payload.record.as_ref().and_then(|r| r.id.clone());

    let app = state.app.clone();
    let report = blocking(move || Ok(app.ingest_event(payload)?)).await?;
    Ok(Json(WebhookResponse {
        status: "success",
        updated,
        report,
    }))
}

async fn health(State(state): State<Arc<SharedState>>) -> (StatusCode, Json<Health>) {
    let health = state.app.health();
    let status = match (&health.store.last_error, health.store.generation) {
        (Some(_), 0) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(health))
}
