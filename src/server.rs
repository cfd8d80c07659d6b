//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/search?q&limit` | Semantic search, `[{entry, file, score}]` |
//! | `GET`    | `/documents?offset&limit&folder` | Paginated registry listing |
//! | `GET`    | `/documents/{path}` | One registry entry |
//! | `DELETE` | `/documents/{path}` | Delete file and index state (readwrite gates only) |
//! | `GET`    | `/ignore` | List ignore entries |
//! | `POST`   | `/ignore` | `{path}`: ignore a file or glob, drop its chunks |
//! | `DELETE` | `/ignore?path=` | Un-ignore and re-queue matching files |
//! | `GET`    | `/gate` | List gates |
//! | `POST`   | `/gate` | `{directory, mode}`: set a gate |
//! | `DELETE` | `/gate?directory=` | Remove a gate |
//! | `GET`    | `/gate/resolve?path=` | Effective mode for a path |
//! | `POST`   | `/reindex` | `{path}`: run a processing pass now |
//! | `GET`    | `/registry/stats` | Totals, gates, ignore count |
//! | `GET`    | `/health` | Liveness, persistence and watcher status |
//!
//! # Error contract
//!
//! ```json
//! { "error": "GateViolation", "detail": "journal/a.md is under a readonly gate" }
//! ```
//!
//! Every path taken from a request is normalized before any I/O; absolute
//! paths and `..` segments are refused with `400 PathTraversal`.

use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::app::Services;
use crate::error::Error;
use crate::indexer::PassOutcome;
use crate::models::{EventKind, FileStamp, Gate, GateMode, IgnoreEntry, IndexedDocument, SearchHit};
use crate::paths::{normalize_relative, PathIssue};
use crate::policy::is_glob;
use crate::registry::{DocumentPage, RegistryStats};
use crate::search::Searcher;
use crate::watcher::{WatchControl, WatcherStatus};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    services: Arc<Services>,
    /// Absent when the server runs without a watcher; re-queued paths are
    /// then processed inline.
    watcher: Option<WatchControl>,
}

impl AppState {
    pub fn new(services: Arc<Services>, watcher: Option<WatchControl>) -> Self {
        Self { services, watcher }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", get(handle_search))
        .route("/documents", get(handle_list_documents))
        .route(
            "/documents/{*path}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route(
            "/ignore",
            get(handle_list_ignored)
                .post(handle_add_ignore)
                .delete(handle_remove_ignore),
        )
        .route(
            "/gate",
            get(handle_list_gates)
                .post(handle_set_gate)
                .delete(handle_remove_gate),
        )
        .route("/gate/resolve", get(handle_resolve_gate))
        .route("/reindex", post(handle_reindex))
        .route("/registry/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .fallback(handle_unknown_route)
        .layer(cors)
        .with_state(state)
}

/// Bind `bind` and serve until `shutdown` resolves.
pub async fn run_server<F>(state: AppState, bind: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

pub struct AppError {
    status: StatusCode,
    error: &'static str,
    detail: String,
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::PathTraversal(_)
            | Error::InvalidPath(_)
            | Error::InvalidMode(_)
            | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::GateViolation { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Ignored { .. } | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::UnsupportedFileType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::EmbeddingServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::FileRead { .. } | Error::Persist { .. } | Error::Store(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            error: err.kind(),
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

// ============ Extractors ============
//
// Wrappers over axum's extractors that turn a malformed body, query string
// or path into `400 BadRequest` with the usual error body.

pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(Error::BadRequest(rejection.body_text()).into()),
        }
    }
}

pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(Error::BadRequest(rejection.body_text()).into()),
        }
    }
}

pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(Error::BadRequest(rejection.body_text()).into()),
        }
    }
}

async fn handle_unknown_route(uri: Uri) -> AppError {
    Error::not_found("route", uri.path()).into()
}

/// Normalize a request path, refusing anything that could leave the root.
fn validate_path(raw: &str) -> Result<String, Error> {
    normalize_relative(raw).map_err(|issue| match issue {
        PathIssue::Absolute | PathIssue::Traversal => Error::PathTraversal(raw.to_string()),
        PathIssue::Empty => Error::InvalidPath(issue.to_string()),
    })
}

fn stamp_of(state: &AppState, path: &str) -> Option<FileStamp> {
    let abs = state.services.indexer.root().join(path);
    std::fs::metadata(abs)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| FileStamp::from_metadata(&m))
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> ApiResult<Json<Vec<SearchHit>>> {
    let services = &state.services;
    let searcher = Searcher {
        embedder: services.embedder.as_ref(),
        store: services.store.as_ref(),
        policy: &services.policy,
        retrieval: &services.config.retrieval,
    };
    let hits = searcher
        .search(params.q.as_deref().unwrap_or(""), params.limit)
        .await?;
    Ok(Json(hits))
}

// ============ /documents ============

#[derive(Deserialize)]
struct ListParams {
    offset: Option<usize>,
    limit: Option<usize>,
    folder: Option<String>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Json<DocumentPage>> {
    let folder = match params.folder.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(f) => Some(validate_path(f)?),
    };
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let page = state
        .services
        .registry
        .list(params.offset.unwrap_or(0), limit, folder.as_deref());
    Ok(Json(page))
}

async fn handle_get_document(
    State(state): State<AppState>,
    ApiPath(raw): ApiPath<String>,
) -> ApiResult<Json<IndexedDocument>> {
    let path = validate_path(&raw)?;
    state
        .services
        .registry
        .get(&path)
        .map(Json)
        .ok_or_else(|| Error::not_found("document", path).into())
}

#[derive(Serialize)]
struct DeleteResponse {
    path: String,
    file_deleted: bool,
    chunks_removed: usize,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    ApiPath(raw): ApiPath<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let path = validate_path(&raw)?;
    let services = &state.services;

    if services.policy.resolve_gate(&path) == GateMode::ReadOnly {
        return Err(Error::GateViolation { path }.into());
    }

    let abs = services.indexer.root().join(&path);
    let on_disk = tokio::fs::metadata(&abs).await.map(|m| m.is_file()).unwrap_or(false);
    let indexed = services.registry.get(&path);
    if !on_disk && indexed.is_none() {
        return Err(Error::not_found("document", path).into());
    }

    if on_disk {
        tokio::fs::remove_file(&abs).await.map_err(|e| Error::FileRead {
            path: path.clone(),
            reason: format!("delete failed: {e}"),
        })?;
    }
    services.indexer.forget(&path).await?;

    tracing::info!(path = %path, file_deleted = on_disk, "document deleted");
    Ok(Json(DeleteResponse {
        chunks_removed: indexed.map(|d| d.chunk_count).unwrap_or(0),
        path,
        file_deleted: on_disk,
    }))
}

// ============ /ignore ============

#[derive(Deserialize)]
struct IgnoreBody {
    path: String,
}

#[derive(Deserialize)]
struct IgnoreQuery {
    path: String,
}

#[derive(Serialize)]
struct IgnoreAdded {
    entry: IgnoreEntry,
    /// Documents dropped from the index because of this entry.
    purged: Vec<String>,
}

#[derive(Serialize)]
struct IgnoreRemoved {
    path: String,
    removed: bool,
    /// Files queued for indexing now that they are no longer ignored.
    requeued: usize,
}

async fn handle_list_ignored(State(state): State<AppState>) -> Json<Vec<IgnoreEntry>> {
    Json(state.services.policy.list_ignored())
}

async fn handle_add_ignore(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<IgnoreBody>,
) -> ApiResult<(StatusCode, Json<IgnoreAdded>)> {
    let path = validate_path(&body.path)?;
    let services = &state.services;

    let observed = if is_glob(&path) { None } else { stamp_of(&state, &path) };
    let entry = services.policy.add_ignore(&path, observed)?;

    let purged = if is_glob(&path) {
        services.indexer.purge_ignored().await?
    } else {
        match services.indexer.forget(&path).await? {
            Some(_) => vec![path],
            None => Vec::new(),
        }
    };

    Ok((StatusCode::CREATED, Json(IgnoreAdded { entry, purged })))
}

async fn handle_remove_ignore(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<IgnoreQuery>,
) -> ApiResult<Json<IgnoreRemoved>> {
    let path = validate_path(&query.path)?;
    let removed = state.services.policy.remove_ignore(&path)?;
    let requeued = if removed { requeue_unindexed(&state).await? } else { 0 };
    Ok(Json(IgnoreRemoved {
        path,
        removed,
        requeued,
    }))
}

/// Queue every indexable file the registry does not reflect yet.
async fn requeue_unindexed(state: &AppState) -> Result<usize, Error> {
    let indexer = &state.services.indexer;
    let events = indexer.reconcile().await.map_err(Error::Store)?;
    let mut queued = 0;
    for (path, kind) in events.into_iter().filter(|(_, k)| *k != EventKind::Deleted) {
        match &state.watcher {
            Some(watcher) => {
                if watcher.enqueue(&path, kind) {
                    queued += 1;
                }
            }
            None => {
                if indexer.process(&path).await.is_ok() {
                    queued += 1;
                }
            }
        }
    }
    Ok(queued)
}

// ============ /gate ============

#[derive(Deserialize)]
struct GateBody {
    directory: String,
    mode: String,
}

#[derive(Deserialize)]
struct GateQuery {
    directory: String,
}

#[derive(Deserialize)]
struct ResolveQuery {
    path: String,
}

#[derive(Serialize)]
struct GateRemoved {
    directory: String,
    removed: bool,
}

#[derive(Serialize)]
struct GateResolution {
    path: String,
    mode: GateMode,
    /// The gate that decided `mode`; absent for the readwrite default.
    gate: Option<Gate>,
}

async fn handle_list_gates(State(state): State<AppState>) -> Json<Vec<Gate>> {
    Json(state.services.policy.list_gates())
}

async fn handle_set_gate(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<GateBody>,
) -> ApiResult<Json<Gate>> {
    let directory = validate_path(&body.directory)?;
    let gate = state.services.policy.set_gate(&directory, &body.mode)?;
    Ok(Json(gate))
}

async fn handle_remove_gate(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<GateQuery>,
) -> ApiResult<Json<GateRemoved>> {
    let directory = validate_path(&query.directory)?;
    let removed = state.services.policy.remove_gate(&directory)?;
    Ok(Json(GateRemoved { directory, removed }))
}

async fn handle_resolve_gate(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ResolveQuery>,
) -> ApiResult<Json<GateResolution>> {
    let path = validate_path(&query.path)?;
    let gate = state.services.policy.gate_for(&path);
    Ok(Json(GateResolution {
        mode: gate.as_ref().map(|g| g.mode).unwrap_or(GateMode::ReadWrite),
        gate,
        path,
    }))
}

// ============ POST /reindex ============

#[derive(Deserialize)]
struct ReindexBody {
    path: String,
}

#[derive(Serialize)]
struct ReindexResponse {
    path: String,
    outcome: &'static str,
    chunks: usize,
}

async fn handle_reindex(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ReindexBody>,
) -> ApiResult<Json<ReindexResponse>> {
    let path = validate_path(&body.path)?;
    let services = &state.services;

    if services.policy.is_ignored(&path) {
        return Err(Error::Ignored { path }.into());
    }
    if stamp_of(&state, &path).is_none() && !services.registry.contains(&path) {
        return Err(Error::not_found("file", path).into());
    }

    let (outcome, chunks) = match services.indexer.process(&path).await? {
        PassOutcome::Indexed { chunks } => ("indexed", chunks),
        PassOutcome::Removed => ("removed", 0),
        PassOutcome::Ignored => return Err(Error::Ignored { path }.into()),
        PassOutcome::Unsupported => return Err(Error::UnsupportedFileType { path }.into()),
    };
    Ok(Json(ReindexResponse {
        path,
        outcome,
        chunks,
    }))
}

// ============ GET /registry/stats ============

async fn handle_stats(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.services.registry.stats(&state.services.policy))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    documents: usize,
    persistence_ok: bool,
    watcher: Option<WatcherStatus>,
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let persistence_ok = state.services.persistence_healthy();
    let (status_code, status) = if persistence_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            documents: state.services.registry.len(),
            persistence_ok,
            watcher: state.watcher.as_ref().map(|w| w.status()),
        }),
    )
}
