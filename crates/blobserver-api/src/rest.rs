//! HTTP handlers

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use blobserver_core::BlobId;
use blobserver_store::BlobCache;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::{services::ServeFile, trace::TraceLayer};
use tracing::{debug, error, info};

/// Application state shared across handlers
pub struct AppState {
    pub cache: Arc<BlobCache>,
}

/// Create the HTTP router
///
/// Only single-segment paths are routed; everything else is a 404 and any
/// method other than GET on a blob path is a 405.
pub fn create_router(cache: Arc<BlobCache>) -> Router {
    let state = Arc::new(AppState { cache });

    Router::new()
        .route("/:blob", get(get_blob))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve a blob, resolving it first if it is not cached locally
///
/// The response carries no detail about failures; those only go to the log.
async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path(blob): Path<String>,
    request: Request,
) -> Response {
    // axum routes HEAD to GET handlers
    if request.method() != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
    }

    let id = match BlobId::parse(blob) {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "Rejecting blob path");
            return (StatusCode::NOT_FOUND, "not found").into_response();
        }
    };

    let handle = match state.cache.get_blob(&id).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(blob = %id, error = %e, "Error getting blob");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response();
        }
    };

    let size = handle.size().await.ok();
    info!(blob = %id, path = %handle.path.display(), tier = %handle.tier, size = ?size, "Serving blob");

    match ServeFile::new(&handle.path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(infallible) => match infallible {},
    }
}
