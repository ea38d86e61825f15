//! Frontend bundle fallback.
//!
//! Every path no API route claims is looked up in the built UI
//! directory. Unknown paths get `index.html` so client-side routing
//! works; API-looking paths get a plain 404 instead.

use std::path::Path;

use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::ApiState;

/// Served while the UI bundle has not been built.
pub const FRONTEND_MISSING: &str =
    "Frontend build not found. Run `npm install && npm run build` inside frontend/health-ui.";

/// Content type for a bundle file, by extension.
fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json" | "map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Paths that belong to the API and must never fall through to the UI.
fn is_reserved(path: &str) -> bool {
    path == "api" || path.starts_with("api/") || path == "metrics"
}

async fn serve_file(path: &Path) -> Response {
    match tokio::fs::read(path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type_for(path))],
            bytes,
        )
            .into_response(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "frontend file unavailable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Fallback handler for every unmatched GET.
pub async fn serve_frontend(State(state): State<ApiState>, uri: Uri) -> impl IntoResponse {
    let path = uri.path().trim_start_matches('/');
    if is_reserved(path) || path.contains("..") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let dist = state.frontend_dist.as_path();
    let dist_exists = tokio::fs::metadata(dist)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !dist_exists {
        error!(%path, dist = %dist.display(), "frontend build directory is missing");
        return (StatusCode::SERVICE_UNAVAILABLE, FRONTEND_MISSING).into_response();
    }

    if !path.is_empty() {
        let requested = dist.join(path);
        if is_file(&requested).await {
            return serve_file(&requested).await;
        }
    }
    serve_file(&dist.join("index.html")).await
}
