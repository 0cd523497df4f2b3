//! Resumable chunked file-transfer server.
//!
//! Clients split a file into indexed chunks and upload them independently —
//! out of order, retried, in parallel. The server stages each chunk on disk,
//! tracks per-session progress in memory, and on completion merges the chunks
//! in index order into a single verified artifact. Downloads honor HTTP
//! `Range` requests so interrupted fetches can resume.

pub mod assemble;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod range;
pub mod routes;
pub mod session;
pub mod storage;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::http::header::{CONTENT_TYPE, RANGE};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use crate::routes::AppState;

/// Build the application router with all API routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS — permissive; browser clients upload from arbitrary origins.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, RANGE])
        .allow_credentials(false);

    // Body limit: one chunk plus multipart framing overhead.
    let body_limit = state.config.chunk_size as usize + 1024 * 1024;

    Router::new()
        .route("/api/upload/init", post(routes::init_upload))
        .route("/api/upload/chunk", post(routes::upload_chunk))
        .route("/api/upload/complete", post(routes::complete_upload))
        .route("/api/upload/status/{upload_id}", get(routes::upload_status))
        .route("/api/list", get(routes::list_files))
        .route("/api/download/{name}", get(routes::download_file))
        .route("/api/delete/{name}", delete(routes::delete_file))
        .route("/api/health", get(routes::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
