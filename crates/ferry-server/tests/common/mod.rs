//! Server test utilities.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use ferry_server::config::Config;
use ferry_server::routes::AppState;
use ferry_server::session::SessionRegistry;
use ferry_server::storage::ChunkStore;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "ferrytestboundary";

/// A test server over temporary storage.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server, letting the caller tweak the config first.
    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = Config {
            staging_dir: temp_dir.path().join("staging"),
            download_dir: temp_dir.path().join("downloads"),
            ..Config::default()
        };
        adjust(&mut config);
        let config = Arc::new(config);

        let store = Arc::new(
            ChunkStore::new(config.staging_dir.clone(), config.download_dir.clone())
                .await
                .expect("Failed to create chunk store"),
        );
        let registry = Arc::new(SessionRegistry::new(config.max_sessions));

        let state = AppState {
            registry,
            store,
            config,
        };
        let router = ferry_server::create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Send a JSON (or empty-body) request, returning status + parsed body.
    pub async fn json_request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Init an upload session, returning its id.
    pub async fn init_upload(&self, filename: &str, filesize: u64) -> String {
        let (status, body) = self
            .json_request(
                "POST",
                "/api/upload/init",
                Some(serde_json::json!({ "filename": filename, "filesize": filesize })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "init failed: {body}");
        body["upload_id"].as_str().expect("upload_id").to_string()
    }

    /// Upload one chunk through the multipart endpoint.
    pub async fn upload_chunk(
        &self,
        upload_id: &str,
        index: u32,
        total: u32,
        payload: &[u8],
    ) -> (StatusCode, Value) {
        let body = multipart_body(&[
            ("upload_id", upload_id.as_bytes(), false),
            ("chunk_index", index.to_string().as_bytes(), false),
            ("total_chunks", total.to_string().as_bytes(), false),
            ("chunk", payload, true),
        ]);

        let request = Request::builder()
            .method("POST")
            .uri("/api/upload/chunk")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Finalize an upload session.
    pub async fn complete_upload(&self, upload_id: &str) -> (StatusCode, Value) {
        self.json_request(
            "POST",
            "/api/upload/complete",
            Some(serde_json::json!({ "upload_id": upload_id })),
        )
        .await
    }

    /// Fetch an artifact, optionally with a `Range` header. Returns status,
    /// response headers, and the raw body bytes.
    pub async fn download(
        &self,
        name: &str,
        range: Option<&str>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut builder = Request::builder()
            .method("GET")
            .uri(format!("/api/download/{name}"));
        if let Some(r) = range {
            builder = builder.header(header::RANGE, r);
        }

        let response = self
            .router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, bytes.to_vec())
    }
}

/// Hand-rolled multipart/form-data body; `file` fields get a filename and an
/// octet-stream content type, text fields are bare.
fn multipart_body(fields: &[(&str, &[u8], bool)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value, is_file) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        if *is_file {
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"blob\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
        } else {
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
        }
        body.extend_from_slice(value);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
