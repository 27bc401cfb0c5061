//! In-process S3-style object server
//!
//! Serves `PUT` and `GET` on `/{bucket}/{*key}` from memory, keeping the
//! `Content-Type` and `x-amz-meta-*` headers of every object.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Clone)]
struct StoredObject {
    body: Bytes,
    headers: HeaderMap,
}

#[derive(Clone, Default)]
struct ObjectServerState {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    authorizations: Arc<Mutex<Vec<String>>>,
}

impl ObjectServerState {
    fn record_auth(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get(header::AUTHORIZATION) {
            self.authorizations
                .lock()
                .unwrap()
                .push(value.to_str().unwrap().to_string());
        }
    }
}

async fn put_object(
    State(state): State<ObjectServerState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.record_auth(&headers);

    let mut kept = HeaderMap::new();
    for (name, value) in headers.iter() {
        if name == header::CONTENT_TYPE || name.as_str().starts_with("x-amz-meta-") {
            kept.insert(name.clone(), value.clone());
        }
    }

    state.objects.lock().unwrap().insert(
        format!("{}/{}", bucket, key),
        StoredObject {
            body,
            headers: kept,
        },
    );
    StatusCode::OK
}

async fn get_object(
    State(state): State<ObjectServerState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    state.record_auth(&headers);

    let object = state
        .objects
        .lock()
        .unwrap()
        .get(&format!("{}/{}", bucket, key))
        .cloned();
    match object {
        Some(object) => (StatusCode::OK, object.headers, object.body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Object server bound to a random local port.
///
/// When dropped, the server shuts down.
pub struct ObjectServer {
    /// Base URL for the blob store (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    state: ObjectServerState,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ObjectServer {
    pub async fn spawn() -> Self {
        let state = ObjectServerState::default();
        let app = Router::new()
            .route("/{bucket}/{*key}", put(put_object).get(get_object))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Object server failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Keys stored so far, as `<bucket>/<key>`, sorted.
    pub fn object_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Raw `Authorization` headers seen so far.
    pub fn authorizations(&self) -> Vec<String> {
        self.state.authorizations.lock().unwrap().clone()
    }

    /// Store an object directly, bypassing HTTP.
    pub fn insert(&self, bucket_key: &str, body: &[u8], content_type: &str) {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).unwrap(),
        );
        headers.insert(
            HeaderName::from_static("x-amz-meta-filename"),
            HeaderValue::from_str(bucket_key.rsplit('/').next().unwrap()).unwrap(),
        );
        self.state.objects.lock().unwrap().insert(
            bucket_key.to_string(),
            StoredObject {
                body: Bytes::copy_from_slice(body),
                headers,
            },
        );
    }
}
