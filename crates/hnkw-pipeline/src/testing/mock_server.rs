//! HTTP mock server for integration testing.
//!
//! Mimics the `/embeddings` and `/chat/completions` endpoints of an
//! OpenAI-compatible API so the real clients can be exercised end to end.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::embedder::MockEmbedder;

#[derive(Default)]
struct MockApiState {
    embedding_requests: Vec<Value>,
    chat_requests: Vec<Value>,
    chat_replies: VecDeque<String>,
    failures: VecDeque<(StatusCode, String)>,
}

struct Shared {
    vectors: MockEmbedder,
    state: Mutex<MockApiState>,
}

impl Shared {
    fn next_failure(&self) -> Option<Response> {
        let (status, message) = self.state.lock().unwrap().failures.pop_front()?;
        let body = json!({"error": {"type": "server_error", "message": message}});
        Some((status, Json(body)).into_response())
    }
}

/// An HTTP mock of the model API.
///
/// Embedding vectors are derived from the input text like [`MockEmbedder`]
/// does, and returned in reverse order with their `index` set. Chat replies
/// are served from a queue.
///
/// # Example
///
/// ```ignore
/// use hnkw_pipeline::testing::MockApiServer;
///
/// let server = MockApiServer::start(8).await;
/// let config = ApiConfig::new("test-model").with_base_url(server.url());
/// let embedder = OpenAiEmbedder::new(config)?;
/// // ...
/// server.shutdown().await;
/// ```
pub struct MockApiServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockApiServer {
    /// Start a mock server on a random port, serving vectors of `dimension` elements.
    pub async fn start(dimension: usize) -> Self {
        let shared = Arc::new(Shared {
            vectors: MockEmbedder::new(dimension),
            state: Mutex::new(MockApiState::default()),
        });

        let app = Router::new()
            .route("/embeddings", post(handle_embeddings))
            .route("/chat/completions", post(handle_chat))
            .with_state(Arc::clone(&shared));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to get local address");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        Self {
            addr,
            shared,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Get the server's base URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The vector the server returns for `input`.
    pub fn vector_for(&self, input: &str) -> Vec<f64> {
        self.shared.vectors.vector_for(input)
    }

    /// Queue a chat completion reply.
    pub fn queue_reply(&self, content: impl Into<String>) {
        self.shared
            .state
            .lock()
            .unwrap()
            .chat_replies
            .push_back(content.into());
    }

    /// Answer the next request, on either endpoint, with an error status.
    pub fn fail_next(&self, status: u16, message: impl Into<String>) {
        let status = StatusCode::from_u16(status).expect("valid status code");
        self.shared
            .state
            .lock()
            .unwrap()
            .failures
            .push_back((status, message.into()));
    }

    /// Bodies of every `/embeddings` request.
    pub fn embedding_requests(&self) -> Vec<Value> {
        self.shared.state.lock().unwrap().embedding_requests.clone()
    }

    /// Bodies of every `/chat/completions` request.
    pub fn chat_requests(&self) -> Vec<Value> {
        self.shared.state.lock().unwrap().chat_requests.clone()
    }

    /// Shutdown the server.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

/// Handle POST /embeddings
async fn handle_embeddings(State(shared): State<Arc<Shared>>, Json(body): Json<Value>) -> Response {
    shared
        .state
        .lock()
        .unwrap()
        .embedding_requests
        .push(body.clone());
    if let Some(failure) = shared.next_failure() {
        return failure;
    }

    let inputs: Vec<String> = match body.get("input").cloned().map(serde_json::from_value) {
        Some(Ok(inputs)) => inputs,
        _ => {
            let body = json!({"error": {"message": "input must be a list of strings"}});
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .rev()
        .map(|(index, input)| {
            json!({
                "object": "embedding",
                "index": index,
                "embedding": shared.vectors.vector_for(input),
            })
        })
        .collect();

    Json(json!({"object": "list", "data": data, "model": body["model"]})).into_response()
}

/// Handle POST /chat/completions
async fn handle_chat(State(shared): State<Arc<Shared>>, Json(body): Json<Value>) -> Response {
    shared.state.lock().unwrap().chat_requests.push(body);
    if let Some(failure) = shared.next_failure() {
        return failure;
    }

    let Some(content) = shared.state.lock().unwrap().chat_replies.pop_front() else {
        let body = json!({"error": {"type": "server_error", "message": "no more responses"}});
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
    };

    Json(json!({
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }],
    }))
    .into_response()
}
