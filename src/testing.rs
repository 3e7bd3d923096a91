//! Local stand-in for the Graph API used by the unit tests.

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::{Json, Router};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

struct StubState {
    status: StatusCode,
    reply: Value,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Answers every request with a fixed status and JSON body and records
/// what it received.
pub struct GraphStub {
    pub base_url: String,
    state: Arc<StubState>,
}

impl GraphStub {
    pub async fn start(status: StatusCode, reply: Value) -> Self {
        let state = Arc::new(StubState {
            status,
            reply,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new().fallback(record).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}/", addr),
            state,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn record(
    State(state): State<Arc<StubState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);

    state.requests.lock().unwrap().push(RecordedRequest {
        path: uri.path().to_string(),
        authorization,
        body,
    });

    (state.status, Json(state.reply.clone()))
}
