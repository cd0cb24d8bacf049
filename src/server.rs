//! HTTP surface for the chat and grading integration points. Front-end UI
//! and third-party adapters are out of scope; this only implements the
//! request/response contract they bind to.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::A2rchiError;
use crate::facade::A2rchi;
use crate::pipelines::HistoryTurn;

#[derive(Clone)]
pub struct AppState {
    pub a2rchi: Arc<A2rchi>,
    /// Maps a conversation id to the client identity allowed to read it,
    /// per the conversation-ownership invariant in the concurrency model.
    pub conversation_owners: Arc<tokio::sync::RwLock<std::collections::HashMap<String, String>>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Debug)]
pub struct AppError(A2rchiError);

impl From<A2rchiError> for AppError {
    fn from(err: A2rchiError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub client_id: String,
    /// Omitted to start a new conversation; the server mints one.
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub question: String,
    #[serde(default)]
    pub history: Vec<(String, String)>,
    /// Unix epoch milliseconds at which the client sent this request.
    pub client_sent_ts: u64,
    /// Client-declared budget in milliseconds, measured from `client_sent_ts`.
    /// If `server_received_ts - client_sent_ts` already exceeds this, the
    /// request is rejected before the LLM is ever invoked, rather than after
    /// paying for a call the client has already given up on.
    pub client_timeout_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub answer: String,
    pub metadata: std::collections::BTreeMap<String, String>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Result<Json<ChatResponse>, AppError> {
    let server_received_ts = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let elapsed_ms = server_received_ts.saturating_sub(request.client_sent_ts);
    if elapsed_ms > request.client_timeout_ms {
        return Err(A2rchiError::DeadlineExceeded {
            elapsed_ms,
            client_timeout_ms: request.client_timeout_ms,
        }
        .into());
    }

    let conversation_id = request.conversation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    {
        let mut owners = state.conversation_owners.write().await;
        match owners.get(&conversation_id) {
            Some(owner) if owner != &request.client_id => {
                return Err(A2rchiError::ConversationAccess {
                    client_id: request.client_id,
                    conversation_id,
                }
                .into());
            }
            Some(_) => {}
            None => {
                owners.insert(conversation_id.clone(), request.client_id.clone());
            }
        }
    }

    let active = state.a2rchi.active_pipeline().await;
    let history: Vec<HistoryTurn> = request.history;
    let output = state
        .a2rchi
        .invoke(&request.question, &history)
        .await
        .map_err(|e| {
            AppError(A2rchiError::Pipeline {
                pipeline: active,
                reason: e.to_string(),
            })
        })?;

    Ok(Json(ChatResponse {
        conversation_id,
        answer: output.answer,
        metadata: output.metadata,
    }))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_serializes_message() {
        let err = AppError(A2rchiError::Config("bad config".to_string()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn conversation_access_error_maps_to_403() {
        let err = A2rchiError::ConversationAccess {
            client_id: "a".to_string(),
            conversation_id: "b".to_string(),
        };
        assert_eq!(err.status_code(), 403);
    }

    use crate::facade::{A2rchi, VectorstoreConnector};
    use crate::llm::EchoAdapter;
    use crate::pipelines::image::{ImageProcessingPipeline, TextOnlyMultimodalAdapter};
    use crate::pipelines::BasePipeline;
    use crate::vectorstore::VectorCollection;
    use anyhow::Result as AnyResult;
    use std::collections::{BTreeSet, HashMap};

    struct EmptyCollection;
    impl VectorCollection for EmptyCollection {
        fn get_ids(&self) -> AnyResult<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }
        fn add(&self, _: Vec<crate::vectorstore::VectorDocument>) -> AnyResult<()> {
            Ok(())
        }
        fn delete_by_hash(&self, _: &str) -> AnyResult<()> {
            Ok(())
        }
        fn count(&self) -> AnyResult<usize> {
            Ok(0)
        }
        fn similarity_search_with_score(&self, _: &[f32], _: usize) -> AnyResult<Vec<crate::vectorstore::ScoredDocument>> {
            Ok(vec![])
        }
        fn get_all_documents(&self) -> AnyResult<Vec<crate::vectorstore::ScoredDocument>> {
            Ok(vec![])
        }
    }

    struct StubConnector;
    impl VectorstoreConnector for StubConnector {
        fn connect(&self) -> AnyResult<Arc<dyn VectorCollection>> {
            Ok(Arc::new(EmptyCollection))
        }
    }

    fn make_state() -> AppState {
        let mut pipelines: HashMap<String, Box<dyn BasePipeline>> = HashMap::new();
        pipelines.insert(
            "image".to_string(),
            Box::new(ImageProcessingPipeline::new(Arc::new(TextOnlyMultimodalAdapter::new(Arc::new(EchoAdapter))))),
        );
        AppState {
            a2rchi: Arc::new(A2rchi::new(pipelines, Arc::new(StubConnector), "image")),
            conversation_owners: Arc::new(tokio::sync::RwLock::new(std::collections::HashMap::new())),
        }
    }

    fn now_ms() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }

    #[tokio::test]
    async fn already_expired_deadline_is_rejected_with_408() {
        let state = make_state();
        let request = ChatRequest {
            client_id: "c1".to_string(),
            conversation_id: Some("conv1".to_string()),
            question: "hi".to_string(),
            history: vec![],
            client_sent_ts: now_ms().saturating_sub(5_000),
            client_timeout_ms: 100,
        };
        let result = chat(State(state), Json(request)).await;
        assert!(result.is_err());
        let status = result.err().unwrap().into_response().status();
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn missing_conversation_id_is_minted() {
        let state = make_state();
        let request = ChatRequest {
            client_id: "c1".to_string(),
            conversation_id: None,
            question: "hi".to_string(),
            history: vec![],
            client_sent_ts: now_ms(),
            client_timeout_ms: 60_000,
        };
        let response = chat(State(state), Json(request)).await.unwrap();
        assert!(!response.0.conversation_id.is_empty());
    }

    #[tokio::test]
    async fn second_client_is_rejected_from_existing_conversation() {
        let state = make_state();
        let first = ChatRequest {
            client_id: "c1".to_string(),
            conversation_id: Some("conv1".to_string()),
            question: "hi".to_string(),
            history: vec![],
            client_sent_ts: now_ms(),
            client_timeout_ms: 60_000,
        };
        assert!(chat(State(state.clone()), Json(first)).await.is_ok());

        let second = ChatRequest {
            client_id: "c2".to_string(),
            conversation_id: Some("conv1".to_string()),
            question: "hi again".to_string(),
            history: vec![],
            client_sent_ts: now_ms(),
            client_timeout_ms: 60_000,
        };
        assert!(chat(State(state), Json(second)).await.is_err());
    }
}
