//! Axum Handlers for the HTTP surface.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use charla_core::error::ModelError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::state::AppState;

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

pub enum ApiError {
    /// The language model cannot be reached.
    Unavailable(ModelError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unavailable(err) => {
                warn!(error = %err, "Completion service unavailable");
                let message = err.to_string();
                (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        Self::Unavailable(err)
    }
}

/// Reports whether the completion service accepts our credentials.
pub async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ApiError> {
    state.completion.check_connection().await?;
    debug!("Health check passed");
    Ok(Json(HealthResponse { status: "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, router::create_router};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use charla_core::completion::CompletionService;
    use charla_core::session::SessionConfig;
    use std::path::PathBuf;
    use tower::ServiceExt;
    use tracing::Level;

    struct StubCompletion {
        reachable: bool,
    }

    #[async_trait]
    impl CompletionService for StubCompletion {
        async fn get_response(&self, text: &str) -> Result<String, ModelError> {
            Ok(text.to_string())
        }

        async fn check_connection(&self) -> Result<(), ModelError> {
            if self.reachable {
                Ok(())
            } else {
                Err(ModelError::NetworkFailure("connection refused".to_string()))
            }
        }
    }

    fn app(reachable: bool) -> axum::Router {
        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            api_key: "test-key".to_string(),
            base_url: "http://localhost".to_string(),
            chat_model: "test-model".to_string(),
            temperature: 0.7,
            max_tokens: 300,
            max_retries: 1,
            speech_retries: 3,
            persona_name: "Charla".to_string(),
            log_level: Level::INFO,
            prompts_path: PathBuf::from("./prompts"),
        };
        create_router(Arc::new(AppState {
            completion: Arc::new(StubCompletion { reachable }),
            session_config: Arc::new(SessionConfig::default()),
            config: Arc::new(config),
        }))
    }

    async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_ok() {
        let (status, body) = get(app(true), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_health_reports_unreachable_model() {
        let (status, body) = get(app(false), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .contains("connection refused")
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = app(true)
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
