use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ide_orchestrator::OrchestratorError;
use serde_json::json;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Orchestrator(OrchestratorError),
}

impl ApiError {
    fn status_and_category(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::Orchestrator(err) => {
                let category = err.category();
                let status = match category {
                    "validation" => StatusCode::BAD_REQUEST,
                    "policy_violation" => StatusCode::FORBIDDEN,
                    "not_found" => StatusCode::NOT_FOUND,
                    "external_api" | "partial_provision" => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, category)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, category) = self.status_and_category();
        let message = match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) | ApiError::Forbidden(msg) => msg,
            ApiError::Orchestrator(err) => {
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = %err, "Request failed");
                }
                err.to_string()
            }
        };

        (
            status,
            Json(json!({ "error": message, "category": category })),
        )
            .into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}
