//! Maps core errors onto HTTP responses with a JSON `{"error": ...}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use batwatch_core::BatwatchError;

#[derive(Debug)]
pub struct ApiError(pub BatwatchError);

impl From<BatwatchError> for ApiError {
    fn from(e: BatwatchError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BatwatchError::NotFound(_) => StatusCode::NOT_FOUND,
            BatwatchError::Conflict(_) | BatwatchError::Busy(_) => StatusCode::CONFLICT,
            BatwatchError::Invalid(_) => StatusCode::BAD_REQUEST,
            BatwatchError::Transition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BatwatchError::Http(_) | BatwatchError::Api(..) => StatusCode::BAD_GATEWAY,
            BatwatchError::Store(_) | BatwatchError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self.0);
        } else {
            tracing::debug!("request rejected: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
