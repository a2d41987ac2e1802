use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use schema::ValidationErrors;
use serde::Serialize;
use thiserror::Error;

use crate::storage::StorageError;

/// Every way a handler can fail. The response body is always
/// `{"message": ...}`, plus `errors` for validation failures.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid data: {0}")]
    Validation(ValidationErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    /// Static client-facing message; the cause is logged where it happened.
    #[error("{0}")]
    Internal(&'static str),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<ValidationErrors>,
}

impl ApiError {
    /// Maps a storage failure for a route whose generic failure message is
    /// `message`. Missing references and conflicts keep their meaning, any
    /// other cause is logged and hidden behind `message`.
    pub fn from_storage(message: &'static str) -> impl FnOnce(StorageError) -> ApiError {
        move |err| match err {
            StorageError::NotFound(entity) => ApiError::NotFound(entity),
            StorageError::Conflict(msg) => ApiError::Conflict(msg),
            other => {
                tracing::error!("{}: {}", message, other);
                ApiError::Internal(message)
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(errors)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Validation(errors) => ErrorBody {
                message: "Invalid data".to_string(),
                errors: Some(errors),
            },
            other => ErrorBody {
                message: other.to_string(),
                errors: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::{json, Value};

    async fn body_of(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_lists_field_errors() {
        let (status, body) =
            body_of(ValidationErrors::single("name", "Required").into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({
                "message": "Invalid data",
                "errors": [{ "path": ["name"], "message": "Required" }]
            })
        );
    }

    #[tokio::test]
    async fn not_found_names_the_entity() {
        let (status, body) = body_of(ApiError::NotFound("Song")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "message": "Song not found" }));
    }

    #[tokio::test]
    async fn storage_failures_hide_the_cause() {
        let map = ApiError::from_storage("Failed to fetch songs");
        let err = map(StorageError::Database(sqlx::Error::PoolTimedOut));
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "message": "Failed to fetch songs" }));
    }

    #[test]
    fn storage_conflicts_and_misses_keep_their_status() {
        let conflict = ApiError::from_storage("Failed to create user")(StorageError::Conflict(
            "Username or email already taken".to_string(),
        ));
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let missing = ApiError::from_storage("Failed to like song")(StorageError::NotFound("User"));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.to_string(), "User not found");
    }
}
