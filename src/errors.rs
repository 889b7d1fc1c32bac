use axum::{
    Json,
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{any::Any, fmt};
use tracing::error;

use crate::services::file_service::FileServiceError;

/// Error returned by handlers, rendered as the `{status, code, message}`
/// envelope with the matching HTTP status.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Log `detail` and answer with a generic 500.
    pub fn internal(detail: impl fmt::Display) -> Self {
        error!(error = %detail, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": self.status.as_u16(),
            "code": self.status.as_u16().to_string(),
            "message": self.message,
        }));

        (self.status, body).into_response()
    }
}

impl From<FileServiceError> for AppError {
    fn from(err: FileServiceError) -> Self {
        match err {
            FileServiceError::BucketNotFound(_) | FileServiceError::AccountNotFound(_) => {
                AppError::not_found(err.to_string())
            }
            FileServiceError::Validation(msg) => AppError::bad_request(msg),
            FileServiceError::Conflict(msg) => AppError::new(StatusCode::CONFLICT, msg),
            FileServiceError::Client(_) | FileServiceError::Transfer { .. } => {
                error!(error = %err, "storage backend failure");
                AppError::new(StatusCode::BAD_GATEWAY, "storage backend unavailable")
            }
            FileServiceError::Signing(_) | FileServiceError::Sqlx(_) | FileServiceError::Io(_) => {
                AppError::internal(err)
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::new(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err)
    }
}

/// Render a handler panic as the generic 500 envelope.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else if let Some(msg) = panic.downcast_ref::<&str>() {
        *msg
    } else {
        "non-string panic payload"
    };
    AppError::internal(format!("handler panicked: {detail}")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage_client::StorageError;
    use http_body_util::BodyExt;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        render_response(err.into_response()).await
    }

    async fn render_response(response: Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[test]
    fn service_errors_map_to_statuses() {
        let cases = [
            (
                FileServiceError::BucketNotFound("x".into()),
                StatusCode::NOT_FOUND,
            ),
            (FileServiceError::AccountNotFound(1), StatusCode::NOT_FOUND),
            (
                FileServiceError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                FileServiceError::Conflict("dup".into()),
                StatusCode::CONFLICT,
            ),
            (
                FileServiceError::Transfer {
                    attempts: 4,
                    source: StorageError::Transfer("boom".into()),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                FileServiceError::Sqlx(sqlx::Error::PoolClosed),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status, expected);
        }
    }

    #[tokio::test]
    async fn panics_render_generic_envelope() {
        let (status, body) = render_response(panic_response(Box::new("index out of bounds"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "internal server error");

        let (status, _) = render_response(panic_response(Box::new(42_u8))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let (status, body) =
            render(AppError::from(FileServiceError::Sqlx(sqlx::Error::PoolClosed))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "internal server error");
        assert_eq!(body["status"], 500);
        assert_eq!(body["code"], "500");
    }
}
