//! Defines routes for the file service API.
//!
//! ## Structure
//! - **Health**
//!   - `GET /healthz`, `GET /readyz`, `GET /system/version`
//!
//! - **Accounts ("apps")**
//!   - `POST   /v1/apps/search/page`: paged listing
//!   - `POST   /v1/apps`: create
//!   - `PUT    /v1/apps/{id}`: update changed columns
//!   - `DELETE /v1/apps/{id}`: soft delete
//!
//! - **Buckets**: same shape under `/v1/buckets`.
//!
//! - **Files**
//!   - `POST /v1/files/search`, `POST /v1/files/search/page`
//!   - `POST /v1/files/upload` (multipart), `POST /v1/files/upload/base64`
//!   - `POST /v1/files/upload/token`: browser direct-upload credential
//!   - `POST /v1/files`, `POST /v1/files/batch`: register stored objects
//!
//! Handler panics are caught and answered with the 500 error envelope.

use crate::{
    errors::panic_response,
    handlers::{
        account_handlers::{create_account, delete_account, search_accounts, update_account},
        bucket_handlers::{create_bucket, delete_bucket, search_buckets, update_bucket},
        file_handlers::{
            create_file, create_files, search_files, search_files_page, upload_base64,
            upload_file, upload_token,
        },
        health_handlers::{healthz, readyz, version},
    },
    services::file_service::FileService,
};
use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::catch_panic::CatchPanicLayer;

/// Build and return the router for the whole API.
///
/// The router carries shared state (`FileService`) to all handlers.
pub fn routes() -> Router<FileService> {
    recover(api())
}

/// Turn panics inside `router` into the 500 error envelope.
pub fn recover<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(CatchPanicLayer::custom(panic_response))
}

fn api() -> Router<FileService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/system/version", get(version))
        // accounts
        .route("/v1/apps/search/page", post(search_accounts))
        .route("/v1/apps", post(create_account))
        .route("/v1/apps/{id}", put(update_account).delete(delete_account))
        // buckets
        .route("/v1/buckets/search/page", post(search_buckets))
        .route("/v1/buckets", post(create_bucket))
        .route("/v1/buckets/{id}", put(update_bucket).delete(delete_bucket))
        // files
        .route("/v1/files/search", post(search_files))
        .route("/v1/files/search/page", post(search_files_page))
        .route("/v1/files/upload", post(upload_file))
        .route("/v1/files/upload/base64", post(upload_base64))
        .route("/v1/files/upload/token", post(upload_token))
        .route("/v1/files", post(create_file))
        .route("/v1/files/batch", post(create_files))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    async fn explode() -> &'static str {
        panic!("handler blew up")
    }

    #[tokio::test]
    async fn panicking_handler_answers_with_error_envelope() {
        let app = recover(Router::new().route("/explode", get(explode)));

        let response = app
            .oneshot(Request::builder().uri("/explode").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body: Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(body["status"], 500);
        assert_eq!(body["code"], "500");
        assert_eq!(body["message"], "internal server error");
    }
}
