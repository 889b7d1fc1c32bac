//! Health, readiness and version handlers.
//!
//! - GET /healthz         -> simple liveness ("ok")
//! - GET /readyz          -> checks DB connectivity and the staging directory
//! - GET /system/version  -> package name and version

use crate::{models::rest_result::RestResult, services::file_service::FileService};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness check. Always 200 and never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness check that:
/// 1. Runs `SELECT 1` against SQLite.
/// 2. Writes, reads back and removes a scratch file in the staging directory,
///    since every upload is staged there before transfer.
///
/// HTTP 200 when all checks pass, 503 otherwise.
pub async fn readyz(State(service): State<FileService>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.repo.db)
        .await
    {
        Ok(1) => (true, None::<String>),
        Ok(v) => (false, Some(format!("unexpected result: {}", v))),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    let scratch = service.temp_dir.join(format!(".readyz-{}", Uuid::new_v4()));
    let staging_check = match fs::write(&scratch, b"readyz").await {
        Ok(_) => {
            let read_back = fs::read(&scratch).await;
            let removed = fs::remove_file(&scratch).await;
            match (read_back, removed) {
                (Ok(bytes), Ok(_)) if bytes == b"readyz" => (true, None),
                (Ok(bytes), Err(e)) if bytes == b"readyz" => {
                    (true, Some(format!("could not remove scratch file: {}", e)))
                }
                (Ok(_), _) => (false, Some("scratch file content mismatch".to_string())),
                (Err(e), _) => (false, Some(format!("could not read scratch file: {}", e))),
            }
        }
        Err(e) => (false, Some(format!("could not write scratch file: {}", e))),
    };

    let overall_ok = sqlite_check.0 && staging_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "sqlite",
        CheckStatus {
            ok: sqlite_check.0,
            error: sqlite_check.1,
        },
    );
    checks.insert(
        "staging",
        CheckStatus {
            ok: staging_check.0,
            error: staging_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// `GET /system/version`
pub async fn version() -> RestResult<VersionResponse> {
    RestResult::ok(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct VersionResponse {
    name: &'static str,
    version: &'static str,
}
