//! JSON envelope wrapped around every successful API response.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// `{status, code, data}` success envelope.
#[derive(Serialize, Debug)]
pub struct RestResult<T> {
    pub status: u16,
    pub code: String,
    pub data: T,
}

impl<T: Serialize> RestResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK.as_u16(),
            code: StatusCode::OK.as_u16().to_string(),
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for RestResult<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
