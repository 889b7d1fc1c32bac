//! HTTP handlers for buckets.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};

use crate::{
    errors::AppError,
    models::{
        bucket::{BucketInput, BucketView},
        page::{PageParam, PageResult},
        rest_result::RestResult,
    },
    services::file_service::FileService,
};

/// `POST /v1/buckets/search/page`
pub async fn search_buckets(
    State(service): State<FileService>,
    payload: Result<Json<PageParam>, JsonRejection>,
) -> Result<RestResult<PageResult<BucketView>>, AppError> {
    let Json(page) = payload?;
    Ok(RestResult::ok(service.search_buckets(&page).await?))
}

/// `POST /v1/buckets`
pub async fn create_bucket(
    State(service): State<FileService>,
    payload: Result<Json<BucketInput>, JsonRejection>,
) -> Result<RestResult<BucketView>, AppError> {
    let Json(input) = payload?;
    Ok(RestResult::ok(service.create_bucket(input).await?))
}

/// `PUT /v1/buckets/{id}`
pub async fn update_bucket(
    State(service): State<FileService>,
    Path(id): Path<i64>,
    payload: Result<Json<BucketInput>, JsonRejection>,
) -> Result<RestResult<BucketView>, AppError> {
    let Json(input) = payload?;
    Ok(RestResult::ok(service.update_bucket(id, input).await?))
}

/// `DELETE /v1/buckets/{id}`
pub async fn delete_bucket(
    State(service): State<FileService>,
    Path(id): Path<i64>,
) -> Result<RestResult<bool>, AppError> {
    Ok(RestResult::ok(service.delete_bucket(id).await?))
}
