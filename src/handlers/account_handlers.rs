//! HTTP handlers for storage accounts ("apps").

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};

use crate::{
    errors::AppError,
    models::{
        account::{Account, AccountInput},
        page::{PageParam, PageResult},
        rest_result::RestResult,
    },
    services::file_service::FileService,
};

/// `POST /v1/apps/search/page`
pub async fn search_accounts(
    State(service): State<FileService>,
    payload: Result<Json<PageParam>, JsonRejection>,
) -> Result<RestResult<PageResult<Account>>, AppError> {
    let Json(page) = payload?;
    Ok(RestResult::ok(service.search_accounts(&page).await?))
}

/// `POST /v1/apps`
pub async fn create_account(
    State(service): State<FileService>,
    payload: Result<Json<AccountInput>, JsonRejection>,
) -> Result<RestResult<Account>, AppError> {
    let Json(input) = payload?;
    Ok(RestResult::ok(service.create_account(input).await?))
}

/// `PUT /v1/apps/{id}`
pub async fn update_account(
    State(service): State<FileService>,
    Path(id): Path<i64>,
    payload: Result<Json<AccountInput>, JsonRejection>,
) -> Result<RestResult<Account>, AppError> {
    let Json(input) = payload?;
    Ok(RestResult::ok(service.update_account(id, input).await?))
}

/// `DELETE /v1/apps/{id}`, answering whether a live account was deleted.
pub async fn delete_account(
    State(service): State<FileService>,
    Path(id): Path<i64>,
) -> Result<RestResult<bool>, AppError> {
    Ok(RestResult::ok(service.delete_account(id).await?))
}
