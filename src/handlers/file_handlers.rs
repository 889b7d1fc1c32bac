//! HTTP handlers for file uploads, upload tokens, search and registration.
//! Payloads are staged to a temp file before the service transfers them.

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Multipart, State, rejection::JsonRejection},
};
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use tempfile::TempPath;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::{
    errors::AppError,
    models::{
        file::{FileView, NewFile},
        page::{PageResult, SearchFileParam, SearchFilePageParam},
        rest_result::RestResult,
        upload::{UploadForm, UploadRequest, UploadToken, parse_flag},
    },
    services::{file_service::FileService, key_generator::extension},
};

/// Body of `POST /v1/files/upload/base64`.
#[derive(Debug, Deserialize)]
pub struct Base64Upload {
    #[serde(flatten)]
    pub form: UploadForm,
    /// Payload as standard base64, optionally as a `data:` URL.
    pub data: String,
}

/// `POST /v1/files/search`
pub async fn search_files(
    State(service): State<FileService>,
    payload: Result<Json<SearchFileParam>, JsonRejection>,
) -> Result<RestResult<Vec<FileView>>, AppError> {
    let Json(param) = payload?;
    Ok(RestResult::ok(service.search_files(&param).await?))
}

/// `POST /v1/files/search/page`
pub async fn search_files_page(
    State(service): State<FileService>,
    payload: Result<Json<SearchFilePageParam>, JsonRejection>,
) -> Result<RestResult<PageResult<FileView>>, AppError> {
    let Json(param) = payload?;
    Ok(RestResult::ok(service.search_files_page(&param).await?))
}

/// `POST /v1/files/upload/token`
pub async fn upload_token(
    State(service): State<FileService>,
    payload: Result<Json<UploadForm>, JsonRejection>,
) -> Result<RestResult<UploadToken>, AppError> {
    let Json(form) = payload?;
    let token = service.issue_upload_token(UploadRequest::from(form)).await?;
    Ok(RestResult::ok(token))
}

/// `POST /v1/files/upload` (multipart)
///
/// The `file` part is streamed to a staging file; every other part is read
/// as text and bound onto [`UploadForm`]. `processParams` is a JSON string.
pub async fn upload_file(
    State(service): State<FileService>,
    mut multipart: Multipart,
) -> Result<RestResult<FileView>, AppError> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut staged: Option<(TempPath, Option<String>, i64)> = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().map(str::to_string);
            let path = service.stage()?;
            let mut out = fs::File::create(&path).await.map_err(AppError::internal)?;
            let mut size: i64 = 0;
            while let Some(chunk) = field.chunk().await? {
                size += chunk.len() as i64;
                out.write_all(&chunk).await.map_err(AppError::internal)?;
            }
            out.flush().await.map_err(AppError::internal)?;
            debug!(size, file_name = ?file_name, "staged multipart payload");
            staged = Some((path, file_name, size));
        } else {
            fields.insert(name, field.text().await?);
        }
    }

    let Some((path, file_name, size)) = staged else {
        return Err(AppError::bad_request("file is required"));
    };
    if size == 0 {
        return Err(AppError::bad_request("file is empty"));
    }

    let mut form = form_from_fields(fields)?;
    if form.source_file.is_empty() {
        form.source_file = file_name.unwrap_or_default();
    }
    fill_source_descriptors(&mut form, size);

    let view = service.upload_file(UploadRequest::from(form), path).await?;
    Ok(RestResult::ok(view))
}

/// `POST /v1/files/upload/base64`
pub async fn upload_base64(
    State(service): State<FileService>,
    payload: Result<Json<Base64Upload>, JsonRejection>,
) -> Result<RestResult<FileView>, AppError> {
    let Json(Base64Upload { mut form, data }) = payload?;

    let encoded = match data.split_once(',') {
        Some((header, body)) if header.starts_with("data:") => body,
        _ => data.as_str(),
    };
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| AppError::bad_request(format!("data is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request("file is empty"));
    }

    let path = service.stage()?;
    fs::write(&path, &bytes).await.map_err(AppError::internal)?;
    fill_source_descriptors(&mut form, bytes.len() as i64);

    let view = service.upload_file(UploadRequest::from(form), path).await?;
    Ok(RestResult::ok(view))
}

/// `POST /v1/files`
pub async fn create_file(
    State(service): State<FileService>,
    payload: Result<Json<NewFile>, JsonRejection>,
) -> Result<RestResult<FileView>, AppError> {
    let Json(file) = payload?;
    Ok(RestResult::ok(service.create_file(file).await?))
}

/// `POST /v1/files/batch`
pub async fn create_files(
    State(service): State<FileService>,
    payload: Result<Json<Vec<NewFile>>, JsonRejection>,
) -> Result<RestResult<Vec<FileView>>, AppError> {
    let Json(files) = payload?;
    Ok(RestResult::ok(service.create_files(files).await))
}

/// Bind text multipart fields onto an [`UploadForm`].
fn form_from_fields(mut fields: HashMap<String, String>) -> Result<UploadForm, AppError> {
    let mut take = |name: &str| fields.remove(name).unwrap_or_default();
    let number = |name: &str, raw: String| -> Result<i64, AppError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse()
            .map_err(|_| AppError::bad_request(format!("{name} must be an integer")))
    };

    let process_params = match take("processParams").trim() {
        "" => Vec::new(),
        raw => serde_json::from_str(raw)
            .map_err(|e| AppError::bad_request(format!("processParams is invalid: {e}")))?,
    };

    Ok(UploadForm {
        bucket: take("bucket"),
        prefix: take("prefix"),
        file_key: take("fileKey"),
        source_file: take("sourceFile"),
        source_file_size: number("sourceFileSize", take("sourceFileSize"))?,
        source_file_type: take("sourceFileType"),
        source_file_attr: take("sourceFileAttr"),
        use_source_filename: parse_flag(&take("useSourceFilename")),
        expired_in_sec: number("expiredInSec", take("expiredInSec"))?,
        process_params,
    })
}

/// Default the size to the staged length and the type to the source
/// extension without its dot.
fn fill_source_descriptors(form: &mut UploadForm, staged_size: i64) {
    if form.source_file_size <= 0 {
        form.source_file_size = staged_size;
    }
    if form.source_file_type.is_empty() {
        form.source_file_type = extension(&form.source_file)
            .trim_start_matches('.')
            .to_string();
    }
}
