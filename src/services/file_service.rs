//! FileService: uploads, upload tokens, file-record registration and search.
//!
//! Metadata is written before the payload is transferred and is never rolled
//! back, so a failed transfer leaves a File row behind. The staged payload is
//! owned by the call as a [`TempPath`] and removed on every exit path.

use std::{io, path::PathBuf, sync::Arc};

use base64::{Engine as _, engine::general_purpose};
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::json;
use tempfile::TempPath;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::{
    account::Account,
    bucket::Bucket,
    file::{FileRecord, FileView, NewFile},
    page::{PageResult, SearchFileParam, SearchFilePageParam},
    upload::{UploadRequest, UploadToken},
};
use crate::services::{
    client_cache::ClientCache,
    enricher::enrich,
    key_generator::generate_key,
    repository::Repository,
    storage_client::{StorageClient, StorageError, hmac_sha1_base64},
    url_builder::{build_url, effective_expiry},
};

/// Retries after the first transfer attempt.
pub const TRANSFER_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub enum FileServiceError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("account `{0}` not found")]
    AccountNotFound(i64),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("storage client unavailable: {0}")]
    Client(#[source] StorageError),
    #[error("transfer failed after {attempts} attempts: {source}")]
    Transfer {
        attempts: usize,
        #[source]
        source: StorageError,
    },
    #[error("signing failed: {0}")]
    Signing(#[source] StorageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ServiceResult<T> = Result<T, FileServiceError>;

#[derive(Clone)]
pub struct FileService {
    pub repo: Repository,
    pub clients: Arc<ClientCache>,
    /// Directory uploads are staged in before transfer.
    pub temp_dir: PathBuf,
}

/// Bucket, account and client resolved for one request.
struct Target {
    bucket: Bucket,
    account: Account,
    client: Arc<dyn StorageClient>,
}

impl FileService {
    pub fn new(repo: Repository, clients: Arc<ClientCache>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            clients,
            temp_dir: temp_dir.into(),
        }
    }

    /// Reserve an empty staging file under `temp_dir`.
    pub fn stage(&self) -> ServiceResult<TempPath> {
        let file = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&self.temp_dir)?;
        Ok(file.into_temp_path())
    }

    /// Resolve bucket, account and client. Nothing is written.
    async fn resolve_target(&self, bucket_name: &str) -> ServiceResult<Target> {
        if bucket_name.trim().is_empty() {
            return Err(FileServiceError::Validation("bucket is required".into()));
        }

        let bucket = self
            .repo
            .bucket_by_name(bucket_name)
            .await?
            .ok_or_else(|| FileServiceError::BucketNotFound(bucket_name.to_string()))?;
        let account = self
            .repo
            .account_by_id(bucket.account_id)
            .await?
            .ok_or(FileServiceError::AccountNotFound(bucket.account_id))?;
        let client = self
            .clients
            .get_client(&account)
            .map_err(FileServiceError::Client)?;

        Ok(Target {
            bucket,
            account,
            client,
        })
    }

    /// Insert a file row. A live row with the same key in the bucket is a
    /// conflict.
    async fn insert_file(&self, file: &NewFile) -> ServiceResult<FileRecord> {
        match self.repo.insert_file(file).await {
            Ok(record) => Ok(record),
            Err(err)
                if err
                    .as_database_error()
                    .is_some_and(|db| db.is_unique_violation()) =>
            {
                Err(FileServiceError::Conflict(format!(
                    "file `{}` already exists in bucket {}",
                    file.file_key, file.bucket_id
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn insert_record(&self, bucket: &Bucket, req: &UploadRequest) -> ServiceResult<FileRecord> {
        let key = generate_key(req);
        let record = self
            .insert_file(&NewFile {
                bucket_id: bucket.id,
                file_key: key,
                source_file: req.source_file.clone(),
                source_file_size: req.source_file_size,
                source_file_type: req.source_file_type.clone(),
                source_file_attr: req.source_file_attr.clone(),
            })
            .await?;
        info!(file_id = record.id, bucket = %bucket.name, key = %record.file_key, "file record created");
        Ok(record)
    }

    /// Upload the staged `payload` and return the enriched record.
    ///
    /// Bucket, account and client are resolved before anything is written.
    /// The File row is inserted before the first transfer attempt and kept
    /// if every attempt fails.
    pub async fn upload_file(
        &self,
        req: UploadRequest,
        payload: TempPath,
    ) -> ServiceResult<FileView> {
        let target = self.resolve_target(&req.bucket).await?;
        let record = self.insert_record(&target.bucket, &req).await?;

        transfer_with_retry(
            target.client.as_ref(),
            &target.bucket.name,
            &record.file_key,
            &payload,
        )
        .await?;
        drop(payload);

        let url = build_url(
            target.client.as_ref(),
            &target.account,
            &target.bucket,
            &record.file_key,
            req.expired_in_sec,
            &req.process_params,
        );
        let mut view = FileView::from(record);
        view.bucket_name = target.bucket.name.clone();
        view.domain = target.bucket.resolved_domain(&target.account);
        view.url = url;
        Ok(view)
    }

    /// Issue a browser direct-upload credential for a new File row.
    pub async fn issue_upload_token(&self, req: UploadRequest) -> ServiceResult<UploadToken> {
        let expiry = effective_expiry(req.expired_in_sec);
        let expiration = Duration::try_seconds(expiry)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| FileServiceError::Validation("expiredInSec is out of range".into()))?
            .to_rfc3339_opts(SecondsFormat::AutoSi, true);

        let target = self.resolve_target(&req.bucket).await?;
        let record = self.insert_record(&target.bucket, &req).await?;
        let (bucket, account) = (&target.bucket, &target.account);

        let upload_url = if bucket.domain.is_empty() {
            format!("//{}.{}", bucket.name, account.endpoint_host())
        } else {
            format!("//{}", bucket.domain)
        };
        let policy_doc = json!({
            "expiration": expiration,
            "conditions": [
                { "bucket": bucket.name },
                ["eq", "$key", record.file_key],
            ],
        });
        let policy = general_purpose::STANDARD.encode(policy_doc.to_string());
        let signature =
            hmac_sha1_base64(&account.access_key_secret, &policy).map_err(FileServiceError::Signing)?;

        let url = build_url(
            target.client.as_ref(),
            account,
            bucket,
            &record.file_key,
            Some(expiry),
            &req.process_params,
        );

        Ok(UploadToken {
            file_id: record.id,
            upload_url,
            access_key_id: account.access_key_id.clone(),
            policy,
            signature,
            key: record.file_key,
            url,
        })
    }

    /// Files matching `param`. Without ids or keys the result is empty.
    pub async fn search_files(&self, param: &SearchFileParam) -> ServiceResult<Vec<FileView>> {
        if param.ids.is_empty() && param.file_keys.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.repo.search_files(param).await?;
        Ok(enrich(
            &self.repo,
            &self.clients,
            records,
            param.expiry(),
            &param.process_params,
        )
        .await?)
    }

    pub async fn search_files_page(
        &self,
        param: &SearchFilePageParam,
    ) -> ServiceResult<PageResult<FileView>> {
        let (total, records) = self
            .repo
            .search_files_page(&param.filter, &param.page)
            .await?;
        if total == 0 {
            return Ok(PageResult::empty());
        }

        let views = enrich(
            &self.repo,
            &self.clients,
            records,
            param.filter.expiry(),
            &param.filter.process_params,
        )
        .await?;
        Ok(PageResult::new(total, &param.page, views))
    }

    /// Register an object that already exists in storage.
    pub async fn create_file(&self, file: NewFile) -> ServiceResult<FileView> {
        if file.file_key.trim().is_empty() {
            return Err(FileServiceError::Validation("fileKey is required".into()));
        }
        if self.repo.bucket_by_id(file.bucket_id).await?.is_none() {
            return Err(FileServiceError::BucketNotFound(file.bucket_id.to_string()));
        }

        let record = self.insert_file(&file).await?;
        let fallback = FileView::from(record.clone());
        let views = enrich(&self.repo, &self.clients, vec![record], None, &[]).await?;
        Ok(views.into_iter().next().unwrap_or(fallback))
    }

    /// Register several objects one by one. Failed items are logged and
    /// left out of the result.
    pub async fn create_files(&self, files: Vec<NewFile>) -> Vec<FileView> {
        let mut created = Vec::with_capacity(files.len());
        for file in files {
            let key = file.file_key.clone();
            match self.create_file(file).await {
                Ok(view) => created.push(view),
                Err(err) => warn!(file_key = %key, error = %err, "skipping file in batch"),
            }
        }
        created
    }
}

/// Try the transfer once plus [`TRANSFER_RETRIES`] times, without backoff.
async fn transfer_with_retry(
    client: &dyn StorageClient,
    bucket: &str,
    key: &str,
    payload: &TempPath,
) -> ServiceResult<()> {
    let attempts = TRANSFER_RETRIES + 1;
    let mut attempt = 1;
    loop {
        match client.upload_file(bucket, key, payload).await {
            Ok(()) => {
                if attempt > 1 {
                    info!(bucket, key, attempt, "transfer succeeded after retry");
                }
                return Ok(());
            }
            Err(err) if attempt < attempts => {
                warn!(bucket, key, attempt, error = %err, "transfer attempt failed, retrying");
                attempt += 1;
            }
            Err(err) => {
                error!(bucket, key, attempt, error = %err, "transfer failed, giving up");
                return Err(FileServiceError::Transfer {
                    attempts,
                    source: err,
                });
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{io::Write, sync::Arc};

    use tempfile::{NamedTempFile, TempPath};

    use super::FileService;
    use crate::services::{
        client_cache::{ClientCache, testing::FakeFactory},
        repository::Repository,
    };

    pub fn service(repo: Repository, factory: Arc<FakeFactory>) -> FileService {
        FileService::new(repo, Arc::new(ClientCache::new(factory)), std::env::temp_dir())
    }

    pub fn staged(bytes: &[u8]) -> TempPath {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(bytes).expect("write payload");
        file.into_temp_path()
    }
}
