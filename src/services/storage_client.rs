//! Object-storage clients.
//!
//! `StorageClient` is what the rest of the service talks to: a chunked file
//! transfer and a time-limited URL signer. The production implementation
//! targets OSS-compatible providers, using Apache OpenDAL for transfers and
//! OSS query-string signatures (HMAC-SHA1) for URLs so that `x-oss-process`
//! can be carried as a signed sub-resource.

use std::{io, path::Path, sync::Arc};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use hmac::{Hmac, Mac};
use opendal::{Operator, Writer, services};
use sha1::Sha1;
use thiserror::Error;
use tokio::{fs::File, io::AsyncReadExt};
use tracing::warn;
use url::Url;

use crate::models::account::Account;

type HmacSha1 = Hmac<Sha1>;

/// Part size handed to the multipart writer.
const CHUNK_SIZE: usize = 100 * 1024;
/// Parts uploaded in parallel per transfer.
const CONCURRENCY: usize = 3;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage configuration error: {0}")]
    Configuration(String),
    #[error("storage transfer failed: {0}")]
    Transfer(String),
    #[error("url signing failed: {0}")]
    Signing(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<opendal::Error> for StorageError {
    fn from(err: opendal::Error) -> Self {
        Self::Transfer(err.to_string())
    }
}

/// Operations the service needs from an object-storage account.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Upload the local file at `path` to `bucket/key`.
    async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> Result<(), StorageError>;

    /// Produce a GET URL for `bucket/key` valid for `expiry_secs`, with an
    /// optional server-side processing instruction.
    fn sign_url(
        &self,
        bucket: &str,
        key: &str,
        expiry_secs: i64,
        process: Option<&str>,
    ) -> Result<String, StorageError>;
}

/// Builds clients from account credentials.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, account: &Account) -> Result<Arc<dyn StorageClient>, StorageError>;
}

/// Factory for OSS-compatible accounts.
#[derive(Clone, Copy, Debug, Default)]
pub struct OssClientFactory;

impl ClientFactory for OssClientFactory {
    fn connect(&self, account: &Account) -> Result<Arc<dyn StorageClient>, StorageError> {
        Ok(Arc::new(OssClient::new(
            &account.endpoint,
            &account.access_key_id,
            &account.access_key_secret,
        )?))
    }
}

/// Client for one OSS-compatible account.
#[derive(Clone, Debug)]
pub struct OssClient {
    endpoint: Url,
    access_key_id: String,
    access_key_secret: String,
}

impl OssClient {
    /// Validate the endpoint and credentials and build a client.
    ///
    /// Endpoints without a scheme are treated as `https`.
    pub fn new(
        endpoint: &str,
        access_key_id: &str,
        access_key_secret: &str,
    ) -> Result<Self, StorageError> {
        let endpoint = parse_endpoint(endpoint)?;
        if access_key_id.trim().is_empty() || access_key_secret.trim().is_empty() {
            return Err(StorageError::Configuration(
                "access key id and secret are required".into(),
            ));
        }

        Ok(Self {
            endpoint,
            access_key_id: access_key_id.to_string(),
            access_key_secret: access_key_secret.to_string(),
        })
    }

    /// `host[:port]` of the endpoint.
    fn authority(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// OpenDAL operator bound to one bucket of this account.
    fn operator(&self, bucket: &str) -> Result<Operator, StorageError> {
        let endpoint = format!("{}://{}", self.endpoint.scheme(), self.authority());
        let builder = services::Oss::default()
            .root("/")
            .bucket(bucket)
            .endpoint(&endpoint)
            .access_key_id(&self.access_key_id)
            .access_key_secret(&self.access_key_secret);

        Ok(Operator::new(builder)
            .map_err(|e| StorageError::Configuration(e.to_string()))?
            .finish())
    }

    /// Sign a GET URL expiring at the unix timestamp `expires`.
    fn sign_url_at(
        &self,
        bucket: &str,
        key: &str,
        expires: i64,
        process: Option<&str>,
    ) -> Result<String, StorageError> {
        let mut resource = format!("/{bucket}/{key}");
        if let Some(process) = process {
            resource.push_str("?x-oss-process=");
            resource.push_str(process);
        }
        let string_to_sign = format!("GET\n\n\n{expires}\n{resource}");
        let signature = hmac_sha1_base64(&self.access_key_secret, &string_to_sign)?;

        let mut url = format!(
            "{}://{}.{}/{}?Expires={}&OSSAccessKeyId={}&Signature={}",
            self.endpoint.scheme(),
            bucket,
            self.authority(),
            encode_key(key),
            expires,
            urlencoding::encode(&self.access_key_id),
            urlencoding::encode(&signature),
        );
        if let Some(process) = process {
            url.push_str("&x-oss-process=");
            url.push_str(&urlencoding::encode(process));
        }

        Ok(url)
    }
}

#[async_trait]
impl StorageClient for OssClient {
    async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> Result<(), StorageError> {
        let operator = self.operator(bucket)?;
        stream_file(&operator, key, path).await
    }

    fn sign_url(
        &self,
        bucket: &str,
        key: &str,
        expiry_secs: i64,
        process: Option<&str>,
    ) -> Result<String, StorageError> {
        let expires = Utc::now().timestamp().saturating_add(expiry_secs);
        self.sign_url_at(bucket, key, expires, process)
    }
}

/// Copy the local file at `path` to `key`, one chunk in memory per read.
/// A failed copy aborts the writer so no partial object is committed.
async fn stream_file(operator: &Operator, key: &str, path: &Path) -> Result<(), StorageError> {
    let mut file = File::open(path).await?;
    let mut writer = operator
        .writer_with(key)
        .chunk(CHUNK_SIZE)
        .concurrent(CONCURRENCY)
        .await?;

    match copy_chunks(&mut file, &mut writer).await {
        Ok(()) => {
            writer.close().await?;
            Ok(())
        }
        Err(err) => {
            if let Err(abort) = writer.abort().await {
                warn!(key, error = %abort, "failed to abort partial upload");
            }
            Err(err)
        }
    }
}

async fn copy_chunks(file: &mut File, writer: &mut Writer) -> Result<(), StorageError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write(buf[..n].to_vec()).await?;
    }
}

/// Base64 HMAC-SHA1 of `payload` keyed by `secret`.
pub fn hmac_sha1_base64(secret: &str, payload: &str) -> Result<String, StorageError> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| StorageError::Signing(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn parse_endpoint(raw: &str) -> Result<Url, StorageError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StorageError::Configuration("endpoint is empty".into()));
    }

    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| StorageError::Configuration(format!("invalid endpoint `{raw}`: {e}")))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(StorageError::Configuration(format!(
            "endpoint `{raw}` has no host"
        )));
    }

    Ok(url)
}

/// Percent-encode each path segment of a key, keeping the separators.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OssClient {
        OssClient::new("oss-cn-hangzhou.aliyuncs.com", "test-ak", "test-sk").expect("client")
    }

    #[test]
    fn rejects_bad_endpoint_and_missing_credentials() {
        assert!(matches!(
            OssClient::new("", "ak", "sk"),
            Err(StorageError::Configuration(_))
        ));
        assert!(matches!(
            OssClient::new("http://", "ak", "sk"),
            Err(StorageError::Configuration(_))
        ));
        assert!(matches!(
            OssClient::new("oss-cn-hangzhou.aliyuncs.com", "", "sk"),
            Err(StorageError::Configuration(_))
        ));
    }

    #[test]
    fn keeps_explicit_scheme() {
        let client = OssClient::new("http://127.0.0.1:9000", "ak", "sk").expect("client");
        let url = client
            .sign_url_at("media", "a.png", 1_700_000_000, None)
            .expect("signed");
        assert!(url.starts_with("http://media.127.0.0.1:9000/a.png?"), "{url}");
    }

    #[test]
    fn signed_url_is_deterministic_for_fixed_expiry() {
        let client = client();
        let first = client
            .sign_url_at("private-docs", "reports/q1 summary.pdf", 1_700_000_000, None)
            .expect("signed");
        let second = client
            .sign_url_at("private-docs", "reports/q1 summary.pdf", 1_700_000_000, None)
            .expect("signed");

        assert_eq!(first, second);
        assert!(first.starts_with(
            "https://private-docs.oss-cn-hangzhou.aliyuncs.com/reports/q1%20summary.pdf?"
        ));
        assert!(first.contains("Expires=1700000000"));
        assert!(first.contains("OSSAccessKeyId=test-ak"));
        assert!(!first.contains("x-oss-process"));
    }

    #[test]
    fn process_changes_signature_and_is_appended() {
        let client = client();
        let plain = client
            .sign_url_at("media", "a.jpg", 1_700_000_000, None)
            .expect("signed");
        let processed = client
            .sign_url_at("media", "a.jpg", 1_700_000_000, Some("image/resize,w_300"))
            .expect("signed");

        assert!(processed.ends_with("&x-oss-process=image%2Fresize%2Cw_300"));
        let signature = |url: &str| {
            url.split('&')
                .find(|part| part.starts_with("Signature="))
                .map(str::to_string)
        };
        assert_ne!(signature(&plain), signature(&processed));
    }

    fn memory_operator() -> Operator {
        Operator::new(services::Memory::default())
            .expect("memory operator")
            .finish()
    }

    #[tokio::test]
    async fn streams_multi_chunk_file_intact() {
        let payload: Vec<u8> = (0..(CHUNK_SIZE * 2 + 1234)).map(|i| (i % 251) as u8).collect();
        let mut staged = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(&mut staged, &payload).expect("write payload");

        let operator = memory_operator();
        stream_file(&operator, "big/blob.bin", staged.path())
            .await
            .expect("upload");

        let stored = operator.read("big/blob.bin").await.expect("read back");
        assert_eq!(stored.to_vec(), payload);
    }

    #[tokio::test]
    async fn missing_source_is_io_error() {
        let operator = memory_operator();
        let err = stream_file(&operator, "gone.bin", Path::new("/nonexistent/staged-upload"))
            .await
            .expect_err("no source");
        assert!(matches!(err, StorageError::Io(_)));
        assert!(!operator.exists("gone.bin").await.expect("exists"));
    }

    #[test]
    fn hmac_matches_known_vector() {
        // RFC 2202 test case 2
        let sig = hmac_sha1_base64("Jefe", "what do ya want for nothing?").expect("mac");
        assert_eq!(sig, "7/zfauXrL6LSdBbV8YTfnCWafHk=");
    }
}
