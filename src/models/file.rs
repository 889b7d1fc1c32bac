//! Represents a logical file: metadata for one object stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A file row as persisted. The payload itself lives in object storage.
#[derive(Clone, FromRow, Debug, PartialEq)]
pub struct FileRecord {
    pub id: i64,
    pub bucket_id: i64,

    /// Storage key, unique per bucket.
    pub file_key: String,

    /// Original filename as supplied by the uploader.
    pub source_file: String,
    pub source_file_size: i64,
    pub source_file_type: String,

    /// Free-form attributes supplied by the caller.
    pub source_file_attr: String,

    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// Fields needed to insert a file row.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct NewFile {
    pub bucket_id: i64,
    pub file_key: String,
    pub source_file: String,
    pub source_file_size: i64,
    pub source_file_type: String,
    pub source_file_attr: String,
}

/// A file enriched with its bucket, domain and access URL.
///
/// `url` is empty when the bucket/account could not be resolved or the
/// URL could not be signed.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub id: i64,
    pub bucket_id: i64,
    pub bucket_name: String,
    pub domain: String,
    pub file_key: String,
    pub source_file: String,
    pub source_file_size: i64,
    pub source_file_type: String,
    pub source_file_attr: String,
    pub url: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl From<FileRecord> for FileView {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.id,
            bucket_id: record.bucket_id,
            bucket_name: String::new(),
            domain: String::new(),
            file_key: record.file_key,
            source_file: record.source_file,
            source_file_size: record.source_file_size,
            source_file_type: record.source_file_type,
            source_file_attr: record.source_file_attr,
            url: String::new(),
            create_time: record.create_time,
            update_time: record.update_time,
        }
    }
}
