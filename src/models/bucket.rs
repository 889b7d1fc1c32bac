//! Represents a bucket: a named storage namespace owned by one account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::account::Account;
use super::process::ProcessPolicy;

/// Visibility of a bucket, stored as `bucket_type` (1 public, 2 private).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum BucketKind {
    Public = 1,
    Private = 2,
}

/// A bucket row as persisted.
///
/// `process_config` keeps the raw JSON so a malformed policy never breaks
/// row decoding; it is parsed at URL-resolution time.
#[derive(Clone, FromRow, Debug, PartialEq)]
pub struct Bucket {
    pub id: i64,

    /// Owning account id.
    pub account_id: i64,

    #[sqlx(rename = "bucket_type")]
    pub kind: BucketKind,

    /// Bucket name, unique among live buckets.
    pub name: String,

    /// Custom domain, empty when none is configured.
    pub domain: String,

    /// Serialized [`ProcessPolicy`].
    pub process_config: Option<String>,

    pub status: i32,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Bucket {
    /// Domain objects are served from: the custom domain when set, else
    /// `{bucket}.{endpoint host}`.
    pub fn resolved_domain(&self, account: &Account) -> String {
        if self.domain.is_empty() {
            format!("{}.{}", self.name, account.endpoint_host())
        } else {
            self.domain.clone()
        }
    }

    /// Copy every field of `input` that differs into `self` and report
    /// which columns changed.
    pub fn apply_changes(&mut self, input: &BucketInput) -> Vec<BucketColumn> {
        let mut cols = Vec::new();

        if self.account_id != input.account_id {
            self.account_id = input.account_id;
            cols.push(BucketColumn::AccountId);
        }
        if self.kind != input.bucket_type {
            self.kind = input.bucket_type;
            cols.push(BucketColumn::Kind);
        }
        if self.name != input.name {
            self.name = input.name.clone();
            cols.push(BucketColumn::Name);
        }
        if self.domain != input.domain {
            self.domain = input.domain.clone();
            cols.push(BucketColumn::Domain);
        }
        let process_config = input.process_config_json();
        if self.process_config != process_config {
            self.process_config = process_config;
            cols.push(BucketColumn::ProcessConfig);
        }
        if let Some(status) = input.status {
            if self.status != status {
                self.status = status;
                cols.push(BucketColumn::Status);
            }
        }

        cols
    }
}

/// Columns a bucket update may rewrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketColumn {
    AccountId,
    Kind,
    Name,
    Domain,
    ProcessConfig,
    Status,
}

impl BucketColumn {
    pub fn name(self) -> &'static str {
        match self {
            Self::AccountId => "account_id",
            Self::Kind => "bucket_type",
            Self::Name => "name",
            Self::Domain => "domain",
            Self::ProcessConfig => "process_config",
            Self::Status => "status",
        }
    }
}

/// Payload accepted by the bucket create/update endpoints.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BucketInput {
    pub account_id: i64,
    pub bucket_type: BucketKind,
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub process_config: Option<ProcessPolicy>,
    #[serde(default)]
    pub status: Option<i32>,
}

impl BucketInput {
    pub fn process_config_json(&self) -> Option<String> {
        self.process_config
            .as_ref()
            .and_then(|policy| serde_json::to_string(policy).ok())
    }
}

/// Bucket as returned by the API, with the policy decoded.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BucketView {
    pub id: i64,
    pub account_id: i64,
    pub bucket_type: BucketKind,
    pub name: String,
    pub domain: String,
    pub process_config: Option<ProcessPolicy>,
    pub status: i32,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl From<Bucket> for BucketView {
    fn from(bucket: Bucket) -> Self {
        let process_config = bucket
            .process_config
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            id: bucket.id,
            account_id: bucket.account_id,
            bucket_type: bucket.kind,
            name: bucket.name,
            domain: bucket.domain,
            process_config,
            status: bucket.status,
            create_time: bucket.create_time,
            update_time: bucket.update_time,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_bucket(id: i64, account_id: i64, name: &str, kind: BucketKind) -> Bucket {
    let now = Utc::now();
    Bucket {
        id,
        account_id,
        kind,
        name: name.to_string(),
        domain: String::new(),
        process_config: None,
        status: 1,
        create_time: now,
        update_time: now,
    }
}
