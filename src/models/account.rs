//! Represents an external storage account ("app") that owns buckets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Credentials and endpoints of an object-storage provider account.
///
/// Accounts are never removed physically; deletion flips `del_status`
/// and every read path filters on it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Autoincrement row id.
    pub id: i64,

    /// Access key id used to mint storage sessions.
    pub access_key_id: String,

    /// Access key secret paired with `access_key_id`.
    pub access_key_secret: String,

    /// Public service endpoint (e.g. `oss-cn-hangzhou.aliyuncs.com`).
    pub endpoint: String,

    /// Endpoint reachable from inside the provider network.
    pub inner_endpoint: String,

    /// Lifecycle status, 1 = enabled, 0 = disabled.
    pub status: i32,

    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// Payload accepted by the account create/update endpoints.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountInput {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub endpoint: String,
    pub inner_endpoint: String,
    pub status: Option<i32>,
}

/// Columns an account update may rewrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountColumn {
    AccessKeyId,
    AccessKeySecret,
    Endpoint,
    InnerEndpoint,
    Status,
}

impl AccountColumn {
    pub fn name(self) -> &'static str {
        match self {
            Self::AccessKeyId => "access_key_id",
            Self::AccessKeySecret => "access_key_secret",
            Self::Endpoint => "endpoint",
            Self::InnerEndpoint => "inner_endpoint",
            Self::Status => "status",
        }
    }
}

impl Account {
    /// Host part of the public endpoint, without scheme or trailing slash.
    pub fn endpoint_host(&self) -> &str {
        let endpoint = self.endpoint.trim();
        let without_scheme = endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(endpoint);
        without_scheme.trim_end_matches('/')
    }

    /// Copy every field of `input` that differs into `self` and report
    /// which columns changed. An absent `status` leaves the status alone.
    pub fn apply_changes(&mut self, input: &AccountInput) -> Vec<AccountColumn> {
        let mut cols = Vec::new();

        if self.access_key_id != input.access_key_id {
            self.access_key_id = input.access_key_id.clone();
            cols.push(AccountColumn::AccessKeyId);
        }
        if self.access_key_secret != input.access_key_secret {
            self.access_key_secret = input.access_key_secret.clone();
            cols.push(AccountColumn::AccessKeySecret);
        }
        if self.endpoint != input.endpoint {
            self.endpoint = input.endpoint.clone();
            cols.push(AccountColumn::Endpoint);
        }
        if self.inner_endpoint != input.inner_endpoint {
            self.inner_endpoint = input.inner_endpoint.clone();
            cols.push(AccountColumn::InnerEndpoint);
        }
        if let Some(status) = input.status {
            if self.status != status {
                self.status = status;
                cols.push(AccountColumn::Status);
            }
        }

        cols
    }
}

#[cfg(test)]
pub(crate) fn sample_account(id: i64, endpoint: &str) -> Account {
    let now = Utc::now();
    Account {
        id,
        access_key_id: format!("ak-{id}"),
        access_key_secret: format!("sk-{id}"),
        endpoint: endpoint.to_string(),
        inner_endpoint: String::new(),
        status: 1,
        create_time: now,
        update_time: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_host_strips_scheme_and_slash() {
        let account = sample_account(1, "https://oss-cn-hangzhou.aliyuncs.com/");
        assert_eq!(account.endpoint_host(), "oss-cn-hangzhou.aliyuncs.com");

        let account = sample_account(1, "oss-cn-beijing.aliyuncs.com");
        assert_eq!(account.endpoint_host(), "oss-cn-beijing.aliyuncs.com");
    }

    #[test]
    fn apply_changes_reports_only_changed_columns() {
        let mut account = sample_account(7, "oss-cn-hangzhou.aliyuncs.com");
        let input = AccountInput {
            access_key_id: account.access_key_id.clone(),
            access_key_secret: "rotated".into(),
            endpoint: account.endpoint.clone(),
            inner_endpoint: "oss-cn-hangzhou-internal.aliyuncs.com".into(),
            status: None,
        };

        let cols = account.apply_changes(&input);

        assert_eq!(
            cols,
            vec![AccountColumn::AccessKeySecret, AccountColumn::InnerEndpoint]
        );
        assert_eq!(account.access_key_secret, "rotated");
        assert_eq!(account.status, 1);
    }

    #[test]
    fn apply_changes_is_empty_for_identical_input() {
        let mut account = sample_account(3, "oss-cn-hangzhou.aliyuncs.com");
        let input = AccountInput {
            access_key_id: account.access_key_id.clone(),
            access_key_secret: account.access_key_secret.clone(),
            endpoint: account.endpoint.clone(),
            inner_endpoint: account.inner_endpoint.clone(),
            status: Some(1),
        };
        assert!(account.apply_changes(&input).is_empty());
    }
}
