//! Pagination and search parameters shared by the list endpoints.

use serde::{Deserialize, Serialize};

use super::process::TransformStep;

const MAX_PAGE_SIZE: i64 = 1000;

/// A 1-based page request.
#[derive(Deserialize, Clone, Copy, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct PageParam {
    pub page_index: i64,
    pub page_size: i64,
}

impl Default for PageParam {
    fn default() -> Self {
        Self {
            page_index: 1,
            page_size: 10,
        }
    }
}

impl PageParam {
    pub fn limit(&self) -> i64 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Row offset: `(page - 1) * size`, with the page clamped to >= 1.
    /// Saturates, so an absurd page index yields an empty page.
    pub fn offset(&self) -> i64 {
        (self.page_index.max(1) - 1).saturating_mul(self.limit())
    }
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    pub total: i64,
    pub total_pages: i64,
    pub data: Vec<T>,
}

impl<T> PageResult<T> {
    pub fn new(total: i64, page: &PageParam, data: Vec<T>) -> Self {
        let size = page.limit();
        Self {
            total,
            total_pages: (total + size - 1) / size,
            data,
        }
    }

    pub fn empty() -> Self {
        Self {
            total: 0,
            total_pages: 0,
            data: Vec::new(),
        }
    }
}

/// Filters for file searches. Filters combine with AND.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFileParam {
    pub ids: Vec<i64>,
    pub file_keys: Vec<String>,
    /// Bucket names.
    pub buckets: Vec<String>,
    pub expired_in_sec: i64,
    pub process_params: Vec<TransformStep>,
}

impl SearchFileParam {
    pub fn expiry(&self) -> Option<i64> {
        (self.expired_in_sec > 0).then_some(self.expired_in_sec)
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct SearchFilePageParam {
    #[serde(flatten)]
    pub page: PageParam,
    #[serde(flatten)]
    pub filter: SearchFileParam,
}
