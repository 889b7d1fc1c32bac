//! SQLite persistence for accounts, buckets and file records.
//!
//! All reads skip soft-deleted rows (`del_status = 1`). Dynamic filters and
//! selective updates go through `QueryBuilder` so every value stays bound.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use tracing::debug;

use crate::models::{
    account::{Account, AccountColumn, AccountInput},
    bucket::{Bucket, BucketColumn, BucketInput},
    file::{FileRecord, NewFile},
    page::{PageParam, SearchFileParam},
};

/// Embedded schema, applied by `--migrate` and by tests.
pub const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const ACCOUNT_COLUMNS: &str = "id, access_key_id, access_key_secret, endpoint, inner_endpoint, \
     status, create_time, update_time";
const BUCKET_COLUMNS: &str = "id, account_id, bucket_type, name, domain, process_config, \
     status, create_time, update_time";
const FILE_COLUMNS: &str = "f.id, f.bucket_id, f.file_key, f.source_file, f.source_file_size, \
     f.source_file_type, f.source_file_attr, f.create_time, f.update_time";

/// Execute every statement of [`SCHEMA`]. Returns the statement count.
pub async fn apply_schema(db: &SqlitePool) -> Result<usize, sqlx::Error> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    for stmt in &statements {
        debug!("executing schema statement: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(statements.len())
}

/// Batched lookups used when decorating file records.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn buckets_by_ids(&self, ids: &[i64]) -> Result<Vec<Bucket>, sqlx::Error>;
    async fn accounts_by_ids(&self, ids: &[i64]) -> Result<Vec<Account>, sqlx::Error>;
}

#[derive(Clone)]
pub struct Repository {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl Repository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    // --- accounts ---

    pub async fn account_by_id(&self, id: i64) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = ? AND del_status = 0"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// One page of live accounts, newest first, with the total count.
    pub async fn search_accounts(
        &self,
        page: &PageParam,
    ) -> Result<(i64, Vec<Account>), sqlx::Error> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(id) FROM account WHERE del_status = 0")
            .fetch_one(&*self.db)
            .await?;
        if total == 0 {
            return Ok((0, Vec::new()));
        }

        let rows = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE del_status = 0 \
             ORDER BY id DESC LIMIT ? OFFSET ?"
        ))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&*self.db)
        .await?;

        Ok((total, rows))
    }

    pub async fn insert_account(&self, input: &AccountInput) -> Result<Account, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO account (access_key_id, access_key_secret, endpoint, inner_endpoint, \
             status, del_status, create_time, update_time) \
             VALUES (?, ?, ?, ?, ?, 0, ?, ?) RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(&input.access_key_id)
        .bind(&input.access_key_secret)
        .bind(&input.endpoint)
        .bind(&input.inner_endpoint)
        .bind(input.status.unwrap_or(1))
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
    }

    /// Write `cols` of `account` plus `update_time`. No-op when `cols` is empty.
    pub async fn update_account(
        &self,
        account: &Account,
        cols: &[AccountColumn],
    ) -> Result<u64, sqlx::Error> {
        if cols.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE account SET ");
        let mut set = builder.separated(", ");
        for col in cols {
            set.push(format!("{} = ", col.name()));
            match col {
                AccountColumn::AccessKeyId => {
                    set.push_bind_unseparated(account.access_key_id.clone())
                }
                AccountColumn::AccessKeySecret => {
                    set.push_bind_unseparated(account.access_key_secret.clone())
                }
                AccountColumn::Endpoint => set.push_bind_unseparated(account.endpoint.clone()),
                AccountColumn::InnerEndpoint => {
                    set.push_bind_unseparated(account.inner_endpoint.clone())
                }
                AccountColumn::Status => set.push_bind_unseparated(account.status),
            };
        }
        set.push("update_time = ");
        set.push_bind_unseparated(Utc::now());
        builder.push(" WHERE id = ");
        builder.push_bind(account.id);
        builder.push(" AND del_status = 0");

        let result = builder.build().execute(&*self.db).await?;
        Ok(result.rows_affected())
    }

    pub async fn soft_delete_account(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE account SET del_status = 1, update_time = ? WHERE id = ? AND del_status = 0",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- buckets ---

    pub async fn bucket_by_name(&self, name: &str) -> Result<Option<Bucket>, sqlx::Error> {
        sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM bucket WHERE name = ? AND del_status = 0 \
             ORDER BY id LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn bucket_by_id(&self, id: i64) -> Result<Option<Bucket>, sqlx::Error> {
        sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM bucket WHERE id = ? AND del_status = 0"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// Whether a live bucket other than `except` already uses `name`.
    pub async fn bucket_name_taken(
        &self,
        name: &str,
        except: Option<i64>,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(id) FROM bucket WHERE name = ? AND del_status = 0 AND id != ?",
        )
        .bind(name)
        .bind(except.unwrap_or(0))
        .fetch_one(&*self.db)
        .await?;
        Ok(count > 0)
    }

    pub async fn search_buckets(
        &self,
        page: &PageParam,
    ) -> Result<(i64, Vec<Bucket>), sqlx::Error> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(id) FROM bucket WHERE del_status = 0")
            .fetch_one(&*self.db)
            .await?;
        if total == 0 {
            return Ok((0, Vec::new()));
        }

        let rows = sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM bucket WHERE del_status = 0 \
             ORDER BY id DESC LIMIT ? OFFSET ?"
        ))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&*self.db)
        .await?;

        Ok((total, rows))
    }

    pub async fn insert_bucket(&self, input: &BucketInput) -> Result<Bucket, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Bucket>(&format!(
            "INSERT INTO bucket (account_id, bucket_type, name, domain, process_config, \
             status, del_status, create_time, update_time) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?) RETURNING {BUCKET_COLUMNS}"
        ))
        .bind(input.account_id)
        .bind(input.bucket_type)
        .bind(&input.name)
        .bind(&input.domain)
        .bind(input.process_config_json())
        .bind(input.status.unwrap_or(1))
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
    }

    /// Write `cols` of `bucket` plus `update_time`. No-op when `cols` is empty.
    pub async fn update_bucket(
        &self,
        bucket: &Bucket,
        cols: &[BucketColumn],
    ) -> Result<u64, sqlx::Error> {
        if cols.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE bucket SET ");
        let mut set = builder.separated(", ");
        for col in cols {
            set.push(format!("{} = ", col.name()));
            match col {
                BucketColumn::AccountId => set.push_bind_unseparated(bucket.account_id),
                BucketColumn::Kind => set.push_bind_unseparated(bucket.kind),
                BucketColumn::Name => set.push_bind_unseparated(bucket.name.clone()),
                BucketColumn::Domain => set.push_bind_unseparated(bucket.domain.clone()),
                BucketColumn::ProcessConfig => {
                    set.push_bind_unseparated(bucket.process_config.clone())
                }
                BucketColumn::Status => set.push_bind_unseparated(bucket.status),
            };
        }
        set.push("update_time = ");
        set.push_bind_unseparated(Utc::now());
        builder.push(" WHERE id = ");
        builder.push_bind(bucket.id);
        builder.push(" AND del_status = 0");

        let result = builder.build().execute(&*self.db).await?;
        Ok(result.rows_affected())
    }

    pub async fn soft_delete_bucket(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE bucket SET del_status = 1, update_time = ? WHERE id = ? AND del_status = 0",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- files ---

    pub async fn insert_file(&self, file: &NewFile) -> Result<FileRecord, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, FileRecord>(
            "INSERT INTO file (bucket_id, file_key, source_file, source_file_size, \
             source_file_type, source_file_attr, del_status, create_time, update_time) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?) \
             RETURNING id, bucket_id, file_key, source_file, source_file_size, \
             source_file_type, source_file_attr, create_time, update_time",
        )
        .bind(file.bucket_id)
        .bind(&file.file_key)
        .bind(&file.source_file)
        .bind(file.source_file_size)
        .bind(&file.source_file_type)
        .bind(&file.source_file_attr)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
    }

    /// Live files matching `filter` whose bucket and account are also live.
    pub async fn search_files(
        &self,
        filter: &SearchFileParam,
    ) -> Result<Vec<FileRecord>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {FILE_COLUMNS} "));
        push_file_filter(&mut builder, filter);
        builder.push(" ORDER BY f.id");

        builder.build_query_as().fetch_all(&*self.db).await
    }

    /// One page of [`Repository::search_files`], newest first, with the total.
    pub async fn search_files_page(
        &self,
        filter: &SearchFileParam,
        page: &PageParam,
    ) -> Result<(i64, Vec<FileRecord>), sqlx::Error> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(f.id) ");
        push_file_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&*self.db).await?;
        if total == 0 {
            return Ok((0, Vec::new()));
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {FILE_COLUMNS} "));
        push_file_filter(&mut builder, filter);
        builder.push(" ORDER BY f.id DESC LIMIT ");
        builder.push_bind(page.limit());
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());

        let rows = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok((total, rows))
    }
}

fn push_file_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &SearchFileParam) {
    builder.push(
        "FROM file f \
         JOIN bucket b ON b.id = f.bucket_id \
         JOIN account a ON a.id = b.account_id \
         WHERE f.del_status = 0 AND b.del_status = 0 AND a.del_status = 0",
    );

    if !filter.ids.is_empty() {
        builder.push(" AND f.id IN (");
        let mut list = builder.separated(", ");
        for id in &filter.ids {
            list.push_bind(*id);
        }
        builder.push(")");
    }
    if !filter.file_keys.is_empty() {
        builder.push(" AND f.file_key IN (");
        let mut list = builder.separated(", ");
        for key in &filter.file_keys {
            list.push_bind(key.clone());
        }
        builder.push(")");
    }
    if !filter.buckets.is_empty() {
        builder.push(" AND b.name IN (");
        let mut list = builder.separated(", ");
        for name in &filter.buckets {
            list.push_bind(name.clone());
        }
        builder.push(")");
    }
}

#[async_trait]
impl Catalog for Repository {
    async fn buckets_by_ids(&self, ids: &[i64]) -> Result<Vec<Bucket>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {BUCKET_COLUMNS} FROM bucket WHERE del_status = 0 AND id IN ("
        ));
        let mut list = builder.separated(", ");
        for id in ids {
            list.push_bind(*id);
        }
        builder.push(")");

        builder.build_query_as().fetch_all(&*self.db).await
    }

    async fn accounts_by_ids(&self, ids: &[i64]) -> Result<Vec<Account>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE del_status = 0 AND id IN ("
        ));
        let mut list = builder.separated(", ");
        for id in ids {
            list.push_bind(*id);
        }
        builder.push(")");

        builder.build_query_as().fetch_all(&*self.db).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

    use super::{Repository, apply_schema};
    use crate::models::{
        account::{Account, AccountInput},
        bucket::{Bucket, BucketInput, BucketKind},
    };

    /// Fresh in-memory database with the schema applied.
    pub async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        apply_schema(&pool).await.expect("schema");
        pool
    }

    pub async fn memory_repo() -> Repository {
        Repository::new(Arc::new(memory_pool().await))
    }

    pub async fn seed_account(repo: &Repository, endpoint: &str) -> Account {
        repo.insert_account(&AccountInput {
            access_key_id: "ak".into(),
            access_key_secret: "sk".into(),
            endpoint: endpoint.into(),
            ..Default::default()
        })
        .await
        .expect("account")
    }

    pub async fn seed_bucket(
        repo: &Repository,
        account_id: i64,
        name: &str,
        kind: BucketKind,
    ) -> Bucket {
        repo.insert_bucket(&BucketInput {
            account_id,
            bucket_type: kind,
            name: name.into(),
            domain: String::new(),
            process_config: None,
            status: None,
        })
        .await
        .expect("bucket")
    }
}
