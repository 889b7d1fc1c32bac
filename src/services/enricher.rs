//! Decorates file records with bucket name, serving domain and access URL.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::models::{
    account::Account,
    bucket::Bucket,
    file::{FileRecord, FileView},
    process::TransformStep,
};
use crate::services::{client_cache::ClientCache, repository::Catalog, url_builder::build_url};

/// Resolve every record's bucket and account with one batched lookup each,
/// then build its URL. Records that cannot be resolved keep an empty URL.
pub async fn enrich(
    catalog: &dyn Catalog,
    clients: &ClientCache,
    files: Vec<FileRecord>,
    expiry: Option<i64>,
    steps: &[TransformStep],
) -> Result<Vec<FileView>, sqlx::Error> {
    let bucket_ids = distinct(files.iter().map(|f| f.bucket_id));
    let buckets: HashMap<i64, Bucket> = if bucket_ids.is_empty() {
        HashMap::new()
    } else {
        catalog
            .buckets_by_ids(&bucket_ids)
            .await?
            .into_iter()
            .map(|b| (b.id, b))
            .collect()
    };

    let account_ids = distinct(
        bucket_ids
            .iter()
            .filter_map(|id| buckets.get(id))
            .map(|b| b.account_id),
    );
    let accounts: HashMap<i64, Account> = if account_ids.is_empty() {
        HashMap::new()
    } else {
        catalog
            .accounts_by_ids(&account_ids)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect()
    };

    Ok(files
        .into_iter()
        .map(|record| {
            let mut view = FileView::from(record);
            let Some(bucket) = buckets.get(&view.bucket_id) else {
                return view;
            };
            view.bucket_name = bucket.name.clone();

            let Some(account) = accounts.get(&bucket.account_id) else {
                return view;
            };
            view.domain = bucket.resolved_domain(account);

            match clients.get_client(account) {
                Ok(client) => {
                    view.url = build_url(
                        client.as_ref(),
                        account,
                        bucket,
                        &view.file_key,
                        expiry,
                        steps,
                    );
                }
                Err(err) => {
                    warn!(account_id = account.id, error = %err, "no storage client for account");
                }
            }
            view
        })
        .collect())
}

/// Unique values in first-seen order.
fn distinct(ids: impl Iterator<Item = i64>) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::models::{bucket::BucketKind, file::NewFile};
    use crate::services::{
        client_cache::testing::FakeFactory,
        repository::{
            Repository,
            testing::{memory_repo, seed_account, seed_bucket},
        },
    };

    /// Counts batched lookups while delegating to a real repository.
    struct CountingCatalog {
        inner: Repository,
        bucket_calls: AtomicUsize,
        account_calls: AtomicUsize,
    }

    impl CountingCatalog {
        fn new(inner: Repository) -> Self {
            Self {
                inner,
                bucket_calls: AtomicUsize::new(0),
                account_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Catalog for CountingCatalog {
        async fn buckets_by_ids(&self, ids: &[i64]) -> Result<Vec<Bucket>, sqlx::Error> {
            self.bucket_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.buckets_by_ids(ids).await
        }

        async fn accounts_by_ids(&self, ids: &[i64]) -> Result<Vec<Account>, sqlx::Error> {
            self.account_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.accounts_by_ids(ids).await
        }
    }

    fn clients() -> ClientCache {
        ClientCache::new(Arc::new(FakeFactory::fresh()))
    }

    #[tokio::test]
    async fn one_lookup_per_kind_for_a_batch() {
        let repo = memory_repo().await;
        let east = seed_account(&repo, "oss-cn-hangzhou.aliyuncs.com").await;
        let north = seed_account(&repo, "oss-cn-beijing.aliyuncs.com").await;
        let buckets = [
            seed_bucket(&repo, east.id, "avatars", BucketKind::Public).await,
            seed_bucket(&repo, east.id, "vault", BucketKind::Private).await,
            seed_bucket(&repo, north.id, "docs", BucketKind::Public).await,
        ];

        let mut files = Vec::new();
        for i in 0..50 {
            let bucket = &buckets[i % buckets.len()];
            let record = repo
                .insert_file(&NewFile {
                    bucket_id: bucket.id,
                    file_key: format!("k{i}.png"),
                    ..Default::default()
                })
                .await
                .expect("insert");
            files.push(record);
        }

        let catalog = CountingCatalog::new(repo);
        let views = enrich(&catalog, &clients(), files, None, &[])
            .await
            .expect("enrich");

        assert_eq!(catalog.bucket_calls.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.account_calls.load(Ordering::SeqCst), 1);
        assert_eq!(views.len(), 50);
        assert!(views.iter().all(|v| !v.url.is_empty()));
        assert_eq!(views[0].bucket_name, "avatars");
        assert_eq!(views[0].url, "//avatars.oss-cn-hangzhou.aliyuncs.com/k0.png");
        assert_eq!(views[2].domain, "docs.oss-cn-beijing.aliyuncs.com");
        assert!(views[1].url.starts_with("//vault.oss.test/k1.png?"));
    }

    #[tokio::test]
    async fn empty_batch_skips_lookups() {
        let catalog = CountingCatalog::new(memory_repo().await);
        let views = enrich(&catalog, &clients(), Vec::new(), None, &[])
            .await
            .expect("enrich");

        assert!(views.is_empty());
        assert_eq!(catalog.bucket_calls.load(Ordering::SeqCst), 0);
        assert_eq!(catalog.account_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unresolved_bucket_keeps_empty_url() {
        let catalog = CountingCatalog::new(memory_repo().await);
        let now = Utc::now();
        let orphan = FileRecord {
            id: 1,
            bucket_id: 404,
            file_key: "lost.png".into(),
            source_file: "lost.png".into(),
            source_file_size: 1,
            source_file_type: "png".into(),
            source_file_attr: String::new(),
            create_time: now,
            update_time: now,
        };

        let views = enrich(&catalog, &clients(), vec![orphan], None, &[])
            .await
            .expect("enrich");

        assert_eq!(views[0].url, "");
        assert_eq!(views[0].bucket_name, "");
        // no bucket resolved, so no account lookup either
        assert_eq!(catalog.account_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn distinct_keeps_first_seen_order() {
        assert_eq!(distinct([3, 1, 3, 2, 1].into_iter()), vec![3, 1, 2]);
    }
}
