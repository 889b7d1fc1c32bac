//! Per-account storage clients, built lazily and reused across requests.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::debug;

use crate::models::account::Account;
use crate::services::storage_client::{ClientFactory, StorageClient, StorageError};

/// Account settings a client was built from.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Fingerprint {
    endpoint: String,
    access_key_id: String,
    access_key_secret: String,
}

impl Fingerprint {
    fn of(account: &Account) -> Self {
        Self {
            endpoint: account.endpoint.clone(),
            access_key_id: account.access_key_id.clone(),
            access_key_secret: account.access_key_secret.clone(),
        }
    }

    fn matches(&self, account: &Account) -> bool {
        self.endpoint == account.endpoint
            && self.access_key_id == account.access_key_id
            && self.access_key_secret == account.access_key_secret
    }
}

struct CachedClient {
    fingerprint: Fingerprint,
    client: Arc<dyn StorageClient>,
}

/// Concurrent map from account id to its storage client.
///
/// A cached client is only reused while the presented account still has
/// the endpoint and credentials it was built from; otherwise it is rebuilt
/// and replaced. Construction runs outside any shard lock, so two requests
/// racing on a cold account may each build a client; the first one inserted
/// wins and the other is dropped. Failed constructions are never stored.
pub struct ClientCache {
    clients: DashMap<i64, CachedClient>,
    factory: Arc<dyn ClientFactory>,
}

impl ClientCache {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            clients: DashMap::new(),
            factory,
        }
    }

    /// Return the cached client for `account`, building it on first use or
    /// when the account's endpoint or credentials changed.
    pub fn get_client(&self, account: &Account) -> Result<Arc<dyn StorageClient>, StorageError> {
        if let Some(cached) = self.clients.get(&account.id) {
            if cached.fingerprint.matches(account) {
                return Ok(Arc::clone(&cached.client));
            }
        }

        let client = self.factory.connect(account)?;
        let fingerprint = Fingerprint::of(account);

        match self.clients.entry(account.id) {
            Entry::Occupied(mut entry) => {
                if entry.get().fingerprint == fingerprint {
                    return Ok(Arc::clone(&entry.get().client));
                }
                debug!(account_id = account.id, "storage client rebuilt for new settings");
                entry.insert(CachedClient {
                    fingerprint,
                    client: Arc::clone(&client),
                });
            }
            Entry::Vacant(entry) => {
                debug!(account_id = account.id, "storage client created");
                entry.insert(CachedClient {
                    fingerprint,
                    client: Arc::clone(&client),
                });
            }
        }
        Ok(client)
    }

    /// Drop the cached client so the next lookup rebuilds it.
    pub fn invalidate(&self, account_id: i64) {
        if self.clients.remove(&account_id).is_some() {
            debug!(account_id, "storage client evicted");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeFactory;
    use super::*;
    use crate::models::account::sample_account;

    #[test]
    fn second_lookup_reuses_client() {
        let factory = Arc::new(FakeFactory::fresh());
        let cache = ClientCache::new(factory.clone());
        let account = sample_account(1, "oss-cn-hangzhou.aliyuncs.com");

        let first = cache.get_client(&account).expect("client");
        let second = cache.get_client(&account).expect("client");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructions(), 1);
    }

    #[test]
    fn distinct_accounts_get_distinct_clients() {
        let factory = Arc::new(FakeFactory::fresh());
        let cache = ClientCache::new(factory.clone());

        let a = cache
            .get_client(&sample_account(1, "oss-cn-hangzhou.aliyuncs.com"))
            .expect("client");
        let b = cache
            .get_client(&sample_account(2, "oss-cn-beijing.aliyuncs.com"))
            .expect("client");

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(factory.constructions(), 2);
    }

    #[test]
    fn construction_failure_is_not_cached() {
        let mut factory = FakeFactory::fresh();
        factory.fail = true;
        let factory = Arc::new(factory);
        let cache = ClientCache::new(factory.clone());
        let account = sample_account(9, "oss-cn-hangzhou.aliyuncs.com");

        assert!(cache.get_client(&account).is_err());
        assert!(cache.get_client(&account).is_err());
        assert_eq!(factory.constructions(), 2);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let factory = Arc::new(FakeFactory::fresh());
        let cache = ClientCache::new(factory.clone());
        let account = sample_account(5, "oss-cn-hangzhou.aliyuncs.com");

        let first = cache.get_client(&account).expect("client");
        cache.invalidate(account.id);
        let second = cache.get_client(&account).expect("client");

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructions(), 2);
    }

    #[test]
    fn changed_credentials_rebuild_without_eviction() {
        let factory = Arc::new(FakeFactory::fresh());
        let cache = ClientCache::new(factory.clone());
        let stale = sample_account(6, "oss-cn-hangzhou.aliyuncs.com");
        let mut rotated = stale.clone();
        rotated.access_key_secret = "rotated".into();

        let old = cache.get_client(&stale).expect("client");
        let new = cache.get_client(&rotated).expect("client");
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(factory.constructions(), 2);

        let again = cache.get_client(&rotated).expect("client");
        assert!(Arc::ptr_eq(&new, &again));
        assert_eq!(factory.constructions(), 2);

        // a request still holding the old row rebuilds, and the next caller
        // with current settings does not inherit that client
        let late = cache.get_client(&stale).expect("client");
        let current = cache.get_client(&rotated).expect("client");
        assert!(!Arc::ptr_eq(&late, &current));
        assert_eq!(factory.constructions(), 4);
    }

    #[test]
    fn unrelated_column_changes_keep_the_client() {
        let factory = Arc::new(FakeFactory::fresh());
        let cache = ClientCache::new(factory.clone());
        let account = sample_account(8, "oss-cn-hangzhou.aliyuncs.com");
        let mut disabled = account.clone();
        disabled.status = 0;
        disabled.inner_endpoint = "oss-cn-hangzhou-internal.aliyuncs.com".into();

        let first = cache.get_client(&account).expect("client");
        let second = cache.get_client(&disabled).expect("client");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructions(), 1);
    }

    #[test]
    fn concurrent_lookups_all_observe_a_client() {
        let factory = Arc::new(FakeFactory::fresh());
        let cache = Arc::new(ClientCache::new(factory.clone()));
        let account = sample_account(11, "oss-cn-hangzhou.aliyuncs.com");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let account = account.clone();
                std::thread::spawn(move || cache.get_client(&account).is_ok())
            })
            .collect();

        for handle in handles {
            assert!(handle.join().expect("thread"));
        }
        let settled = cache.get_client(&account).expect("client");
        let again = cache.get_client(&account).expect("client");
        assert!(Arc::ptr_eq(&settled, &again));
        assert!(factory.constructions() >= 1);
    }
}
