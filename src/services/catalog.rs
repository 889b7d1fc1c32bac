//! Account and bucket administration.

use tracing::info;

use crate::models::{
    account::{Account, AccountInput},
    bucket::{BucketInput, BucketView},
    page::{PageParam, PageResult},
};
use crate::services::{
    expression::Expr,
    file_service::{FileService, FileServiceError, ServiceResult},
};

fn require(value: &str, field: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        return Err(FileServiceError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn validate_account(input: &AccountInput) -> ServiceResult<()> {
    require(&input.endpoint, "endpoint")?;
    require(&input.access_key_id, "accessKeyId")?;
    require(&input.access_key_secret, "accessKeySecret")
}

/// Name present and any guard expression parses.
fn validate_bucket(input: &BucketInput) -> ServiceResult<()> {
    require(&input.name, "name")?;
    if let Some(policy) = &input.process_config {
        let guard = policy.expression.trim();
        if !guard.is_empty() {
            Expr::parse(guard).map_err(|err| {
                FileServiceError::Validation(format!("invalid processConfig expression: {err}"))
            })?;
        }
    }
    Ok(())
}

impl FileService {
    // --- accounts ---

    pub async fn search_accounts(&self, page: &PageParam) -> ServiceResult<PageResult<Account>> {
        let (total, rows) = self.repo.search_accounts(page).await?;
        Ok(PageResult::new(total, page, rows))
    }

    pub async fn create_account(&self, input: AccountInput) -> ServiceResult<Account> {
        validate_account(&input)?;
        let account = self.repo.insert_account(&input).await?;
        info!(account_id = account.id, endpoint = %account.endpoint, "account created");
        Ok(account)
    }

    /// Rewrite the changed columns of an account and drop its cached client.
    pub async fn update_account(&self, id: i64, input: AccountInput) -> ServiceResult<Account> {
        validate_account(&input)?;
        let mut account = self
            .repo
            .account_by_id(id)
            .await?
            .ok_or(FileServiceError::AccountNotFound(id))?;

        let cols = account.apply_changes(&input);
        if !cols.is_empty() {
            self.repo.update_account(&account, &cols).await?;
            self.clients.invalidate(id);
            info!(account_id = id, changed = cols.len(), "account updated");
        }
        Ok(account)
    }

    /// Soft-delete an account. Returns whether a live row was deleted.
    pub async fn delete_account(&self, id: i64) -> ServiceResult<bool> {
        let deleted = self.repo.soft_delete_account(id).await?;
        if deleted {
            self.clients.invalidate(id);
            info!(account_id = id, "account deleted");
        }
        Ok(deleted)
    }

    // --- buckets ---

    pub async fn search_buckets(&self, page: &PageParam) -> ServiceResult<PageResult<BucketView>> {
        let (total, rows) = self.repo.search_buckets(page).await?;
        Ok(PageResult::new(
            total,
            page,
            rows.into_iter().map(BucketView::from).collect(),
        ))
    }

    pub async fn create_bucket(&self, input: BucketInput) -> ServiceResult<BucketView> {
        validate_bucket(&input)?;
        if self.repo.account_by_id(input.account_id).await?.is_none() {
            return Err(FileServiceError::AccountNotFound(input.account_id));
        }
        if self.repo.bucket_name_taken(&input.name, None).await? {
            return Err(FileServiceError::Conflict(format!(
                "bucket `{}` already exists",
                input.name
            )));
        }

        let bucket = self.repo.insert_bucket(&input).await?;
        info!(bucket_id = bucket.id, name = %bucket.name, "bucket created");
        Ok(BucketView::from(bucket))
    }

    pub async fn update_bucket(&self, id: i64, input: BucketInput) -> ServiceResult<BucketView> {
        validate_bucket(&input)?;
        let mut bucket = self
            .repo
            .bucket_by_id(id)
            .await?
            .ok_or_else(|| FileServiceError::BucketNotFound(id.to_string()))?;

        if bucket.account_id != input.account_id
            && self.repo.account_by_id(input.account_id).await?.is_none()
        {
            return Err(FileServiceError::AccountNotFound(input.account_id));
        }
        if bucket.name != input.name && self.repo.bucket_name_taken(&input.name, Some(id)).await? {
            return Err(FileServiceError::Conflict(format!(
                "bucket `{}` already exists",
                input.name
            )));
        }

        let cols = bucket.apply_changes(&input);
        if !cols.is_empty() {
            self.repo.update_bucket(&bucket, &cols).await?;
            info!(bucket_id = id, changed = cols.len(), "bucket updated");
        }
        Ok(BucketView::from(bucket))
    }

    /// Soft-delete a bucket. Returns whether a live row was deleted.
    pub async fn delete_bucket(&self, id: i64) -> ServiceResult<bool> {
        let deleted = self.repo.soft_delete_bucket(id).await?;
        if deleted {
            info!(bucket_id = id, "bucket deleted");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::{bucket::BucketKind, process::ProcessPolicy};
    use crate::services::{
        client_cache::testing::FakeFactory,
        file_service::testing::service,
        repository::testing::{memory_repo, seed_account},
    };

    fn account_input(secret: &str) -> AccountInput {
        AccountInput {
            access_key_id: "ak".into(),
            access_key_secret: secret.into(),
            endpoint: "oss-cn-hangzhou.aliyuncs.com".into(),
            ..Default::default()
        }
    }

    fn bucket_input(account_id: i64, name: &str) -> BucketInput {
        BucketInput {
            account_id,
            bucket_type: BucketKind::Public,
            name: name.into(),
            domain: String::new(),
            process_config: None,
            status: None,
        }
    }

    #[tokio::test]
    async fn account_create_validates_required_fields() {
        let svc = service(memory_repo().await, Arc::new(FakeFactory::fresh()));
        let err = svc
            .create_account(AccountInput::default())
            .await
            .expect_err("empty input");
        assert!(matches!(err, FileServiceError::Validation(msg) if msg.contains("endpoint")));

        let account = svc.create_account(account_input("sk")).await.expect("create");
        assert!(account.id > 0);
        assert_eq!(account.status, 1);
    }

    #[tokio::test]
    async fn account_update_rotates_cached_client() {
        let factory = Arc::new(FakeFactory::fresh());
        let svc = service(memory_repo().await, factory.clone());
        let account = svc.create_account(account_input("sk")).await.expect("create");

        svc.clients.get_client(&account).expect("client");
        // identical input: no write, cached client kept
        svc.update_account(account.id, account_input("sk"))
            .await
            .expect("noop update");
        svc.clients.get_client(&account).expect("client");
        assert_eq!(factory.constructions(), 1);

        let updated = svc
            .update_account(account.id, account_input("rotated"))
            .await
            .expect("update");
        assert_eq!(updated.access_key_secret, "rotated");
        svc.clients.get_client(&updated).expect("client");
        assert_eq!(factory.constructions(), 2);
    }

    #[tokio::test]
    async fn account_delete_reports_whether_a_row_changed() {
        let svc = service(memory_repo().await, Arc::new(FakeFactory::fresh()));
        let account = svc.create_account(account_input("sk")).await.expect("create");

        assert!(svc.delete_account(account.id).await.expect("delete"));
        assert!(!svc.delete_account(account.id).await.expect("delete again"));
        assert!(matches!(
            svc.update_account(account.id, account_input("x")).await,
            Err(FileServiceError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn bucket_create_checks_account_and_name() {
        let repo = memory_repo().await;
        let account = seed_account(&repo, "oss-cn-hangzhou.aliyuncs.com").await;
        let svc = service(repo, Arc::new(FakeFactory::fresh()));

        assert!(matches!(
            svc.create_bucket(bucket_input(999, "avatars")).await,
            Err(FileServiceError::AccountNotFound(999))
        ));

        let bucket = svc
            .create_bucket(bucket_input(account.id, "avatars"))
            .await
            .expect("create");
        assert_eq!(bucket.bucket_type, BucketKind::Public);

        assert!(matches!(
            svc.create_bucket(bucket_input(account.id, "avatars")).await,
            Err(FileServiceError::Conflict(_))
        ));

        // the name is free again once the bucket is deleted
        assert!(svc.delete_bucket(bucket.id).await.expect("delete"));
        svc.create_bucket(bucket_input(account.id, "avatars"))
            .await
            .expect("recreate");
    }

    #[tokio::test]
    async fn bucket_update_persists_policy_and_rejects_bad_guard() {
        let repo = memory_repo().await;
        let account = seed_account(&repo, "oss-cn-hangzhou.aliyuncs.com").await;
        let svc = service(repo, Arc::new(FakeFactory::fresh()));
        let bucket = svc
            .create_bucket(bucket_input(account.id, "media"))
            .await
            .expect("create");

        let mut input = bucket_input(account.id, "media");
        input.process_config = Some(ProcessPolicy {
            expression: "hasSuffix(fileKey,".into(),
            process_params: Vec::new(),
        });
        assert!(matches!(
            svc.update_bucket(bucket.id, input.clone()).await,
            Err(FileServiceError::Validation(_))
        ));

        input.process_config = Some(ProcessPolicy {
            expression: "hasSuffix(fileKey, '.jpg')".into(),
            process_params: Vec::new(),
        });
        input.bucket_type = BucketKind::Private;
        let updated = svc.update_bucket(bucket.id, input).await.expect("update");
        assert_eq!(updated.bucket_type, BucketKind::Private);

        let page = svc
            .search_buckets(&PageParam::default())
            .await
            .expect("search");
        assert_eq!(page.total, 1);
        assert_eq!(
            page.data[0].process_config.as_ref().map(|p| p.expression.as_str()),
            Some("hasSuffix(fileKey, '.jpg')")
        );
    }
}
