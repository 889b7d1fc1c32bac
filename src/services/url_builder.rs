//! Access-URL construction for stored objects.

use tracing::warn;
use url::{Position, Url};

use crate::models::{
    account::Account,
    bucket::{Bucket, BucketKind},
    process::TransformStep,
};
use crate::services::{process_rule::resolve_steps, storage_client::StorageClient};

/// Lifetime of signed URLs when the caller does not ask for one.
pub const DEFAULT_EXPIRY_SECS: i64 = 3600;

/// Requested expiry, or the default when absent or not positive.
pub fn effective_expiry(expiry: Option<i64>) -> i64 {
    expiry.filter(|secs| *secs > 0).unwrap_or(DEFAULT_EXPIRY_SECS)
}

/// Build the protocol-relative URL clients use to fetch `key`.
///
/// Public buckets get a plain `//{domain}/{key}` link. Private buckets get
/// a signed link whose host is swapped for the custom domain when one is
/// configured. Signing failures are logged and yield an empty string.
pub fn build_url(
    client: &dyn StorageClient,
    account: &Account,
    bucket: &Bucket,
    key: &str,
    expiry: Option<i64>,
    steps: &[TransformStep],
) -> String {
    let process = resolve_steps(steps, bucket, key).process();

    match bucket.kind {
        BucketKind::Public => {
            let mut url = format!("//{}/{}", bucket.resolved_domain(account), key);
            if let Some(process) = process {
                url.push_str("?x-oss-process=");
                url.push_str(&process);
            }
            url
        }
        BucketKind::Private => {
            let signed = match client.sign_url(
                &bucket.name,
                key,
                effective_expiry(expiry),
                process.as_deref(),
            ) {
                Ok(signed) => signed,
                Err(err) => {
                    warn!(bucket = %bucket.name, key, error = %err, "failed to sign object url");
                    return String::new();
                }
            };
            protocol_relative(&signed, &bucket.domain)
        }
    }
}

/// Strip the scheme from `signed`, swapping in `domain` as host when set.
fn protocol_relative(signed: &str, domain: &str) -> String {
    let mut url = match Url::parse(signed) {
        Ok(url) => url,
        Err(err) => {
            warn!(error = %err, "signed url did not parse");
            return String::new();
        }
    };

    if !domain.is_empty() {
        let (host, port) = match domain.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => (host, Some(port)),
                Err(_) => (domain, None),
            },
            None => (domain, None),
        };
        if let Err(err) = url.set_host(Some(host)) {
            warn!(domain, error = %err, "custom domain rejected, keeping signed host");
        } else if url.set_port(port).is_err() {
            warn!(domain, "could not apply custom domain port");
        }
    }

    format!("//{}", &url[Position::BeforeHost..])
}
