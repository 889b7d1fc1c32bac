//! Decides which media transformations apply to an object URL.

use tracing::warn;

use crate::models::{
    bucket::Bucket,
    process::{ProcessPolicy, TransformStep, render_steps},
};
use crate::services::{
    expression::{self, Context},
    key_generator::extension,
};

/// Outcome of resolving transformations for one object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Steps(Vec<TransformStep>),
    NoOp,
}

impl Resolution {
    /// Rendered `x-oss-process` value, if any step applies.
    pub fn process(&self) -> Option<String> {
        match self {
            Self::Steps(steps) if !steps.is_empty() => Some(render_steps(steps)),
            _ => None,
        }
    }
}

/// Resolve the steps for `key` in `bucket`.
///
/// Caller overrides win outright. Otherwise the bucket's stored policy
/// applies, unconditionally when its expression is empty and only when the
/// expression evaluates to `true` otherwise. Malformed policies and
/// expressions are logged and resolve to [`Resolution::NoOp`].
pub fn resolve_steps(overrides: &[TransformStep], bucket: &Bucket, key: &str) -> Resolution {
    if !overrides.is_empty() {
        return Resolution::Steps(overrides.to_vec());
    }

    let Some(raw) = bucket.process_config.as_deref().filter(|raw| !raw.trim().is_empty()) else {
        return Resolution::NoOp;
    };

    let policy: ProcessPolicy = match serde_json::from_str(raw) {
        Ok(policy) => policy,
        Err(err) => {
            warn!(bucket = %bucket.name, error = %err, "ignoring malformed process policy");
            return Resolution::NoOp;
        }
    };
    if policy.process_params.is_empty() {
        return Resolution::NoOp;
    }

    let guard = policy.expression.trim();
    if guard.is_empty() {
        return Resolution::Steps(policy.process_params);
    }

    let ctx = Context {
        bucket: &bucket.name,
        file_key: key,
        file_type: extension(key),
    };
    match expression::evaluate(guard, &ctx) {
        Ok(true) => Resolution::Steps(policy.process_params),
        Ok(false) => Resolution::NoOp,
        Err(err) => {
            warn!(
                bucket = %bucket.name,
                expression = guard,
                error = %err,
                "process policy guard failed to evaluate"
            );
            Resolution::NoOp
        }
    }
}
