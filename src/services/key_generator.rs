//! Storage key derivation for new objects.

use uuid::Uuid;

use crate::models::upload::UploadRequest;

/// Derive the storage key for an upload.
///
/// An explicit key wins and is only lower-cased. Otherwise the key is the
/// lower-cased prefix (if any), a single `/`, and then either the source
/// filename verbatim or a fresh 128-bit id plus the lower-cased source
/// extension.
pub fn generate_key(req: &UploadRequest) -> String {
    if let Some(key) = req.file_key.as_deref() {
        return key.to_lowercase();
    }

    let mut key = String::new();

    if let Some(prefix) = req.prefix.as_deref() {
        let prefix = prefix.trim_end_matches('/');
        if !prefix.is_empty() {
            key.push_str(&prefix.to_lowercase());
            key.push('/');
        }
    }

    if req.use_source_filename {
        key.push_str(&req.source_file);
    } else {
        key.push_str(&Uuid::new_v4().simple().to_string());
        key.push_str(&extension(&req.source_file).to_lowercase());
    }

    key
}

/// Extension of the last path segment including the leading dot, or `""`.
pub fn extension(path: &str) -> &str {
    let segment_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[segment_start..].rfind('.') {
        Some(dot) => &path[segment_start + dot..],
        None => "",
    }
}
