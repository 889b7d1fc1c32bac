//! Upload parameters and the direct-upload credential handed to browsers.

use serde::{Deserialize, Deserializer, Serialize};

use super::process::TransformStep;

/// Upload parameters as bound from JSON bodies or multipart form fields.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadForm {
    pub bucket: String,
    pub prefix: String,
    pub file_key: String,
    pub source_file: String,
    pub source_file_size: i64,
    pub source_file_type: String,
    pub source_file_attr: String,
    #[serde(deserialize_with = "deserialize_flag")]
    pub use_source_filename: bool,
    pub expired_in_sec: i64,
    pub process_params: Vec<TransformStep>,
}

/// A single upload as seen by the orchestrator. Not persisted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UploadRequest {
    pub bucket: String,
    pub file_key: Option<String>,
    pub prefix: Option<String>,
    pub use_source_filename: bool,
    pub source_file: String,
    pub source_file_size: i64,
    pub source_file_type: String,
    pub source_file_attr: String,
    pub process_params: Vec<TransformStep>,
    pub expired_in_sec: Option<i64>,
}

impl From<UploadForm> for UploadRequest {
    fn from(form: UploadForm) -> Self {
        Self {
            bucket: form.bucket.trim().to_string(),
            file_key: non_empty(form.file_key),
            prefix: non_empty(form.prefix),
            use_source_filename: form.use_source_filename,
            source_file: form.source_file,
            source_file_size: form.source_file_size,
            source_file_type: form.source_file_type,
            source_file_attr: form.source_file_attr,
            process_params: form.process_params,
            expired_in_sec: (form.expired_in_sec > 0).then_some(form.expired_in_sec),
        }
    }
}

/// Credential for a browser-side POST upload straight to the bucket.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadToken {
    pub file_id: i64,
    pub upload_url: String,
    pub access_key_id: String,
    pub policy: String,
    pub signature: String,
    pub key: String,
    pub url: String,
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Interpret `1`, `true` (any case) and `yes` as set.
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

/// Accept a boolean, a 0/1 integer or a textual flag.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Int(value) => value != 0,
        Flag::Text(value) => parse_flag(&value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_accepts_integer_and_bool_flags() {
        let form: UploadForm =
            serde_json::from_str(r#"{"bucket":"a","useSourceFilename":1}"#).expect("json");
        assert!(form.use_source_filename);

        let form: UploadForm =
            serde_json::from_str(r#"{"bucket":"a","useSourceFilename":false}"#).expect("json");
        assert!(!form.use_source_filename);
    }

    #[test]
    fn request_normalizes_blank_fields() {
        let form = UploadForm {
            bucket: " photos ".into(),
            prefix: "  ".into(),
            file_key: String::new(),
            expired_in_sec: -5,
            ..Default::default()
        };
        let req = UploadRequest::from(form);
        assert_eq!(req.bucket, "photos");
        assert_eq!(req.prefix, None);
        assert_eq!(req.file_key, None);
        assert_eq!(req.expired_in_sec, None);
    }
}
