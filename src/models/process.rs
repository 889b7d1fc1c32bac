//! Media-transformation instructions applied when resolving object URLs.

use serde::{Deserialize, Serialize};

/// One named transformation, e.g. `resize` with `["w_300"]`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TransformStep {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl TransformStep {
    pub fn new(name: impl Into<String>, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Transformation policy stored on a bucket as JSON.
///
/// With an empty `expression` the steps always apply; otherwise the
/// expression acts as a guard evaluated per object.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessPolicy {
    pub expression: String,
    pub process_params: Vec<TransformStep>,
}

/// Render steps as `name,p1,p2/name2,...`.
pub fn render_steps(steps: &[TransformStep]) -> String {
    let mut out = String::new();
    for (i, step) in steps.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(&step.name);
        for param in &step.params {
            out.push(',');
            out.push_str(param);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_steps_with_and_without_params() {
        let steps = vec![
            TransformStep::new("image/resize", &["w_300", "h_200"]),
            TransformStep::new("image/auto-orient", &[]),
        ];
        assert_eq!(
            render_steps(&steps),
            "image/resize,w_300,h_200/image/auto-orient"
        );
    }

    #[test]
    fn policy_deserializes_with_missing_fields() {
        let policy: ProcessPolicy =
            serde_json::from_str(r#"{"processParams":[{"name":"resize","params":["w_100"]}]}"#)
                .expect("valid policy json");
        assert!(policy.expression.is_empty());
        assert_eq!(policy.process_params.len(), 1);
    }
}
