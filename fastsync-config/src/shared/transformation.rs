use serde::{Deserialize, Serialize};

/// Column transformations applied to loaded tables.
///
/// Mirrors the `transformations` section of a singer transformation file:
///
/// ```json
/// {"transformations": [
///     {"tap_stream_name": "public-users", "field_id": "email", "type": "HASH"}
/// ]}
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformationConfig {
    #[serde(default)]
    pub transformations: Vec<TransformationRule>,
}

impl TransformationConfig {
    /// Returns the rules that target the given stream, in configuration order.
    pub fn rules_for_stream<'a>(
        &'a self,
        stream_name: &'a str,
    ) -> impl Iterator<Item = &'a TransformationRule> + 'a {
        self.transformations
            .iter()
            .filter(move |rule| rule.tap_stream_name == stream_name)
    }
}

/// A single column transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationRule {
    /// Stream the rule applies to, `schema-table`.
    pub tap_stream_name: String,
    pub field_id: String,
    /// Pre-quoted column expression used instead of `field_id` when present.
    pub safe_field_id: Option<String>,
    /// Transformation type such as `HASH` or `HASH-SKIP-FIRST-3`.
    #[serde(rename = "type")]
    pub transform_type: String,
}
