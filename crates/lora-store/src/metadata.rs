//! `meta.json` sidecar written next to each adapter's weights.
//!
//! Writers always produce the full [`LoraMeta`] record. Readers are lenient:
//! the listing surface only needs four fields and tolerates any of them being
//! missing, so [`MetaFields`] pulls them out of arbitrary JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// File name of the metadata sidecar inside an adapter directory.
pub const META_FILE: &str = "meta.json";

/// Which trainer actually produced (or failed to produce) an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingMethod {
    /// The worker's in-process trainer.
    Native,
    /// An out-of-process trainer run from a generated config file.
    Subprocess,
    /// Neither trainer could run; the staged data is kept for a manual run.
    ManualSetup,
}

impl TrainingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingMethod::Native => "native",
            TrainingMethod::Subprocess => "subprocess",
            TrainingMethod::ManualSetup => "manual_setup",
        }
    }
}

impl fmt::Display for TrainingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full metadata record for a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraMeta {
    pub created_at: DateTime<Utc>,
    pub epochs: u32,
    pub rank: u32,
    pub num_files: u32,
    pub training_method: TrainingMethod,
    pub learning_rate: f64,
    pub batch_size: u32,
    pub save_every: u32,
}

/// The subset of metadata exposed by adapter listings.
///
/// `created_at` stays a raw JSON value because older runs may have written a
/// unix timestamp instead of an RFC 3339 string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaFields {
    pub created_at: Option<serde_json::Value>,
    pub epochs: Option<u64>,
    pub rank: Option<u64>,
    pub num_files: Option<u64>,
}

impl MetaFields {
    /// Extract listing fields from parsed JSON.
    ///
    /// Missing keys, `null`, and values of the wrong type all become `None`.
    /// Non-object JSON yields all-`None`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };

        Self {
            created_at: object.get("created_at").filter(|v| !v.is_null()).cloned(),
            epochs: object.get("epochs").and_then(|v| v.as_u64()),
            rank: object.get("rank").and_then(|v| v.as_u64()),
            num_files: object.get("num_files").and_then(|v| v.as_u64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_training_method_wire_names() {
        assert_eq!(serde_json::to_value(TrainingMethod::Native).unwrap(), json!("native"));
        assert_eq!(serde_json::to_value(TrainingMethod::Subprocess).unwrap(), json!("subprocess"));
        assert_eq!(
            serde_json::to_value(TrainingMethod::ManualSetup).unwrap(),
            json!("manual_setup")
        );
        assert_eq!(TrainingMethod::ManualSetup.to_string(), "manual_setup");
    }

    #[test]
    fn test_partial_meta_defaults_to_none() {
        let fields = MetaFields::from_json(&json!({"epochs": 50, "rank": 8}));
        assert_eq!(fields.epochs, Some(50));
        assert_eq!(fields.rank, Some(8));
        assert!(fields.created_at.is_none());
        assert!(fields.num_files.is_none());
    }

    #[test]
    fn test_wrong_types_are_dropped() {
        let fields = MetaFields::from_json(&json!({"epochs": "fifty", "created_at": null}));
        assert_eq!(fields, MetaFields::default());

        let fields = MetaFields::from_json(&json!([1, 2, 3]));
        assert_eq!(fields, MetaFields::default());
    }

    #[test]
    fn test_numeric_created_at_is_kept() {
        let fields = MetaFields::from_json(&json!({"created_at": 1735689600.5}));
        assert_eq!(fields.created_at, Some(json!(1735689600.5)));
    }

    #[test]
    fn test_full_meta_exposes_listing_fields() {
        let meta = LoraMeta {
            created_at: Utc::now(),
            epochs: 100,
            rank: 16,
            num_files: 3,
            training_method: TrainingMethod::Native,
            learning_rate: 1e-4,
            batch_size: 1,
            save_every: 50,
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["training_method"], "native");

        let fields = MetaFields::from_json(&value);
        assert_eq!(fields.epochs, Some(100));
        assert_eq!(fields.num_files, Some(3));
        assert!(fields.created_at.unwrap().is_string());
    }
}
