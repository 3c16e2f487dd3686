//! survey.record.v1 schema definition
//!
//! One record is one (subject, round) observation carrying a flat map of raw
//! item values. JSON `null` and omitted keys both mean "not collected".

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current schema version
pub const SCHEMA_VERSION: &str = "survey.record.v1";

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// Raw per-round survey record as delivered by the record source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyRecord {
    /// Opaque subject identifier, stable across rounds
    pub subject_id: String,
    /// Survey round (1-based, strictly increasing per subject)
    pub round: u32,
    /// Raw item values keyed by item name
    #[serde(default)]
    pub items: BTreeMap<String, Option<f64>>,
}

/// Envelope accepted on input; the schema version may be omitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEnvelope {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(flatten)]
    pub record: SurveyRecord,
}

impl SurveyRecord {
    pub fn new(subject_id: impl Into<String>, round: u32) -> Self {
        Self {
            subject_id: subject_id.into(),
            round,
            items: BTreeMap::new(),
        }
    }

    /// Add a raw item value
    pub fn with_item(mut self, name: impl Into<String>, value: Option<f64>) -> Self {
        self.items.insert(name.into(), value);
        self
    }

    /// Validate the record
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.subject_id.trim().is_empty() {
            return Err(ValidationError::EmptySubjectId);
        }
        if self.round == 0 {
            return Err(ValidationError::InvalidRound {
                subject_id: self.subject_id.clone(),
            });
        }
        if let Some((name, value)) = self
            .items
            .iter()
            .find_map(|(k, v)| v.filter(|x| !x.is_finite()).map(|x| (k, x)))
        {
            return Err(ValidationError::NonFiniteValue {
                item: name.clone(),
                value,
            });
        }
        Ok(())
    }
}

impl RecordEnvelope {
    /// Validate schema version and record contents
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }
        self.record.validate()
    }
}

/// Validation errors for survey records
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Record has an empty subject_id")]
    EmptySubjectId,

    #[error("Subject {subject_id} has round 0; rounds start at 1")]
    InvalidRound { subject_id: String },

    #[error("Item {item} has non-finite value {value}")]
    NonFiniteValue { item: String, value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_nulls() {
        let json =
            r#"{"subject_id": "S1", "round": 2, "items": {"dresid": 1, "hc_depressed": null}}"#;
        let envelope: RecordEnvelope = serde_json::from_str(json).unwrap();

        assert_eq!(envelope.schema_version, SCHEMA_VERSION);
        assert_eq!(envelope.record.round, 2);
        assert_eq!(envelope.record.items.get("dresid"), Some(&Some(1.0)));
        assert_eq!(envelope.record.items.get("hc_depressed"), Some(&None));
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(SurveyRecord::new("", 1).validate().is_err());
        assert!(SurveyRecord::new("S1", 0).validate().is_err());
        assert!(SurveyRecord::new("S1", 1)
            .with_item("x", Some(f64::NAN))
            .validate()
            .is_err());
        assert!(SurveyRecord::new("S1", 1).with_item("x", None).validate().is_ok());

        let envelope = RecordEnvelope {
            schema_version: "survey.record.v0".to_string(),
            record: SurveyRecord::new("S1", 1),
        };
        assert!(matches!(
            envelope.validate(),
            Err(ValidationError::InvalidSchemaVersion { .. })
        ));
    }
}
