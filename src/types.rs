//! Core types for the cohort-flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: recoded records, composite-scored records, labeled records, the
//! flat modeling row and the temporal feature row.
//!
//! Every stage wraps the output of the previous one instead of mutating it, so
//! the raw survey value stays reachable for auditing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Item values keyed by item name. `None` is the universal "absent" marker,
/// distinct from a legitimate zero.
pub type ItemValues = BTreeMap<String, Option<f64>>;

/// A single (subject, round) record after sentinel recoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecodedRecord {
    /// Opaque subject identifier, stable across rounds
    pub subject_id: String,
    /// Survey round as recorded in the source
    pub round: u32,
    /// Raw values exactly as ingested
    pub raw: ItemValues,
    /// Recoded values for every item that has a recoding rule
    pub values: ItemValues,
}

impl RecodedRecord {
    /// Look up a recoded value. Returns `None` if the item was not recoded,
    /// `Some(None)` if it was recoded to absent.
    pub fn value(&self, item: &str) -> Option<Option<f64>> {
        self.values.get(item).copied()
    }
}

/// Result of aggregating a composite index on one record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    /// Sum of present constituent values (absent counts as 0)
    pub count: f64,
    /// 1 if `count >= threshold`, else 0
    pub flag: u8,
    /// Number of constituent items that were not absent
    pub items_present: u32,
}

/// Record with all configured composite indices attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    /// Source recoded record
    pub recoded: RecodedRecord,
    /// Composite scores keyed by index name
    pub composites: BTreeMap<String, CompositeScore>,
}

/// Three-way residence bucket used to derive the terminal label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidenceStatus {
    /// Community-dwelling (label 0)
    Community,
    /// Skilled-nursing or hospitalized (label 1)
    Terminal,
    /// Unknown or other residence code (label missing)
    Unknown,
}

impl ResidenceStatus {
    /// Binary label for this status; `None` when the status is unknown
    pub fn flag(&self) -> Option<u8> {
        match self {
            ResidenceStatus::Community => Some(0),
            ResidenceStatus::Terminal => Some(1),
            ResidenceStatus::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResidenceStatus::Community => "community",
            ResidenceStatus::Terminal => "terminal",
            ResidenceStatus::Unknown => "unknown",
        }
    }
}

/// Record with its terminal-status label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRecord {
    /// Source scored record
    pub scored: ScoredRecord,
    /// Raw residence code the label was derived from
    pub residence_code: Option<f64>,
    /// Residence bucket
    pub residence: ResidenceStatus,
}

impl LabeledRecord {
    pub fn subject_id(&self) -> &str {
        &self.scored.recoded.subject_id
    }

    pub fn round(&self) -> u32 {
        self.scored.recoded.round
    }

    /// Terminal label: 0, 1 or missing
    pub fn label(&self) -> Option<u8> {
        self.residence.flag()
    }
}

/// One row of the modeling table handed to the model collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelingRow {
    pub subject_id: String,
    /// Round index; equals `source_round` until the row is re-origined
    pub round: u32,
    /// Round as recorded in the survey
    pub source_round: u32,
    pub label: Option<u8>,
    pub composites: BTreeMap<String, CompositeScore>,
    /// Recoded item values
    pub items: ItemValues,
}

impl ModelingRow {
    /// Resolve a named numeric column.
    ///
    /// `<index>_count` and `<index>_flag` resolve to composite scores, any other
    /// name to a recoded item. Returns `None` when the column does not exist.
    pub fn column(&self, name: &str) -> Option<Option<f64>> {
        if let Some(index) = name.strip_suffix("_count") {
            if let Some(score) = self.composites.get(index) {
                return Some(Some(score.count));
            }
        }
        if let Some(index) = name.strip_suffix("_flag") {
            if let Some(score) = self.composites.get(index) {
                return Some(Some(f64::from(score.flag)));
            }
        }
        self.items.get(name).copied()
    }
}

impl From<&LabeledRecord> for ModelingRow {
    fn from(record: &LabeledRecord) -> Self {
        let recoded = &record.scored.recoded;
        Self {
            subject_id: recoded.subject_id.clone(),
            round: recoded.round,
            source_round: recoded.round,
            label: record.label(),
            composites: record.scored.composites.clone(),
            items: recoded.values.clone(),
        }
    }
}

/// Train/test partition a subject is assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Train,
    Test,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Test => "test",
        }
    }
}

/// One (subject, round) row of the temporal feature table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub subject_id: String,
    /// Re-origined round (0 = first retained round)
    pub round: u32,
    pub source_round: u32,
    pub label: Option<u8>,
    /// Composite flags at this round, keyed `<index>_flag`
    pub flags: BTreeMap<String, f64>,
    /// Current values of the lagged and cumulative source columns
    pub current: ItemValues,
    /// `lag_<col>` and `lag_interaction_<a>_x_<b>` columns
    pub lags: ItemValues,
    /// `interaction_<a>_x_<b>` columns
    pub interactions: ItemValues,
    /// `cumulative_mean_<col>` columns
    pub cumulative: ItemValues,
}

impl FeatureRow {
    /// True when every lag feature is defined
    pub fn has_complete_lags(&self) -> bool {
        self.lags.values().all(Option::is_some)
    }

    /// All model-facing feature columns in a stable order
    pub fn feature_columns(&self) -> impl Iterator<Item = (&String, Option<f64>)> {
        self.flags
            .iter()
            .map(|(k, v)| (k, Some(*v)))
            .chain(self.current.iter().map(|(k, v)| (k, *v)))
            .chain(self.lags.iter().map(|(k, v)| (k, *v)))
            .chain(self.interactions.iter().map(|(k, v)| (k, *v)))
            .chain(self.cumulative.iter().map(|(k, v)| (k, *v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_row() -> ModelingRow {
        let mut composites = BTreeMap::new();
        composites.insert(
            "cognition".to_string(),
            CompositeScore {
                count: 2.0,
                flag: 1,
                items_present: 2,
            },
        );
        let mut items = ItemValues::new();
        items.insert("cg_memory_poor".to_string(), Some(1.0));
        items.insert("hc_depressed".to_string(), None);
        ModelingRow {
            subject_id: "S1".to_string(),
            round: 1,
            source_round: 1,
            label: Some(0),
            composites,
            items,
        }
    }

    #[test]
    fn test_column_resolution() {
        let row = make_row();
        assert_eq!(row.column("cognition_count"), Some(Some(2.0)));
        assert_eq!(row.column("cognition_flag"), Some(Some(1.0)));
        assert_eq!(row.column("cg_memory_poor"), Some(Some(1.0)));
        assert_eq!(row.column("hc_depressed"), Some(None));
        assert_eq!(row.column("not_a_column"), None);
        assert_eq!(row.column("financial_need_flag"), None);
    }

    #[test]
    fn test_residence_flags() {
        assert_eq!(ResidenceStatus::Community.flag(), Some(0));
        assert_eq!(ResidenceStatus::Terminal.flag(), Some(1));
        assert_eq!(ResidenceStatus::Unknown.flag(), None);
    }
}
