//! Table encoding
//!
//! This module renders the modeling table and the feature tables as JSON
//! payloads. Every payload carries producer metadata and an explicit column
//! order; absent values are written as `null`.

use crate::error::PanelError;
use crate::temporal::FeatureTable;
use crate::types::{ModelingRow, Partition};
use crate::{PRODUCER_NAME, VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Current table payload schema version
pub const TABLE_SCHEMA_VERSION: &str = "cohort.table.v1";

/// Producer metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProducer {
    pub name: String,
    pub version: String,
    /// Identifies one encoder instance, shared by every table of a run
    pub run_id: String,
}

/// Encoded table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePayload {
    pub schema_version: String,
    pub producer: TableProducer,
    pub generated_at_utc: DateTime<Utc>,
    /// Table name, e.g. `modeling` or `features.train`
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

/// Encoder for modeling and feature tables
pub struct TableEncoder {
    run_id: String,
}

impl Default for TableEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableEncoder {
    /// Create a new encoder with a unique run ID
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific run ID
    pub fn with_run_id(run_id: String) -> Self {
        Self { run_id }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn payload(
        &self,
        table: &str,
        columns: Vec<String>,
        rows: Vec<Map<String, Value>>,
    ) -> TablePayload {
        TablePayload {
            schema_version: TABLE_SCHEMA_VERSION.to_string(),
            producer: TableProducer {
                name: PRODUCER_NAME.to_string(),
                version: VERSION.to_string(),
                run_id: self.run_id.clone(),
            },
            generated_at_utc: Utc::now(),
            table: table.to_string(),
            columns,
            rows,
        }
    }

    /// Encode the modeling table.
    ///
    /// Columns: subject_id, round, source_round, label, then `<index>_count`
    /// and `<index>_flag` per composite, then every recoded item seen.
    pub fn encode_modeling(&self, rows: &[ModelingRow]) -> TablePayload {
        let indices: BTreeSet<&String> = rows.iter().flat_map(|r| r.composites.keys()).collect();
        let items: BTreeSet<&String> = rows.iter().flat_map(|r| r.items.keys()).collect();

        let mut columns: Vec<String> = ["subject_id", "round", "source_round", "label"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for index in &indices {
            columns.push(format!("{}_count", index));
            columns.push(format!("{}_flag", index));
        }
        columns.extend(items.iter().map(|s| s.to_string()));

        let encoded = rows
            .iter()
            .map(|row| {
                let mut map = Map::new();
                map.insert("subject_id".to_string(), Value::from(row.subject_id.clone()));
                map.insert("round".to_string(), Value::from(row.round));
                map.insert("source_round".to_string(), Value::from(row.source_round));
                map.insert("label".to_string(), optional(row.label.map(f64::from)));
                for index in &indices {
                    let score = row.composites.get(*index);
                    map.insert(format!("{}_count", index), optional(score.map(|s| s.count)));
                    map.insert(
                        format!("{}_flag", index),
                        optional(score.map(|s| f64::from(s.flag))),
                    );
                }
                for item in &items {
                    map.insert(item.to_string(), optional(row.items.get(*item).copied().flatten()));
                }
                map
            })
            .collect();

        self.payload("modeling", columns, encoded)
    }

    /// Encode one partition's feature table.
    ///
    /// Columns: subject_id, round, source_round, label, then the feature
    /// columns in design-matrix order.
    pub fn encode_features(&self, table: &FeatureTable, partition: Partition) -> TablePayload {
        let mut columns: Vec<String> = ["subject_id", "round", "source_round", "label"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        columns.extend(table.column_names());

        let encoded = table
            .rows
            .iter()
            .map(|row| {
                let mut map = Map::new();
                map.insert("subject_id".to_string(), Value::from(row.subject_id.clone()));
                map.insert("round".to_string(), Value::from(row.round));
                map.insert("source_round".to_string(), Value::from(row.source_round));
                map.insert("label".to_string(), optional(row.label.map(f64::from)));
                for (name, value) in row.feature_columns() {
                    map.insert(name.clone(), optional(value));
                }
                map
            })
            .collect();

        self.payload(&format!("features.{}", partition.as_str()), columns, encoded)
    }

    /// Encode to a pretty JSON string
    pub fn to_json(&self, payload: &TablePayload) -> Result<String, PanelError> {
        serde_json::to_string_pretty(payload).map_err(PanelError::JsonError)
    }

    /// Encode rows as NDJSON, one row object per line
    pub fn to_ndjson(&self, payload: &TablePayload) -> Result<String, PanelError> {
        let mut out = String::new();
        for row in &payload.rows {
            out.push_str(&serde_json::to_string(row)?);
            out.push('\n');
        }
        Ok(out)
    }
}

fn optional(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}
