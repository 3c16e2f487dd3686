//! Temporal feature engineering
//!
//! This module derives per-subject temporal features from the modeling table:
//! - Lag-1 values of chosen columns (and of interaction terms)
//! - Running, causal cumulative means
//! - Pairwise interaction products
//!
//! Rows are streamed per subject in round order through a small carried state
//! ([`SubjectFeatureState`]). A fresh state is created for every subject, so a
//! lag can never read another subject's data.

use crate::error::PanelError;
use crate::split::reorigin;
use crate::types::{FeatureRow, ItemValues, ModelingRow};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default number of most recent rounds kept per subject
pub const DEFAULT_TRIM_LAST: usize = 3;

/// Composite indices whose flag and count are lagged by default
const COMPOSITE_INDICES: [&str; 7] = [
    "mental_health",
    "social_participation",
    "limited_social_network",
    "new_condition",
    "healthcare_access",
    "cognition",
    "financial_need",
];

/// Which temporal features to build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSpec {
    /// Columns to lag by one round
    pub lag: Vec<String>,
    /// Columns to accumulate as a running mean
    pub cumulative_mean: Vec<String>,
    /// Column pairs multiplied elementwise; products are also lagged
    pub interactions: Vec<(String, String)>,
    /// Keep only the last k rounds per subject before computing features
    pub trim_last: Option<usize>,
    /// Drop rows with any undefined lag feature
    pub drop_incomplete: bool,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self {
            lag: COMPOSITE_INDICES
                .iter()
                .flat_map(|index| [format!("{}_flag", index), format!("{}_count", index)])
                .collect(),
            cumulative_mean: vec!["mental_health_count".to_string()],
            interactions: vec![
                (
                    "mental_health_flag".to_string(),
                    "limited_social_network_flag".to_string(),
                ),
                ("new_condition_flag".to_string(), "cognition_flag".to_string()),
            ],
            trim_last: Some(DEFAULT_TRIM_LAST),
            drop_incomplete: true,
        }
    }
}

/// Column name for an interaction term
pub fn interaction_name(left: &str, right: &str) -> String {
    format!("interaction_{}_x_{}", left, right)
}

/// Column name for a lagged column
pub fn lag_name(column: &str) -> String {
    format!("lag_{}", column)
}

/// Column name for a cumulative mean
pub fn cumulative_name(column: &str) -> String {
    format!("cumulative_mean_{}", column)
}

/// Shift a sequence by one position: `out[0]` is undefined, `out[i] = seq[i-1]`
pub fn lag1(seq: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(seq.len());
    if seq.is_empty() {
        return out;
    }
    out.push(None);
    out.extend_from_slice(&seq[..seq.len() - 1]);
    out
}

/// Running mean of the present values in `seq[0..=i]`.
///
/// Undefined until the first present value. Only current and past positions
/// contribute.
pub fn cumulative_mean(seq: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut sum = 0.0;
    let mut count = 0u32;
    seq.iter()
        .map(|value| {
            if let Some(v) = value {
                sum += v;
                count += 1;
            }
            (count > 0).then(|| sum / f64::from(count))
        })
        .collect()
}

/// Elementwise product; undefined where either operand is undefined.
///
/// Pairs elements up to the shorter of the two sequences.
pub fn interaction(a: &[Option<f64>], b: &[Option<f64>]) -> Vec<Option<f64>> {
    a.iter()
        .zip(b)
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some(x * y),
            _ => None,
        })
        .collect()
}

/// Keep the `k` most recent rows of a round-ordered subject sequence
pub fn trim_last_k<T>(mut rows: Vec<T>, k: usize) -> Vec<T> {
    if rows.len() > k {
        rows.drain(..rows.len() - k);
    }
    rows
}

/// Carried state for one subject while streaming its rows in round order
#[derive(Debug, Clone, Default)]
pub struct SubjectFeatureState {
    /// Values of the lagged columns at the previous round
    previous: Option<ItemValues>,
    /// Running (sum, count) per cumulative column
    running: BTreeMap<String, (f64, u32)>,
}

impl SubjectFeatureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Previous-round value of a column; undefined on the first round
    pub fn lag(&self, column: &str) -> Option<f64> {
        self.previous
            .as_ref()
            .and_then(|prev| prev.get(column).copied().flatten())
    }

    /// Record this round's lag-source values for the next round
    pub fn observe(&mut self, values: ItemValues) {
        self.previous = Some(values);
    }

    /// Add a value to a running mean and return the updated mean
    pub fn accumulate(&mut self, column: &str, value: Option<f64>) -> Option<f64> {
        let entry = self.running.entry(column.to_string()).or_insert((0.0, 0));
        if let Some(v) = value {
            entry.0 += v;
            entry.1 += 1;
        }
        (entry.1 > 0).then(|| entry.0 / f64::from(entry.1))
    }
}

/// Feature rows for one partition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub rows: Vec<FeatureRow>,
    /// Rows removed because a lag feature was undefined
    pub dropped_incomplete: usize,
}

/// Model-ready matrix extracted from a feature table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesignMatrix {
    pub columns: Vec<String>,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<u8>,
    /// Subject of each matrix row
    pub subjects: Vec<String>,
}

impl DesignMatrix {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct subjects present in the table
    pub fn subjects(&self) -> BTreeSet<&str> {
        self.rows.iter().map(|r| r.subject_id.as_str()).collect()
    }

    /// Feature column names, in the order used by [`FeatureTable::design_matrix`]
    pub fn column_names(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| row.feature_columns().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    /// Complete-case matrix: rows with a defined label and every feature defined
    pub fn design_matrix(&self) -> DesignMatrix {
        let columns = self.column_names();
        let mut matrix = DesignMatrix {
            columns,
            ..Default::default()
        };

        for row in &self.rows {
            let Some(label) = row.label else { continue };
            let values: Option<Vec<f64>> = row.feature_columns().map(|(_, v)| v).collect();
            if let Some(values) = values {
                matrix.x.push(values);
                matrix.y.push(label);
                matrix.subjects.push(row.subject_id.clone());
            }
        }

        let skipped = self.rows.len() - matrix.x.len();
        if skipped > 0 {
            log::debug!("Design matrix skipped {} incomplete row(s)", skipped);
        }
        matrix
    }
}

/// Builds temporal feature rows subject by subject
#[derive(Debug, Clone, Default)]
pub struct TemporalFeatureBuilder {
    spec: FeatureSpec,
}

impl TemporalFeatureBuilder {
    pub fn new(spec: FeatureSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    /// Build feature rows for one subject's round-ordered rows.
    ///
    /// Applies `trim_last`, re-origins the kept rounds so the first is 0, then
    /// streams rows through a fresh [`SubjectFeatureState`]. Does not apply
    /// the row-drop policy.
    pub fn build_subject(&self, rows: Vec<ModelingRow>) -> Result<Vec<FeatureRow>, PanelError> {
        let rows = match self.spec.trim_last {
            Some(k) => trim_last_k(rows, k),
            None => rows,
        };
        let rows = reorigin(rows);

        let mut state = SubjectFeatureState::new();
        rows.iter().map(|row| self.advance(&mut state, row)).collect()
    }

    fn advance(
        &self,
        state: &mut SubjectFeatureState,
        row: &ModelingRow,
    ) -> Result<FeatureRow, PanelError> {
        let flags: BTreeMap<String, f64> = row
            .composites
            .iter()
            .map(|(name, score)| (format!("{}_flag", name), f64::from(score.flag)))
            .collect();

        // composite flags are already feature columns; `current` holds the rest
        let mut current = ItemValues::new();
        let mut sources = ItemValues::new();

        for column in &self.spec.lag {
            let value = resolve(row, column)?;
            if !flags.contains_key(column) {
                current.insert(column.clone(), value);
            }
            sources.insert(column.clone(), value);
        }

        let mut interactions = ItemValues::new();
        for (left, right) in &self.spec.interactions {
            let name = interaction_name(left, right);
            let product = interaction(&[resolve(row, left)?], &[resolve(row, right)?])[0];
            interactions.insert(name.clone(), product);
            sources.insert(name, product);
        }

        let lags: ItemValues = sources
            .keys()
            .map(|column| (lag_name(column), state.lag(column)))
            .collect();

        let mut cumulative = ItemValues::new();
        for column in &self.spec.cumulative_mean {
            let value = resolve(row, column)?;
            if !flags.contains_key(column) {
                current.insert(column.clone(), value);
            }
            cumulative.insert(cumulative_name(column), state.accumulate(column, value));
        }

        state.observe(sources);

        Ok(FeatureRow {
            subject_id: row.subject_id.clone(),
            round: row.round,
            source_round: row.source_round,
            label: row.label,
            flags,
            current,
            lags,
            interactions,
            cumulative,
        })
    }

    /// Build the feature table for a set of modeling rows.
    ///
    /// Rows are grouped by subject and each subject is processed
    /// independently in parallel; output keeps subject then round order.
    pub fn build_table(&self, rows: Vec<ModelingRow>) -> Result<FeatureTable, PanelError> {
        let mut by_subject: BTreeMap<String, Vec<ModelingRow>> = BTreeMap::new();
        for row in rows {
            by_subject.entry(row.subject_id.clone()).or_default().push(row);
        }
        let groups: Vec<Vec<ModelingRow>> = by_subject
            .into_values()
            .map(|mut subject_rows| {
                subject_rows.sort_by_key(|r| r.round);
                subject_rows
            })
            .collect();

        let per_subject: Vec<Vec<FeatureRow>> = groups
            .into_par_iter()
            .map(|subject_rows| self.build_subject(subject_rows))
            .collect::<Result<_, _>>()?;

        let built: Vec<FeatureRow> = per_subject.into_iter().flatten().collect();
        let total = built.len();

        let rows: Vec<FeatureRow> = if self.spec.drop_incomplete {
            built.into_iter().filter(FeatureRow::has_complete_lags).collect()
        } else {
            built
        };
        let dropped_incomplete = total - rows.len();

        log::info!(
            "Built {} feature row(s); dropped {} with undefined lag features",
            rows.len(),
            dropped_incomplete
        );

        Ok(FeatureTable {
            rows,
            dropped_incomplete,
        })
    }
}

fn resolve(row: &ModelingRow, column: &str) -> Result<Option<f64>, PanelError> {
    row.column(column)
        .ok_or_else(|| PanelError::UnknownColumn(column.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CompositeScore;
    use pretty_assertions::assert_eq;

    fn score(count: f64) -> CompositeScore {
        CompositeScore {
            count,
            flag: u8::from(count >= 1.0),
            items_present: 2,
        }
    }

    fn row(subject: &str, round: u32, mental: f64, network: f64, label: u8) -> ModelingRow {
        let mut composites = BTreeMap::new();
        composites.insert("mental_health".to_string(), score(mental));
        composites.insert("limited_social_network".to_string(), score(network));
        ModelingRow {
            subject_id: subject.to_string(),
            round,
            source_round: round + 1,
            label: Some(label),
            composites,
            items: BTreeMap::new(),
        }
    }

    fn small_spec() -> FeatureSpec {
        FeatureSpec {
            lag: vec!["mental_health_count".to_string()],
            cumulative_mean: vec!["mental_health_count".to_string()],
            interactions: vec![(
                "mental_health_flag".to_string(),
                "limited_social_network_flag".to_string(),
            )],
            trim_last: None,
            drop_incomplete: true,
        }
    }

    #[test]
    fn test_lag1() {
        let seq = [Some(1.0), None, Some(3.0)];
        assert_eq!(lag1(&seq), vec![None, Some(1.0), None]);
        assert!(lag1(&[]).is_empty());
        assert_eq!(lag1(&[Some(5.0)]), vec![None]);
    }

    #[test]
    fn test_cumulative_mean() {
        let seq = [Some(2.0), Some(4.0), None, Some(0.0)];
        assert_eq!(cumulative_mean(&seq), vec![Some(2.0), Some(3.0), Some(3.0), Some(2.0)]);
        assert_eq!(cumulative_mean(&[None, Some(1.0)]), vec![None, Some(1.0)]);
    }

    #[test]
    fn test_cumulative_mean_is_causal() {
        let base = vec![Some(1.0), Some(0.0), Some(2.0), Some(5.0), Some(1.0)];
        let reference = cumulative_mean(&base);
        for i in 0..base.len() - 1 {
            for replacement in [None, Some(-10.0), Some(100.0)] {
                let mut changed = base.clone();
                changed[i + 1] = replacement;
                let result = cumulative_mean(&changed);
                assert_eq!(result[..=i].to_vec(), reference[..=i].to_vec());
            }
        }
    }

    #[test]
    fn test_interaction() {
        let a = [Some(1.0), Some(0.0), None, Some(2.0)];
        let b = [Some(1.0), Some(1.0), Some(1.0), Some(3.0)];
        assert_eq!(interaction(&a, &b), vec![Some(1.0), Some(0.0), None, Some(6.0)]);
    }

    #[test]
    fn test_trim_last_k() {
        assert_eq!(trim_last_k(vec![1, 2, 3, 4, 5], 3), vec![3, 4, 5]);
        assert_eq!(trim_last_k(vec![1, 2], 3), vec![1, 2]);
        assert_eq!(trim_last_k(vec![1, 2], 0), Vec::<i32>::new());
    }

    #[test]
    fn test_build_subject_matches_sequence_functions() {
        let builder = TemporalFeatureBuilder::new(small_spec());
        let rows = vec![
            row("S1", 0, 0.0, 1.0, 0),
            row("S1", 1, 2.0, 1.0, 0),
            row("S1", 2, 1.0, 0.0, 1),
        ];
        let mental: Vec<Option<f64>> = rows
            .iter()
            .map(|r| r.column("mental_health_count").unwrap())
            .collect();
        let mental_flag: Vec<Option<f64>> = rows
            .iter()
            .map(|r| r.column("mental_health_flag").unwrap())
            .collect();
        let network_flag: Vec<Option<f64>> = rows
            .iter()
            .map(|r| r.column("limited_social_network_flag").unwrap())
            .collect();

        let features = builder.build_subject(rows).unwrap();
        let products = interaction(&mental_flag, &network_flag);
        let key = interaction_name("mental_health_flag", "limited_social_network_flag");

        let lags: Vec<Option<f64>> = features
            .iter()
            .map(|f| f.lags["lag_mental_health_count"])
            .collect();
        let cumulative: Vec<Option<f64>> = features
            .iter()
            .map(|f| f.cumulative["cumulative_mean_mental_health_count"])
            .collect();
        let lagged_products: Vec<Option<f64>> =
            features.iter().map(|f| f.lags[&lag_name(&key)]).collect();
        let current_products: Vec<Option<f64>> =
            features.iter().map(|f| f.interactions[&key]).collect();

        assert_eq!(lags, lag1(&mental));
        assert_eq!(cumulative, cumulative_mean(&mental));
        assert_eq!(current_products, products);
        assert_eq!(lagged_products, lag1(&products));
    }

    #[test]
    fn test_first_round_lags_undefined() {
        let builder = TemporalFeatureBuilder::new(small_spec());
        let features = builder
            .build_subject(vec![row("S1", 0, 1.0, 1.0, 0), row("S1", 1, 1.0, 1.0, 0)])
            .unwrap();

        assert!(features[0].lags.values().all(Option::is_none));
        assert!(features[1].has_complete_lags());
    }

    #[test]
    fn test_lag_never_crosses_subjects() {
        let builder = TemporalFeatureBuilder::new(small_spec());
        let rows = vec![
            row("A", 0, 5.0, 0.0, 0),
            row("A", 1, 6.0, 0.0, 0),
            row("B", 0, 1.0, 0.0, 0),
            row("B", 1, 2.0, 0.0, 1),
        ];
        let spec = FeatureSpec {
            drop_incomplete: false,
            ..small_spec()
        };
        let table = TemporalFeatureBuilder::new(spec).build_table(rows.clone()).unwrap();

        let b_first = table
            .rows
            .iter()
            .find(|r| r.subject_id == "B" && r.round == 0)
            .unwrap();
        assert_eq!(b_first.lags["lag_mental_health_count"], None);
        assert_eq!(b_first.cumulative["cumulative_mean_mental_health_count"], Some(1.0));

        // Dropping incomplete rows removes exactly one row per subject
        let dropped = builder.build_table(rows).unwrap();
        assert_eq!(dropped.dropped_incomplete, 2);
        assert_eq!(dropped.len(), 2);
        assert!(dropped.rows.iter().all(|r| r.round == 1));
    }

    #[test]
    fn test_build_table_order_independent_of_input_order() {
        let builder = TemporalFeatureBuilder::new(small_spec());
        let rows = vec![
            row("B", 1, 2.0, 0.0, 1),
            row("A", 1, 6.0, 0.0, 0),
            row("B", 0, 1.0, 0.0, 0),
            row("A", 0, 5.0, 0.0, 0),
        ];
        let table = builder.build_table(rows).unwrap();
        let order: Vec<(&str, u32)> = table
            .rows
            .iter()
            .map(|r| (r.subject_id.as_str(), r.round))
            .collect();
        assert_eq!(order, vec![("A", 1), ("B", 1)]);
        assert_eq!(table.rows[0].lags["lag_mental_health_count"], Some(5.0));
    }

    #[test]
    fn test_trim_applies_before_features() {
        let spec = FeatureSpec {
            trim_last: Some(2),
            drop_incomplete: false,
            ..small_spec()
        };
        let builder = TemporalFeatureBuilder::new(spec);
        let features = builder
            .build_subject(vec![
                row("S1", 0, 9.0, 0.0, 0),
                row("S1", 1, 1.0, 0.0, 0),
                row("S1", 2, 3.0, 0.0, 0),
            ])
            .unwrap();

        assert_eq!(features.len(), 2);
        // kept rounds are re-origined after trimming
        assert_eq!(features[0].round, 0);
        assert_eq!(features[0].source_round, 2);
        assert_eq!(features[1].round, 1);
        assert_eq!(features[0].lags["lag_mental_health_count"], None);
        // the trimmed round does not leak into the running mean
        assert_eq!(features[1].cumulative["cumulative_mean_mental_health_count"], Some(2.0));
    }

    #[test]
    fn test_flag_columns_appear_once() {
        let spec = FeatureSpec {
            lag: vec![
                "mental_health_flag".to_string(),
                "mental_health_count".to_string(),
            ],
            cumulative_mean: vec!["limited_social_network_flag".to_string()],
            ..small_spec()
        };
        let features = TemporalFeatureBuilder::new(spec)
            .build_subject(vec![row("S1", 0, 1.0, 0.0, 0), row("S1", 1, 2.0, 1.0, 0)])
            .unwrap();

        let current: Vec<&String> = features[1].current.keys().collect();
        assert_eq!(current, vec!["mental_health_count"]);

        let columns: Vec<&String> = features[1].feature_columns().map(|(k, _)| k).collect();
        let unique: BTreeSet<&String> = columns.iter().copied().collect();
        assert_eq!(columns.len(), unique.len());
        assert_eq!(features[1].lags["lag_mental_health_flag"], Some(1.0));
    }

    #[test]
    fn test_default_spec_lags_counts_and_flags() {
        let spec = FeatureSpec::default();
        for index in COMPOSITE_INDICES {
            assert!(spec.lag.contains(&format!("{}_flag", index)));
            assert!(spec.lag.contains(&format!("{}_count", index)));
        }
    }

    #[test]
    fn test_unknown_column() {
        let spec = FeatureSpec {
            lag: vec!["no_such_column".to_string()],
            ..small_spec()
        };
        let err = TemporalFeatureBuilder::new(spec)
            .build_subject(vec![row("S1", 0, 1.0, 0.0, 0)])
            .unwrap_err();
        assert!(matches!(err, PanelError::UnknownColumn(c) if c == "no_such_column"));
    }

    #[test]
    fn test_design_matrix() {
        let builder = TemporalFeatureBuilder::new(small_spec());
        let mut rows = vec![
            row("A", 0, 1.0, 1.0, 0),
            row("A", 1, 2.0, 0.0, 1),
            row("B", 0, 0.0, 1.0, 0),
            row("B", 1, 1.0, 1.0, 0),
        ];
        rows[3].label = None;
        let table = builder.build_table(rows).unwrap();
        let matrix = table.design_matrix();

        assert_eq!(matrix.x.len(), 1);
        assert_eq!(matrix.y, vec![1]);
        assert_eq!(matrix.subjects, vec!["A".to_string()]);
        assert_eq!(matrix.columns.len(), matrix.x[0].len());
        assert!(matrix.columns.contains(&"lag_mental_health_count".to_string()));
    }
}
