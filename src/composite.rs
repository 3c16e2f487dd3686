//! Composite index derivation
//!
//! This module aggregates recoded binary items into composite scores:
//! - Count: sum of present constituent values, absent treated as 0
//! - Flag: count thresholded to binary (default threshold 1)
//!
//! Absent items contribute 0 rather than marking the composite missing
//! (additive imputation). `items_present` keeps the imputation visible.

use crate::error::PanelError;
use crate::recode::RecodeTable;
use crate::types::{CompositeScore, RecodedRecord, ScoredRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default flag threshold for composite indices
pub const DEFAULT_COMPOSITE_THRESHOLD: f64 = 1.0;

fn default_threshold() -> f64 {
    DEFAULT_COMPOSITE_THRESHOLD
}

/// Named group of constituent items with a flag threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeIndex {
    /// Index name, used as the `<name>_count` / `<name>_flag` column prefix
    pub name: String,
    /// Constituent recoded items
    pub items: Vec<String>,
    /// Flag is 1 when `count >= threshold`
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl CompositeIndex {
    pub fn new(name: &str, items: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            items: items.iter().map(|s| s.to_string()).collect(),
            threshold: DEFAULT_COMPOSITE_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

/// Compute `(count, flag)` for one index over one record.
///
/// Every item name must have a recoding rule; an unruled name is a
/// configuration error reported with the offending item.
pub fn build_index(
    table: &RecodeTable,
    record: &RecodedRecord,
    item_names: &[String],
    threshold: f64,
) -> Result<CompositeScore, PanelError> {
    let mut count = 0.0;
    let mut items_present = 0u32;

    for name in item_names {
        if !table.contains(name) {
            return Err(PanelError::UnknownItem(name.clone()));
        }
        if let Some(value) = record.value(name).flatten() {
            count += value;
            items_present += 1;
        }
    }

    Ok(CompositeScore {
        count,
        flag: u8::from(count >= threshold),
        items_present,
    })
}

/// Applies a fixed set of composite indices to records
pub struct CompositeBuilder<'a> {
    table: &'a RecodeTable,
    indices: &'a [CompositeIndex],
}

impl<'a> CompositeBuilder<'a> {
    /// Create a builder, failing fast if any index references an unruled item
    pub fn new(table: &'a RecodeTable, indices: &'a [CompositeIndex]) -> Result<Self, PanelError> {
        for index in indices {
            if let Some(missing) = index.items.iter().find(|item| !table.contains(item)) {
                return Err(PanelError::UnknownItem(missing.clone()));
            }
        }
        Ok(Self { table, indices })
    }

    /// Score every configured index on a record
    pub fn score_record(&self, recoded: RecodedRecord) -> Result<ScoredRecord, PanelError> {
        let mut composites = BTreeMap::new();
        for index in self.indices {
            let score = build_index(self.table, &recoded, &index.items, index.threshold)?;
            composites.insert(index.name.clone(), score);
        }
        Ok(ScoredRecord {
            recoded,
            composites,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recode::{BinaryRule, ItemRule, SentinelSet};
    use crate::schema::SurveyRecord;

    fn make_table() -> RecodeTable {
        let rules: Vec<ItemRule> = ["pa_visit_limited", "pa_religious_limited", "pa_club_limited"]
            .iter()
            .map(|name| ItemRule::new(name, SentinelSet::standard_with([]), BinaryRule::YesNo))
            .collect();
        RecodeTable::new(&rules).unwrap()
    }

    fn make_record(values: [Option<f64>; 3]) -> RecodedRecord {
        let record = SurveyRecord::new("S1", 1)
            .with_item("pa_visit_limited", values[0])
            .with_item("pa_religious_limited", values[1])
            .with_item("pa_club_limited", values[2]);
        make_table().recode_record(&record)
    }

    fn items() -> Vec<String> {
        vec![
            "pa_visit_limited".to_string(),
            "pa_religious_limited".to_string(),
            "pa_club_limited".to_string(),
        ]
    }

    #[test]
    fn test_count_and_flag() {
        let table = make_table();
        // yes, no, refused
        let record = make_record([Some(1.0), Some(2.0), Some(-7.0)]);
        let score = build_index(&table, &record, &items(), 1.0).unwrap();

        assert_eq!(score.count, 1.0);
        assert_eq!(score.flag, 1);
        assert_eq!(score.items_present, 2);
    }

    #[test]
    fn test_all_absent_is_zero_not_error() {
        let table = make_table();
        let record = make_record([None, Some(-9.0), Some(-8.0)]);
        let score = build_index(&table, &record, &items(), 1.0).unwrap();

        assert_eq!(score.count, 0.0);
        assert_eq!(score.flag, 0);
        assert_eq!(score.items_present, 0);
    }

    #[test]
    fn test_flag_iff_count_at_least_threshold() {
        let table = make_table();
        let grid = [None, Some(1.0), Some(2.0), Some(-1.0)];
        for a in grid {
            for b in grid {
                for c in grid {
                    let record = make_record([a, b, c]);
                    for threshold in [1.0, 2.0, 3.0] {
                        let score = build_index(&table, &record, &items(), threshold).unwrap();
                        assert_eq!(score.flag == 1, score.count >= threshold);
                    }
                }
            }
        }
    }

    #[test]
    fn test_count_is_order_invariant() {
        let table = make_table();
        let record = make_record([Some(1.0), None, Some(1.0)]);
        let mut names = items();
        let forward = build_index(&table, &record, &names, 1.0).unwrap();
        names.reverse();
        let backward = build_index(&table, &record, &names, 1.0).unwrap();
        names.swap(0, 1);
        let shuffled = build_index(&table, &record, &names, 1.0).unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn test_unknown_item_error() {
        let table = make_table();
        let record = make_record([Some(1.0), Some(1.0), Some(1.0)]);
        let names = vec!["pa_visit_limited".to_string(), "sn_lives_alone".to_string()];
        let err = build_index(&table, &record, &names, 1.0).unwrap_err();
        assert!(matches!(err, PanelError::UnknownItem(name) if name == "sn_lives_alone"));
    }

    #[test]
    fn test_builder_validates_indices_up_front() {
        let table = make_table();
        let indices = vec![CompositeIndex::new("limited_social_network", &["sn_lives_alone"])];
        assert!(matches!(
            CompositeBuilder::new(&table, &indices),
            Err(PanelError::UnknownItem(_))
        ));
    }

    #[test]
    fn test_builder_scores_every_index() {
        let table = make_table();
        let indices = vec![
            CompositeIndex::new("social_participation", &["pa_visit_limited", "pa_club_limited"]),
            CompositeIndex::new("religious", &["pa_religious_limited"]).with_threshold(2.0),
        ];
        let builder = CompositeBuilder::new(&table, &indices).unwrap();
        let scored = builder
            .score_record(make_record([Some(1.0), Some(1.0), Some(1.0)]))
            .unwrap();

        assert_eq!(scored.composites["social_participation"].count, 2.0);
        assert_eq!(scored.composites["social_participation"].flag, 1);
        assert_eq!(scored.composites["religious"].flag, 0);
    }
}
