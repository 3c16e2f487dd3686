//! Sentinel recoding
//!
//! This module maps raw survey values to recoded values:
//! - Reserved sentinel codes (refused, don't know, inapplicable) become absent
//! - Two-level and ordinal items are normalized to binary indicators
//! - Raw values are preserved next to the recoded ones
//!
//! Sentinel sets are configured per item through [`ItemRule`]; there is no
//! global sentinel list.

use crate::error::PanelError;
use crate::schema::SurveyRecord;
use crate::types::{ItemValues, RecodedRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Sentinel codes used across most items in this survey family
pub const STANDARD_SENTINELS: [i64; 4] = [-9, -8, -7, -1];

/// Set of reserved codes meaning "no real response" for one item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SentinelSet(BTreeSet<i64>);

impl SentinelSet {
    pub fn new(codes: impl IntoIterator<Item = i64>) -> Self {
        Self(codes.into_iter().collect())
    }

    /// The standard sentinel codes plus item-specific extras
    pub fn standard_with(extra: impl IntoIterator<Item = i64>) -> Self {
        Self::new(STANDARD_SENTINELS.into_iter().chain(extra))
    }

    /// Sentinels only match integral values
    pub fn contains(&self, value: f64) -> bool {
        value.fract() == 0.0 && self.0.contains(&(value as i64))
    }

    pub fn codes(&self) -> impl Iterator<Item = &i64> {
        self.0.iter()
    }
}

/// Rule turning a recoded value into a binary indicator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BinaryRule {
    /// Leave the value unchanged
    #[default]
    Passthrough,
    /// 1 = yes → 1, 2 = no → 0, anything else passes through
    YesNo,
    /// Ordinal value at or above `cutoff` → 1, below → 0
    AtLeast { cutoff: f64 },
    /// Value in `codes` → 1, any other value → 0
    OneOf { codes: Vec<i64> },
}

/// Declarative recoding rule for one survey item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRule {
    /// Item (column) name
    pub name: String,
    /// Codes that mean absent for this item
    #[serde(default)]
    pub sentinels: SentinelSet,
    /// Optional binary normalization applied after sentinel removal
    #[serde(default)]
    pub binary: BinaryRule,
}

impl ItemRule {
    pub fn new(name: &str, sentinels: SentinelSet, binary: BinaryRule) -> Self {
        Self {
            name: name.to_string(),
            sentinels,
            binary,
        }
    }

    /// Apply sentinel removal followed by the binary rule
    pub fn apply(&self, value: Option<f64>) -> Option<f64> {
        let value = recode(value, &self.sentinels);
        match &self.binary {
            BinaryRule::Passthrough => value,
            BinaryRule::YesNo => value.map(normalize_binary),
            BinaryRule::AtLeast { cutoff } => value.map(|v| if v >= *cutoff { 1.0 } else { 0.0 }),
            BinaryRule::OneOf { codes } => value.map(|v| {
                if v.fract() == 0.0 && codes.contains(&(v as i64)) {
                    1.0
                } else {
                    0.0
                }
            }),
        }
    }
}

/// Replace a sentinel-coded value with absent.
///
/// Idempotent: recoding an already-recoded value is a no-op, because absent
/// stays absent and a surviving value is by construction not a sentinel.
pub fn recode(value: Option<f64>, sentinels: &SentinelSet) -> Option<f64> {
    value.filter(|v| !sentinels.contains(*v))
}

/// Map the survey's two-level code (1 = yes, 2 = no) to {1, 0}.
///
/// Other values pass through so already-binary or categorical fields are not
/// corrupted. Note that 1 maps to itself, so a recoded 0/1 indicator is stable.
pub fn normalize_binary(value: f64) -> f64 {
    if value == 2.0 {
        0.0
    } else {
        value
    }
}

/// Lookup table of item rules consumed by one generic recoding pass
#[derive(Debug, Clone, Default)]
pub struct RecodeTable {
    rules: HashMap<String, ItemRule>,
}

impl RecodeTable {
    /// Build a table, rejecting duplicate item names
    pub fn new(rules: &[ItemRule]) -> Result<Self, PanelError> {
        let mut map = HashMap::with_capacity(rules.len());
        for rule in rules {
            if map.insert(rule.name.clone(), rule.clone()).is_some() {
                return Err(PanelError::InvalidConfig(format!(
                    "duplicate recoding rule for item '{}'",
                    rule.name
                )));
            }
        }
        Ok(Self { rules: map })
    }

    pub fn contains(&self, item: &str) -> bool {
        self.rules.contains_key(item)
    }

    pub fn rule(&self, item: &str) -> Result<&ItemRule, PanelError> {
        self.rules
            .get(item)
            .ok_or_else(|| PanelError::UnknownItem(item.to_string()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Recode a single named value
    pub fn recode_value(&self, item: &str, value: Option<f64>) -> Result<Option<f64>, PanelError> {
        Ok(self.rule(item)?.apply(value))
    }

    /// Recode every ruled item of a survey record.
    ///
    /// Items with a rule but missing from the record are recoded as absent.
    /// Items without a rule are kept in `raw` only.
    pub fn recode_record(&self, record: &SurveyRecord) -> RecodedRecord {
        let values: ItemValues = self
            .rules
            .values()
            .map(|rule| {
                let raw = record.items.get(&rule.name).copied().flatten();
                (rule.name.clone(), rule.apply(raw))
            })
            .collect();

        RecodedRecord {
            subject_id: record.subject_id.clone(),
            round: record.round,
            raw: record.items.clone(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn standard() -> SentinelSet {
        SentinelSet::standard_with([])
    }

    #[test]
    fn test_recode_sentinels_to_absent() {
        let s = standard();
        assert_eq!(recode(Some(-9.0), &s), None);
        assert_eq!(recode(Some(-1.0), &s), None);
        assert_eq!(recode(Some(0.0), &s), Some(0.0));
        assert_eq!(recode(Some(3.0), &s), Some(3.0));
        assert_eq!(recode(None, &s), None);
    }

    #[test]
    fn test_recode_idempotent() {
        let sets = [standard(), SentinelSet::standard_with([7]), SentinelSet::new([95, 0])];
        let values = [
            None,
            Some(-9.0),
            Some(-8.0),
            Some(-7.0),
            Some(-1.0),
            Some(0.0),
            Some(1.0),
            Some(2.0),
            Some(7.0),
            Some(95.0),
            Some(2.5),
        ];
        for s in &sets {
            for v in values {
                let once = recode(v, s);
                assert_eq!(recode(once, s), once, "value {v:?} with {s:?}");
            }
        }
    }

    #[test]
    fn test_item_specific_sentinels() {
        let dementia = ItemRule::new(
            "cg_dementia_dx",
            SentinelSet::standard_with([7]),
            BinaryRule::YesNo,
        );
        let stroke = ItemRule::new("hc_new_stroke", standard(), BinaryRule::YesNo);

        // 7 is "don't know" for one item only
        assert_eq!(dementia.apply(Some(7.0)), None);
        assert_eq!(stroke.apply(Some(7.0)), Some(7.0));
    }

    #[test]
    fn test_sentinel_requires_integral_value() {
        let s = SentinelSet::new([95]);
        assert!(s.contains(95.0));
        assert!(!s.contains(95.5));
    }

    #[test]
    fn test_normalize_binary() {
        assert_eq!(normalize_binary(1.0), 1.0);
        assert_eq!(normalize_binary(2.0), 0.0);
        assert_eq!(normalize_binary(0.0), 0.0);
        // categorical values are left alone
        assert_eq!(normalize_binary(3.0), 3.0);
        assert_eq!(normalize_binary(normalize_binary(2.0)), 0.0);
    }

    #[test]
    fn test_binary_rules() {
        let at_least =
            ItemRule::new("hc_depressed", standard(), BinaryRule::AtLeast { cutoff: 3.0 });
        assert_eq!(at_least.apply(Some(2.0)), Some(0.0));
        assert_eq!(at_least.apply(Some(3.0)), Some(1.0));
        assert_eq!(at_least.apply(Some(-8.0)), None);

        let one_of = ItemRule::new("marital", standard(), BinaryRule::OneOf { codes: vec![4, 5] });
        assert_eq!(one_of.apply(Some(5.0)), Some(1.0));
        assert_eq!(one_of.apply(Some(1.0)), Some(0.0));
        assert_eq!(one_of.apply(None), None);
    }

    #[test]
    fn test_recode_record_preserves_raw() {
        let table = RecodeTable::new(&[
            ItemRule::new("ha_no_regular_doctor", standard(), BinaryRule::YesNo),
            ItemRule::new("ew_no_money_food", standard(), BinaryRule::YesNo),
        ])
        .unwrap();

        let mut items = BTreeMap::new();
        items.insert("ha_no_regular_doctor".to_string(), Some(2.0));
        items.insert("ew_no_money_food".to_string(), Some(-8.0));
        items.insert("unruled".to_string(), Some(11.0));
        let record = SurveyRecord {
            subject_id: "S1".to_string(),
            round: 3,
            items,
        };

        let recoded = table.recode_record(&record);
        assert_eq!(recoded.value("ha_no_regular_doctor"), Some(Some(0.0)));
        assert_eq!(recoded.value("ew_no_money_food"), Some(None));
        assert_eq!(recoded.value("unruled"), None);
        assert_eq!(recoded.raw.get("ew_no_money_food"), Some(&Some(-8.0)));
        assert_eq!(recoded.raw.get("unruled"), Some(&Some(11.0)));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let rule = ItemRule::new("a", standard(), BinaryRule::YesNo);
        let result = RecodeTable::new(&[rule.clone(), rule]);
        assert!(matches!(result, Err(PanelError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_item() {
        let table = RecodeTable::new(&[]).unwrap();
        let err = table.recode_value("missing_item", Some(1.0)).unwrap_err();
        assert!(matches!(err, PanelError::UnknownItem(name) if name == "missing_item"));
    }

    #[test]
    fn test_rule_deserializes_from_config() {
        let json = r#"{
            "name": "cg_memory_poor",
            "sentinels": [-9, -8, -7, -1],
            "binary": {"kind": "at_least", "cutoff": 4}
        }"#;
        let rule: ItemRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.binary, BinaryRule::AtLeast { cutoff: 4.0 });
        assert!(rule.sentinels.contains(-7.0));
    }
}
