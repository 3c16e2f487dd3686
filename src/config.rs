//! Pipeline configuration
//!
//! The whole pipeline is driven by one [`PipelineConfig`]: the declarative
//! item recoding table, composite index definitions, the residence policy,
//! split settings, the temporal feature spec and the threshold grid. Adding a
//! survey item is a config change, not a code change.

use crate::composite::CompositeIndex;
use crate::error::PanelError;
use crate::evaluate::ThresholdGrid;
use crate::labeler::{ResidencePolicy, DEFAULT_MIN_ROUNDS};
use crate::recode::{BinaryRule, ItemRule, RecodeTable, SentinelSet};
use crate::split::SplitConfig;
use crate::temporal::FeatureSpec;
use serde::{Deserialize, Serialize};

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub items: Vec<ItemRule>,
    pub composites: Vec<CompositeIndex>,
    pub residence: ResidencePolicy,
    pub min_rounds: usize,
    pub split: SplitConfig,
    pub features: FeatureSpec,
    pub thresholds: ThresholdGrid,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            items: default_items(),
            composites: default_composites(),
            residence: ResidencePolicy::default(),
            min_rounds: DEFAULT_MIN_ROUNDS,
            split: SplitConfig::default(),
            features: FeatureSpec::default(),
            thresholds: ThresholdGrid::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from JSON; omitted sections take their defaults
    pub fn from_json(json: &str) -> Result<Self, PanelError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, PanelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Build the recoding table for this configuration
    pub fn recode_table(&self) -> Result<RecodeTable, PanelError> {
        RecodeTable::new(&self.items)
    }

    /// Fail fast on configuration errors
    pub fn validate(&self) -> Result<(), PanelError> {
        let table = self.recode_table()?;

        for index in &self.composites {
            if index.items.is_empty() {
                return Err(PanelError::InvalidConfig(format!(
                    "composite '{}' has no items",
                    index.name
                )));
            }
            if let Some(missing) = index.items.iter().find(|item| !table.contains(item)) {
                return Err(PanelError::UnknownItem(missing.clone()));
            }
        }

        let overlap = self.residence.overlapping_codes();
        if !overlap.is_empty() {
            return Err(PanelError::InvalidConfig(format!(
                "residence codes {:?} are both community and terminal",
                overlap
            )));
        }

        if self.min_rounds == 0 {
            return Err(PanelError::InvalidConfig("min_rounds must be at least 1".to_string()));
        }

        let fraction = self.split.train_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(PanelError::InvalidConfig(format!(
                "train_fraction must be in (0, 1), got {}",
                fraction
            )));
        }

        if self.features.trim_last == Some(0) {
            return Err(PanelError::InvalidConfig("trim_last must be at least 1".to_string()));
        }

        self.thresholds.validate()
    }
}

fn yes_no(name: &str) -> ItemRule {
    ItemRule::new(name, SentinelSet::standard_with([]), BinaryRule::YesNo)
}

/// Default recoding table for the survey's core items
pub fn default_items() -> Vec<ItemRule> {
    let at_least = |name: &str, cutoff: f64| {
        ItemRule::new(
            name,
            SentinelSet::standard_with([]),
            BinaryRule::AtLeast { cutoff },
        )
    };

    vec![
        // mental health screen (1 = not at all .. 4 = nearly every day)
        at_least("hc_depressed", 3.0),
        at_least("hc_anhedonia", 3.0),
        at_least("hc_nervous", 3.0),
        at_least("hc_worry", 3.0),
        // social participation limited by health
        yes_no("pa_visit_limited"),
        yes_no("pa_religious_limited"),
        yes_no("pa_club_limited"),
        yes_no("pa_outing_limited"),
        // social network
        yes_no("sn_lives_alone"),
        yes_no("sn_no_confidant"),
        // new conditions since last round
        yes_no("hc_new_heart_attack"),
        yes_no("hc_new_stroke"),
        yes_no("hc_new_cancer"),
        yes_no("hc_hospital_stay"),
        // healthcare access
        yes_no("ha_no_regular_doctor"),
        ItemRule::new(
            "ha_transport_barrier",
            SentinelSet::standard_with([95]),
            BinaryRule::YesNo,
        ),
        // cognition (7 = don't know on the diagnosis item)
        ItemRule::new(
            "cg_dementia_dx",
            SentinelSet::standard_with([7]),
            BinaryRule::YesNo,
        ),
        at_least("cg_memory_poor", 4.0),
        // financial need
        yes_no("ew_no_money_food"),
        yes_no("ew_no_money_meds"),
        yes_no("ew_no_money_utilities"),
    ]
}

/// Default composite indices
pub fn default_composites() -> Vec<CompositeIndex> {
    vec![
        CompositeIndex::new(
            "mental_health",
            &["hc_depressed", "hc_anhedonia", "hc_nervous", "hc_worry"],
        ),
        CompositeIndex::new(
            "social_participation",
            &[
                "pa_visit_limited",
                "pa_religious_limited",
                "pa_club_limited",
                "pa_outing_limited",
            ],
        ),
        CompositeIndex::new("limited_social_network", &["sn_lives_alone", "sn_no_confidant"]),
        CompositeIndex::new(
            "new_condition",
            &[
                "hc_new_heart_attack",
                "hc_new_stroke",
                "hc_new_cancer",
                "hc_hospital_stay",
            ],
        ),
        CompositeIndex::new(
            "healthcare_access",
            &["ha_no_regular_doctor", "ha_transport_barrier"],
        ),
        CompositeIndex::new("cognition", &["cg_dementia_dx", "cg_memory_poor"]),
        CompositeIndex::new(
            "financial_need",
            &["ew_no_money_food", "ew_no_money_meds", "ew_no_money_utilities"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.composites.len(), 7);
    }

    #[test]
    fn test_json_roundtrip_and_defaults() {
        let json = PipelineConfig::default().to_json().unwrap();
        let loaded = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(loaded, PipelineConfig::default());

        let partial = PipelineConfig::from_json(r#"{"min_rounds": 3}"#).unwrap();
        assert_eq!(partial.min_rounds, 3);
        assert_eq!(partial.items.len(), default_items().len());
    }

    #[test]
    fn test_unknown_item_in_composite() {
        let mut config = PipelineConfig::default();
        config.composites.push(CompositeIndex::new("extra", &["no_rule_item"]));
        assert!(matches!(
            config.validate(),
            Err(PanelError::UnknownItem(name)) if name == "no_rule_item"
        ));
    }

    #[test]
    fn test_invalid_settings() {
        let mut config = PipelineConfig::default();
        config.min_rounds = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.split.train_fraction = 1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.residence.terminal_codes.push(1);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.items.push(yes_no("hc_depressed"));
        assert!(matches!(config.validate(), Err(PanelError::InvalidConfig(_))));
    }
}
