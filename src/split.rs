//! Subject-level train/test partitioning
//!
//! Subjects, never records, are assigned to partitions, so no subject's
//! trajectory can appear on both sides. The seed is an explicit parameter and
//! is applied once before any per-subject fan-out.

use crate::error::PanelError;
use crate::types::{ModelingRow, Partition};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Default fraction of subjects assigned to train
pub const DEFAULT_TRAIN_FRACTION: f64 = 0.8;

/// Default split seed
pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// Split configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of subjects assigned to train, in (0, 1)
    pub train_fraction: f64,
    pub seed: u64,
    /// Split separately within "ever terminal" and "never terminal" subjects
    pub stratify: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_fraction: DEFAULT_TRAIN_FRACTION,
            seed: DEFAULT_SPLIT_SEED,
            stratify: true,
        }
    }
}

/// Disjoint train/test subject sets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortSplit {
    pub train: BTreeSet<String>,
    pub test: BTreeSet<String>,
}

impl CohortSplit {
    /// Partition a subject belongs to, if it was part of the split
    pub fn partition_of(&self, subject_id: &str) -> Option<Partition> {
        if self.train.contains(subject_id) {
            Some(Partition::Train)
        } else if self.test.contains(subject_id) {
            Some(Partition::Test)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty() && self.test.is_empty()
    }

    /// Fail if any subject landed in both partitions
    pub fn check_disjoint(&self) -> Result<(), PanelError> {
        let overlapping: Vec<String> = self.train.intersection(&self.test).cloned().collect();
        if overlapping.is_empty() {
            Ok(())
        } else {
            Err(PanelError::SplitOverlap { overlapping })
        }
    }
}

/// Seeded subject-level splitter
#[derive(Debug, Clone, Copy)]
pub struct ParticipantSplitter {
    train_fraction: f64,
    seed: u64,
}

impl ParticipantSplitter {
    pub fn new(train_fraction: f64, seed: u64) -> Result<Self, PanelError> {
        if !(train_fraction > 0.0 && train_fraction < 1.0) {
            return Err(PanelError::InvalidConfig(format!(
                "train_fraction must be in (0, 1), got {}",
                train_fraction
            )));
        }
        Ok(Self {
            train_fraction,
            seed,
        })
    }

    pub fn from_config(config: &SplitConfig) -> Result<Self, PanelError> {
        Self::new(config.train_fraction, config.seed)
    }

    /// Split subject ids into disjoint, covering train/test sets.
    ///
    /// Ids are de-duplicated and sorted before the seeded shuffle, so the
    /// result depends only on the id set and the seed, not on input order.
    pub fn split(&self, subject_ids: &[String]) -> Result<CohortSplit, PanelError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut split = CohortSplit::default();
        self.assign(subject_ids.iter().cloned(), &mut rng, &mut split);
        split.check_disjoint()?;
        Ok(split)
    }

    /// Split within each stratum so class balance is kept on both sides.
    ///
    /// Strata are visited in sorted order with one seeded RNG.
    pub fn split_stratified(&self, subjects: &[(String, bool)]) -> Result<CohortSplit, PanelError> {
        let mut strata: BTreeMap<bool, Vec<String>> = BTreeMap::new();
        let mut seen = HashSet::new();
        for (id, stratum) in subjects {
            if seen.insert(id.as_str()) {
                strata.entry(*stratum).or_default().push(id.clone());
            }
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut split = CohortSplit::default();
        for ids in strata.into_values() {
            self.assign(ids.into_iter(), &mut rng, &mut split);
        }
        split.check_disjoint()?;
        Ok(split)
    }

    fn assign(&self, ids: impl Iterator<Item = String>, rng: &mut StdRng, split: &mut CohortSplit) {
        let mut ids: Vec<String> = ids.collect::<BTreeSet<_>>().into_iter().collect();
        ids.shuffle(rng);

        let n_train = ((ids.len() as f64) * self.train_fraction).round() as usize;
        let test = ids.split_off(n_train.min(ids.len()));
        split.train.extend(ids);
        split.test.extend(test);
    }
}

/// Shift a subject's rounds so the first retained round is 0.
///
/// Only relabels: ordering and row count are unchanged and the original round
/// stays in `source_round`.
pub fn reorigin(rows: Vec<ModelingRow>) -> Vec<ModelingRow> {
    let Some(origin) = rows.iter().map(|r| r.round).min() else {
        return rows;
    };
    rows.into_iter()
        .map(|mut row| {
            row.round -= origin;
            row
        })
        .collect()
}
