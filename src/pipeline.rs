//! Pipeline orchestration
//!
//! This module provides the public API for cohort-flux. It takes raw survey
//! records through the full pipeline:
//!
//! 1. RecordReader - group records into per-subject round sequences
//! 2. RecodeTable - sentinel removal and binary normalization
//! 3. CompositeBuilder - composite counts and flags
//! 4. CohortLabeler - terminal labels, truncation and round-count filter
//! 5. ParticipantSplitter - subject-level train/test split
//! 6. TemporalFeatureBuilder - trim, re-origin, then lag, interaction and cumulative features
//! 7. ThresholdSweepEvaluator - metrics for an external model's scores

use crate::composite::CompositeBuilder;
use crate::config::PipelineConfig;
use crate::error::PanelError;
use crate::evaluate::{EvaluationReport, ThresholdSweepEvaluator};
use crate::labeler::{CohortDiagnostics, CohortLabeler, SubjectOutcome};
use crate::model::{checked_predict, ModelFitter};
use crate::schema::{RecordReader, SurveyRecord};
use crate::split::{CohortSplit, ParticipantSplitter};
use crate::temporal::{FeatureTable, TemporalFeatureBuilder};
use crate::types::{ModelingRow, Partition, ScoredRecord};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Modeling table plus the counters describing how it was built
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortBuild {
    /// Retained rows, ordered by subject then round
    pub rows: Vec<ModelingRow>,
    pub diagnostics: CohortDiagnostics,
}

/// Train and test feature tables built from one split
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedFeatures {
    pub split: CohortSplit,
    pub train: FeatureTable,
    pub test: FeatureTable,
}

/// Build the modeling table from raw records.
///
/// Each subject is recoded, scored, labeled and truncated independently;
/// subjects are processed in parallel and concatenated in id order.
pub fn build_cohort(
    records: Vec<SurveyRecord>,
    config: &PipelineConfig,
) -> Result<CohortBuild, PanelError> {
    config.validate()?;

    for (idx, record) in records.iter().enumerate() {
        record.validate().map_err(|e| {
            PanelError::ParseError(format!("Invalid record at index {}: {}", idx, e))
        })?;
    }

    let table = config.recode_table()?;
    let scorer = CompositeBuilder::new(&table, &config.composites)?;
    let labeler = CohortLabeler::new(config.residence.clone(), config.min_rounds);

    let subjects: Vec<Vec<SurveyRecord>> = RecordReader::group_by_subject(records)?
        .into_values()
        .collect();

    let outcomes: Vec<(SubjectOutcome, CohortDiagnostics)> = subjects
        .into_par_iter()
        .map(|rounds| -> Result<_, PanelError> {
            let scored = rounds
                .iter()
                .map(|record| scorer.score_record(table.recode_record(record)))
                .collect::<Result<Vec<ScoredRecord>, _>>()?;
            Ok(labeler.process_subject(scored))
        })
        .collect::<Result<_, PanelError>>()?;

    let mut build = CohortBuild::default();
    for (outcome, diagnostics) in outcomes {
        build.diagnostics.merge(diagnostics);
        if let SubjectOutcome::Retained(records) = outcome {
            build.rows.extend(records.iter().map(ModelingRow::from));
        }
    }

    let d = &build.diagnostics;
    log::info!(
        "Cohort built: {} subject(s) seen, {} retained, {} excluded; {} of {} record(s) kept",
        d.subjects_seen,
        d.subjects_retained,
        d.subjects_excluded,
        d.records_retained,
        d.records_in
    );
    if d.unknown_status_records > 0 {
        log::warn!(
            "{} record(s) had an unknown residence status {:?}",
            d.unknown_status_records,
            d.ambiguous_codes
        );
    }

    Ok(build)
}

/// Per-subject "reached the terminal state" strata, in subject order
fn ever_terminal(rows: &[ModelingRow]) -> Vec<(String, bool)> {
    let mut strata: BTreeMap<&str, bool> = BTreeMap::new();
    for row in rows {
        let terminal = strata.entry(row.subject_id.as_str()).or_insert(false);
        *terminal |= row.label == Some(1);
    }
    strata
        .into_iter()
        .map(|(id, terminal)| (id.to_string(), terminal))
        .collect()
}

/// Stateful processor that owns a validated configuration.
///
/// Use this when running several stages against the same configuration, or
/// when plugging in a model collaborator.
pub struct CohortProcessor {
    config: PipelineConfig,
    splitter: ParticipantSplitter,
    features: TemporalFeatureBuilder,
    evaluator: ThresholdSweepEvaluator,
}

impl CohortProcessor {
    /// Create a processor, rejecting an invalid configuration up front
    pub fn new(config: PipelineConfig) -> Result<Self, PanelError> {
        config.validate()?;
        Ok(Self {
            splitter: ParticipantSplitter::from_config(&config.split)?,
            features: TemporalFeatureBuilder::new(config.features.clone()),
            evaluator: ThresholdSweepEvaluator::new(config.thresholds)?,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Build the modeling table from raw records
    pub fn build_cohort(&self, records: Vec<SurveyRecord>) -> Result<CohortBuild, PanelError> {
        build_cohort(records, &self.config)
    }

    /// Split the subjects present in `rows`
    pub fn split(&self, rows: &[ModelingRow]) -> Result<CohortSplit, PanelError> {
        let split = if self.config.split.stratify {
            self.splitter.split_stratified(&ever_terminal(rows))?
        } else {
            let ids: Vec<String> = rows.iter().map(|r| r.subject_id.clone()).collect();
            self.splitter.split(&ids)?
        };

        log::info!(
            "Split {} subject(s): {} train, {} test",
            split.len(),
            split.train.len(),
            split.test.len()
        );
        Ok(split)
    }

    /// Build per-partition feature tables.
    ///
    /// Rounds are re-origined per subject after `trim_last`. Rows of subjects
    /// outside the split are skipped.
    pub fn build_features(
        &self,
        rows: Vec<ModelingRow>,
        split: &CohortSplit,
    ) -> Result<PartitionedFeatures, PanelError> {
        split.check_disjoint()?;

        let mut by_subject: BTreeMap<String, Vec<ModelingRow>> = BTreeMap::new();
        for row in rows {
            by_subject.entry(row.subject_id.clone()).or_default().push(row);
        }

        let mut train = Vec::new();
        let mut test = Vec::new();
        let mut unassigned = 0usize;
        for (subject_id, subject_rows) in by_subject {
            match split.partition_of(&subject_id) {
                Some(Partition::Train) => train.extend(subject_rows),
                Some(Partition::Test) => test.extend(subject_rows),
                None => unassigned += 1,
            }
        }
        if unassigned > 0 {
            log::warn!("{} subject(s) not in the split were skipped", unassigned);
        }

        Ok(PartitionedFeatures {
            split: split.clone(),
            train: self.features.build_table(train)?,
            test: self.features.build_table(test)?,
        })
    }

    /// Sweep the configured threshold grid over externally produced scores
    pub fn evaluate(&self, scores: &[f64], labels: &[u8]) -> Result<EvaluationReport, PanelError> {
        self.evaluator.evaluate(scores, labels)
    }

    /// Fit on the train table, score the test table and evaluate
    pub fn fit_and_evaluate(
        &self,
        fitter: &dyn ModelFitter,
        features: &PartitionedFeatures,
    ) -> Result<EvaluationReport, PanelError> {
        let train = features.train.design_matrix();
        let test = features.test.design_matrix();

        if train.is_empty() {
            return Err(PanelError::EmptyInput("no complete training rows".to_string()));
        }
        if test.is_empty() {
            return Err(PanelError::EmptyInput("no complete test rows".to_string()));
        }
        if train.columns != test.columns {
            return Err(PanelError::InvalidConfig(
                "train and test feature columns differ".to_string(),
            ));
        }

        log::info!(
            "Fitting on {} row(s) x {} column(s); scoring {} test row(s)",
            train.len(),
            train.columns.len(),
            test.len()
        );

        let model = fitter.fit(&train.x, &train.y)?;
        let scores = checked_predict(model.as_ref(), &test.x)?;
        self.evaluate(&scores, &test.y)
    }

    /// Run every stage from raw records to the evaluation report
    pub fn run(
        &self,
        records: Vec<SurveyRecord>,
        fitter: &dyn ModelFitter,
    ) -> Result<(CohortBuild, PartitionedFeatures, EvaluationReport), PanelError> {
        let build = self.build_cohort(records)?;
        let split = self.split(&build.rows)?;
        let features = self.build_features(build.rows.clone(), &split)?;
        let report = self.fit_and_evaluate(fitter, &features)?;
        Ok((build, features, report))
    }
}
