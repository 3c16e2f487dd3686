//! Cohort labeling and subject-level filtering
//!
//! This module derives the terminal label from the residence code and applies
//! the cohort inclusion policy one subject at a time:
//! 1. Compute the first terminal round (single pass)
//! 2. Keep rounds up to and including it, then require `min_rounds` rounds
//!
//! Both phases are pure functions so each can be tested on its own.

use crate::types::{LabeledRecord, ResidenceStatus, ScoredRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default minimum number of retained rounds per subject
pub const DEFAULT_MIN_ROUNDS: usize = 2;

/// Default residence-status item name
pub const DEFAULT_RESIDENCE_ITEM: &str = "dresid";

/// What to do with records whose residence status is unknown.
///
/// The survey's own analysis treated unknown status as community-dwelling
/// when truncating, which conflates "never institutionalized" with "status not
/// observed". The choice is explicit here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownStatusPolicy {
    /// Keep the record; it never counts as a terminal round
    #[default]
    AssumeCommunity,
    /// Remove the record before truncation and the round-count filter
    DropRecord,
}

/// Residence code buckets for the terminal label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidencePolicy {
    /// Raw item carrying the residence code
    pub item: String,
    /// Codes meaning community-dwelling (label 0)
    pub community_codes: Vec<i64>,
    /// Codes meaning skilled nursing / hospitalized (label 1)
    pub terminal_codes: Vec<i64>,
    pub unknown_status: UnknownStatusPolicy,
}

impl Default for ResidencePolicy {
    fn default() -> Self {
        Self {
            item: DEFAULT_RESIDENCE_ITEM.to_string(),
            community_codes: vec![1, 2, 3],
            terminal_codes: vec![4, 5],
            unknown_status: UnknownStatusPolicy::AssumeCommunity,
        }
    }
}

impl ResidencePolicy {
    /// Map a residence code to its bucket; anything outside both code lists
    /// (including absent) is unknown
    pub fn derive_label(&self, code: Option<f64>) -> ResidenceStatus {
        let code = match code {
            Some(c) if c.fract() == 0.0 => c as i64,
            _ => return ResidenceStatus::Unknown,
        };
        if self.community_codes.contains(&code) {
            ResidenceStatus::Community
        } else if self.terminal_codes.contains(&code) {
            ResidenceStatus::Terminal
        } else {
            ResidenceStatus::Unknown
        }
    }

    /// Codes present in both buckets
    pub fn overlapping_codes(&self) -> Vec<i64> {
        self.community_codes
            .iter()
            .filter(|c| self.terminal_codes.contains(c))
            .copied()
            .collect()
    }
}

/// Result of applying the inclusion policy to one subject
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectOutcome {
    /// Rounds kept for the modeling table, ascending
    Retained(Vec<LabeledRecord>),
    /// Too few rounds survived truncation
    Excluded {
        subject_id: String,
        retained_rounds: usize,
    },
}

/// Minimum round with label 1, or `None` if the subject never reaches it.
///
/// Missing labels never count as terminal.
pub fn first_terminal_round(records: &[LabeledRecord]) -> Option<u32> {
    records
        .iter()
        .filter(|r| r.label() == Some(1))
        .map(LabeledRecord::round)
        .min()
}

/// Keep rounds `<= first_terminal` (the transition round included), or all
/// rounds when the subject never reaches the terminal state
pub fn retain_through(
    records: Vec<LabeledRecord>,
    first_terminal: Option<u32>,
) -> Vec<LabeledRecord> {
    match first_terminal {
        Some(cutoff) => records.into_iter().filter(|r| r.round() <= cutoff).collect(),
        None => records,
    }
}

/// Truncate a subject at its first terminal round and drop it when fewer
/// than `min_rounds` rounds remain
pub fn truncate_and_filter(records: Vec<LabeledRecord>, min_rounds: usize) -> SubjectOutcome {
    let subject_id = records
        .first()
        .map(|r| r.subject_id().to_string())
        .unwrap_or_default();

    let first_terminal = first_terminal_round(&records);
    let retained = retain_through(records, first_terminal);

    if retained.len() < min_rounds {
        SubjectOutcome::Excluded {
            subject_id,
            retained_rounds: retained.len(),
        }
    } else {
        SubjectOutcome::Retained(retained)
    }
}

/// Counters describing how the cohort was constructed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortDiagnostics {
    pub subjects_seen: usize,
    pub subjects_retained: usize,
    pub subjects_excluded: usize,
    /// Ids of subjects removed by the round-count filter
    pub excluded_subjects: Vec<String>,
    pub records_in: usize,
    pub records_retained: usize,
    /// Records after the first terminal round
    pub records_truncated: usize,
    /// Records whose residence code fell outside both buckets
    pub unknown_status_records: usize,
    /// Unknown-status records removed under [`UnknownStatusPolicy::DropRecord`]
    pub unknown_status_dropped: usize,
    /// Unknown residence codes by value ("absent" when not collected)
    pub ambiguous_codes: BTreeMap<String, usize>,
    /// Subjects that reached the terminal state within the retained rounds
    pub terminal_subjects: usize,
}

impl CohortDiagnostics {
    /// Fold another subject's counters into this one
    pub fn merge(&mut self, other: CohortDiagnostics) {
        self.subjects_seen += other.subjects_seen;
        self.subjects_retained += other.subjects_retained;
        self.subjects_excluded += other.subjects_excluded;
        self.excluded_subjects.extend(other.excluded_subjects);
        self.records_in += other.records_in;
        self.records_retained += other.records_retained;
        self.records_truncated += other.records_truncated;
        self.unknown_status_records += other.unknown_status_records;
        self.unknown_status_dropped += other.unknown_status_dropped;
        for (code, count) in other.ambiguous_codes {
            *self.ambiguous_codes.entry(code).or_insert(0) += count;
        }
        self.terminal_subjects += other.terminal_subjects;
    }
}

fn code_key(code: Option<f64>) -> String {
    match code {
        Some(c) if c.fract() == 0.0 => format!("{}", c as i64),
        Some(c) => c.to_string(),
        None => "absent".to_string(),
    }
}

/// Labels records and applies the per-subject inclusion policy
#[derive(Debug, Clone)]
pub struct CohortLabeler {
    policy: ResidencePolicy,
    min_rounds: usize,
}

impl Default for CohortLabeler {
    fn default() -> Self {
        Self::new(ResidencePolicy::default(), DEFAULT_MIN_ROUNDS)
    }
}

impl CohortLabeler {
    pub fn new(policy: ResidencePolicy, min_rounds: usize) -> Self {
        Self { policy, min_rounds }
    }

    pub fn policy(&self) -> &ResidencePolicy {
        &self.policy
    }

    /// Attach the terminal label to a scored record
    pub fn label_record(&self, scored: ScoredRecord) -> LabeledRecord {
        let residence_code = scored
            .recoded
            .raw
            .get(&self.policy.item)
            .copied()
            .flatten();
        let residence = self.policy.derive_label(residence_code);
        LabeledRecord {
            scored,
            residence_code,
            residence,
        }
    }

    /// Label one subject's rounds and apply truncation and the round-count
    /// filter. Returns the outcome with this subject's diagnostics.
    pub fn process_subject(
        &self,
        rounds: Vec<ScoredRecord>,
    ) -> (SubjectOutcome, CohortDiagnostics) {
        let mut diagnostics = CohortDiagnostics {
            subjects_seen: 1,
            records_in: rounds.len(),
            ..Default::default()
        };

        let subject_id = rounds
            .first()
            .map(|r| r.recoded.subject_id.clone())
            .unwrap_or_default();

        let mut labeled: Vec<LabeledRecord> =
            rounds.into_iter().map(|r| self.label_record(r)).collect();

        for record in labeled.iter().filter(|r| r.residence == ResidenceStatus::Unknown) {
            diagnostics.unknown_status_records += 1;
            *diagnostics
                .ambiguous_codes
                .entry(code_key(record.residence_code))
                .or_insert(0) += 1;
        }

        if self.policy.unknown_status == UnknownStatusPolicy::DropRecord {
            let before = labeled.len();
            labeled.retain(|r| r.residence != ResidenceStatus::Unknown);
            diagnostics.unknown_status_dropped = before - labeled.len();
        }

        let candidates = labeled.len();
        let outcome = truncate_and_filter(labeled, self.min_rounds);

        match &outcome {
            SubjectOutcome::Retained(records) => {
                diagnostics.subjects_retained = 1;
                diagnostics.records_retained = records.len();
                diagnostics.records_truncated = candidates - records.len();
                if records.last().and_then(LabeledRecord::label) == Some(1) {
                    diagnostics.terminal_subjects = 1;
                }
            }
            SubjectOutcome::Excluded {
                retained_rounds, ..
            } => {
                log::debug!(
                    "Excluding subject {} with {} retained round(s)",
                    subject_id,
                    retained_rounds
                );
                diagnostics.subjects_excluded = 1;
                diagnostics.records_truncated = candidates - retained_rounds;
                diagnostics.excluded_subjects.push(subject_id);
            }
        }

        (outcome, diagnostics)
    }
}
