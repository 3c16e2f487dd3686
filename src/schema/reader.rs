//! Reader for survey.record.v1 input
//!
//! Parses JSON arrays and NDJSON into [`SurveyRecord`]s and groups them into
//! per-subject round sequences.

use crate::error::PanelError;
use crate::schema::raw_record::*;
use std::collections::BTreeMap;

/// Reader for survey record streams
pub struct RecordReader;

impl RecordReader {
    /// Parse a JSON string containing an array of records
    pub fn parse_array(json: &str) -> Result<Vec<SurveyRecord>, PanelError> {
        let envelopes: Vec<RecordEnvelope> = serde_json::from_str(json)?;
        envelopes
            .into_iter()
            .enumerate()
            .map(|(idx, envelope)| {
                envelope.validate().map_err(|e| {
                    PanelError::ParseError(format!("Invalid record at index {}: {}", idx, e))
                })?;
                Ok(envelope.record)
            })
            .collect()
    }

    /// Parse NDJSON (newline-delimited JSON) containing records
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<SurveyRecord>, PanelError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let envelope: RecordEnvelope = serde_json::from_str(trimmed).map_err(|e| {
                PanelError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
            })?;
            envelope.validate().map_err(|e| {
                PanelError::ParseError(format!("Invalid record on line {}: {}", line_num + 1, e))
            })?;
            records.push(envelope.record);
        }
        Ok(records)
    }

    /// Group records by subject, each subject's rounds sorted ascending.
    ///
    /// Subjects come back in id order so downstream fan-out is deterministic.
    /// A repeated (subject, round) pair is an input error.
    pub fn group_by_subject(
        records: Vec<SurveyRecord>,
    ) -> Result<BTreeMap<String, Vec<SurveyRecord>>, PanelError> {
        let mut by_subject: BTreeMap<String, Vec<SurveyRecord>> = BTreeMap::new();
        for record in records {
            by_subject
                .entry(record.subject_id.clone())
                .or_default()
                .push(record);
        }

        for (subject_id, rounds) in by_subject.iter_mut() {
            rounds.sort_by_key(|r| r.round);
            if let Some(pair) = rounds.windows(2).find(|w| w[0].round == w[1].round) {
                return Err(PanelError::DuplicateRound {
                    subject_id: subject_id.clone(),
                    round: pair[0].round,
                });
            }
        }

        Ok(by_subject)
    }

    /// Validate a batch of records, returning only the failures
    pub fn validate_records(records: &[SurveyRecord]) -> Vec<ValidationResult> {
        records
            .iter()
            .enumerate()
            .map(|(idx, record)| ValidationResult {
                index: idx,
                subject_id: record.subject_id.clone(),
                result: record.validate().err(),
            })
            .filter(|r| r.result.is_some())
            .collect()
    }
}

/// Result of record validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub subject_id: String,
    pub result: Option<ValidationError>,
}
