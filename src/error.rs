//! Error types for cohort-flux

use thiserror::Error;

/// Errors that can occur while building or evaluating a cohort panel.
///
/// Only configuration and input-contract problems are errors. Data-quality
/// anomalies (ambiguous residence codes, excluded subjects, degenerate
/// metrics) are recovered locally and reported through diagnostics.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("No recoding rule registered for item: {0}")]
    UnknownItem(String),

    #[error("Unknown column in feature spec: {0}")]
    UnknownColumn(String),

    #[error("Train/test partitions overlap on subjects: {overlapping:?}")]
    SplitOverlap { overlapping: Vec<String> },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate round {round} for subject {subject_id}")]
    DuplicateRound { subject_id: String, round: u32 },

    #[error("Length mismatch: {scores} scores but {labels} labels")]
    LengthMismatch { scores: usize, labels: usize },

    #[error("Invalid score at index {index}: {value}")]
    InvalidScore { index: usize, value: f64 },

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Model collaborator failed: {0}")]
    ModelError(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),
}
