//! Cohort Flux - Longitudinal survey panel to modeling-ready feature tables
//!
//! Cohort Flux transforms per-round survey records into a labeled, leakage-free
//! panel through a deterministic pipeline: recoding → composite indices →
//! terminal labeling and truncation → subject-level split → temporal features
//! → threshold-sweep evaluation of an external model's scores.
//!
//! ## Modules
//!
//! - **Cohort construction**: `recode`, `composite`, `labeler`
//! - **Modeling preparation**: `split`, `temporal`
//! - **Evaluation**: `model`, `evaluate`

pub mod composite;
pub mod config;
pub mod encoder;
pub mod error;
pub mod evaluate;
pub mod labeler;
pub mod model;
pub mod pipeline;
pub mod recode;
pub mod schema;
pub mod split;
pub mod temporal;
pub mod types;

pub use config::PipelineConfig;
pub use error::PanelError;
pub use evaluate::{EvaluationReport, ThresholdSweepEvaluator};
pub use model::{ModelFitter, ProbabilityModel};
pub use pipeline::{build_cohort, CohortBuild, CohortProcessor, PartitionedFeatures};

// Schema exports
pub use schema::{RecordReader, SurveyRecord, SCHEMA_VERSION};

/// Version embedded in all table payloads
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for table payloads
pub const PRODUCER_NAME: &str = "cohort-flux";
