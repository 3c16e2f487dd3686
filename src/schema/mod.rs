//! survey.record.v1 input schema
//!
//! This module defines the per-round survey record consumed by the pipeline
//! and the reader that parses and groups record streams.

mod raw_record;
mod reader;

pub use raw_record::*;
pub use reader::*;
