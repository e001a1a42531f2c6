//! DAG construction and validation.
//!
//! This module provides:
//! - The pipeline builder with build-time validation
//! - The immutable validated pipeline
//! - Conditional groups and their gating predicates

mod builder;
mod condition;
mod pipeline;

pub use builder::PipelineBuilder;
pub use condition::{Comparator, ConditionalGroup, Predicate};
pub use pipeline::{InputSource, Pipeline, PipelineStep};
