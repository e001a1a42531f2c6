//! # Dagflow
//!
//! A declarative DAG pipeline orchestration core.
//!
//! Dagflow builds typed step graphs, validates them up front, and drives
//! them to completion against a pluggable handler backend:
//!
//! - **Typed steps and ports**: declared inputs/outputs with parameter
//!   and artifact types, checked at build time
//! - **Data and ordering edges**: value bindings infer edges; explicit
//!   `after` edges order side effects with no data flow
//! - **Deferred conditional branches**: sub-graphs gated on runtime
//!   output values, resolved only once the gating step has run
//! - **Parallel scheduling**: independent branches execute concurrently,
//!   bounded by a configurable limit, with fail-loud partial-failure
//!   semantics
//! - **Portable compiled specs**: a validated pipeline serializes to a
//!   JSON document and rebuilds into a structurally equal pipeline
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dagflow::prelude::*;
//!
//! let mut builder = PipelineBuilder::new("training");
//! builder.step(evaluate_definition());
//! builder.condition(
//!     "deploy",
//!     Predicate::new("evaluate", "metric", Comparator::Lt, 0.8),
//!     |b| { b.step(deploy_definition()); b.after("deploy", &["evaluate"]); },
//! );
//! let pipeline = builder.build()?;
//!
//! let executor = Executor::new(handlers);
//! let report = executor.run(&pipeline, overrides).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod compile;
pub mod core;
pub mod errors;
pub mod events;
pub mod exec;
pub mod graph;
pub mod handler;
pub mod registry;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::compile::{compile, rebuild, PipelineDoc};
    pub use crate::core::{
        ArtifactRef, ParamType, Parameter, PortType, PortValue, StepStatus, Value,
    };
    pub use crate::errors::{BuildError, DagflowError, HandlerFailure, RunError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::exec::{
        Executor, NoRetry, RetryConfig, RetryPolicy, RunOutcome, RunReport, RunState, StepReport,
    };
    pub use crate::graph::{
        Comparator, ConditionalGroup, InputSource, Pipeline, PipelineBuilder, PipelineStep,
        Predicate,
    };
    pub use crate::handler::{
        HandlerCall, HandlerOutputs, HandlerRegistry, NoOpHandler, StepHandler,
    };
    pub use crate::registry::{PortDecl, StepDefinition, StepRegistry};
}
