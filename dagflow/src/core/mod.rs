//! Core domain model types for dagflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Parameter types and primitive values
//! - Artifact references
//! - Port types and the values that flow through ports
//! - Step execution status

mod artifact;
mod port;
mod status;
mod value;

pub use artifact::ArtifactRef;
pub use port::{PortType, PortValue};
pub use status::StepStatus;
pub use value::{Parameter, ParamType, Value};
