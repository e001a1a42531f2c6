//! Error types for dagflow.
//!
//! Build-time errors are all fatal and reported before any execution;
//! runtime errors are recorded on the specific step they occurred on.

use thiserror::Error;

/// Build-time validation errors.
///
/// These are raised by the [`crate::registry::StepRegistry`] and
/// [`crate::graph::PipelineBuilder`]; none of them are retryable and a
/// pipeline that fails to build never executes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    /// A step name was registered twice.
    #[error("duplicate step '{name}'")]
    DuplicateStep {
        /// The conflicting step name.
        name: String,
    },

    /// A name did not resolve to a registered step.
    #[error("unknown step '{name}'")]
    UnknownStep {
        /// The unresolved name.
        name: String,
    },

    /// A step referenced a port that its producer does not declare.
    #[error("step '{step}' has no port named '{port}'")]
    UnknownPort {
        /// The step that was expected to declare the port.
        step: String,
        /// The missing port name.
        port: String,
    },

    /// A binding referenced a top-level parameter the pipeline does not declare.
    #[error("unknown pipeline parameter '{name}'")]
    UnknownParameter {
        /// The undeclared parameter name.
        name: String,
    },

    /// A required input had no bound source at build completion.
    #[error("input '{input}' of step '{step}' has no bound source")]
    UnboundInput {
        /// The consuming step.
        step: String,
        /// The unbound input port.
        input: String,
    },

    /// The union of data and ordering edges contains a cycle.
    #[error("cycle detected in pipeline: {}", path.join(" -> "))]
    CycleDetected {
        /// The steps forming the cycle, first repeated at the end.
        path: Vec<String>,
    },

    /// A bound source's declared type disagrees with the consuming input.
    #[error("type mismatch on input '{input}' of step '{step}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// The consuming step.
        step: String,
        /// The input port being bound.
        input: String,
        /// The declared type of the input port.
        expected: String,
        /// The declared type of the bound source.
        actual: String,
    },

    /// A conditional group's gate output cannot be resolved before the
    /// group could run.
    #[error("condition '{group}': {reason}")]
    UnresolvedCondition {
        /// The conditional group name.
        group: String,
        /// Why the gate cannot be resolved.
        reason: String,
    },

    /// A pipeline must contain at least one step.
    #[error("pipeline '{name}' has no steps")]
    EmptyPipeline {
        /// The pipeline name.
        name: String,
    },
}

/// A step handler's failure signal.
///
/// Carries the handler's message verbatim so the run report can surface
/// it unchanged. `timed_out` marks failures produced by a handler-side
/// timeout; the core does not interpret timeouts beyond this flag.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("handler for step '{step}' failed: {message}")]
pub struct HandlerFailure {
    /// The step whose handler failed.
    pub step: String,
    /// The handler's error message, verbatim.
    pub message: String,
    /// Whether the failure may be retried under a configured policy.
    pub retryable: bool,
    /// Whether the failure was a timeout.
    pub timed_out: bool,
}

impl HandlerFailure {
    /// Creates a non-retryable handler failure.
    #[must_use]
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            retryable: false,
            timed_out: false,
        }
    }

    /// Creates a retryable handler failure.
    #[must_use]
    pub fn retryable(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::new(step, message)
        }
    }

    /// Creates a timeout failure (retryable).
    #[must_use]
    pub fn timeout(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            timed_out: true,
            ..Self::new(step, message)
        }
    }
}

/// Errors raised at run invocation or by the scheduler itself.
///
/// Handler failures are not run errors: they are recorded on the failed
/// step and the run continues on independent branches.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    /// An override was supplied for a parameter the pipeline does not declare.
    #[error("unknown parameter '{name}'")]
    UnknownParameter {
        /// The parameter name.
        name: String,
    },

    /// A declared parameter has neither an override nor a default.
    #[error("missing value for parameter '{name}'")]
    MissingParameter {
        /// The parameter name.
        name: String,
    },

    /// An override value does not match the declared parameter type.
    #[error("parameter '{name}' expects {expected}, got {actual}")]
    ParameterType {
        /// The parameter name.
        name: String,
        /// The declared type.
        expected: String,
        /// The supplied type.
        actual: String,
    },

    /// The scheduler can make no further progress with steps outstanding.
    ///
    /// This indicates an internal invariant violation; a validated
    /// pipeline cannot deadlock.
    #[error("deadlocked run; remaining steps: {remaining:?}")]
    Deadlock {
        /// The steps that never reached a terminal state.
        remaining: Vec<String>,
    },

    /// A spawned step task panicked or was aborted.
    #[error("task join error: {0}")]
    Join(String),
}

/// The top-level error type for dagflow operations.
#[derive(Debug, Error)]
pub enum DagflowError {
    /// A build-time validation error.
    #[error("{0}")]
    Build(#[from] BuildError),

    /// A run invocation or scheduler error.
    #[error("{0}")]
    Run(#[from] RunError),

    /// A handler failure surfaced outside a run report.
    #[error("{0}")]
    Handler(#[from] HandlerFailure),

    /// Serialization or deserialization of a compiled spec failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error reading or writing a compiled spec.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for DagflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_message_names_members() {
        let err = BuildError::CycleDetected {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cycle detected in pipeline: a -> b -> a");
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = BuildError::TypeMismatch {
            step: "train".into(),
            input: "dataset".into(),
            expected: "artifact:dataset".into(),
            actual: "float".into(),
        };
        assert!(err.to_string().contains("expected artifact:dataset"));
        assert!(err.to_string().contains("got float"));
    }

    #[test]
    fn test_handler_failure_constructors() {
        let plain = HandlerFailure::new("train", "oom");
        assert!(!plain.retryable);
        assert!(!plain.timed_out);

        let retryable = HandlerFailure::retryable("train", "throttled");
        assert!(retryable.retryable);

        let timeout = HandlerFailure::timeout("train", "deadline exceeded");
        assert!(timeout.retryable);
        assert!(timeout.timed_out);
        assert_eq!(
            timeout.to_string(),
            "handler for step 'train' failed: deadline exceeded"
        );
    }

    #[test]
    fn test_dagflow_error_from_build() {
        let err: DagflowError = BuildError::UnknownStep { name: "x".into() }.into();
        assert_eq!(err.to_string(), "unknown step 'x'");
    }
}
