//! Pipeline execution: the scheduler, per-run state and retry policies.
//!
//! Skip propagation distinguishes the two edge kinds. A step is skipped
//! when any data-edge predecessor ends `Skipped` or `Failed` (its inputs
//! cannot be resolved) and when any ordering-edge predecessor ends
//! `Failed`. An ordering-edge predecessor that ends `Skipped` counts as
//! satisfied: the dependent consumes nothing from it and still runs.

mod retry;
mod scheduler;
mod state;

pub use retry::{BackoffStrategy, JitterStrategy, NoRetry, RetryConfig, RetryPolicy};
pub use scheduler::Executor;
pub use state::{RunOutcome, RunReport, RunState, StepReport};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactRef, StepStatus, Value};
    use crate::errors::{HandlerFailure, RunError};
    use crate::events::CollectingEventSink;
    use crate::testing::{fixtures, registry_for, MockHandler};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Cans every output of the training fixture, with the given metric.
    fn training_mock(metric: f64) -> MockHandler {
        MockHandler::new()
            .output(
                "export",
                "records",
                ArtifactRef::new("warehouse://exports/raw", "dataset"),
            )
            .output(
                "build_dataset",
                "dataset",
                ArtifactRef::new("warehouse://datasets/v1", "dataset"),
            )
            .output("train", "model", ArtifactRef::new("models://fraud/v1", "model"))
            .output("evaluate", "metric", Value::Float(metric))
            .output(
                "create_endpoint",
                "endpoint",
                ArtifactRef::new("endpoints://fraud", "endpoint"),
            )
    }

    #[tokio::test]
    async fn test_linear_chain_runs_to_success() {
        let pipeline = fixtures::training_pipeline(0.8);
        let mock = Arc::new(training_mock(0.5));
        let executor = Executor::new(registry_for(&pipeline, mock.clone()));

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        assert!(report.is_success());
        for step in ["export", "build_dataset", "train", "evaluate"] {
            assert_eq!(report.status(step), Some(StepStatus::Succeeded));
        }
        // Each step dispatched at most once.
        for step in mock.invocations() {
            assert_eq!(mock.invocation_count(&step), 1);
        }
    }

    #[tokio::test]
    async fn test_condition_enables_members_when_predicate_holds() {
        let pipeline = fixtures::training_pipeline(0.8);
        let mock = Arc::new(training_mock(0.5));
        let executor = Executor::new(registry_for(&pipeline, mock.clone()));

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.status("create_endpoint"), Some(StepStatus::Succeeded));
        assert_eq!(report.status("deploy_model"), Some(StepStatus::Succeeded));
        assert_eq!(mock.invocation_count("deploy_model"), 1);
    }

    #[tokio::test]
    async fn test_condition_skips_members_when_predicate_fails() {
        let pipeline = fixtures::training_pipeline(0.8);
        let mock = Arc::new(training_mock(0.9));
        let executor = Executor::new(registry_for(&pipeline, mock.clone()));

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        // Skipped members do not fail the run.
        assert!(report.is_success());
        assert_eq!(report.status("create_endpoint"), Some(StepStatus::Skipped));
        assert_eq!(report.status("deploy_model"), Some(StepStatus::Skipped));
        assert_eq!(
            report.step("create_endpoint").unwrap().skip_reason,
            Some("condition 'deploy' not met".to_string())
        );
        // Skipped steps are never dispatched.
        assert_eq!(mock.invocation_count("create_endpoint"), 0);
        assert_eq!(mock.invocation_count("deploy_model"), 0);
    }

    #[tokio::test]
    async fn test_ordering_edge_from_skipped_step_still_runs() {
        use crate::core::{ParamType, PortType};
        use crate::graph::{Comparator, PipelineBuilder, Predicate};
        use crate::registry::{PortDecl, StepDefinition};

        // `cleanup` is ordered after the gated `notify` but consumes
        // nothing from it, so a skipped `notify` must not skip it.
        let mut builder = PipelineBuilder::new("ordered-cleanup");
        builder.step(
            StepDefinition::new("evaluate", "handlers.evaluate")
                .output(PortDecl::new("metric", PortType::Param(ParamType::Float))),
        );
        builder.condition(
            "alert",
            Predicate::new("evaluate", "metric", Comparator::Lt, 0.8),
            |b| {
                b.step(StepDefinition::new("notify", "handlers.notify"));
                b.after("notify", &["evaluate"]);
            },
        );
        builder.step(StepDefinition::new("cleanup", "handlers.cleanup"));
        builder.after("cleanup", &["notify"]);
        let pipeline = builder.build().unwrap();

        let mock = Arc::new(MockHandler::new().output("evaluate", "metric", Value::Float(0.9)));
        let executor = Executor::new(registry_for(&pipeline, mock.clone()));

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.status("notify"), Some(StepStatus::Skipped));
        assert_eq!(report.status("cleanup"), Some(StepStatus::Succeeded));
        assert_eq!(mock.invocation_count("notify"), 0);
        assert_eq!(mock.invocation_count("cleanup"), 1);
    }

    #[tokio::test]
    async fn test_failed_gate_forces_condition_false() {
        let pipeline = fixtures::training_pipeline(0.8);
        let mock = Arc::new(
            training_mock(0.5).fail("evaluate", HandlerFailure::new("evaluate", "bad split")),
        );
        let executor = Executor::new(registry_for(&pipeline, mock.clone()));

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.status("evaluate"), Some(StepStatus::Failed));
        assert_eq!(report.status("create_endpoint"), Some(StepStatus::Skipped));
        assert_eq!(report.status("deploy_model"), Some(StepStatus::Skipped));
        assert_eq!(mock.invocation_count("create_endpoint"), 0);
        assert_eq!(
            report.step("evaluate").unwrap().error,
            Some("bad split".to_string())
        );
        // Upstream outputs survive the failed run.
        assert!(report.step("train").unwrap().outputs.contains_key("model"));
    }

    #[tokio::test]
    async fn test_failure_does_not_halt_independent_branch() {
        let pipeline = fixtures::diamond_pipeline();
        let mock = Arc::new(
            MockHandler::new()
                .fail("a1", HandlerFailure::new("a1", "quota exceeded"))
                .delay("b1", Duration::from_millis(50)),
        );
        let executor = Executor::new(registry_for(&pipeline, mock.clone()));

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(report.status("a1"), Some(StepStatus::Failed));
        assert_eq!(report.status("a2"), Some(StepStatus::Skipped));
        assert_eq!(report.status("join"), Some(StepStatus::Skipped));
        // The b branch was already in flight and ran to completion.
        assert_eq!(report.status("b1"), Some(StepStatus::Succeeded));
        assert_eq!(report.status("b2"), Some(StepStatus::Succeeded));
        assert_eq!(mock.invocation_count("a2"), 0);
        assert_eq!(mock.invocation_count("join"), 0);
    }

    #[tokio::test]
    async fn test_terminal_partition_is_deterministic() {
        let pipeline = fixtures::training_pipeline(0.8);

        let mut partitions = Vec::new();
        for _ in 0..3 {
            let mock = Arc::new(training_mock(0.95));
            let executor = Executor::new(registry_for(&pipeline, mock));
            let report = executor.run(&pipeline, HashMap::new()).await.unwrap();
            partitions.push(report.partition());
        }

        assert_eq!(partitions[0], partitions[1]);
        assert_eq!(partitions[1], partitions[2]);
    }

    #[tokio::test]
    async fn test_bounded_concurrency_still_completes() {
        let pipeline = fixtures::diamond_pipeline();
        let mock = Arc::new(MockHandler::new());
        let executor =
            Executor::new(registry_for(&pipeline, mock.clone())).with_max_concurrency(1);

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(mock.invocations().len(), 5);
    }

    #[tokio::test]
    async fn test_retry_policy_applies_to_retryable_failures() {
        let pipeline = fixtures::training_pipeline(0.8);
        let mock = Arc::new(
            training_mock(0.5)
                .fail_once("train", HandlerFailure::retryable("train", "throttled")),
        );
        let policy = RetryConfig::new()
            .with_max_attempts(2)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None);
        let executor = Executor::new(registry_for(&pipeline, mock.clone()))
            .with_retry_policy(Arc::new(policy));

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(mock.invocation_count("train"), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_not_retried() {
        let pipeline = fixtures::training_pipeline(0.8);
        let mock = Arc::new(
            training_mock(0.5).fail("train", HandlerFailure::new("train", "oom")),
        );
        let policy = RetryConfig::new().with_max_attempts(5).with_base_delay_ms(1);
        let executor = Executor::new(registry_for(&pipeline, mock.clone()))
            .with_retry_policy(Arc::new(policy));

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(mock.invocation_count("train"), 1);
    }

    #[tokio::test]
    async fn test_unknown_parameter_override_rejected() {
        let pipeline = fixtures::training_pipeline(0.8);
        let executor = Executor::new(registry_for(&pipeline, Arc::new(MockHandler::new())));

        let mut overrides = HashMap::new();
        overrides.insert("ghost".to_string(), Value::Float(1.0));
        let err = executor.run(&pipeline, overrides).await.unwrap_err();

        assert_eq!(err, RunError::UnknownParameter { name: "ghost".into() });
    }

    #[tokio::test]
    async fn test_parameter_type_checked_at_invocation() {
        let pipeline = fixtures::training_pipeline(0.8);
        let executor = Executor::new(registry_for(&pipeline, Arc::new(MockHandler::new())));

        let mut overrides = HashMap::new();
        overrides.insert("data_uri".to_string(), Value::Bool(true));
        let err = executor.run(&pipeline, overrides).await.unwrap_err();

        assert!(matches!(err, RunError::ParameterType { .. }));
    }

    #[tokio::test]
    async fn test_parameter_override_reaches_handler() {
        let pipeline = fixtures::training_pipeline(0.8);
        let mock = Arc::new(training_mock(0.9));
        let executor = Executor::new(registry_for(&pipeline, mock.clone()));

        let mut overrides = HashMap::new();
        overrides.insert(
            "data_uri".to_string(),
            Value::from("warehouse://transactions/2026-08"),
        );
        let report = executor.run(&pipeline, overrides).await.unwrap();

        assert!(report.is_success());
        assert_eq!(mock.invocation_count("export"), 1);
    }

    #[tokio::test]
    async fn test_missing_declared_output_fails_the_step() {
        let pipeline = fixtures::training_pipeline(0.8);
        // No canned metric: evaluate succeeds with an empty output map.
        let mock = Arc::new(
            MockHandler::new()
                .output(
                    "export",
                    "records",
                    ArtifactRef::new("warehouse://exports/raw", "dataset"),
                )
                .output(
                    "build_dataset",
                    "dataset",
                    ArtifactRef::new("warehouse://datasets/v1", "dataset"),
                )
                .output("train", "model", ArtifactRef::new("models://fraud/v1", "model")),
        );
        let executor = Executor::new(registry_for(&pipeline, mock));

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        assert_eq!(report.status("evaluate"), Some(StepStatus::Failed));
        assert_eq!(report.status("deploy_model"), Some(StepStatus::Skipped));
    }

    #[tokio::test]
    async fn test_events_emitted_in_lifecycle_order() {
        let pipeline = fixtures::training_pipeline(0.8);
        let sink = Arc::new(CollectingEventSink::new());
        let executor = Executor::new(registry_for(&pipeline, Arc::new(training_mock(0.9))))
            .with_event_sink(sink.clone());

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();
        assert!(report.is_success());

        let types = sink.event_types();
        assert!(types.contains(&"step.started".to_string()));
        assert!(types.contains(&"condition.resolved".to_string()));
        assert!(types.contains(&"step.skipped".to_string()));
        assert_eq!(types.last(), Some(&"run.completed".to_string()));
    }

    #[tokio::test]
    async fn test_report_lists_steps_in_registration_order() {
        let pipeline = fixtures::training_pipeline(0.8);
        let executor = Executor::new(registry_for(&pipeline, Arc::new(training_mock(0.5))));

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        let names: Vec<&str> = report.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "export",
                "build_dataset",
                "train",
                "evaluate",
                "create_endpoint",
                "deploy_model"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_handler_fails_step_not_run() {
        let pipeline = fixtures::diamond_pipeline();
        // Empty registry: every dispatch fails with a recorded error.
        let executor = Executor::new(Arc::new(crate::handler::HandlerRegistry::new()));

        let report = executor.run(&pipeline, HashMap::new()).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.status("a1"), Some(StepStatus::Failed));
        assert!(report
            .step("a1")
            .unwrap()
            .error
            .as_deref()
            .is_some_and(|e| e.contains("no handler registered")));
    }
}
