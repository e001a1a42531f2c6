//! Test doubles and pipeline fixtures.
//!
//! [`MockHandler`] is a scriptable [`StepHandler`] keyed by step name:
//! canned outputs, queued one-shot failures, artificial delays and an
//! invocation log for at-most-once and never-dispatched assertions. The
//! [`fixtures`] module builds the pipelines the integration tests run.

use crate::core::PortValue;
use crate::errors::HandlerFailure;
use crate::handler::{HandlerCall, HandlerOutputs, HandlerRegistry, StepHandler};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// A scriptable step handler for tests.
///
/// Behavior is keyed by step name, so one instance can back every
/// handler reference of a pipeline. A step with no script succeeds with
/// an empty output map.
#[derive(Debug, Default)]
pub struct MockHandler {
    outputs: RwLock<HashMap<String, HandlerOutputs>>,
    one_shot_failures: RwLock<HashMap<String, VecDeque<HandlerFailure>>>,
    permanent_failures: RwLock<HashMap<String, HandlerFailure>>,
    delays: RwLock<HashMap<String, Duration>>,
    invocations: RwLock<Vec<String>>,
}

impl MockHandler {
    /// Creates an unscripted mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cans one output value for a step, keeping previously canned ports.
    #[must_use]
    pub fn output(self, step: &str, port: &str, value: impl Into<PortValue>) -> Self {
        self.outputs
            .write()
            .entry(step.to_string())
            .or_default()
            .insert(port.to_string(), value.into());
        self
    }

    /// Makes every invocation of a step fail.
    #[must_use]
    pub fn fail(self, step: &str, failure: HandlerFailure) -> Self {
        self.permanent_failures
            .write()
            .insert(step.to_string(), failure);
        self
    }

    /// Queues a single failure; later invocations fall through to the
    /// canned outputs.
    #[must_use]
    pub fn fail_once(self, step: &str, failure: HandlerFailure) -> Self {
        self.one_shot_failures
            .write()
            .entry(step.to_string())
            .or_default()
            .push_back(failure);
        self
    }

    /// Delays a step's invocation, for interleaving-sensitive tests.
    #[must_use]
    pub fn delay(self, step: &str, delay: Duration) -> Self {
        self.delays.write().insert(step.to_string(), delay);
        self
    }

    /// Returns the invoked step names in dispatch order.
    #[must_use]
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.read().clone()
    }

    /// Returns how many times a step was invoked.
    #[must_use]
    pub fn invocation_count(&self, step: &str) -> usize {
        self.invocations.read().iter().filter(|s| *s == step).count()
    }
}

#[async_trait]
impl StepHandler for MockHandler {
    async fn invoke(&self, call: HandlerCall) -> Result<HandlerOutputs, HandlerFailure> {
        self.invocations.write().push(call.step.clone());

        let delay = self.delays.read().get(&call.step).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .one_shot_failures
            .write()
            .get_mut(&call.step)
            .and_then(VecDeque::pop_front);
        if let Some(failure) = queued {
            return Err(failure);
        }
        if let Some(failure) = self.permanent_failures.read().get(&call.step) {
            return Err(failure.clone());
        }

        Ok(self
            .outputs
            .read()
            .get(&call.step)
            .cloned()
            .unwrap_or_default())
    }
}

/// Builds a registry mapping every handler reference of the pipeline to
/// the one given handler.
#[must_use]
pub fn registry_for(
    pipeline: &crate::graph::Pipeline,
    handler: Arc<dyn StepHandler>,
) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    for step in pipeline.steps_in_order() {
        registry.register(&step.definition.handler_ref, Arc::clone(&handler));
    }
    Arc::new(registry)
}

/// Ready-made pipelines used across the test suite.
pub mod fixtures {
    use crate::core::{ParamType, Parameter, PortType};
    use crate::graph::{Comparator, InputSource, Pipeline, PipelineBuilder, Predicate};
    use crate::registry::{PortDecl, StepDefinition};

    /// A training pipeline with a deferred deployment branch.
    ///
    /// `export -> build_dataset -> train -> evaluate`, then a
    /// conditional group deploying the model only when the evaluated
    /// error metric falls below `threshold`.
    ///
    /// # Panics
    ///
    /// Panics if the fixture fails to build; that is a test bug.
    #[must_use]
    pub fn training_pipeline(threshold: f64) -> Pipeline {
        let mut builder = PipelineBuilder::new("fraud-training");
        builder.with_root("warehouse://pipelines/fraud-training");
        builder.parameter(
            Parameter::new("data_uri", ParamType::String)
                .with_default("warehouse://transactions/raw"),
        );
        builder.parameter(Parameter::new("train_fraction", ParamType::Float).with_default(0.8));
        builder.parameter(Parameter::new("test_fraction", ParamType::Float).with_default(0.1));
        builder.parameter(Parameter::new("val_fraction", ParamType::Float).with_default(0.1));

        builder.step(
            StepDefinition::new("export", "handlers.export")
                .input(PortDecl::new("source", PortType::Param(ParamType::String)))
                .output(PortDecl::new("records", PortType::artifact("dataset"))),
        );
        builder.bind("export", "source", InputSource::param("data_uri"));

        builder.step(
            StepDefinition::new("build_dataset", "handlers.build_dataset")
                .input(PortDecl::new("records", PortType::artifact("dataset")))
                .input(PortDecl::new("train_fraction", PortType::Param(ParamType::Float)))
                .input(PortDecl::new("test_fraction", PortType::Param(ParamType::Float)))
                .input(PortDecl::new("val_fraction", PortType::Param(ParamType::Float)))
                .output(PortDecl::new("dataset", PortType::artifact("dataset"))),
        );
        builder.bind(
            "build_dataset",
            "records",
            InputSource::step_output("export", "records"),
        );
        builder.bind("build_dataset", "train_fraction", InputSource::param("train_fraction"));
        builder.bind("build_dataset", "test_fraction", InputSource::param("test_fraction"));
        builder.bind("build_dataset", "val_fraction", InputSource::param("val_fraction"));

        builder.step(
            StepDefinition::new("train", "handlers.train")
                .input(PortDecl::new("dataset", PortType::artifact("dataset")))
                .output(PortDecl::new("model", PortType::artifact("model"))),
        );
        builder.bind(
            "train",
            "dataset",
            InputSource::step_output("build_dataset", "dataset"),
        );

        builder.step(
            StepDefinition::new("evaluate", "handlers.evaluate")
                .input(PortDecl::new("model", PortType::artifact("model")))
                .output(PortDecl::new("metric", PortType::Param(ParamType::Float))),
        );
        builder.bind(
            "evaluate",
            "model",
            InputSource::step_output("train", "model"),
        );

        builder.condition(
            "deploy",
            Predicate::new("evaluate", "metric", Comparator::Lt, threshold),
            |b| {
                b.step(
                    StepDefinition::new("create_endpoint", "handlers.create_endpoint")
                        .output(PortDecl::new("endpoint", PortType::artifact("endpoint"))),
                );
                b.after("create_endpoint", &["evaluate"]);

                b.step(
                    StepDefinition::new("deploy_model", "handlers.deploy_model")
                        .input(PortDecl::new("model", PortType::artifact("model")))
                        .input(PortDecl::new("endpoint", PortType::artifact("endpoint"))),
                );
                b.bind(
                    "deploy_model",
                    "model",
                    InputSource::step_output("train", "model"),
                );
                b.bind(
                    "deploy_model",
                    "endpoint",
                    InputSource::step_output("create_endpoint", "endpoint"),
                );
            },
        );

        #[allow(clippy::unwrap_used)]
        builder.build().unwrap()
    }

    /// Two independent branches `a1 -> a2` and `b1 -> b2` joining into
    /// `join`, for failure-isolation tests.
    ///
    /// # Panics
    ///
    /// Panics if the fixture fails to build; that is a test bug.
    #[must_use]
    pub fn diamond_pipeline() -> Pipeline {
        let mut builder = PipelineBuilder::new("diamond");
        builder.step(StepDefinition::new("a1", "handlers.a1"));
        builder.step(StepDefinition::new("a2", "handlers.a2"));
        builder.after("a2", &["a1"]);
        builder.step(StepDefinition::new("b1", "handlers.b1"));
        builder.step(StepDefinition::new("b2", "handlers.b2"));
        builder.after("b2", &["b1"]);
        builder.step(StepDefinition::new("join", "handlers.join"));
        builder.after("join", &["a2", "b2"]);

        #[allow(clippy::unwrap_used)]
        builder.build().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    fn call(step: &str) -> HandlerCall {
        HandlerCall {
            step: step.to_string(),
            handler_ref: "h".to_string(),
            inputs: HashMap::new(),
            timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn test_mock_returns_canned_outputs() {
        let mock = MockHandler::new().output("evaluate", "metric", Value::Float(0.5));

        let outputs = mock.invoke(call("evaluate")).await.unwrap();
        assert_eq!(
            outputs.get("metric"),
            Some(&PortValue::from(Value::Float(0.5)))
        );
        assert_eq!(mock.invocation_count("evaluate"), 1);
    }

    #[tokio::test]
    async fn test_mock_one_shot_failure_then_success() {
        let mock = MockHandler::new()
            .fail_once("train", HandlerFailure::retryable("train", "throttled"))
            .output("train", "model", Value::from("model-v1"));

        assert!(mock.invoke(call("train")).await.is_err());
        assert!(mock.invoke(call("train")).await.is_ok());
        assert_eq!(mock.invocation_count("train"), 2);
    }

    #[tokio::test]
    async fn test_mock_permanent_failure() {
        let mock = MockHandler::new().fail("train", HandlerFailure::new("train", "oom"));

        assert!(mock.invoke(call("train")).await.is_err());
        assert!(mock.invoke(call("train")).await.is_err());
    }

    #[test]
    fn test_fixtures_build() {
        let training = fixtures::training_pipeline(0.8);
        assert_eq!(training.step_count(), 6);
        assert_eq!(training.groups().len(), 1);

        let diamond = fixtures::diamond_pipeline();
        assert_eq!(diamond.step_count(), 5);
    }
}
