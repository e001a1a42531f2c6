//! The validated, immutable pipeline produced by the builder.

use super::ConditionalGroup;
use crate::core::{Parameter, Value};
use crate::registry::StepDefinition;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// The source feeding a step's input port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    /// A literal value fixed at build time.
    Literal(Value),
    /// A top-level pipeline parameter, bound at invocation.
    PipelineParam(String),
    /// An output of another step; induces a data edge.
    StepOutput {
        /// The producing step.
        step: String,
        /// The producer's output port.
        output: String,
    },
}

impl InputSource {
    /// Shorthand for a literal source.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Shorthand for a pipeline-parameter source.
    #[must_use]
    pub fn param(name: impl Into<String>) -> Self {
        Self::PipelineParam(name.into())
    }

    /// Shorthand for a step-output source.
    #[must_use]
    pub fn step_output(step: impl Into<String>, output: impl Into<String>) -> Self {
        Self::StepOutput {
            step: step.into(),
            output: output.into(),
        }
    }
}

/// A step instance: its definition plus concrete input bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStep {
    /// The step definition.
    pub definition: StepDefinition,
    /// Input port name to bound source.
    pub bindings: HashMap<String, InputSource>,
}

impl PipelineStep {
    /// Returns the effective source for an input port.
    ///
    /// An explicit binding wins; otherwise a declared port default acts
    /// as a literal source.
    #[must_use]
    pub fn effective_binding(&self, input: &str) -> Option<InputSource> {
        if let Some(source) = self.bindings.get(input) {
            return Some(source.clone());
        }
        self.definition
            .find_input(input)
            .and_then(|port| port.default.clone())
            .map(InputSource::Literal)
    }
}

/// A validated pipeline: steps, edges, conditional groups, parameters.
///
/// Constructed once by [`super::PipelineBuilder::build`] and immutable
/// thereafter. Structural equality (`PartialEq`) compares steps, edges,
/// groups and parameters, which is what the compile round-trip
/// guarantees preserve.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub(super) name: String,
    pub(super) root: Option<String>,
    pub(super) parameters: Vec<Parameter>,
    pub(super) steps: HashMap<String, PipelineStep>,
    pub(super) step_order: Vec<String>,
    pub(super) ordering_edges: Vec<(String, String)>,
    pub(super) groups: Vec<ConditionalGroup>,
    pub(super) topo_order: Vec<String>,
}

impl Pipeline {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the root storage location, if set.
    #[must_use]
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Returns the declared top-level parameters.
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Looks up a declared parameter by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Looks up a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&PipelineStep> {
        self.steps.get(name)
    }

    /// Iterates steps in registration order.
    pub fn steps_in_order(&self) -> impl Iterator<Item = &PipelineStep> {
        self.step_order.iter().filter_map(|name| self.steps.get(name))
    }

    /// Returns the deterministic topological execution order.
    #[must_use]
    pub fn topo_order(&self) -> &[String] {
        &self.topo_order
    }

    /// Returns the explicit ordering edges.
    #[must_use]
    pub fn ordering_edges(&self) -> &[(String, String)] {
        &self.ordering_edges
    }

    /// Returns the conditional groups.
    #[must_use]
    pub fn groups(&self) -> &[ConditionalGroup] {
        &self.groups
    }

    /// Returns the indices of every group a step belongs to.
    #[must_use]
    pub fn memberships(&self, step: &str) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, group)| group.members.iter().any(|m| m == step))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Returns the data-edge predecessors of a step.
    #[must_use]
    pub fn data_predecessors(&self, step: &str) -> BTreeSet<String> {
        let mut preds = BTreeSet::new();
        if let Some(instance) = self.steps.get(step) {
            for port in &instance.definition.inputs {
                if let Some(InputSource::StepOutput { step: producer, .. }) =
                    instance.effective_binding(&port.name)
                {
                    preds.insert(producer);
                }
            }
        }
        preds
    }

    /// Returns the ordering-edge predecessors of a step.
    #[must_use]
    pub fn ordering_predecessors(&self, step: &str) -> BTreeSet<String> {
        self.ordering_edges
            .iter()
            .filter(|(_, to)| to == step)
            .map(|(from, _)| from.clone())
            .collect()
    }

    /// Returns the union of data and ordering predecessors.
    #[must_use]
    pub fn predecessors(&self, step: &str) -> BTreeSet<String> {
        let mut preds = self.data_predecessors(step);
        preds.extend(self.ordering_predecessors(step));
        preds
    }

    /// Builds the forward adjacency of the union graph.
    #[must_use]
    pub fn successors_map(&self) -> HashMap<String, BTreeSet<String>> {
        let mut map: HashMap<String, BTreeSet<String>> = self
            .step_order
            .iter()
            .map(|name| (name.clone(), BTreeSet::new()))
            .collect();
        for name in &self.step_order {
            for pred in self.predecessors(name) {
                if let Some(succs) = map.get_mut(&pred) {
                    succs.insert(name.clone());
                }
            }
        }
        map
    }

    /// Returns every transitive ancestor of a step in the union graph.
    #[must_use]
    pub fn ancestors(&self, step: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<String> = self.predecessors(step).into_iter().collect();
        while let Some(current) = stack.pop() {
            if seen.insert(current.clone()) {
                stack.extend(self.predecessors(&current));
            }
        }
        seen
    }

    /// Returns every transitive descendant of a step in the union graph.
    #[must_use]
    pub fn descendants(&self, step: &str) -> BTreeSet<String> {
        let successors = self.successors_map();
        let mut seen = BTreeSet::new();
        let mut stack: Vec<String> = successors
            .get(step)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if seen.insert(current.clone()) {
                if let Some(succs) = successors.get(&current) {
                    stack.extend(succs.iter().cloned());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ParamType, PortType};
    use crate::graph::PipelineBuilder;
    use crate::registry::{PortDecl, StepDefinition};

    fn linear_pipeline() -> Pipeline {
        let mut builder = PipelineBuilder::new("linear");
        builder.step(
            StepDefinition::new("a", "h.a")
                .output(PortDecl::new("out", PortType::Param(ParamType::Int))),
        );
        builder.step(
            StepDefinition::new("b", "h.b")
                .input(PortDecl::new("in", PortType::Param(ParamType::Int)))
                .output(PortDecl::new("out", PortType::Param(ParamType::Int))),
        );
        builder.bind("b", "in", InputSource::step_output("a", "out"));
        builder.step(StepDefinition::new("c", "h.c"));
        builder.after("c", &["b"]);
        builder.build().unwrap()
    }

    #[test]
    fn test_predecessor_kinds() {
        let pipeline = linear_pipeline();

        assert_eq!(
            pipeline.data_predecessors("b"),
            BTreeSet::from(["a".to_string()])
        );
        assert!(pipeline.data_predecessors("c").is_empty());
        assert_eq!(
            pipeline.ordering_predecessors("c"),
            BTreeSet::from(["b".to_string()])
        );
        assert_eq!(pipeline.predecessors("c"), BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let pipeline = linear_pipeline();

        assert_eq!(
            pipeline.ancestors("c"),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            pipeline.descendants("a"),
            BTreeSet::from(["b".to_string(), "c".to_string()])
        );
        assert!(pipeline.descendants("c").is_empty());
    }

    #[test]
    fn test_effective_binding_falls_back_to_default() {
        let mut builder = PipelineBuilder::new("defaults");
        builder.step(
            StepDefinition::new("only", "h.only").input(
                PortDecl::new("replicas", PortType::Param(ParamType::Int)).with_default(1_i64),
            ),
        );
        let pipeline = builder.build().unwrap();

        let step = pipeline.step("only").unwrap();
        assert_eq!(
            step.effective_binding("replicas"),
            Some(InputSource::Literal(Value::Int(1)))
        );
    }

    #[test]
    fn test_input_source_serialization() {
        let source = InputSource::step_output("evaluate", "metric");
        let json = serde_json::to_string(&source).unwrap();
        let back: InputSource = serde_json::from_str(&json).unwrap();
        assert_eq!(source, back);

        let literal = InputSource::literal(0.8);
        assert_eq!(
            serde_json::to_string(&literal).unwrap(),
            r#"{"literal":0.8}"#
        );
    }
}
