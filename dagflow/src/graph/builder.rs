//! Pipeline builder with build-time validation.
//!
//! The builder accepts step instances, input bindings, ordering hints
//! and conditional groups, then validates the whole graph in `build()`:
//! duplicate names, unknown references, unbound inputs, type mismatches,
//! cycles over the union of data and ordering edges, and unresolvable
//! condition gates are all rejected before anything can execute.

use super::{ConditionalGroup, InputSource, Pipeline, PipelineStep, Predicate};
use crate::core::{ParamType, Parameter, PortType};
use crate::errors::BuildError;
use crate::registry::StepDefinition;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Builder for validated pipelines.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    name: String,
    root: Option<String>,
    parameters: Vec<Parameter>,
    steps: Vec<StepDefinition>,
    bindings: HashMap<String, HashMap<String, InputSource>>,
    ordering_edges: Vec<(String, String)>,
    groups: Vec<ConditionalGroup>,
    group_stack: Vec<usize>,
}

impl PipelineBuilder {
    /// Creates a new builder for a pipeline with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the root storage location recorded in the compiled spec.
    pub fn with_root(&mut self, root: impl Into<String>) -> &mut Self {
        self.root = Some(root.into());
        self
    }

    /// Declares a top-level parameter.
    ///
    /// Re-declaring a parameter of the same name replaces it.
    pub fn parameter(&mut self, parameter: Parameter) -> &mut Self {
        self.parameters.retain(|p| p.name != parameter.name);
        self.parameters.push(parameter);
        self
    }

    /// Adds a step instance.
    ///
    /// Registration order is recorded: it breaks topological-order ties,
    /// so identical input sequences compile to identical specs. Inside a
    /// [`condition`](Self::condition) body the step also becomes a member
    /// of every open group.
    pub fn step(&mut self, definition: StepDefinition) -> &mut Self {
        for &idx in &self.group_stack {
            self.groups[idx].members.push(definition.name.clone());
        }
        self.steps.push(definition);
        self
    }

    /// Binds an input port of a step to a source.
    ///
    /// Re-binding an input replaces the previous source; the
    /// exactly-one-source invariant is enforced at build completion.
    pub fn bind(
        &mut self,
        step: impl Into<String>,
        input: impl Into<String>,
        source: InputSource,
    ) -> &mut Self {
        self.bindings
            .entry(step.into())
            .or_default()
            .insert(input.into(), source);
        self
    }

    /// Adds ordering edges: `step` runs only after every predecessor.
    ///
    /// Used when a step has a side effect another step must wait on even
    /// though no value passes between them.
    pub fn after(&mut self, step: impl Into<String>, predecessors: &[&str]) -> &mut Self {
        let step = step.into();
        for pred in predecessors {
            self.ordering_edges.push(((*pred).to_string(), step.clone()));
        }
        self
    }

    /// Opens a conditional group gated by `predicate`.
    ///
    /// The body closure registers the group's steps through the normal
    /// builder methods. Groups nest; a step added inside nested bodies is
    /// a member of every enclosing group.
    pub fn condition(
        &mut self,
        name: impl Into<String>,
        predicate: Predicate,
        body: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let idx = self.groups.len();
        self.groups.push(ConditionalGroup {
            name: name.into(),
            predicate,
            members: Vec::new(),
            parent: self.group_stack.last().copied(),
        });
        self.group_stack.push(idx);
        body(self);
        self.group_stack.pop();
        self
    }

    /// Restores a compiled group verbatim; used when rebuilding from a
    /// spec document, where member sets are already recorded.
    pub(crate) fn push_group(&mut self, group: ConditionalGroup) -> &mut Self {
        self.groups.push(group);
        self
    }

    /// Validates the graph and freezes it into a [`Pipeline`].
    ///
    /// # Errors
    ///
    /// Returns the first [`BuildError`] encountered; validation walks
    /// steps in registration order so the reported error is
    /// deterministic for identical input sequences.
    pub fn build(self) -> Result<Pipeline, BuildError> {
        if self.steps.is_empty() {
            return Err(BuildError::EmptyPipeline { name: self.name });
        }

        // Unique step names.
        let mut definitions: HashMap<String, StepDefinition> = HashMap::new();
        let mut step_order: Vec<String> = Vec::with_capacity(self.steps.len());
        for definition in self.steps {
            if definitions.contains_key(&definition.name) {
                return Err(BuildError::DuplicateStep {
                    name: definition.name,
                });
            }
            step_order.push(definition.name.clone());
            definitions.insert(definition.name.clone(), definition);
        }

        validate_parameters(&self.parameters)?;

        // Assemble step instances and validate every binding.
        let mut steps: HashMap<String, PipelineStep> = HashMap::new();
        for name in &step_order {
            let definition = definitions[name].clone();
            let bindings = self.bindings.get(name).cloned().unwrap_or_default();
            let instance = PipelineStep {
                definition,
                bindings,
            };
            validate_bindings(&instance, &definitions, &self.parameters)?;
            steps.insert(name.clone(), instance);
        }
        for step in self.bindings.keys() {
            if !definitions.contains_key(step) {
                return Err(BuildError::UnknownStep { name: step.clone() });
            }
        }

        // Ordering edges must reference known steps.
        for (from, to) in &self.ordering_edges {
            for endpoint in [from, to] {
                if !definitions.contains_key(endpoint) {
                    return Err(BuildError::UnknownStep {
                        name: endpoint.clone(),
                    });
                }
            }
        }

        let successors = union_successors(&steps, &step_order, &self.ordering_edges);
        detect_cycle(&step_order, &successors)?;
        let topo_order = topological_order(&step_order, &steps, &self.ordering_edges);

        validate_groups(&self.groups, &definitions, &steps, &self.ordering_edges)?;

        Ok(Pipeline {
            name: self.name,
            root: self.root,
            parameters: self.parameters,
            steps,
            step_order,
            ordering_edges: self.ordering_edges,
            groups: self.groups,
            topo_order,
        })
    }
}

fn validate_parameters(parameters: &[Parameter]) -> Result<(), BuildError> {
    for parameter in parameters {
        if let Some(default) = &parameter.default {
            if default.param_type() != parameter.param_type {
                return Err(BuildError::TypeMismatch {
                    step: parameter.name.clone(),
                    input: "default".to_string(),
                    expected: parameter.param_type.to_string(),
                    actual: default.param_type().to_string(),
                });
            }
        }
    }
    Ok(())
}

fn validate_bindings(
    instance: &PipelineStep,
    definitions: &HashMap<String, StepDefinition>,
    parameters: &[Parameter],
) -> Result<(), BuildError> {
    let step_name = &instance.definition.name;

    // Bindings must target declared input ports.
    for input in instance.bindings.keys() {
        if instance.definition.find_input(input).is_none() {
            return Err(BuildError::UnknownPort {
                step: step_name.clone(),
                port: input.clone(),
            });
        }
    }

    // Every declared input needs exactly one source of the right type.
    for port in &instance.definition.inputs {
        let source = instance
            .effective_binding(&port.name)
            .ok_or_else(|| BuildError::UnboundInput {
                step: step_name.clone(),
                input: port.name.clone(),
            })?;

        let source_type = match &source {
            InputSource::Literal(value) => PortType::Param(value.param_type()),
            InputSource::PipelineParam(param) => {
                let parameter = parameters
                    .iter()
                    .find(|p| &p.name == param)
                    .ok_or_else(|| BuildError::UnknownParameter {
                        name: param.clone(),
                    })?;
                PortType::Param(parameter.param_type)
            }
            InputSource::StepOutput { step, output } => {
                let producer =
                    definitions
                        .get(step)
                        .ok_or_else(|| BuildError::UnknownStep {
                            name: step.clone(),
                        })?;
                let out_port =
                    producer
                        .find_output(output)
                        .ok_or_else(|| BuildError::UnknownPort {
                            step: step.clone(),
                            port: output.clone(),
                        })?;
                out_port.port_type.clone()
            }
        };

        if source_type != port.port_type {
            return Err(BuildError::TypeMismatch {
                step: step_name.clone(),
                input: port.name.clone(),
                expected: port.port_type.to_string(),
                actual: source_type.to_string(),
            });
        }
    }

    Ok(())
}

fn union_successors(
    steps: &HashMap<String, PipelineStep>,
    step_order: &[String],
    ordering_edges: &[(String, String)],
) -> HashMap<String, BTreeSet<String>> {
    let mut successors: HashMap<String, BTreeSet<String>> = step_order
        .iter()
        .map(|name| (name.clone(), BTreeSet::new()))
        .collect();

    for (name, instance) in steps {
        for port in &instance.definition.inputs {
            if let Some(InputSource::StepOutput { step: producer, .. }) =
                instance.effective_binding(&port.name)
            {
                if let Some(succs) = successors.get_mut(&producer) {
                    succs.insert(name.clone());
                }
            }
        }
    }
    for (from, to) in ordering_edges {
        if let Some(succs) = successors.get_mut(from) {
            succs.insert(to.clone());
        }
    }
    successors
}

fn detect_cycle(
    step_order: &[String],
    successors: &HashMap<String, BTreeSet<String>>,
) -> Result<(), BuildError> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for name in step_order {
        if !visited.contains(name) {
            if let Some(cycle) = dfs_cycle(name, successors, &mut visited, &mut rec_stack, &mut path)
            {
                return Err(BuildError::CycleDetected { path: cycle });
            }
        }
    }
    Ok(())
}

fn dfs_cycle(
    node: &str,
    successors: &HashMap<String, BTreeSet<String>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(succs) = successors.get(node) {
        for succ in succs {
            if !visited.contains(succ) {
                if let Some(cycle) = dfs_cycle(succ, successors, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(succ) {
                let start = path.iter().position(|n| n == succ).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(succ.clone());
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}

/// Kahn's algorithm with ties broken by registration order, so the
/// emitted order is identical for identical input sequences.
fn topological_order(
    step_order: &[String],
    steps: &HashMap<String, PipelineStep>,
    ordering_edges: &[(String, String)],
) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = step_order
        .iter()
        .map(|name| {
            let mut preds: BTreeSet<String> = BTreeSet::new();
            if let Some(instance) = steps.get(name) {
                for port in &instance.definition.inputs {
                    if let Some(InputSource::StepOutput { step, .. }) =
                        instance.effective_binding(&port.name)
                    {
                        preds.insert(step);
                    }
                }
            }
            preds.extend(
                ordering_edges
                    .iter()
                    .filter(|(_, to)| to == name)
                    .map(|(from, _)| from.clone()),
            );
            (name.as_str(), preds.len())
        })
        .collect();

    let successors = union_successors(steps, step_order, ordering_edges);
    let mut order = Vec::with_capacity(step_order.len());
    let mut emitted: HashSet<&str> = HashSet::new();

    while order.len() < step_order.len() {
        // First ready step in registration order.
        let Some(next) = step_order.iter().find(|name| {
            !emitted.contains(name.as_str()) && in_degree.get(name.as_str()) == Some(&0)
        }) else {
            break; // Cyclic remainder; detect_cycle has already rejected this.
        };
        emitted.insert(next.as_str());
        order.push(next.clone());
        if let Some(succs) = successors.get(next.as_str()) {
            for succ in succs {
                if let Some(degree) = in_degree.get_mut(succ.as_str()) {
                    *degree = degree.saturating_sub(1);
                }
            }
        }
    }

    order
}

fn validate_groups(
    groups: &[ConditionalGroup],
    definitions: &HashMap<String, StepDefinition>,
    steps: &HashMap<String, PipelineStep>,
    ordering_edges: &[(String, String)],
) -> Result<(), BuildError> {
    for group in groups {
        let gate = &group.predicate;
        let unresolved = |reason: String| BuildError::UnresolvedCondition {
            group: group.name.clone(),
            reason,
        };

        let producer = definitions
            .get(&gate.step)
            .ok_or_else(|| unresolved(format!("gate step '{}' is not part of the pipeline", gate.step)))?;
        let port = producer
            .find_output(&gate.output)
            .ok_or_else(|| unresolved(format!("gate step '{}' has no output '{}'", gate.step, gate.output)))?;

        let PortType::Param(gate_type) = &port.port_type else {
            return Err(unresolved(format!(
                "gate output '{}.{}' is an artifact port",
                gate.step, gate.output
            )));
        };

        let numeric = |ty: ParamType| matches!(ty, ParamType::Int | ParamType::Float);
        if gate.comparator.is_ordered() {
            if !numeric(*gate_type) || gate.threshold.as_f64().is_none() {
                return Err(unresolved(format!(
                    "ordered comparator '{}' requires a numeric gate output and threshold",
                    gate.comparator
                )));
            }
        } else if gate.threshold.param_type() != *gate_type
            && !(numeric(*gate_type) && gate.threshold.as_f64().is_some())
        {
            return Err(unresolved(format!(
                "threshold type {} does not match gate output type {}",
                gate.threshold.param_type(),
                gate_type
            )));
        }

        // The gate value must be available before any member could run.
        for member in &group.members {
            if !ancestors_of(member, steps, ordering_edges).contains(&gate.step) {
                return Err(unresolved(format!(
                    "member '{}' does not transitively depend on gate step '{}'",
                    member, gate.step
                )));
            }
        }
    }
    Ok(())
}

fn ancestors_of(
    step: &str,
    steps: &HashMap<String, PipelineStep>,
    ordering_edges: &[(String, String)],
) -> BTreeSet<String> {
    let preds = |name: &str| -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        if let Some(instance) = steps.get(name) {
            for port in &instance.definition.inputs {
                if let Some(InputSource::StepOutput { step: producer, .. }) =
                    instance.effective_binding(&port.name)
                {
                    set.insert(producer);
                }
            }
        }
        set.extend(
            ordering_edges
                .iter()
                .filter(|(_, to)| to == name)
                .map(|(from, _)| from.clone()),
        );
        set
    };

    let mut seen = BTreeSet::new();
    let mut stack: Vec<String> = preds(step).into_iter().collect();
    while let Some(current) = stack.pop() {
        if seen.insert(current.clone()) {
            stack.extend(preds(&current));
        }
    }
    seen
}
