//! The compiler: a validated pipeline to and from a portable document.
//!
//! The document carries everything the builder needs to revalidate:
//! step definitions with port types and defaults, explicit bindings,
//! ordering edges, conditional groups and parameter declarations.
//! `rebuild(compile(p))` is structurally equal to `p`; byte-identity of
//! two documents is not promised, structural equality of the pipelines
//! is.

use crate::core::{Parameter, PortType, Value};
use crate::errors::{BuildError, DagflowError};
use crate::graph::{Comparator, ConditionalGroup, InputSource, Pipeline, PipelineBuilder, Predicate};
use crate::registry::{PortDecl, StepDefinition};
use serde::{Deserialize, Serialize};

/// One input port in the compiled document: declaration plus its
/// explicit binding, if any. A port with a default and no explicit
/// binding records only the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDoc {
    /// The input port name.
    pub name: String,
    /// The declared port type.
    #[serde(rename = "type")]
    pub port_type: PortType,
    /// The declared default, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// The explicitly bound source, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<InputSource>,
}

/// One step in the compiled document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDoc {
    /// The step name.
    pub name: String,
    /// The opaque handler reference.
    pub handler_ref: String,
    /// Per-step timeout forwarded to the handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Declared inputs with their bindings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputDoc>,
    /// Declared outputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PortDecl>,
}

/// An explicit ordering edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDoc {
    /// The predecessor step.
    pub from: String,
    /// The dependent step.
    pub to: String,
}

/// A conditional group in the compiled document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDoc {
    /// The group name.
    pub name: String,
    /// The step producing the gate value.
    pub gate_step: String,
    /// The gating output port.
    pub gate_output: String,
    /// The comparison operator, serialized as its operator literal.
    pub comparator: Comparator,
    /// The build-time threshold.
    pub threshold: Value,
    /// Member step names.
    pub member_steps: Vec<String>,
    /// Index of the enclosing group, if nested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
}

/// The portable pipeline specification document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDoc {
    /// The pipeline name.
    pub name: String,
    /// The root storage location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Declared top-level parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    /// Steps in registration order.
    pub steps: Vec<StepDoc>,
    /// Explicit ordering edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ordering_edges: Vec<EdgeDoc>,
    /// Conditional groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditional_groups: Vec<GroupDoc>,
}

/// Serializes a validated pipeline into its document form.
#[must_use]
pub fn compile(pipeline: &Pipeline) -> PipelineDoc {
    let steps = pipeline
        .steps_in_order()
        .map(|step| StepDoc {
            name: step.definition.name.clone(),
            handler_ref: step.definition.handler_ref.clone(),
            timeout_ms: step.definition.timeout_ms,
            inputs: step
                .definition
                .inputs
                .iter()
                .map(|port| InputDoc {
                    name: port.name.clone(),
                    port_type: port.port_type.clone(),
                    default: port.default.clone(),
                    source: step.bindings.get(&port.name).cloned(),
                })
                .collect(),
            outputs: step.definition.outputs.clone(),
        })
        .collect();

    PipelineDoc {
        name: pipeline.name().to_string(),
        root: pipeline.root().map(str::to_string),
        parameters: pipeline.parameters().to_vec(),
        steps,
        ordering_edges: pipeline
            .ordering_edges()
            .iter()
            .map(|(from, to)| EdgeDoc {
                from: from.clone(),
                to: to.clone(),
            })
            .collect(),
        conditional_groups: pipeline
            .groups()
            .iter()
            .map(|group| GroupDoc {
                name: group.name.clone(),
                gate_step: group.predicate.step.clone(),
                gate_output: group.predicate.output.clone(),
                comparator: group.predicate.comparator,
                threshold: group.predicate.threshold.clone(),
                member_steps: group.members.clone(),
                parent: group.parent,
            })
            .collect(),
    }
}

/// Rebuilds a pipeline from its document form, re-running the full
/// builder validation.
///
/// # Errors
///
/// Returns a [`BuildError`] if the document does not describe a valid
/// pipeline; a hand-edited spec gets the same scrutiny as builder input.
pub fn rebuild(doc: &PipelineDoc) -> Result<Pipeline, BuildError> {
    let mut builder = PipelineBuilder::new(&doc.name);
    if let Some(root) = &doc.root {
        builder.with_root(root);
    }
    for parameter in &doc.parameters {
        builder.parameter(parameter.clone());
    }

    for step in &doc.steps {
        let mut definition = StepDefinition::new(&step.name, &step.handler_ref);
        if let Some(timeout) = step.timeout_ms {
            definition = definition.with_timeout_ms(timeout);
        }
        for input in &step.inputs {
            let mut port = PortDecl::new(&input.name, input.port_type.clone());
            if let Some(default) = &input.default {
                port = port.with_default(default.clone());
            }
            definition = definition.input(port);
        }
        for output in &step.outputs {
            definition = definition.output(output.clone());
        }
        builder.step(definition);

        for input in &step.inputs {
            if let Some(source) = &input.source {
                builder.bind(&step.name, &input.name, source.clone());
            }
        }
    }

    for edge in &doc.ordering_edges {
        builder.after(&edge.to, &[edge.from.as_str()]);
    }

    for group in &doc.conditional_groups {
        builder.push_group(ConditionalGroup {
            name: group.name.clone(),
            predicate: Predicate::new(
                &group.gate_step,
                &group.gate_output,
                group.comparator,
                group.threshold.clone(),
            ),
            members: group.member_steps.clone(),
            parent: group.parent,
        });
    }

    builder.build()
}

/// Renders a document as pretty-printed JSON.
///
/// # Errors
///
/// Returns a serialization error; with a well-formed document this does
/// not happen.
pub fn to_json_pretty(doc: &PipelineDoc) -> Result<String, DagflowError> {
    Ok(serde_json::to_string_pretty(doc)?)
}

/// Parses a document from JSON.
///
/// # Errors
///
/// Returns a serialization error if the JSON does not match the
/// document shape.
pub fn from_json(json: &str) -> Result<PipelineDoc, DagflowError> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_round_trip_is_structurally_equal() {
        let pipeline = fixtures::training_pipeline(0.8);
        let doc = compile(&pipeline);
        let rebuilt = rebuild(&doc).unwrap();
        assert_eq!(rebuilt, pipeline);
    }

    #[test]
    fn test_round_trip_through_json() {
        let pipeline = fixtures::diamond_pipeline();
        let json = to_json_pretty(&compile(&pipeline)).unwrap();
        let rebuilt = rebuild(&from_json(&json).unwrap()).unwrap();
        assert_eq!(rebuilt, pipeline);
    }

    #[test]
    fn test_document_records_group_shape() {
        let doc = compile(&fixtures::training_pipeline(0.8));

        assert_eq!(doc.conditional_groups.len(), 1);
        let group = &doc.conditional_groups[0];
        assert_eq!(group.gate_step, "evaluate");
        assert_eq!(group.gate_output, "metric");
        assert_eq!(group.comparator, Comparator::Lt);
        assert_eq!(
            group.member_steps,
            vec!["create_endpoint".to_string(), "deploy_model".to_string()]
        );
    }

    #[test]
    fn test_comparator_appears_as_operator_literal() {
        let json = to_json_pretty(&compile(&fixtures::training_pipeline(0.8))).unwrap();
        assert!(json.contains(r#""comparator": "<""#));
    }

    #[test]
    fn test_rebuild_revalidates_hand_edited_documents() {
        let mut doc = compile(&fixtures::diamond_pipeline());
        // Introduce a back-edge by hand.
        doc.ordering_edges.push(EdgeDoc {
            from: "join".to_string(),
            to: "a1".to_string(),
        });
        let err = rebuild(&doc).unwrap_err();
        assert!(matches!(err, BuildError::CycleDetected { .. }));
    }

    #[test]
    fn test_from_json_rejects_malformed_input() {
        assert!(from_json("{not json").is_err());
    }

    #[test]
    fn test_defaults_survive_round_trip_without_becoming_bindings() {
        use crate::core::{ParamType, PortType};
        use crate::graph::InputSource;
        use crate::registry::{PortDecl, StepDefinition};

        let mut builder = PipelineBuilder::new("defaults");
        builder.step(
            StepDefinition::new("only", "h.only").input(
                PortDecl::new("replicas", PortType::Param(ParamType::Int)).with_default(2_i64),
            ),
        );
        let pipeline = builder.build().unwrap();

        let doc = compile(&pipeline);
        assert_eq!(doc.steps[0].inputs[0].source, None);

        let rebuilt = rebuild(&doc).unwrap();
        assert_eq!(rebuilt, pipeline);
        assert_eq!(
            rebuilt.step("only").unwrap().effective_binding("replicas"),
            Some(InputSource::Literal(crate::core::Value::Int(2)))
        );
    }
}
