//! Port types and the values that flow through ports.

use super::{ArtifactRef, ParamType, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared type of a step input or output port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// A primitive parameter of the given type.
    Param(ParamType),
    /// An artifact reference with the given kind tag.
    Artifact(String),
}

impl PortType {
    /// Shorthand for an artifact port type.
    #[must_use]
    pub fn artifact(kind: impl Into<String>) -> Self {
        Self::Artifact(kind.into())
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Param(ty) => write!(f, "{ty}"),
            Self::Artifact(kind) => write!(f, "artifact:{kind}"),
        }
    }
}

/// A value flowing through a port: a primitive or an artifact reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    /// A primitive parameter value.
    Param(Value),
    /// An artifact reference.
    Artifact(ArtifactRef),
}

impl PortValue {
    /// Returns the [`PortType`] this value satisfies.
    #[must_use]
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Param(value) => PortType::Param(value.param_type()),
            Self::Artifact(artifact) => PortType::Artifact(artifact.kind.clone()),
        }
    }

    /// Returns the inner primitive value, if this is a parameter.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Param(value) => Some(value),
            Self::Artifact(_) => None,
        }
    }

    /// Returns the inner artifact reference, if this is an artifact.
    #[must_use]
    pub fn as_artifact(&self) -> Option<&ArtifactRef> {
        match self {
            Self::Param(_) => None,
            Self::Artifact(artifact) => Some(artifact),
        }
    }
}

impl From<Value> for PortValue {
    fn from(value: Value) -> Self {
        Self::Param(value)
    }
}

impl From<ArtifactRef> for PortValue {
    fn from(artifact: ArtifactRef) -> Self {
        Self::Artifact(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_type_display() {
        assert_eq!(PortType::Param(ParamType::Float).to_string(), "float");
        assert_eq!(PortType::artifact("dataset").to_string(), "artifact:dataset");
    }

    #[test]
    fn test_port_value_type() {
        let value = PortValue::from(Value::Float(0.9));
        assert_eq!(value.port_type(), PortType::Param(ParamType::Float));

        let artifact = PortValue::from(ArtifactRef::new("gs://b/m", "model"));
        assert_eq!(artifact.port_type(), PortType::artifact("model"));
    }

    #[test]
    fn test_port_value_accessors() {
        let value = PortValue::from(Value::Int(1));
        assert_eq!(value.as_value(), Some(&Value::Int(1)));
        assert!(value.as_artifact().is_none());

        let artifact = PortValue::from(ArtifactRef::new("uri", "metrics"));
        assert!(artifact.as_value().is_none());
        assert_eq!(artifact.as_artifact().map(|a| a.kind.as_str()), Some("metrics"));
    }

    #[test]
    fn test_port_value_untagged_serialization() {
        let value = PortValue::from(Value::Float(0.5));
        assert_eq!(serde_json::to_string(&value).unwrap(), "0.5");

        let artifact = PortValue::from(ArtifactRef::new("uri", "dataset"));
        let json = serde_json::to_string(&artifact).unwrap();
        let back: PortValue = serde_json::from_str(&json).unwrap();
        assert_eq!(artifact, back);
    }
}
