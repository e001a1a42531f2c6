//! Primitive parameter values and their declared types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// A UTF-8 string.
    String,
    /// A signed 64-bit integer.
    Int,
    /// A 64-bit float.
    Float,
    /// A boolean.
    Bool,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

/// An immutable primitive value bound to a parameter port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A boolean value.
    Bool(bool),
    /// An integer value.
    Int(i64),
    /// A float value.
    Float(f64),
    /// A string value.
    String(String),
}

impl Value {
    /// Returns the [`ParamType`] of this value.
    #[must_use]
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::String(_) => ParamType::String,
            Self::Int(_) => ParamType::Int,
            Self::Float(_) => ParamType::Float,
            Self::Bool(_) => ParamType::Bool,
        }
    }

    /// Returns the value as a float, widening integers.
    ///
    /// Used for ordered predicate comparisons; strings and booleans
    /// have no numeric interpretation.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::String(_) | Self::Bool(_) => None,
        }
    }

    /// Parses a string representation into a value of the given type.
    ///
    /// Used by callers that accept `key=value` parameter overrides.
    ///
    /// # Errors
    ///
    /// Returns the raw input when it cannot be parsed as `ty`.
    pub fn parse_as(ty: ParamType, raw: &str) -> Result<Self, String> {
        match ty {
            ParamType::String => Ok(Self::String(raw.to_string())),
            ParamType::Int => raw
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| raw.to_string()),
            ParamType::Float => raw
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|_| raw.to_string()),
            ParamType::Bool => raw
                .parse::<bool>()
                .map(Self::Bool)
                .map_err(|_| raw.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A named, typed top-level pipeline parameter with an optional default.
///
/// Parameters are bound at pipeline invocation; absent an override the
/// default is used. A parameter with no default and no override fails
/// the run before any step is dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// The parameter name.
    pub name: String,
    /// The declared type.
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// The default value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Parameter {
    /// Creates a new parameter with no default.
    #[must_use]
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            default: None,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_param_type() {
        assert_eq!(Value::from("x").param_type(), ParamType::String);
        assert_eq!(Value::from(3_i64).param_type(), ParamType::Int);
        assert_eq!(Value::from(0.5).param_type(), ParamType::Float);
        assert_eq!(Value::from(true).param_type(), ParamType::Bool);
    }

    #[test]
    fn test_value_as_f64() {
        assert_eq!(Value::from(2_i64).as_f64(), Some(2.0));
        assert_eq!(Value::from(0.25).as_f64(), Some(0.25));
        assert_eq!(Value::from("nope").as_f64(), None);
        assert_eq!(Value::from(false).as_f64(), None);
    }

    #[test]
    fn test_value_parse_as() {
        assert_eq!(Value::parse_as(ParamType::Int, "42"), Ok(Value::Int(42)));
        assert_eq!(
            Value::parse_as(ParamType::Float, "0.8"),
            Ok(Value::Float(0.8))
        );
        assert_eq!(
            Value::parse_as(ParamType::Bool, "true"),
            Ok(Value::Bool(true))
        );
        assert!(Value::parse_as(ParamType::Int, "abc").is_err());
    }

    #[test]
    fn test_value_serialization_untagged() {
        let json = serde_json::to_string(&Value::Float(0.8)).unwrap();
        assert_eq!(json, "0.8");

        let back: Value = serde_json::from_str("0.8").unwrap();
        assert_eq!(back, Value::Float(0.8));

        let back: Value = serde_json::from_str("3").unwrap();
        assert_eq!(back, Value::Int(3));

        let back: Value = serde_json::from_str("true").unwrap();
        assert_eq!(back, Value::Bool(true));
    }

    #[test]
    fn test_parameter_with_default() {
        let param = Parameter::new("thold", ParamType::Float).with_default(0.8);
        assert_eq!(param.default, Some(Value::Float(0.8)));
    }

    #[test]
    fn test_param_type_display() {
        assert_eq!(ParamType::Float.to_string(), "float");
        assert_eq!(ParamType::String.to_string(), "string");
    }
}
