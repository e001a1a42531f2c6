//! Conditional groups: graph regions gated by a runtime value.
//!
//! A group's shape is fixed at build time; whether it runs is decided
//! only once the gating step's output is recorded. The group is data,
//! not control flow: the scheduler evaluates the predicate exactly once
//! and either schedules the members normally or skips them all.

use crate::core::{PortValue, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A comparison operator applied to the gate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `<=`
    #[serde(rename = "<=")]
    Le,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `>=`
    #[serde(rename = ">=")]
    Ge,
    /// `==`
    #[serde(rename = "==")]
    Eq,
    /// `!=`
    #[serde(rename = "!=")]
    Ne,
}

impl Comparator {
    /// Returns true for the ordered comparators, which require a numeric
    /// gate value and threshold.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Applies the comparator to a runtime value and the build-time
    /// threshold.
    ///
    /// Integers widen to floats for numeric comparison. Ordered
    /// comparators over non-numeric values evaluate to false; the
    /// builder rejects such predicates before a pipeline can run.
    #[must_use]
    pub fn evaluate(&self, value: &Value, threshold: &Value) -> bool {
        match self {
            Self::Eq => values_equal(value, threshold),
            Self::Ne => !values_equal(value, threshold),
            ordered => match (value.as_f64(), threshold.as_f64()) {
                (Some(lhs), Some(rhs)) => match ordered {
                    Self::Lt => lhs < rhs,
                    Self::Le => lhs <= rhs,
                    Self::Gt => lhs > rhs,
                    Self::Ge => lhs >= rhs,
                    Self::Eq | Self::Ne => unreachable!("handled above"),
                },
                _ => false,
            },
        }
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        // 1 == 1.0 under numeric widening
        (Some(l), Some(r)) => (l - r).abs() < f64::EPSILON,
        _ => lhs == rhs,
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
            Self::Eq => write!(f, "=="),
            Self::Ne => write!(f, "!="),
        }
    }
}

/// A predicate over one named output of a gating step.
///
/// `value <comparator> threshold`, where the threshold is a literal
/// known at build time and the value is produced by the gating step at
/// run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// The step producing the gate value.
    pub step: String,
    /// The output port of the gating step.
    pub output: String,
    /// The comparison operator.
    pub comparator: Comparator,
    /// The build-time threshold.
    pub threshold: Value,
}

impl Predicate {
    /// Creates a new predicate.
    #[must_use]
    pub fn new(
        step: impl Into<String>,
        output: impl Into<String>,
        comparator: Comparator,
        threshold: impl Into<Value>,
    ) -> Self {
        Self {
            step: step.into(),
            output: output.into(),
            comparator,
            threshold: threshold.into(),
        }
    }

    /// Evaluates the predicate against the recorded gate output.
    ///
    /// Artifact outputs never satisfy a predicate; the builder rejects
    /// gates on artifact ports.
    #[must_use]
    pub fn evaluate(&self, gate_value: &PortValue) -> bool {
        match gate_value.as_value() {
            Some(value) => self.comparator.evaluate(value, &self.threshold),
            None => false,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} {} {}",
            self.step, self.output, self.comparator, self.threshold
        )
    }
}

/// A named sub-graph gated by a [`Predicate`].
///
/// Members participate in the same DAG as every other step; the group
/// only adds the gate. Groups may nest: a member of an inner group is
/// also a member of every enclosing group, and a false outer gate skips
/// the inner group without evaluating its predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalGroup {
    /// The group name.
    pub name: String,
    /// The gating predicate.
    pub predicate: Predicate,
    /// Names of the member steps, in registration order.
    pub members: Vec<String>,
    /// Index of the enclosing group, if nested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
}
