//! Per-run mutable state and the final run report.

use crate::core::{PortValue, StepStatus};
use crate::graph::Pipeline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Mutable per-execution record.
///
/// Created fresh for every run and mutated only by the executor; it is
/// the single synchronization point between the scheduler loop and any
/// concurrent reader. Step statuses and recorded outputs are updated
/// together, so a reader never observes a `Succeeded` step without its
/// outputs.
#[derive(Debug)]
pub struct RunState {
    statuses: HashMap<String, StepStatus>,
    outputs: HashMap<(String, String), PortValue>,
    errors: HashMap<String, String>,
    skip_reasons: HashMap<String, String>,
}

impl RunState {
    /// Creates a fresh state with every step `Pending`.
    #[must_use]
    pub fn new(pipeline: &Pipeline) -> Self {
        Self {
            statuses: pipeline
                .steps_in_order()
                .map(|step| (step.definition.name.clone(), StepStatus::Pending))
                .collect(),
            outputs: HashMap::new(),
            errors: HashMap::new(),
            skip_reasons: HashMap::new(),
        }
    }

    /// Returns a step's current status.
    #[must_use]
    pub fn status(&self, step: &str) -> StepStatus {
        self.statuses.get(step).copied().unwrap_or_default()
    }

    /// Marks a step as running.
    pub fn mark_running(&mut self, step: &str) {
        self.statuses.insert(step.to_string(), StepStatus::Running);
    }

    /// Records a successful step's outputs and marks it succeeded.
    pub fn mark_succeeded(&mut self, step: &str, outputs: HashMap<String, PortValue>) {
        for (port, value) in outputs {
            self.outputs.insert((step.to_string(), port), value);
        }
        self.statuses.insert(step.to_string(), StepStatus::Succeeded);
    }

    /// Marks a step as failed with the handler's message, verbatim.
    pub fn mark_failed(&mut self, step: &str, message: impl Into<String>) {
        self.errors.insert(step.to_string(), message.into());
        self.statuses.insert(step.to_string(), StepStatus::Failed);
    }

    /// Marks a step as skipped with a reason.
    pub fn mark_skipped(&mut self, step: &str, reason: impl Into<String>) {
        self.skip_reasons.insert(step.to_string(), reason.into());
        self.statuses.insert(step.to_string(), StepStatus::Skipped);
    }

    /// Returns a recorded output value.
    #[must_use]
    pub fn output(&self, step: &str, port: &str) -> Option<&PortValue> {
        self.outputs.get(&(step.to_string(), port.to_string()))
    }

    /// Returns true if every step is in a terminal state.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.statuses.values().all(StepStatus::is_terminal)
    }

    /// Returns the names of steps not yet in a terminal state.
    #[must_use]
    pub fn non_terminal(&self) -> Vec<String> {
        let mut remaining: Vec<String> = self
            .statuses
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(name, _)| name.clone())
            .collect();
        remaining.sort();
        remaining
    }

    /// Returns true if any step failed.
    #[must_use]
    pub fn any_failed(&self) -> bool {
        self.statuses.values().any(|s| *s == StepStatus::Failed)
    }

    pub(super) fn error(&self, step: &str) -> Option<&String> {
        self.errors.get(step)
    }

    pub(super) fn skip_reason(&self, step: &str) -> Option<&String> {
        self.skip_reasons.get(step)
    }

    pub(super) fn outputs_of(&self, step: &str) -> HashMap<String, PortValue> {
        self.outputs
            .iter()
            .filter(|((s, _), _)| s == step)
            .map(|((_, port), value)| (port.clone(), value.clone()))
            .collect()
    }
}

/// The overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every step ended `Succeeded` or `Skipped`.
    Succeeded,
    /// At least one step ended `Failed`.
    Failed,
}

/// The terminal record of one step within a run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// The step name.
    pub name: String,
    /// The terminal status.
    pub status: StepStatus,
    /// The handler's error message, verbatim, for failed steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the step was skipped, for skipped steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// The outputs recorded for the step.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, PortValue>,
}

/// The audit record of a completed run.
///
/// A run is a record of what succeeded, not an all-or-nothing
/// transaction: outputs of succeeded steps remain available for
/// inspection even when the run as a whole failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Per-step terminal records, in step registration order.
    pub steps: Vec<StepReport>,
    /// The overall outcome.
    pub outcome: RunOutcome,
}

impl RunReport {
    /// Returns true if the run ended fully `Succeeded`/`Skipped`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Looks up one step's record.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Returns one step's terminal status.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<StepStatus> {
        self.step(name).map(|s| s.status)
    }

    /// Returns the partition of steps into terminal states.
    #[must_use]
    pub fn partition(&self) -> HashMap<String, StepStatus> {
        self.steps
            .iter()
            .map(|s| (s.name.clone(), s.status))
            .collect()
    }
}
