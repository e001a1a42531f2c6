//! The executor: drives a validated pipeline to completion.
//!
//! A central loop dispatches ready steps to spawned tasks and reacts to
//! completion events; it never blocks while a handler runs. The
//! [`RunState`] store is the single synchronization point. Conditional
//! groups are resolved the moment their gate output is recorded, and
//! failures are contained to the failed step's descendants: independent
//! in-flight branches always run to completion.

use super::{NoRetry, RetryPolicy, RunOutcome, RunReport, RunState, StepReport};
use crate::core::{ParamType, PortType, PortValue, StepStatus, Value};
use crate::errors::{HandlerFailure, RunError};
use crate::events::{EventSink, NoOpEventSink};
use crate::graph::{InputSource, Pipeline};
use crate::handler::{HandlerCall, HandlerOutputs, HandlerRegistry, StepHandler};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

type StepTask = tokio::task::JoinHandle<(String, Result<HandlerOutputs, HandlerFailure>)>;

/// Executes validated pipelines against a handler backend.
#[derive(Clone)]
pub struct Executor {
    handlers: Arc<HandlerRegistry>,
    max_concurrency: Option<usize>,
    retry_policy: Arc<dyn RetryPolicy>,
    sink: Arc<dyn EventSink>,
}

impl Executor {
    /// Creates an executor over the given handler registry.
    ///
    /// Defaults: unbounded concurrency, no retries, no event sink.
    #[must_use]
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            handlers,
            max_concurrency: None,
            retry_policy: Arc::new(NoRetry),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Bounds the number of concurrently executing steps.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Sets the retry policy applied to retryable handler failures.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the event sink receiving executor events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Runs the pipeline with the given parameter overrides.
    ///
    /// The returned report records every step's terminal state; a run
    /// with failed steps still returns `Ok` — consult
    /// [`RunReport::is_success`]. For a fixed pipeline and fixed handler
    /// outputs the terminal-state partition is identical across runs.
    ///
    /// A failed step skips all of its transitive descendants. A skipped
    /// step skips only its data-edge dependents; a dependent linked by
    /// an ordering edge alone still runs.
    ///
    /// # Errors
    ///
    /// Returns a [`RunError`] for invocation-level problems: unknown or
    /// missing parameters, or an internal scheduling invariant
    /// violation.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        overrides: HashMap<String, Value>,
    ) -> Result<RunReport, RunError> {
        let params = resolve_parameters(pipeline, overrides)?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(pipeline = %pipeline.name(), %run_id, "run started");

        let mut driver = RunDriver::new(self, pipeline, params);
        let mut tasks: FuturesUnordered<StepTask> = FuturesUnordered::new();

        driver.seed();
        driver.dispatch_ready(&mut tasks);

        while !driver.state.read().all_terminal() {
            if tasks.is_empty() {
                let remaining = driver.state.read().non_terminal();
                if remaining.is_empty() {
                    break;
                }
                return Err(RunError::Deadlock { remaining });
            }

            if let Some(joined) = tasks.next().await {
                let (step, result) = joined.map_err(|e| RunError::Join(e.to_string()))?;
                driver.running = driver.running.saturating_sub(1);
                match result.and_then(|outputs| driver.validate_outputs(&step, outputs)) {
                    Ok(outputs) => driver.succeed(&step, outputs),
                    Err(failure) => driver.fail(&step, &failure),
                }
                driver.dispatch_ready(&mut tasks);
            }
        }

        let finished_at = Utc::now();
        let state = driver.state.read();
        let outcome = if state.any_failed() {
            RunOutcome::Failed
        } else {
            RunOutcome::Succeeded
        };
        let steps = pipeline
            .steps_in_order()
            .map(|step| {
                let name = &step.definition.name;
                StepReport {
                    name: name.clone(),
                    status: state.status(name),
                    error: state.error(name).cloned(),
                    skip_reason: state.skip_reason(name).cloned(),
                    outputs: state.outputs_of(name),
                }
            })
            .collect();

        self.sink.try_emit(
            "run.completed",
            Some(serde_json::json!({
                "run_id": run_id,
                "pipeline": pipeline.name(),
                "outcome": outcome,
            })),
        );
        info!(pipeline = %pipeline.name(), %run_id, ?outcome, "run finished");

        Ok(RunReport {
            run_id,
            pipeline: pipeline.name().to_string(),
            started_at,
            finished_at,
            steps,
            outcome,
        })
    }
}

/// Validates overrides against declared parameters and fills defaults.
fn resolve_parameters(
    pipeline: &Pipeline,
    overrides: HashMap<String, Value>,
) -> Result<HashMap<String, Value>, RunError> {
    for (name, value) in &overrides {
        let parameter = pipeline
            .parameter(name)
            .ok_or_else(|| RunError::UnknownParameter { name: name.clone() })?;
        let compatible = value.param_type() == parameter.param_type
            || (parameter.param_type == ParamType::Float && value.param_type() == ParamType::Int);
        if !compatible {
            return Err(RunError::ParameterType {
                name: name.clone(),
                expected: parameter.param_type.to_string(),
                actual: value.param_type().to_string(),
            });
        }
    }

    pipeline
        .parameters()
        .iter()
        .map(|parameter| {
            let value = overrides
                .get(&parameter.name)
                .cloned()
                .or_else(|| parameter.default.clone())
                .ok_or_else(|| RunError::MissingParameter {
                    name: parameter.name.clone(),
                })?;
            // Widen integer overrides for float parameters.
            let value = match (parameter.param_type, &value) {
                (ParamType::Float, Value::Int(i)) => Value::Float(*i as f64),
                _ => value,
            };
            Ok((parameter.name.clone(), value))
        })
        .collect()
}

/// Per-run bookkeeping owned by the scheduler loop.
struct RunDriver<'a> {
    executor: &'a Executor,
    pipeline: &'a Pipeline,
    params: HashMap<String, Value>,
    state: Arc<RwLock<RunState>>,
    /// Predecessors not yet terminal, per step.
    remaining: HashMap<String, BTreeSet<String>>,
    /// Forward adjacency of the union graph.
    successors: HashMap<String, BTreeSet<String>>,
    /// Position of each step in the deterministic topological order.
    topo_index: HashMap<String, usize>,
    /// Group indices each step belongs to.
    memberships: HashMap<String, Vec<usize>>,
    /// Group indices gated by each step.
    gated_by: HashMap<String, Vec<usize>>,
    /// Per-group decision; `None` until the gate output is recorded.
    decisions: Vec<Option<bool>>,
    dispatched: HashSet<String>,
    ready: Vec<String>,
    running: usize,
}

impl<'a> RunDriver<'a> {
    fn new(executor: &'a Executor, pipeline: &'a Pipeline, params: HashMap<String, Value>) -> Self {
        let remaining = pipeline
            .topo_order()
            .iter()
            .map(|name| (name.clone(), pipeline.predecessors(name)))
            .collect();
        let topo_index = pipeline
            .topo_order()
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        let memberships = pipeline
            .topo_order()
            .iter()
            .map(|name| (name.clone(), pipeline.memberships(name)))
            .collect();
        let mut gated_by: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, group) in pipeline.groups().iter().enumerate() {
            gated_by
                .entry(group.predicate.step.clone())
                .or_default()
                .push(idx);
        }

        Self {
            executor,
            pipeline,
            params,
            state: Arc::new(RwLock::new(RunState::new(pipeline))),
            remaining,
            successors: pipeline.successors_map(),
            topo_index,
            memberships,
            gated_by,
            decisions: vec![None; pipeline.groups().len()],
            dispatched: HashSet::new(),
            ready: Vec::new(),
            running: 0,
        }
    }

    /// Queues every step with no predecessors.
    fn seed(&mut self) {
        for name in self.pipeline.topo_order().to_vec() {
            if self.remaining.get(&name).is_some_and(BTreeSet::is_empty) {
                self.evaluate(&name);
            }
        }
    }

    /// Decides what to do with a step whose predecessors are all terminal.
    fn evaluate(&mut self, step: &str) {
        if self.dispatched.contains(step) {
            return;
        }
        if self.state.read().status(step) != StepStatus::Pending {
            return;
        }
        if self.remaining.get(step).is_some_and(|r| !r.is_empty()) {
            return;
        }

        let memberships = self.memberships.get(step).cloned().unwrap_or_default();
        for idx in memberships {
            match self.decisions[idx] {
                Some(true) => {}
                Some(false) => {
                    let group = self.pipeline.groups()[idx].name.clone();
                    self.skip(step, format!("condition '{group}' not met"));
                    return;
                }
                // Gate not resolved yet; resolution will re-evaluate.
                None => return,
            }
        }

        for pred in self.pipeline.data_predecessors(step) {
            let status = self.state.read().status(&pred);
            match status {
                StepStatus::Skipped => {
                    self.skip(step, format!("upstream step '{pred}' was skipped"));
                    return;
                }
                StepStatus::Failed => {
                    self.skip(step, format!("upstream step '{pred}' failed"));
                    return;
                }
                _ => {}
            }
        }
        // A skipped ordering-only predecessor is satisfied: the dependent
        // consumes nothing from it.
        for pred in self.pipeline.ordering_predecessors(step) {
            let status = self.state.read().status(&pred);
            if status == StepStatus::Failed {
                self.skip(step, format!("upstream step '{pred}' failed"));
                return;
            }
        }

        self.ready.push(step.to_string());
    }

    /// Dispatches ready steps in topological-order priority, bounded by
    /// the configured concurrency.
    fn dispatch_ready(&mut self, tasks: &mut FuturesUnordered<StepTask>) {
        self.ready
            .sort_by_key(|step| self.topo_index.get(step).copied().unwrap_or(usize::MAX));

        let limit = self.executor.max_concurrency.unwrap_or(usize::MAX);
        while !self.ready.is_empty() && self.running < limit {
            let step = self.ready.remove(0);
            if self.dispatched.contains(&step)
                || self.state.read().status(&step) != StepStatus::Pending
            {
                continue;
            }

            let call = match self.build_call(&step) {
                Ok(call) => call,
                Err(failure) => {
                    self.fail(&step, &failure);
                    continue;
                }
            };

            self.dispatched.insert(step.clone());
            self.state.write().mark_running(&step);
            debug!(step = %step, "dispatching step");
            self.executor.sink.try_emit(
                "step.started",
                Some(serde_json::json!({ "step": step })),
            );

            let handler = self.executor.handlers.resolve(&call.handler_ref);
            let policy = Arc::clone(&self.executor.retry_policy);
            let name = step.clone();
            tasks.push(tokio::spawn(async move {
                let result = invoke_with_retry(handler, call, policy).await;
                (name, result)
            }));
            self.running += 1;
        }
    }

    /// Resolves a step's inputs into a handler call.
    fn build_call(&self, step: &str) -> Result<HandlerCall, HandlerFailure> {
        let instance = self
            .pipeline
            .step(step)
            .ok_or_else(|| HandlerFailure::new(step, "step not found in pipeline"))?;

        let mut inputs = HashMap::new();
        for port in &instance.definition.inputs {
            let source = instance.effective_binding(&port.name).ok_or_else(|| {
                HandlerFailure::new(step, format!("input '{}' has no bound source", port.name))
            })?;
            let value = match source {
                InputSource::Literal(value) => PortValue::Param(value),
                InputSource::PipelineParam(param) => {
                    let value = self.params.get(&param).cloned().ok_or_else(|| {
                        HandlerFailure::new(step, format!("parameter '{param}' is unresolved"))
                    })?;
                    PortValue::Param(value)
                }
                InputSource::StepOutput { step: producer, output } => self
                    .state
                    .read()
                    .output(&producer, &output)
                    .cloned()
                    .ok_or_else(|| {
                        HandlerFailure::new(
                            step,
                            format!("output '{output}' of step '{producer}' was never recorded"),
                        )
                    })?,
            };
            inputs.insert(port.name.clone(), value);
        }

        Ok(HandlerCall {
            step: step.to_string(),
            handler_ref: instance.definition.handler_ref.clone(),
            inputs,
            timeout_ms: instance.definition.timeout_ms,
        })
    }

    /// Checks produced outputs against the step's declared output ports.
    fn validate_outputs(
        &self,
        step: &str,
        outputs: HandlerOutputs,
    ) -> Result<HandlerOutputs, HandlerFailure> {
        let Some(instance) = self.pipeline.step(step) else {
            return Err(HandlerFailure::new(step, "step not found in pipeline"));
        };

        let mut validated = HashMap::new();
        for port in &instance.definition.outputs {
            let value = outputs.get(&port.name).cloned().ok_or_else(|| {
                HandlerFailure::new(
                    step,
                    format!("handler did not produce declared output '{}'", port.name),
                )
            })?;
            let value = coerce_output(&port.port_type, value).ok_or_else(|| {
                HandlerFailure::new(
                    step,
                    format!(
                        "handler produced output '{}' of the wrong type (expected {})",
                        port.name, port.port_type
                    ),
                )
            })?;
            validated.insert(port.name.clone(), value);
        }
        Ok(validated)
    }

    fn succeed(&mut self, step: &str, outputs: HandlerOutputs) {
        self.state.write().mark_succeeded(step, outputs);
        debug!(step = %step, "step succeeded");
        self.executor.sink.try_emit(
            "step.succeeded",
            Some(serde_json::json!({ "step": step })),
        );
        self.propagate_terminal(step);
    }

    fn fail(&mut self, step: &str, failure: &HandlerFailure) {
        self.state.write().mark_failed(step, &failure.message);
        warn!(step = %step, error = %failure.message, "step failed");
        self.executor.sink.try_emit(
            "step.failed",
            Some(serde_json::json!({ "step": step, "error": failure.message })),
        );

        // A failed step never yields a false positive downstream: every
        // transitive descendant is skipped, whatever edge kind reaches it.
        let mut descendants: Vec<String> = self.pipeline.descendants(step).into_iter().collect();
        descendants.sort_by_key(|d| self.topo_index.get(d).copied().unwrap_or(usize::MAX));
        let skipped: Vec<String> = descendants
            .into_iter()
            .filter(|d| {
                !self.dispatched.contains(d)
                    && !self.state.read().status(d).is_terminal()
            })
            .collect();
        for descendant in &skipped {
            self.state
                .write()
                .mark_skipped(descendant, format!("upstream step '{step}' failed"));
            self.executor.sink.try_emit(
                "step.skipped",
                Some(serde_json::json!({
                    "step": descendant,
                    "reason": format!("upstream step '{step}' failed"),
                })),
            );
        }

        self.propagate_terminal(step);
        for descendant in &skipped {
            self.propagate_terminal(descendant);
        }
    }

    fn skip(&mut self, step: &str, reason: String) {
        self.state.write().mark_skipped(step, &reason);
        debug!(step = %step, reason = %reason, "step skipped");
        self.executor.sink.try_emit(
            "step.skipped",
            Some(serde_json::json!({ "step": step, "reason": reason })),
        );
        self.propagate_terminal(step);
    }

    /// Reacts to a step reaching a terminal state: resolves any groups
    /// gated on it, then re-evaluates its successors.
    fn propagate_terminal(&mut self, step: &str) {
        self.resolve_gates(step);
        let successors = self.successors.get(step).cloned().unwrap_or_default();
        for succ in successors {
            if let Some(remaining) = self.remaining.get_mut(&succ) {
                remaining.remove(step);
            }
            self.evaluate(&succ);
        }
    }

    /// Resolves every undecided group gated by this step.
    ///
    /// The predicate is evaluated exactly once, as soon as the gate
    /// output is recorded. A gate step that ended anything other than
    /// `Succeeded` forces the decision to false.
    fn resolve_gates(&mut self, step: &str) {
        let Some(indices) = self.gated_by.get(step).cloned() else {
            return;
        };
        let status = self.state.read().status(step);

        for idx in indices {
            if self.decisions[idx].is_some() {
                continue;
            }
            let group = &self.pipeline.groups()[idx];
            let enabled = if status == StepStatus::Succeeded {
                self.state
                    .read()
                    .output(step, &group.predicate.output)
                    .is_some_and(|value| group.predicate.evaluate(value))
            } else {
                false
            };
            self.settle_group(idx, enabled);
        }
    }

    fn settle_group(&mut self, idx: usize, enabled: bool) {
        self.decisions[idx] = Some(enabled);
        let group = self.pipeline.groups()[idx].clone();
        info!(group = %group.name, predicate = %group.predicate, enabled, "condition resolved");
        self.executor.sink.try_emit(
            "condition.resolved",
            Some(serde_json::json!({ "group": group.name, "enabled": enabled })),
        );

        if enabled {
            // Members blocked only on the undecided gate become eligible.
            for member in &group.members {
                self.evaluate(member);
            }
            return;
        }

        // A false outer gate short-circuits nested groups: their
        // predicates are never evaluated.
        for nested in self.nested_groups(idx) {
            if self.decisions[nested].is_none() {
                self.decisions[nested] = Some(false);
            }
        }
        let reason = format!("condition '{}' not met", group.name);
        for member in &group.members {
            if !self.dispatched.contains(member)
                && !self.state.read().status(member).is_terminal()
            {
                self.skip(member, reason.clone());
            }
        }
    }

    /// Indices of groups nested (transitively) inside `idx`.
    fn nested_groups(&self, idx: usize) -> Vec<usize> {
        let groups = self.pipeline.groups();
        (0..groups.len())
            .filter(|&candidate| {
                let mut parent = groups[candidate].parent;
                while let Some(p) = parent {
                    if p == idx {
                        return true;
                    }
                    parent = groups[p].parent;
                }
                false
            })
            .collect()
    }
}

/// Invokes the handler, applying the retry policy to retryable failures.
async fn invoke_with_retry(
    handler: Option<Arc<dyn StepHandler>>,
    call: HandlerCall,
    policy: Arc<dyn RetryPolicy>,
) -> Result<HandlerOutputs, HandlerFailure> {
    let Some(handler) = handler else {
        return Err(HandlerFailure::new(
            &call.step,
            format!("no handler registered for '{}'", call.handler_ref),
        ));
    };

    let mut attempt = 0_usize;
    loop {
        attempt += 1;
        match handler.invoke(call.clone()).await {
            Ok(outputs) => return Ok(outputs),
            Err(failure) => {
                if failure.retryable {
                    if let Some(delay) = policy.next_delay(&call.step, attempt) {
                        warn!(
                            step = %call.step,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %failure.message,
                            "retrying step after handler failure"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                }
                return Err(failure);
            }
        }
    }
}

fn coerce_output(expected: &PortType, value: PortValue) -> Option<PortValue> {
    if value.port_type() == *expected {
        return Some(value);
    }
    // Integers widen to floats.
    if let (PortType::Param(ParamType::Float), PortValue::Param(Value::Int(i))) = (expected, &value)
    {
        return Some(PortValue::Param(Value::Float(*i as f64)));
    }
    None
}
