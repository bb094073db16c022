use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use magnat_core::error::{MagnatError, Result};
use magnat_core::traits::{NoopTracer, Tracer};
use magnat_core::types::{Action, FlowEvent};
use magnat_core::ConversationState;

use super::edge::EdgeTable;
use super::node::{Node, StepId, StepRunner};

/// Per-run collaborators shared by every step of a run, nested flows included.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub tracer: Arc<dyn Tracer>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            tracer: Arc::new(NoopTracer),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One executed step and the label it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub step: String,
    pub action: Action,
    pub elapsed_ms: u64,
}

/// Result of a flow run that reached a terminal step.
#[derive(Debug, Clone, Serialize)]
pub struct FlowOutcome {
    pub flow: String,
    /// Last step executed.
    pub terminal: String,
    /// Label the terminal step returned. This is also the flow's own label
    /// when it runs nested inside another flow.
    pub action: Action,
    /// Steps executed in order.
    pub trail: Vec<Transition>,
    pub elapsed_ms: u64,
}

impl FlowOutcome {
    pub fn path(&self) -> Vec<&str> {
        self.trail.iter().map(|t| t.step.as_str()).collect()
    }
}

/// A run that aborted. Names the failing step and what ran before it.
#[derive(Debug, thiserror::Error)]
#[error("flow '{flow}' failed at step '{step}': {error}")]
pub struct FlowFailure {
    pub flow: String,
    pub step: String,
    pub trail: Vec<Transition>,
    #[source]
    pub error: MagnatError,
}

impl FlowFailure {
    /// Collapse into a single error, as seen by an enclosing flow.
    pub fn into_error(self) -> MagnatError {
        MagnatError::SubFlow {
            flow: self.flow,
            step: self.step,
            source: Box::new(self.error),
        }
    }
}

/// A directed, possibly cyclic graph of steps with a designated start.
///
/// Built once through [`FlowBuilder`] and immutable afterwards, so one flow
/// can serve many runs concurrently as long as each run owns its state.
pub struct Flow {
    name: String,
    nodes: HashMap<StepId, Node>,
    edges: EdgeTable,
    start: StepId,
    max_steps: Option<usize>,
}

impl Flow {
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> &StepId {
        &self.start
    }

    pub fn edges(&self) -> &EdgeTable {
        &self.edges
    }

    pub fn node(&self, id: &StepId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn max_steps(&self) -> Option<usize> {
        self.max_steps
    }

    /// Whether a flow named `name` is nested anywhere below this one.
    pub fn contains_flow(&self, name: &str) -> bool {
        self.nodes.values().any(|node| match node {
            Node::Flow(sub) => sub.name == name || sub.contains_flow(name),
            Node::Step(_) => false,
        })
    }

    /// Drive the graph from the start step until a step's label has no
    /// outgoing edge.
    pub async fn run(
        &self,
        state: &mut ConversationState,
        ctx: &RunContext,
    ) -> std::result::Result<FlowOutcome, FlowFailure> {
        self.run_boxed(state, ctx).await
    }

    fn run_boxed<'a>(
        &'a self,
        state: &'a mut ConversationState,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, std::result::Result<FlowOutcome, FlowFailure>> {
        Box::pin(async move {
            ctx.tracer.record(FlowEvent::RunStarted {
                run_id: ctx.run_id.clone(),
                flow: self.name.clone(),
                input: state.dialog().last_user().map(|m| m.content().to_string()),
                at: Utc::now(),
            });
            let start = Instant::now();
            let mut trail: Vec<Transition> = Vec::new();
            let mut current = self.start.clone();

            loop {
                let fail = |trail: Vec<Transition>, error: MagnatError| {
                    error!(
                        run_id = %ctx.run_id,
                        flow = %self.name,
                        step = %current,
                        error = %error,
                        "Flow step failed"
                    );
                    ctx.tracer.record(FlowEvent::StepFailed {
                        run_id: ctx.run_id.clone(),
                        flow: self.name.clone(),
                        step: current.to_string(),
                        error: error.to_string(),
                    });
                    FlowFailure {
                        flow: self.name.clone(),
                        step: current.to_string(),
                        trail,
                        error,
                    }
                };

                if ctx.cancel.is_cancelled() {
                    return Err(fail(trail, MagnatError::Cancelled));
                }
                if let Some(max) = self.max_steps {
                    if trail.len() >= max {
                        return Err(fail(trail, MagnatError::StepBudgetExceeded(max)));
                    }
                }

                let Some(node) = self.nodes.get(&current) else {
                    let err = MagnatError::Config(format!("unknown step '{}'", current));
                    return Err(fail(trail, err));
                };

                info!(
                    run_id = %ctx.run_id,
                    flow = %self.name,
                    step = %current,
                    "Running flow step"
                );
                ctx.tracer.record(FlowEvent::StepStarted {
                    run_id: ctx.run_id.clone(),
                    flow: self.name.clone(),
                    step: current.to_string(),
                    at: Utc::now(),
                });

                let step_start = Instant::now();
                let result = match node {
                    Node::Step(step) => step.run(state, ctx).await,
                    Node::Flow(sub) => match sub.run_boxed(state, ctx).await {
                        Ok(outcome) => Ok(outcome.action),
                        Err(failure) => {
                            // Keep the inner steps visible in the outer trail
                            trail.extend(failure.trail.iter().map(|t| Transition {
                                step: format!("{}/{}", failure.flow, t.step),
                                ..t.clone()
                            }));
                            Err(failure.into_error())
                        }
                    },
                };
                let action = match result {
                    Ok(action) => action,
                    Err(e) => return Err(fail(trail, e)),
                };
                let elapsed_ms = step_start.elapsed().as_millis() as u64;

                debug!(
                    flow = %self.name,
                    step = %current,
                    %action,
                    elapsed_ms,
                    channels = ?state.sizes(),
                    "Step finished"
                );
                ctx.tracer.record(FlowEvent::StepFinished {
                    run_id: ctx.run_id.clone(),
                    flow: self.name.clone(),
                    step: current.to_string(),
                    action: action.clone(),
                    elapsed_ms,
                });
                trail.push(Transition {
                    step: current.to_string(),
                    action: action.clone(),
                    elapsed_ms,
                });

                match self.edges.lookup(&current, &action) {
                    Some(next) => current = next.clone(),
                    None => {
                        if self.edges.outgoing(&current).next().is_some() {
                            debug!(
                                flow = %self.name,
                                step = %current,
                                %action,
                                "No edge for label, treating step as terminal"
                            );
                        }
                        let elapsed_ms = start.elapsed().as_millis() as u64;
                        ctx.tracer.record(FlowEvent::RunFinished {
                            run_id: ctx.run_id.clone(),
                            flow: self.name.clone(),
                            terminal: current.to_string(),
                            action: action.clone(),
                            output: state
                                .dialog()
                                .last_assistant()
                                .map(|m| m.content().to_string()),
                            elapsed_ms,
                        });
                        return Ok(FlowOutcome {
                            flow: self.name.clone(),
                            terminal: current.to_string(),
                            action,
                            trail,
                            elapsed_ms,
                        });
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("steps", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

/// Assembles a [`Flow`]. Wiring mistakes surface here, never mid-run.
pub struct FlowBuilder {
    name: String,
    nodes: HashMap<StepId, Node>,
    edges: EdgeTable,
    start: Option<StepId>,
    max_steps: Option<usize>,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            edges: EdgeTable::new(),
            start: None,
            max_steps: None,
        }
    }

    /// Add a leaf step, identified by its name.
    pub fn add_step(&mut self, step: impl StepRunner) -> Result<StepId> {
        self.add_node(Node::step(step))
    }

    /// Nest a whole flow as a single step.
    pub fn add_flow(&mut self, flow: impl Into<Arc<Flow>>) -> Result<StepId> {
        self.add_node(Node::Flow(flow.into()))
    }

    pub fn add_node(&mut self, node: Node) -> Result<StepId> {
        if let Node::Flow(sub) = &node {
            if sub.name == self.name || sub.contains_flow(&self.name) {
                return Err(MagnatError::Config(format!(
                    "flow '{}' cannot contain itself",
                    self.name
                )));
            }
        }
        let id = StepId::new(node.name());
        if self.nodes.contains_key(&id) {
            return Err(MagnatError::Config(format!(
                "duplicate step name '{}' in flow '{}'",
                id, self.name
            )));
        }
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    /// Route `from` to `to` when `from` returns `label`.
    pub fn connect(&mut self, from: &StepId, label: impl Into<Action>, to: &StepId) -> Result<()> {
        for id in [from, to] {
            if !self.nodes.contains_key(id) {
                return Err(MagnatError::Config(format!(
                    "edge references unknown step '{}' in flow '{}'",
                    id, self.name
                )));
            }
        }
        self.edges.register(from.clone(), label.into(), to.clone())
    }

    /// Shorthand for `connect(from, Action::Default, to)`.
    pub fn then(&mut self, from: &StepId, to: &StepId) -> Result<()> {
        self.connect(from, Action::Default, to)
    }

    pub fn start(&mut self, id: &StepId) -> &mut Self {
        self.start = Some(id.clone());
        self
    }

    /// Abort runs that execute more than `max` steps of this flow.
    pub fn max_steps(&mut self, max: usize) -> &mut Self {
        self.max_steps = Some(max);
        self
    }

    pub fn build(self) -> Result<Flow> {
        let start = self.start.ok_or_else(|| {
            MagnatError::Config(format!("flow '{}' has no start step", self.name))
        })?;
        if !self.nodes.contains_key(&start) {
            return Err(MagnatError::Config(format!(
                "start step '{}' is not part of flow '{}'",
                start, self.name
            )));
        }
        if self.max_steps == Some(0) {
            return Err(MagnatError::Config(format!(
                "flow '{}' max_steps must be at least 1",
                self.name
            )));
        }

        debug!(
            flow = %self.name,
            steps = self.nodes.len(),
            edges = self.edges.len(),
            %start,
            "Flow built"
        );

        Ok(Flow {
            name: self.name,
            nodes: self.nodes,
            edges: self.edges,
            start,
            max_steps: self.max_steps,
        })
    }
}
