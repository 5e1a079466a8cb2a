// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run a graph to completion, one node at a time.
//!
//! A run seeds a FIFO ready queue with every node that has no connected data
//! input, then repeatedly pops a node, computes it and pushes its outputs
//! along the outgoing connections. A destination becomes ready again when its
//! trigger policy is satisfied. Between two steps the caller gets the graph
//! through a [`StepBarrier`], which is the only point where edits may land
//! during a run. An edit there that closes a data cycle ends the run with
//! [`ExecutionError::Cyclic`].

use crate::evaluation::{ExecutionContext, NodeError, NodeInputs, StopHandle};
use crate::events::GraphEvent;
use crate::graph::{CycleError, Graph};
use crate::node::{NodeId, NodeState, TriggerPolicy};
use crate::port::{PortId, PortValue};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Scheduler limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum node executions in one run
    pub max_iterations: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
        }
    }
}

/// Hook called before each step of a run
pub trait StepBarrier {
    /// Apply pending work to the graph
    fn between_steps(&mut self, graph: &mut Graph);
}

impl<F> StepBarrier for F
where
    F: FnMut(&mut Graph),
{
    fn between_steps(&mut self, graph: &mut Graph) {
        self(graph);
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The ready queue drained
    Completed,
    /// A stop was requested
    Canceled,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Executed nodes in execution order, with repeats
    pub executed: Vec<NodeId>,
    /// How the run ended
    pub outcome: RunOutcome,
}

impl RunReport {
    /// Number of node executions
    pub fn steps(&self) -> usize {
        self.executed.len()
    }

    /// How many times `node` was executed
    pub fn executions_of(&self, node: NodeId) -> usize {
        self.executed.iter().filter(|n| **n == node).count()
    }
}

/// Errors that end a run
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The data connections form a cycle
    #[error("Cannot run: {0}")]
    Cyclic(#[from] CycleError),

    /// A node's computation failed
    #[error("Node '{name}' ({node}) failed: {source}")]
    NodeComputation {
        /// Failing node
        node: NodeId,
        /// Its display name
        name: String,
        /// Error returned by the computation
        #[source]
        source: NodeError,
    },

    /// No computation is registered for the node's type
    #[error("No behavior registered for node type '{node_type}' of node {node}")]
    MissingBehavior {
        /// Node
        node: NodeId,
        /// Its type ID
        node_type: String,
    },

    /// Too many executions, usually a control loop that never ends
    #[error("Iteration limit of {limit} node executions exceeded")]
    IterationLimitExceeded {
        /// Configured limit
        limit: usize,
    },
}

/// Runs graphs
#[derive(Debug, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
    stop: StopHandle,
}

/// Connection lookups for one edge revision of the graph
#[derive(Default)]
struct Wiring {
    revision: u64,
    /// Data inputs with an incoming connection
    fed: HashSet<PortId>,
    /// Destinations of every connected output, in connection order
    targets: HashMap<PortId, Vec<(NodeId, PortId, bool)>>,
}

impl Wiring {
    fn of(graph: &Graph) -> Self {
        let mut wiring = Self {
            revision: graph.edge_revision(),
            ..Self::default()
        };
        for connection in graph.connections() {
            if connection.is_dependency() {
                wiring.fed.insert(connection.to_port);
            }
            wiring.targets.entry(connection.from_port).or_default().push((
                connection.to_node,
                connection.to_port,
                connection.is_control,
            ));
        }
        wiring
    }
}

/// Book-keeping of a single run
#[derive(Default)]
struct RunState {
    queue: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
    /// Data inputs written since the node last executed
    received: HashMap<NodeId, HashSet<PortId>>,
    executed: Vec<NodeId>,
    wiring: Wiring,
}

impl RunState {
    fn enqueue(&mut self, graph: &mut Graph, node: NodeId) {
        if self.queued.insert(node) {
            self.queue.push_back(node);
            if let Some(node) = graph.node_mut(node) {
                node.state = NodeState::Ready;
            }
        }
    }
}

impl Scheduler {
    /// Create a scheduler
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            stop: StopHandle::new(),
        }
    }

    /// Scheduler limits
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Handle that stops the current run from any thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Request the current run to stop
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Run `graph` without intermediate edits
    pub fn run(&self, graph: &mut Graph) -> Result<RunReport, ExecutionError> {
        self.run_with(graph, &mut |_: &mut Graph| {})
    }

    /// Run `graph`, calling `barrier` before every step
    pub fn run_with(
        &self,
        graph: &mut Graph,
        barrier: &mut dyn StepBarrier,
    ) -> Result<RunReport, ExecutionError> {
        if let Err(cycle) = graph.topological_order() {
            tracing::warn!(%cycle, "Refusing to run cyclic graph");
            graph.events().emit(GraphEvent::RunFailed {
                reason: cycle.to_string(),
            });
            return Err(cycle.into());
        }

        // A stop issued before the run started is not carried into it
        self.stop.reset();

        let mut run = RunState {
            wiring: Wiring::of(graph),
            ..RunState::default()
        };
        prepare(graph);
        for node in seeds(graph, &run.wiring) {
            run.enqueue(graph, node);
        }

        tracing::info!(graph = %graph.name, seeds = run.queue.len(), "Run started");
        graph.events().emit(GraphEvent::RunStarted);

        loop {
            barrier.between_steps(graph);

            if graph.edge_revision() != run.wiring.revision {
                if let Err(cycle) = graph.topological_order() {
                    tracing::warn!(%cycle, "Edit between steps closed a cycle");
                    settle(graph, &run);
                    graph.events().emit(GraphEvent::RunFailed {
                        reason: cycle.to_string(),
                    });
                    return Err(cycle.into());
                }
                run.wiring = Wiring::of(graph);
            }

            if self.stop.is_stopped() {
                return Ok(self.cancel(graph, run));
            }

            let Some(node_id) = run.queue.pop_front() else {
                break;
            };
            run.queued.remove(&node_id);

            // The node may have been deleted by an edit between steps
            if graph.node(node_id).is_none() {
                continue;
            }

            if run.executed.len() >= self.config.max_iterations {
                let error = ExecutionError::IterationLimitExceeded {
                    limit: self.config.max_iterations,
                };
                tracing::error!(%error, "Run aborted");
                graph.events().emit(GraphEvent::RunFailed {
                    reason: error.to_string(),
                });
                return Err(error);
            }

            self.step(graph, &mut run, node_id)?;

            if self.stop.is_stopped() {
                return Ok(self.cancel(graph, run));
            }
        }

        tracing::info!(graph = %graph.name, executed = run.executed.len(), "Run finished");
        graph.events().emit(GraphEvent::RunFinished {
            executed: run.executed.len(),
        });
        Ok(RunReport {
            executed: run.executed,
            outcome: RunOutcome::Completed,
        })
    }

    fn step(&self, graph: &mut Graph, run: &mut RunState, node_id: NodeId) -> Result<(), ExecutionError> {
        let (behavior, inputs) = {
            let Some(node) = graph.node(node_id) else {
                return Ok(());
            };
            let behavior = graph
                .registry()
                .get(&node.node_type)
                .map(|t| Arc::clone(&t.behavior))
                .ok_or_else(|| ExecutionError::MissingBehavior {
                    node: node_id,
                    node_type: node.node_type.clone(),
                })?;

            let mut inputs = NodeInputs::new();
            for port in &node.inputs {
                if let Some(value) = port.value_or_default() {
                    inputs.set(port.name.clone(), value.clone());
                }
            }
            (behavior, inputs)
        };

        if let Some(node) = graph.node_mut(node_id) {
            node.state = NodeState::Executing;
        }
        run.received.remove(&node_id);

        let ctx = ExecutionContext::new(node_id, self.stop.clone(), graph.events().clone());
        let result = match graph.node(node_id) {
            Some(node) => {
                tracing::debug!(node = %node_id, name = %node.name, "Executing node");
                behavior.compute(&inputs, node.settings.as_ref(), &ctx)
            }
            None => return Ok(()),
        };
        run.executed.push(node_id);

        let Some(node) = graph.node_mut(node_id) else {
            return Ok(());
        };
        node.progress = ctx.progress();

        // Outputs of a computation interrupted by a stop are discarded
        if self.stop.is_stopped() {
            node.state = NodeState::Canceled;
            return Ok(());
        }

        let outputs = match result {
            Ok(outputs) => outputs,
            Err(source) => {
                node.state = NodeState::Error;
                node.last_error = Some(source.to_string());
                let error = ExecutionError::NodeComputation {
                    node: node_id,
                    name: node.name.clone(),
                    source,
                };
                tracing::error!(%error, "Run failed");
                graph.events().emit(GraphEvent::RunFailed {
                    reason: error.to_string(),
                });
                return Err(error);
            }
        };
        node.state = NodeState::Finished;

        let mut written = Vec::with_capacity(outputs.values.len());
        for (name, value) in outputs.values {
            let Some(port) = node.outputs.iter_mut().find(|p| p.name == name) else {
                tracing::warn!(node = %node_id, port = %name, "Computation produced an undeclared output");
                continue;
            };
            let Some(value) = value.convert_to(&port.port_type) else {
                tracing::warn!(
                    node = %node_id,
                    port = %name,
                    produced = %value.port_type(),
                    declared = %port.port_type,
                    "Dropping output of the wrong type"
                );
                continue;
            };
            port.value = Some(value.clone());
            written.push((port.id, value));
        }

        for (port_id, value) in written {
            let Some(targets) = run.wiring.targets.get(&port_id).cloned() else {
                continue;
            };
            for (to_node, to_port, is_control) in targets {
                publish(graph, run, &value, to_node, to_port, is_control);
            }
        }

        Ok(())
    }

    fn cancel(&self, graph: &mut Graph, run: RunState) -> RunReport {
        settle(graph, &run);
        tracing::info!(graph = %graph.name, executed = run.executed.len(), "Run canceled");
        graph.events().emit(GraphEvent::RunCanceled {
            executed: run.executed.len(),
        });
        RunReport {
            executed: run.executed,
            outcome: RunOutcome::Canceled,
        }
    }
}

/// Clear runtime state and put data inputs back to their defaults
fn prepare(graph: &mut Graph) {
    let ids: Vec<NodeId> = graph.node_ids().collect();
    for id in ids {
        if let Some(node) = graph.node_mut(id) {
            node.reset_state();
            for port in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
                if !port.is_control {
                    port.value = None;
                }
            }
        }
    }
}

/// Put nodes still waiting in the queue back to idle
fn settle(graph: &mut Graph, run: &RunState) {
    for node_id in &run.queue {
        if let Some(node) = graph.node_mut(*node_id) {
            node.state = NodeState::Idle;
        }
    }
}

/// Nodes with no connected data input, in graph order
fn seeds(graph: &Graph, wiring: &Wiring) -> Vec<NodeId> {
    graph
        .nodes()
        .filter(|node| {
            !node
                .inputs
                .iter()
                .any(|p| !p.is_control && wiring.fed.contains(&p.id))
        })
        .map(|node| node.id)
        .collect()
}

fn publish(
    graph: &mut Graph,
    run: &mut RunState,
    value: &PortValue,
    to_node: NodeId,
    to_port: PortId,
    is_control: bool,
) {
    let Some(target) = graph.port(to_port) else {
        return;
    };
    let Some(converted) = value.convert_to(&target.port_type) else {
        tracing::warn!(
            node = %to_node,
            port = %target.name,
            from = %value.port_type(),
            to = %target.port_type,
            "Dropping value that cannot be converted"
        );
        return;
    };
    if graph.set_port_value(to_port, Some(converted)).is_err() {
        return;
    }

    if is_control {
        run.enqueue(graph, to_node);
        return;
    }

    run.received.entry(to_node).or_default().insert(to_port);
    if is_ready(graph, run, to_node) {
        run.enqueue(graph, to_node);
    }
}

fn is_ready(graph: &Graph, run: &RunState, node_id: NodeId) -> bool {
    let Some(node) = graph.node(node_id) else {
        return false;
    };
    let received = run.received.get(&node_id);
    match node.trigger {
        TriggerPolicy::AnyInput => received.is_some_and(|r| !r.is_empty()),
        TriggerPolicy::WaitForAll => node
            .inputs
            .iter()
            .filter(|p| !p.is_control && run.wiring.fed.contains(&p.id))
            .all(|p| received.is_some_and(|r| r.contains(&p.id))),
    }
}
