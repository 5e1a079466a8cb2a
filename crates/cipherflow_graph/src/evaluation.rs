// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node computation interface.
//!
//! A node's behavior receives the values currently on its input ports and
//! its settings, and returns values for its output ports. It never touches
//! other nodes; the scheduler moves values along connections.

use crate::events::{EventBus, GraphEvent};
use crate::node::NodeId;
use crate::port::PortValue;
use crate::settings::Configurable;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Input values handed to a computation, by port name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInputs {
    values: HashMap<String, PortValue>,
}

impl NodeInputs {
    /// Create an empty input set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an input value
    pub fn set(&mut self, port: impl Into<String>, value: PortValue) {
        self.values.insert(port.into(), value);
    }

    /// Get an input value
    pub fn get(&self, port: &str) -> Option<&PortValue> {
        self.values.get(port)
    }

    /// Get an input value or fail with [`NodeError::MissingInput`]
    pub fn require(&self, port: &str) -> Result<&PortValue, NodeError> {
        self.get(port)
            .ok_or_else(|| NodeError::MissingInput(port.to_string()))
    }

    /// Get an integer input
    pub fn int(&self, port: &str) -> Result<i64, NodeError> {
        self.require(port)?
            .as_int()
            .ok_or_else(|| NodeError::InvalidInput {
                port: port.to_string(),
                reason: "expected an integer".to_string(),
            })
    }

    /// Number of inputs with a value
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no input has a value
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of evaluating a node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutputs {
    /// Output values by port name
    pub values: IndexMap<String, PortValue>,
}

impl NodeOutputs {
    /// Create a new empty output
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`NodeOutputs::set`]
    pub fn with(mut self, port: impl Into<String>, value: PortValue) -> Self {
        self.set(port, value);
        self
    }

    /// Set an output value
    pub fn set(&mut self, port: impl Into<String>, value: PortValue) {
        self.values.insert(port.into(), value);
    }

    /// Get an output value
    pub fn get(&self, port: &str) -> Option<&PortValue> {
        self.values.get(port)
    }
}

/// Error raised by a node's own computation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeError {
    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// Input present but unusable
    #[error("Invalid input on {port}: {reason}")]
    InvalidInput {
        /// Port name
        port: String,
        /// What was wrong
        reason: String,
    },

    /// Computation gave up because the run was stopped
    #[error("Computation canceled")]
    Canceled,

    /// Custom error
    #[error("{0}")]
    Failed(String),
}

/// Computation of a node type
pub trait NodeBehavior: Send + Sync {
    /// Evaluate a node and produce outputs
    fn compute(
        &self,
        inputs: &NodeInputs,
        settings: &dyn Configurable,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutputs, NodeError>;
}

impl<F> NodeBehavior for F
where
    F: Fn(&NodeInputs, &dyn Configurable, &ExecutionContext) -> Result<NodeOutputs, NodeError>
        + Send
        + Sync,
{
    fn compute(
        &self,
        inputs: &NodeInputs,
        settings: &dyn Configurable,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutputs, NodeError> {
        self(inputs, settings, ctx)
    }
}

/// Cooperative stop flag shared between a run and its controllers.
///
/// Stopping is idempotent and may happen from any thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Create a handle that is not stopped
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run to stop
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// What a computation can see of the run it belongs to
#[derive(Debug)]
pub struct ExecutionContext {
    node: NodeId,
    stop: StopHandle,
    events: EventBus,
    progress: Mutex<Option<(f64, f64)>>,
}

impl ExecutionContext {
    /// Create a context for `node`
    pub fn new(node: NodeId, stop: StopHandle, events: EventBus) -> Self {
        Self {
            node,
            stop,
            events,
            progress: Mutex::new(None),
        }
    }

    /// Node being computed
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Whether the run was asked to stop
    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Handle to the run's stop flag, for long waits on other threads
    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    /// Report progress of the current computation
    pub fn report_progress(&self, value: f64, max: f64) {
        *self.progress.lock() = Some((value, max));
        self.events.emit(GraphEvent::NodeProgress {
            node: self.node,
            value,
            max,
        });
    }

    /// Last reported progress
    pub fn progress(&self) -> Option<(f64, f64)> {
        *self.progress.lock()
    }
}
