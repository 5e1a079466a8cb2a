// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.

use crate::port::{Port, PortDirection, PortId, PortSpec};
use crate::settings::Configurable;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Input nodes (constants, text sources)
    Input,
    /// Output nodes (result, preview)
    Output,
    /// Classical and modern ciphers
    Cipher,
    /// Hash functions and MACs
    Hash,
    /// Cryptanalysis components
    Analysis,
    /// Logic/flow control
    Logic,
    /// Utility nodes
    Utility,
    /// Custom/user-defined
    Custom,
}

/// When a node becomes ready to run again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerPolicy {
    /// Every connected data input must have received a value
    #[default]
    WaitForAll,
    /// Any arriving input makes the node ready
    AnyInput,
}

/// Node type definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeType {
    /// Unique type identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Input port schema
    pub inputs: Vec<PortSpec>,
    /// Output port schema
    pub outputs: Vec<PortSpec>,
    /// Scheduling policy
    pub trigger: TriggerPolicy,
    /// Default layout size
    pub default_size: [f32; 2],
}

impl NodeType {
    /// Create a type with no ports
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            trigger: TriggerPolicy::default(),
            default_size: [150.0, 80.0],
        }
    }

    /// Add a port to the schema
    pub fn with_port(mut self, port: PortSpec) -> Self {
        match port.direction {
            PortDirection::Input => self.inputs.push(port),
            PortDirection::Output => self.outputs.push(port),
        }
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the trigger policy
    pub fn with_trigger(mut self, trigger: TriggerPolicy) -> Self {
        self.trigger = trigger;
        self
    }
}

/// Execution state of a node within the current or last run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    /// Not yet scheduled
    #[default]
    Idle,
    /// Waiting in the ready queue
    Ready,
    /// Computation in progress
    Executing,
    /// Finished at least once this run
    Finished,
    /// Computation failed
    Error,
    /// Run stopped while this node was executing
    Canceled,
}

/// Request to create a node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    /// Explicit id, or `None` for a fresh one
    pub id: Option<NodeId>,
    /// Registered node type id
    pub type_id: String,
    /// Display name, or `None` for the type's name
    pub name: Option<String>,
    /// Layout position
    pub position: [f32; 2],
    /// Layout size, or `None` for the type's default
    pub size: Option<[f32; 2]>,
}

impl NodeSpec {
    /// Create a spec for `type_id` at the origin
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            id: None,
            type_id: type_id.into(),
            name: None,
            position: [0.0, 0.0],
            size: None,
        }
    }

    /// Use an explicit id
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the position
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = [x, y];
        self
    }

    /// Set the size
    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        self.size = Some([width, height]);
        self
    }
}

/// A node instance in the graph
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Node type ID
    pub node_type: String,
    /// Display name (can be customized)
    pub name: String,
    /// Position in the workspace
    pub position: [f32; 2],
    /// Width and height in the workspace
    pub size: [f32; 2],
    /// Input ports
    pub inputs: Vec<Port>,
    /// Output ports
    pub outputs: Vec<Port>,
    /// Configuration consumed by the node's computation
    pub settings: Box<dyn Configurable>,
    /// Scheduling policy copied from the type
    pub trigger: TriggerPolicy,
    /// Execution state
    pub state: NodeState,
    /// Message of the last failed computation
    pub last_error: Option<String>,
    /// Last reported progress as `(value, max)`
    pub progress: Option<(f64, f64)>,
}

impl Node {
    /// Create a new node from a type definition
    pub fn new(id: NodeId, node_type: &NodeType, settings: Box<dyn Configurable>) -> Self {
        Self {
            id,
            node_type: node_type.id.clone(),
            name: node_type.name.clone(),
            position: [0.0, 0.0],
            size: node_type.default_size,
            inputs: node_type.inputs.iter().map(|p| p.instantiate(id)).collect(),
            outputs: node_type.outputs.iter().map(|p| p.instantiate(id)).collect(),
            settings,
            trigger: node_type.trigger,
            state: NodeState::Idle,
            last_error: None,
            progress: None,
        }
    }

    /// Get an input port by name
    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Get an output port by name
    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Get a port by ID
    pub fn port(&self, port_id: &PortId) -> Option<&Port> {
        self.ports().find(|p| p.id == *port_id)
    }

    /// Get a mutable port by ID
    pub fn port_mut(&mut self, port_id: &PortId) -> Option<&mut Port> {
        self.inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .find(|p| p.id == *port_id)
    }

    /// Get all ports
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    /// Clear runtime execution state
    pub fn reset_state(&mut self) {
        self.state = NodeState::Idle;
        self.last_error = None;
        self.progress = None;
    }
}
