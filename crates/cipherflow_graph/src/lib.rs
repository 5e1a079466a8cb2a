// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dataflow graph model for cipherflow workspaces.
//!
//! This crate provides the graph that a cipherflow workspace edits and runs:
//! - Nodes instantiated from registered types, with typed ports and settings
//! - Data and control connections with conversion checking
//! - Text and image annotations
//! - Change notifications for every committed mutation
//! - A single-threaded scheduler with cooperative stop
//!
//! ## Architecture
//!
//! The graph owns all elements by value and is the only place where they
//! change. Node computations live in a [`NodeRegistry`] shared between graphs
//! and are looked up by type when the [`Scheduler`] runs a node.

pub mod annotation;
pub mod connection;
pub mod evaluation;
pub mod events;
pub mod graph;
pub mod node;
pub mod persistence;
pub mod port;
pub mod registry;
pub mod scheduler;
pub mod settings;

pub use annotation::{Annotation, AnnotationId, AnnotationKind, ElementId};
pub use connection::{Connection, ConnectionId};
pub use evaluation::{ExecutionContext, NodeBehavior, NodeError, NodeInputs, NodeOutputs, StopHandle};
pub use events::{EventBus, GraphEvent};
pub use graph::{CycleError, Graph, GraphError, RemovedNode};
pub use node::{Node, NodeCategory, NodeId, NodeSpec, NodeState, NodeType, TriggerPolicy};
pub use persistence::{GraphDocument, LoadWarning, PersistenceError};
pub use port::{ConversionLevel, Port, PortDirection, PortId, PortSpec, PortType, PortValue};
pub use registry::NodeRegistry;
pub use scheduler::{ExecutionError, RunOutcome, RunReport, Scheduler, SchedulerConfig, StepBarrier};
pub use settings::{
    Configurable, PropertyBag, PropertySpec, SettingKind, SettingValue, SettingsError,
    SettingsSnapshot,
};
