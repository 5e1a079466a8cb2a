// SPDX-License-Identifier: MIT OR Apache-2.0
//! Copy and paste of node selections.
//!
//! Copying works in three stages. [`select_connections`] widens a node
//! selection to a self-contained one, [`ClipboardPayload::capture`] takes
//! everything by value, and [`CopyOperation`] inserts fresh copies into a
//! graph as one undoable step. The payload can be encoded to bytes so
//! copy and paste may happen at different times.

use crate::operations::{
    ensure_executable, ensure_undoable, graph_error, with_events, GraphOperation, OpOutcome,
    OperationError, OperationState,
};
use cipherflow_graph::persistence::{NodeRecord, PortRecord};
use cipherflow_graph::settings::SettingsRestoreError;
use cipherflow_graph::{
    Connection, ConnectionId, Graph, GraphError, Node, NodeId, PortId, PortValue, RemovedNode,
    SettingsSnapshot,
};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default layout offset of pasted nodes
pub const PASTE_OFFSET: [f32; 2] = [50.0, 50.0];

/// Nodes and connections picked for copying
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Selected nodes in graph order
    pub nodes: Vec<NodeId>,
    /// Connections between selected nodes
    pub connections: Vec<ConnectionId>,
}

/// Widen a node selection for copying.
///
/// Adds the source node of every control connection entering the selection,
/// then picks every connection whose both ends are selected.
pub fn select_connections(graph: &Graph, nodes: &[NodeId]) -> Selection {
    let mut selected: IndexSet<NodeId> = nodes
        .iter()
        .copied()
        .filter(|id| graph.node(*id).is_some())
        .collect();

    let control_sources: Vec<NodeId> = graph
        .connections()
        .filter(|c| c.is_control && selected.contains(&c.to_node))
        .map(|c| c.from_node)
        .collect();
    selected.extend(control_sources);

    let connections = graph
        .connections()
        .filter(|c| selected.contains(&c.from_node) && selected.contains(&c.to_node))
        .map(|c| c.id)
        .collect();

    Selection {
        nodes: graph.node_ids().filter(|id| selected.contains(id)).collect(),
        connections,
    }
}

/// Clipboard errors
#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    /// Failed to encode or decode the payload
    #[error("Clipboard encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// A selection captured by value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipboardPayload {
    /// Copied nodes with their persisted settings
    pub nodes: Vec<NodeRecord>,
    /// Copied connections, still pointing at the original ports
    pub connections: Vec<Connection>,
}

impl ClipboardPayload {
    /// Capture `selection` from `graph`.
    ///
    /// Settings are copied by value, skipping non-persisted properties.
    /// Only control ports keep their current value.
    ///
    /// On paste each control port gets its own captured value, then every
    /// copied control connection hands the value of its destination to its
    /// source, so a copied pair shares the state of the original pair.
    pub fn capture(graph: &Graph, selection: &Selection) -> Self {
        let nodes = selection
            .nodes
            .iter()
            .filter_map(|id| graph.node(*id))
            .map(|node| NodeRecord {
                id: node.id,
                node_type: node.node_type.clone(),
                name: node.name.clone(),
                position: node.position,
                size: node.size,
                ports: node
                    .ports()
                    .map(|port| PortRecord {
                        id: port.id,
                        name: port.name.clone(),
                        direction: port.direction,
                        value: if port.is_control { port.value.clone() } else { None },
                    })
                    .collect(),
                settings: SettingsSnapshot::capture(node.settings.as_ref()),
            })
            .collect();

        let connections = selection
            .connections
            .iter()
            .filter_map(|id| graph.connection(*id))
            .cloned()
            .collect();

        Self { nodes, connections }
    }

    /// Encode for the clipboard
    pub fn to_bytes(&self) -> Result<Vec<u8>, ClipboardError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from the clipboard
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ClipboardError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A setting that could not be carried over to a copy
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Copy of node {node}: {error}")]
pub struct CloneWarning {
    /// Original node
    pub node: NodeId,
    /// What failed
    pub error: SettingsRestoreError,
}

/// What a copy created
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloneResult {
    /// New nodes, in payload order
    pub nodes: Vec<NodeId>,
    /// New connections
    pub edges: Vec<ConnectionId>,
    /// Original node to copy
    pub id_map: IndexMap<NodeId, NodeId>,
    /// Connections left out because an end was not copied
    pub dropped_edges: usize,
    /// Settings that could not be restored
    pub warnings: Vec<CloneWarning>,
}

/// Insert a copy of a clipboard payload
#[derive(Debug)]
pub struct CopyOperation {
    payload: ClipboardPayload,
    offset: [f32; 2],
    result: Option<CloneResult>,
    /// Copies removed by undo, in insertion order
    removed: Vec<RemovedNode>,
    description: String,
    state: OperationState,
}

impl CopyOperation {
    /// Create the operation
    pub fn new(payload: ClipboardPayload, offset: [f32; 2]) -> Self {
        let count = payload.nodes.len();
        Self {
            payload,
            offset,
            result: None,
            removed: Vec::new(),
            description: format!("Paste {count} node(s)"),
            state: OperationState::Created,
        }
    }

    /// Build fresh nodes and connections for the payload
    fn materialize(&self, graph: &Graph) -> Result<(Vec<Node>, Vec<Connection>, CloneResult), GraphError> {
        let mut result = CloneResult::default();
        let mut port_map: HashMap<PortId, (NodeId, PortId)> = HashMap::new();
        let mut nodes = Vec::with_capacity(self.payload.nodes.len());

        for record in &self.payload.nodes {
            let id = NodeId::new();
            let mut node = graph
                .registry()
                .create_node(&record.node_type, id)
                .ok_or_else(|| GraphError::UnknownNodeType(record.node_type.clone()))?;
            node.name = record.name.clone();
            node.position = [
                record.position[0] + self.offset[0],
                record.position[1] + self.offset[1],
            ];
            node.size = record.size;

            for port_record in &record.ports {
                let Some(port) = node
                    .inputs
                    .iter_mut()
                    .chain(node.outputs.iter_mut())
                    .find(|p| p.name == port_record.name && p.direction == port_record.direction)
                else {
                    continue;
                };
                port_map.insert(port_record.id, (id, port.id));
                // Control values move with the copy right away
                if port.is_control && port_record.value.is_some() {
                    port.value = port_record.value.clone();
                }
            }

            for error in record.settings.restore(node.settings.as_mut()) {
                result.warnings.push(CloneWarning {
                    node: record.id,
                    error,
                });
            }

            result.id_map.insert(record.id, id);
            result.nodes.push(id);
            nodes.push(node);
        }

        let captured: HashMap<PortId, &PortValue> = self
            .payload
            .nodes
            .iter()
            .flat_map(|record| &record.ports)
            .filter_map(|port| port.value.as_ref().map(|value| (port.id, value)))
            .collect();

        let mut connections = Vec::new();
        for original in &self.payload.connections {
            let (Some(&(from_node, from_port)), Some(&(to_node, to_port))) =
                (port_map.get(&original.from_port), port_map.get(&original.to_port))
            else {
                tracing::debug!(connection = ?original.id, "Dropping connection with an end outside the copy");
                result.dropped_edges += 1;
                continue;
            };

            let mut connection = Connection::new(
                from_node,
                from_port,
                to_node,
                to_port,
                original.is_control,
                original.conversion,
            );
            connection.is_copy = true;

            if original.is_control {
                if let Some(value) = captured.get(&original.to_port) {
                    let source = nodes
                        .iter_mut()
                        .find(|n| n.id == from_node)
                        .and_then(|n| n.outputs.iter_mut().find(|p| p.id == from_port));
                    if let Some(source) = source {
                        source.value = Some((*value).clone());
                    }
                }
            }

            result.edges.push(connection.id);
            connections.push(connection);
        }

        Ok((nodes, connections, result))
    }

    fn insert(
        graph: &mut Graph,
        nodes: Vec<Node>,
        connections: Vec<Connection>,
    ) -> Result<(), GraphError> {
        let mut inserted = Vec::with_capacity(nodes.len());
        for node in nodes {
            match graph.insert_node(node) {
                Ok(id) => inserted.push(id),
                Err(error) => {
                    Self::roll_back(graph, &inserted);
                    return Err(error);
                }
            }
        }
        for connection in connections {
            if let Err(error) = graph.restore_connection(connection, None) {
                Self::roll_back(graph, &inserted);
                return Err(error);
            }
        }
        Ok(())
    }

    /// Remove copies inserted so far, with their connections
    fn roll_back(graph: &mut Graph, inserted: &[NodeId]) {
        for id in inserted.iter().rev() {
            if let Err(error) = graph.remove_node(*id) {
                tracing::warn!(node = %id, %error, "Failed to remove partial copy");
            }
        }
    }
}

impl GraphOperation for CopyOperation {
    fn identifier(&self) -> u64 {
        0
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn execute(&mut self, graph: &mut Graph, emit_events: bool) -> Result<OpOutcome, OperationError> {
        ensure_executable(self.state, &self.description)?;

        let result = if let Some(result) = self.result.clone() {
            // Redo puts back the very same copies
            let removed = std::mem::take(&mut self.removed);
            with_events(graph, emit_events, |graph| -> Result<(), GraphError> {
                for node in removed {
                    graph.restore_node(node)?;
                }
                Ok(())
            })
            .map_err(graph_error(&self.description))?;
            result
        } else {
            let (nodes, connections, result) = self
                .materialize(graph)
                .map_err(graph_error(&self.description))?;
            with_events(graph, emit_events, |graph| Self::insert(graph, nodes, connections))
                .map_err(graph_error(&self.description))?;

            for warning in &result.warnings {
                tracing::warn!(%warning, "Setting not copied");
            }
            tracing::debug!(
                nodes = result.nodes.len(),
                edges = result.edges.len(),
                dropped = result.dropped_edges,
                "Pasted selection"
            );
            self.result = Some(result.clone());
            result
        };

        self.state = OperationState::Executed;
        Ok(OpOutcome::Copied(result))
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        let Some(result) = &self.result else {
            return Ok(());
        };

        let mut removed = Vec::with_capacity(result.nodes.len());
        for id in result.nodes.iter().rev() {
            removed.push(graph.remove_node(*id).map_err(graph_error(&self.description))?);
        }
        removed.reverse();

        self.removed = removed;
        self.state = OperationState::Undone;
        Ok(())
    }
}
