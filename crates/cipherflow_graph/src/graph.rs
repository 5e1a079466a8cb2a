// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes, connections and annotations.
//!
//! The graph is the only place where structure changes. Every mutator
//! validates first and touches state second, so a failed call leaves the
//! graph exactly as it was. Successful mutations notify subscribers after
//! the change is committed.

use crate::annotation::{Annotation, AnnotationId, ElementId};
use crate::connection::{Connection, ConnectionId};
use crate::events::{EventBus, GraphEvent};
use crate::node::{Node, NodeId, NodeSpec};
use crate::port::{ConversionLevel, Port, PortDirection, PortId, PortType, PortValue};
use crate::registry::NodeRegistry;
use crate::settings::{SettingValue, SettingsError};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::Arc;

/// A node removed from the graph, with everything needed to put it back
#[derive(Debug, Clone)]
pub struct RemovedNode {
    /// The node, including its ports and settings
    pub node: Node,
    /// Position of the node in the graph's node order
    pub index: usize,
    /// Incident connections with their positions, ascending
    pub connections: Vec<(usize, Connection)>,
}

/// A node graph
#[derive(Debug)]
pub struct Graph {
    /// Graph name
    pub name: String,
    /// Nodes in the graph
    nodes: IndexMap<NodeId, Node>,
    /// Connections between nodes
    connections: IndexMap<ConnectionId, Connection>,
    /// Text and image annotations
    annotations: IndexMap<AnnotationId, Annotation>,
    /// Owning node of every live port
    port_owners: HashMap<PortId, NodeId>,
    /// Bumped whenever a connection is added or removed
    edge_revision: u64,
    registry: Arc<NodeRegistry>,
    events: EventBus,
}

impl Graph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>, registry: Arc<NodeRegistry>) -> Self {
        Self {
            name: name.into(),
            nodes: IndexMap::new(),
            connections: IndexMap::new(),
            annotations: IndexMap::new(),
            port_owners: HashMap::new(),
            edge_revision: 0,
            registry,
            events: EventBus::new(),
        }
    }

    /// Node types this graph instantiates from
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// The graph's event bus
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> mpsc::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    // ── Nodes ──

    /// Instantiate a node from its registered type
    pub fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId, GraphError> {
        let id = spec.id.unwrap_or_default();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateId(ElementId::Node(id)));
        }

        let mut node = self
            .registry
            .create_node(&spec.type_id, id)
            .ok_or_else(|| GraphError::UnknownNodeType(spec.type_id.clone()))?;
        if let Some(name) = spec.name {
            node.name = name;
        }
        node.position = spec.position;
        if let Some(size) = spec.size {
            node.size = size;
        }

        self.insert_node(node)
    }

    /// Add an already built node, keeping its ids
    pub fn insert_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        self.check_node_free(&node)?;
        let id = node.id;
        self.attach_node(node, None);
        self.events.emit(GraphEvent::NodeAdded(id));
        Ok(id)
    }

    /// Remove a node together with every connection touching it
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<RemovedNode, GraphError> {
        let index = self
            .nodes
            .get_index_of(&node_id)
            .ok_or(GraphError::NotFound(ElementId::Node(node_id)))?;

        let connections: Vec<(usize, Connection)> = self
            .connections
            .values()
            .enumerate()
            .filter(|(_, c)| c.involves_node(node_id))
            .map(|(i, c)| (i, c.clone()))
            .collect();
        if !connections.is_empty() {
            self.connections.retain(|_, c| !c.involves_node(node_id));
            self.edge_revision += 1;
        }

        let node = self
            .nodes
            .shift_remove(&node_id)
            .ok_or(GraphError::NotFound(ElementId::Node(node_id)))?;
        for port in node.ports() {
            self.port_owners.remove(&port.id);
        }

        self.events.emit(GraphEvent::NodeRemoved(node_id));
        for (_, connection) in &connections {
            self.events.emit(GraphEvent::EdgeRemoved(connection.id));
        }

        Ok(RemovedNode {
            node,
            index,
            connections,
        })
    }

    /// Put a removed node and its connections back where they were
    pub fn restore_node(&mut self, removed: RemovedNode) -> Result<(), GraphError> {
        self.check_node_free(&removed.node)?;

        let own_ports: HashSet<PortId> = removed.node.ports().map(|p| p.id).collect();
        for (_, connection) in &removed.connections {
            if self.connections.contains_key(&connection.id) {
                return Err(GraphError::DuplicateId(ElementId::Edge(connection.id)));
            }
            for port in [connection.from_port, connection.to_port] {
                if !own_ports.contains(&port) && !self.port_owners.contains_key(&port) {
                    return Err(GraphError::PortNotFound(port));
                }
            }
        }

        let node_id = removed.node.id;
        self.attach_node(removed.node, Some(removed.index));
        for (index, connection) in &removed.connections {
            let at = (*index).min(self.connections.len());
            self.connections.shift_insert(at, connection.id, connection.clone());
        }
        if !removed.connections.is_empty() {
            self.edge_revision += 1;
        }

        self.events.emit(GraphEvent::NodeAdded(node_id));
        for (_, connection) in &removed.connections {
            self.events.emit(GraphEvent::EdgeAdded(connection.id));
        }
        Ok(())
    }

    fn check_node_free(&self, node: &Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateId(ElementId::Node(node.id)));
        }
        let mut seen = HashSet::new();
        for port in node.ports() {
            if self.port_owners.contains_key(&port.id) || !seen.insert(port.id) {
                return Err(GraphError::DuplicatePort(port.id));
            }
        }
        Ok(())
    }

    fn attach_node(&mut self, node: Node, index: Option<usize>) {
        for port in node.ports() {
            self.port_owners.insert(port.id, node.id);
        }
        match index {
            Some(index) => {
                let at = index.min(self.nodes.len());
                self.nodes.shift_insert(at, node.id, node);
            }
            None => {
                self.nodes.insert(node.id, node);
            }
        }
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub(crate) fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Get all nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Find the first node with the given display name
    pub fn find_node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.name == name)
    }

    // ── Ports ──

    /// Get a port by ID
    pub fn port(&self, port_id: PortId) -> Option<&Port> {
        let owner = self.port_owners.get(&port_id)?;
        self.nodes.get(owner)?.port(&port_id)
    }

    /// Owning node of a port
    pub fn port_owner(&self, port_id: PortId) -> Option<NodeId> {
        self.port_owners.get(&port_id).copied()
    }

    /// Write the current value of a port
    pub fn set_port_value(
        &mut self,
        port_id: PortId,
        value: Option<PortValue>,
    ) -> Result<(), GraphError> {
        let owner = self
            .port_owners
            .get(&port_id)
            .copied()
            .ok_or(GraphError::PortNotFound(port_id))?;
        let port = self
            .nodes
            .get_mut(&owner)
            .and_then(|n| n.port_mut(&port_id))
            .ok_or(GraphError::PortNotFound(port_id))?;
        port.value = value;
        Ok(())
    }

    // ── Connections ──

    /// Check whether `from_port -> to_port` may be connected.
    ///
    /// Returns the conversion the connection would need.
    pub fn validate_edge(
        &self,
        from_port: PortId,
        to_port: PortId,
        is_control: bool,
    ) -> Result<ConversionLevel, GraphError> {
        let source = self.port(from_port).ok_or(GraphError::PortNotFound(from_port))?;
        let target = self.port(to_port).ok_or(GraphError::PortNotFound(to_port))?;

        if source.direction != PortDirection::Output {
            return Err(GraphError::InvalidDirection(from_port));
        }
        if target.direction != PortDirection::Input {
            return Err(GraphError::InvalidDirection(to_port));
        }

        if source.is_control != is_control || target.is_control != is_control {
            return Err(GraphError::ControlMismatch { from_port, to_port });
        }

        // Control edges may model feedback onto the same node
        if source.node == target.node && !is_control {
            return Err(GraphError::SelfLoop(source.node));
        }

        if self
            .connections
            .values()
            .any(|c| c.from_port == from_port && c.to_port == to_port)
        {
            return Err(GraphError::AlreadyConnected { from_port, to_port });
        }

        let conversion = source.conversion_to(target);
        if conversion == ConversionLevel::Incompatible {
            return Err(GraphError::TypeMismatch {
                from: source.port_type.clone(),
                to: target.port_type.clone(),
            });
        }

        // At most one data edge per input port
        if !is_control && self.connections_to(to_port).any(|c| !c.is_control) {
            return Err(GraphError::PortOccupied(to_port));
        }

        Ok(conversion)
    }

    /// Add a connection between ports
    pub fn add_edge(
        &mut self,
        from_port: PortId,
        to_port: PortId,
        is_control: bool,
    ) -> Result<ConnectionId, GraphError> {
        let conversion = self.validate_edge(from_port, to_port, is_control)?;
        let from_node = self.port_owner(from_port).ok_or(GraphError::PortNotFound(from_port))?;
        let to_node = self.port_owner(to_port).ok_or(GraphError::PortNotFound(to_port))?;

        let connection = Connection::new(from_node, from_port, to_node, to_port, is_control, conversion);
        let id = connection.id;
        self.connections.insert(id, connection);
        self.edge_revision += 1;
        self.events.emit(GraphEvent::EdgeAdded(id));
        Ok(id)
    }

    /// Re-add a connection that was validated before.
    ///
    /// Only checks that the id is free and that both endpoints exist;
    /// `index` restores its position in the connection order.
    pub fn restore_connection(
        &mut self,
        connection: Connection,
        index: Option<usize>,
    ) -> Result<(), GraphError> {
        if self.connections.contains_key(&connection.id) {
            return Err(GraphError::DuplicateId(ElementId::Edge(connection.id)));
        }
        for (node, port) in [
            (connection.from_node, connection.from_port),
            (connection.to_node, connection.to_port),
        ] {
            if self.port_owners.get(&port) != Some(&node) {
                return Err(GraphError::PortNotFound(port));
            }
        }

        let id = connection.id;
        match index {
            Some(index) => {
                let at = index.min(self.connections.len());
                self.connections.shift_insert(at, id, connection);
            }
            None => {
                self.connections.insert(id, connection);
            }
        }
        self.edge_revision += 1;
        self.events.emit(GraphEvent::EdgeAdded(id));
        Ok(())
    }

    /// Remove a connection, returning it with its position
    pub fn remove_edge(
        &mut self,
        connection_id: ConnectionId,
    ) -> Result<(usize, Connection), GraphError> {
        let (index, _, connection) = self
            .connections
            .shift_remove_full(&connection_id)
            .ok_or(GraphError::NotFound(ElementId::Edge(connection_id)))?;
        self.edge_revision += 1;
        self.events.emit(GraphEvent::EdgeRemoved(connection_id));
        Ok((index, connection))
    }

    /// Get a connection by ID
    pub fn connection(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    /// Get all connections
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Get connections from a specific port
    pub fn connections_from(&self, port_id: PortId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.from_port == port_id)
    }

    /// Get connections to a specific port
    pub fn connections_to(&self, port_id: PortId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.to_port == port_id)
    }

    /// Get connections involving a node
    pub fn connections_for_node(&self, node_id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.involves_node(node_id))
    }

    /// Get the number of connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Counter that changes whenever a connection is added or removed
    pub fn edge_revision(&self) -> u64 {
        self.edge_revision
    }

    // ── Annotations ──

    /// Add an annotation
    pub fn add_annotation(&mut self, annotation: Annotation) -> Result<AnnotationId, GraphError> {
        self.restore_annotation(annotation, None)
    }

    /// Add an annotation at a given position in the annotation order
    pub fn restore_annotation(
        &mut self,
        annotation: Annotation,
        index: Option<usize>,
    ) -> Result<AnnotationId, GraphError> {
        let id = annotation.id;
        if self.annotations.contains_key(&id) {
            return Err(GraphError::DuplicateId(ElementId::Annotation(id)));
        }
        match index {
            Some(index) => {
                let at = index.min(self.annotations.len());
                self.annotations.shift_insert(at, id, annotation);
            }
            None => {
                self.annotations.insert(id, annotation);
            }
        }
        self.events.emit(GraphEvent::AnnotationAdded(id));
        Ok(id)
    }

    /// Remove an annotation, returning it with its position
    pub fn remove_annotation(
        &mut self,
        annotation_id: AnnotationId,
    ) -> Result<(usize, Annotation), GraphError> {
        let (index, _, annotation) = self
            .annotations
            .shift_remove_full(&annotation_id)
            .ok_or(GraphError::NotFound(ElementId::Annotation(annotation_id)))?;
        self.events.emit(GraphEvent::AnnotationRemoved(annotation_id));
        Ok((index, annotation))
    }

    /// Get an annotation by ID
    pub fn annotation(&self, annotation_id: AnnotationId) -> Option<&Annotation> {
        self.annotations.get(&annotation_id)
    }

    /// Get all annotations
    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values()
    }

    // ── Layout and naming ──

    /// Current position of an element
    pub fn position_of(&self, element: ElementId) -> Result<[f32; 2], GraphError> {
        match element {
            ElementId::Node(id) => self.node(id).map(|n| n.position),
            ElementId::Annotation(id) => self.annotation(id).map(|a| a.position),
            ElementId::Edge(_) => return Err(GraphError::Unsupported { element, action: "position" }),
        }
        .ok_or(GraphError::NotFound(element))
    }

    /// Current size of an element
    pub fn size_of(&self, element: ElementId) -> Result<[f32; 2], GraphError> {
        match element {
            ElementId::Node(id) => self.node(id).map(|n| n.size),
            ElementId::Annotation(id) => self.annotation(id).map(|a| a.size),
            ElementId::Edge(_) => return Err(GraphError::Unsupported { element, action: "size" }),
        }
        .ok_or(GraphError::NotFound(element))
    }

    /// Current name of an element
    pub fn name_of(&self, element: ElementId) -> Result<String, GraphError> {
        match element {
            ElementId::Node(id) => self.node(id).map(|n| n.name.clone()),
            ElementId::Annotation(id) => self.annotation(id).map(|a| a.name.clone()),
            ElementId::Edge(_) => return Err(GraphError::Unsupported { element, action: "name" }),
        }
        .ok_or(GraphError::NotFound(element))
    }

    /// Move an element. Returns `false` and stays silent if it is already there.
    pub fn move_element(&mut self, element: ElementId, position: [f32; 2]) -> Result<bool, GraphError> {
        let slot = match element {
            ElementId::Node(id) => self.nodes.get_mut(&id).map(|n| &mut n.position),
            ElementId::Annotation(id) => self.annotations.get_mut(&id).map(|a| &mut a.position),
            ElementId::Edge(_) => return Err(GraphError::Unsupported { element, action: "move" }),
        }
        .ok_or(GraphError::NotFound(element))?;

        if *slot == position {
            return Ok(false);
        }
        let old = std::mem::replace(slot, position);
        self.events.emit(GraphEvent::PositionChanged { element, old, new: position });
        Ok(true)
    }

    /// Resize an element. Returns `false` and stays silent if the size is unchanged.
    pub fn resize_element(&mut self, element: ElementId, size: [f32; 2]) -> Result<bool, GraphError> {
        let slot = match element {
            ElementId::Node(id) => self.nodes.get_mut(&id).map(|n| &mut n.size),
            ElementId::Annotation(id) => self.annotations.get_mut(&id).map(|a| &mut a.size),
            ElementId::Edge(_) => return Err(GraphError::Unsupported { element, action: "resize" }),
        }
        .ok_or(GraphError::NotFound(element))?;

        if *slot == size {
            return Ok(false);
        }
        let old = std::mem::replace(slot, size);
        self.events.emit(GraphEvent::SizeChanged { element, old, new: size });
        Ok(true)
    }

    /// Rename an element. Returns `false` and stays silent if the name is unchanged.
    pub fn rename_element(&mut self, element: ElementId, name: &str) -> Result<bool, GraphError> {
        let slot = match element {
            ElementId::Node(id) => self.nodes.get_mut(&id).map(|n| &mut n.name),
            ElementId::Annotation(id) => self.annotations.get_mut(&id).map(|a| &mut a.name),
            ElementId::Edge(_) => return Err(GraphError::Unsupported { element, action: "rename" }),
        }
        .ok_or(GraphError::NotFound(element))?;

        if slot == name {
            return Ok(false);
        }
        let old = std::mem::replace(slot, name.to_string());
        self.events.emit(GraphEvent::Renamed {
            element,
            old,
            new: name.to_string(),
        });
        Ok(true)
    }

    // ── Settings ──

    /// Read a node setting
    pub fn setting(&self, node_id: NodeId, property: &str) -> Result<Option<SettingValue>, GraphError> {
        let node = self
            .node(node_id)
            .ok_or(GraphError::NotFound(ElementId::Node(node_id)))?;
        Ok(node.settings.get(property))
    }

    /// Write a node setting. Returns `false` and stays silent if unchanged.
    pub fn set_setting(
        &mut self,
        node_id: NodeId,
        property: &str,
        value: SettingValue,
    ) -> Result<bool, GraphError> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(GraphError::NotFound(ElementId::Node(node_id)))?;

        let old = node.settings.get(property);
        if old.as_ref() == Some(&value) {
            return Ok(false);
        }
        node.settings.set(property, value.clone())?;

        self.events.emit(GraphEvent::SettingChanged {
            node: node_id,
            property: property.to_string(),
            old,
            new: value,
        });
        Ok(true)
    }

    // ── Ordering ──

    /// Get nodes in dependency order, following data connections only.
    ///
    /// Fails on the first data connection that closes a cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, CycleError> {
        let mut incoming: HashMap<NodeId, Vec<&Connection>> = HashMap::new();
        for connection in self.connections.values().filter(|c| c.is_dependency()) {
            incoming.entry(connection.to_node).or_default().push(connection);
        }

        let mut visited = HashSet::with_capacity(self.nodes.len());
        let mut on_path = HashSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        // Node and the next incoming connection to follow
        let mut stack: Vec<(NodeId, usize)> = Vec::new();

        for root in self.nodes.keys() {
            if visited.contains(root) {
                continue;
            }
            on_path.insert(*root);
            stack.push((*root, 0));

            while let Some(top) = stack.last_mut() {
                let (node_id, next) = *top;
                top.1 += 1;

                let dependencies = incoming.get(&node_id).map_or(&[][..], Vec::as_slice);
                match dependencies.get(next) {
                    Some(connection) => {
                        let from = connection.from_node;
                        if on_path.contains(&from) {
                            return Err(CycleError {
                                edge: connection.id,
                                from,
                                to: connection.to_node,
                            });
                        }
                        if !visited.contains(&from) {
                            on_path.insert(from);
                            stack.push((from, 0));
                        }
                    }
                    None => {
                        stack.pop();
                        on_path.remove(&node_id);
                        visited.insert(node_id);
                        order.push(node_id);
                    }
                }
            }
        }

        Ok(order)
    }
}

/// Errors from structural graph edits
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Element id already in use
    #[error("Duplicate id: {0}")]
    DuplicateId(ElementId),

    /// Port id already in use
    #[error("Duplicate port id: {0:?}")]
    DuplicatePort(PortId),

    /// Element not found
    #[error("Not found: {0}")]
    NotFound(ElementId),

    /// Port not found
    #[error("Port not found: {0:?}")]
    PortNotFound(PortId),

    /// No node type registered under this id
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Incompatible port types
    #[error("Type mismatch: cannot connect {from} to {to}")]
    TypeMismatch {
        /// Source port type
        from: PortType,
        /// Target port type
        to: PortType,
    },

    /// Input port already has a data connection
    #[error("Port already has a data connection: {0:?}")]
    PortOccupied(PortId),

    /// Data connection from a node to itself
    #[error("Self-loop not allowed on node {0}")]
    SelfLoop(NodeId),

    /// Port used in the wrong direction
    #[error("Port has the wrong direction for this connection: {0:?}")]
    InvalidDirection(PortId),

    /// Control flag of the connection and its ports disagree
    #[error("Control flag mismatch between {from_port:?} and {to_port:?}")]
    ControlMismatch {
        /// Source port
        from_port: PortId,
        /// Target port
        to_port: PortId,
    },

    /// The two ports are already connected
    #[error("Ports already connected: {from_port:?} -> {to_port:?}")]
    AlreadyConnected {
        /// Source port
        from_port: PortId,
        /// Target port
        to_port: PortId,
    },

    /// The element kind has no such attribute
    #[error("Cannot {action} {element}")]
    Unsupported {
        /// Element addressed
        element: ElementId,
        /// Attempted action
        action: &'static str,
    },

    /// The settings object refused the change
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Error when the data connections of a graph contain a cycle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Graph contains a cycle through connection {edge:?} ({from} -> {to})")]
pub struct CycleError {
    /// First back edge found
    pub edge: ConnectionId,
    /// Source node of the back edge
    pub from: NodeId,
    /// Target node of the back edge
    pub to: NodeId,
}
