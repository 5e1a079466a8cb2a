// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undoable edits of a graph.
//!
//! Every change a workspace makes goes through a [`GraphOperation`]. An
//! operation captures what it needs to restore the graph when it first
//! executes, so undo puts back the exact previous values and redo re-inserts
//! the exact same ids.

use crate::clone::CloneResult;
use crate::settings_history::SettingsHistory;
use cipherflow_graph::{
    Annotation, AnnotationId, Connection, ConnectionId, ElementId, Graph, GraphError, GraphEvent,
    NodeId, NodeSpec, PortId, RemovedNode, SettingValue,
};
use std::fmt;

/// Lifecycle of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Built but never applied
    Created,
    /// Applied, may be undone
    Executed,
    /// Reverted, may be executed again
    Undone,
}

/// What an executed operation did
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    /// The graph changed
    Changed,
    /// The new value equaled the old one; nothing to record
    Unchanged,
    /// A new element was created
    Created(ElementId),
    /// Nodes and connections were cloned
    Copied(CloneResult),
}

impl OpOutcome {
    /// Whether the operation belongs in the undo history
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// An edit that can be executed, undone and executed again
pub trait GraphOperation: Send + fmt::Debug {
    /// Coarse grouping key derived from the affected element
    fn identifier(&self) -> u64;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Current lifecycle state
    fn state(&self) -> OperationState;

    /// Apply the edit. With `emit_events` off the graph stays silent.
    fn execute(&mut self, graph: &mut Graph, emit_events: bool) -> Result<OpOutcome, OperationError>;

    /// Revert the last execute
    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError>;
}

/// Errors from executing or undoing an operation
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The graph refused the edit
    #[error("{operation}: {source}")]
    Graph {
        /// Operation description
        operation: String,
        /// Graph error
        #[source]
        source: GraphError,
    },

    /// Execute or undo called out of order
    #[error("Cannot {action} '{operation}' in state {state:?}")]
    InvalidState {
        /// Operation description
        operation: String,
        /// Attempted action
        action: &'static str,
        /// State at the time
        state: OperationState,
    },

    /// A step of a composite failed and the composite was rolled back
    #[error("'{operation}' rolled back, step {index} failed: {source}")]
    Batch {
        /// Composite description
        operation: String,
        /// Index of the failing step
        index: usize,
        /// Error of the failing step
        #[source]
        source: Box<OperationError>,
    },
}

pub(crate) fn ensure_executable(state: OperationState, operation: &str) -> Result<(), OperationError> {
    if state == OperationState::Executed {
        return Err(OperationError::InvalidState {
            operation: operation.to_string(),
            action: "execute",
            state,
        });
    }
    Ok(())
}

pub(crate) fn ensure_undoable(state: OperationState, operation: &str) -> Result<(), OperationError> {
    if state != OperationState::Executed {
        return Err(OperationError::InvalidState {
            operation: operation.to_string(),
            action: "undo",
            state,
        });
    }
    Ok(())
}

pub(crate) fn graph_error(operation: &str) -> impl FnOnce(GraphError) -> OperationError + '_ {
    move |source| OperationError::Graph {
        operation: operation.to_string(),
        source,
    }
}

/// Run `f` with the graph's notifications suppressed unless `emit` is set
pub(crate) fn with_events<T>(graph: &mut Graph, emit: bool, f: impl FnOnce(&mut Graph) -> T) -> T {
    let events = graph.events().clone();
    if !emit {
        events.mute();
    }
    let result = f(graph);
    if !emit {
        events.unmute();
    }
    result
}

// ── Nodes ──

/// Add a node
#[derive(Debug)]
pub struct NewNode {
    spec: NodeSpec,
    node: Option<NodeId>,
    removed: Option<RemovedNode>,
    description: String,
    state: OperationState,
}

impl NewNode {
    /// Create the operation
    pub fn new(spec: NodeSpec) -> Self {
        Self {
            description: format!("Add {}", spec.type_id),
            spec,
            node: None,
            removed: None,
            state: OperationState::Created,
        }
    }

    /// ID of the node once executed
    pub fn node_id(&self) -> Option<NodeId> {
        self.node
    }
}

impl GraphOperation for NewNode {
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

        let id = with_events(graph, emit_events, |graph| match &self.removed {
            Some(removed) => graph.restore_node(removed.clone()).map(|()| removed.node.id),
            None => graph.add_node(self.spec.clone()),
        })
        .map_err(graph_error(&self.description))?;

        self.removed = None;
        self.node = Some(id);
        self.state = OperationState::Executed;
        Ok(OpOutcome::Created(ElementId::Node(id)))
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        let Some(id) = self.node else {
            return Err(OperationError::InvalidState {
                operation: self.description.clone(),
                action: "undo",
                state: self.state,
            });
        };

        let removed = graph.remove_node(id).map_err(graph_error(&self.description))?;
        self.removed = Some(removed);
        self.state = OperationState::Undone;
        Ok(())
    }
}

/// Delete a node with its connections
#[derive(Debug)]
pub struct DeleteNode {
    node: NodeId,
    removed: Option<RemovedNode>,
    description: String,
    state: OperationState,
}

impl DeleteNode {
    /// Create the operation
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            removed: None,
            description: format!("Delete node {node}"),
            state: OperationState::Created,
        }
    }
}

impl GraphOperation for DeleteNode {
    fn identifier(&self) -> u64 {
        ElementId::Node(self.node).key()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn execute(&mut self, graph: &mut Graph, emit_events: bool) -> Result<OpOutcome, OperationError> {
        ensure_executable(self.state, &self.description)?;
        let node = self.node;
        let removed = with_events(graph, emit_events, |graph| graph.remove_node(node))
            .map_err(graph_error(&self.description))?;
        self.removed = Some(removed);
        self.state = OperationState::Executed;
        Ok(OpOutcome::Changed)
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        if let Some(removed) = &self.removed {
            graph
                .restore_node(removed.clone())
                .map_err(graph_error(&self.description))?;
        }
        self.removed = None;
        self.state = OperationState::Undone;
        Ok(())
    }
}

// ── Connections ──

/// Connect two ports
#[derive(Debug)]
pub struct NewEdge {
    from_port: PortId,
    to_port: PortId,
    is_control: bool,
    edge: Option<ConnectionId>,
    removed: Option<(usize, Connection)>,
    description: String,
    state: OperationState,
}

impl NewEdge {
    /// Create the operation
    pub fn new(from_port: PortId, to_port: PortId, is_control: bool) -> Self {
        let kind = if is_control { "control" } else { "data" };
        Self {
            from_port,
            to_port,
            is_control,
            edge: None,
            removed: None,
            description: format!("Connect {kind} {:?} -> {:?}", from_port.0, to_port.0),
            state: OperationState::Created,
        }
    }
}

impl GraphOperation for NewEdge {
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

        let id = with_events(graph, emit_events, |graph| match &self.removed {
            Some((index, connection)) => graph
                .restore_connection(connection.clone(), Some(*index))
                .map(|()| connection.id),
            None => graph.add_edge(self.from_port, self.to_port, self.is_control),
        })
        .map_err(graph_error(&self.description))?;

        self.removed = None;
        self.edge = Some(id);
        self.state = OperationState::Executed;
        Ok(OpOutcome::Created(ElementId::Edge(id)))
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        let Some(id) = self.edge else {
            return Err(OperationError::InvalidState {
                operation: self.description.clone(),
                action: "undo",
                state: self.state,
            });
        };

        self.removed = Some(graph.remove_edge(id).map_err(graph_error(&self.description))?);
        self.state = OperationState::Undone;
        Ok(())
    }
}

/// Delete a connection
#[derive(Debug)]
pub struct DeleteEdge {
    edge: ConnectionId,
    removed: Option<(usize, Connection)>,
    description: String,
    state: OperationState,
}

impl DeleteEdge {
    /// Create the operation
    pub fn new(edge: ConnectionId) -> Self {
        Self {
            edge,
            removed: None,
            description: format!("Delete connection {}", edge.0),
            state: OperationState::Created,
        }
    }
}

impl GraphOperation for DeleteEdge {
    fn identifier(&self) -> u64 {
        ElementId::Edge(self.edge).key()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn execute(&mut self, graph: &mut Graph, emit_events: bool) -> Result<OpOutcome, OperationError> {
        ensure_executable(self.state, &self.description)?;
        let edge = self.edge;
        let removed = with_events(graph, emit_events, |graph| graph.remove_edge(edge))
            .map_err(graph_error(&self.description))?;
        self.removed = Some(removed);
        self.state = OperationState::Executed;
        Ok(OpOutcome::Changed)
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        if let Some((index, connection)) = &self.removed {
            graph
                .restore_connection(connection.clone(), Some(*index))
                .map_err(graph_error(&self.description))?;
        }
        self.removed = None;
        self.state = OperationState::Undone;
        Ok(())
    }
}

// ── Annotations ──

/// Place a text or image annotation
#[derive(Debug)]
pub struct NewAnnotation {
    annotation: Annotation,
    index: Option<usize>,
    description: String,
    state: OperationState,
}

impl NewAnnotation {
    /// Create the operation
    pub fn new(annotation: Annotation) -> Self {
        Self {
            description: format!("Add {}", annotation.name),
            annotation,
            index: None,
            state: OperationState::Created,
        }
    }
}

impl GraphOperation for NewAnnotation {
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
        let id = with_events(graph, emit_events, |graph| {
            graph.restore_annotation(self.annotation.clone(), self.index)
        })
        .map_err(graph_error(&self.description))?;
        self.state = OperationState::Executed;
        Ok(OpOutcome::Created(ElementId::Annotation(id)))
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        let (index, annotation) = graph
            .remove_annotation(self.annotation.id)
            .map_err(graph_error(&self.description))?;
        // Keep layout edits made after creation for the redo
        self.annotation = annotation;
        self.index = Some(index);
        self.state = OperationState::Undone;
        Ok(())
    }
}

/// Delete an annotation
#[derive(Debug)]
pub struct DeleteAnnotation {
    annotation: AnnotationId,
    removed: Option<(usize, Annotation)>,
    description: String,
    state: OperationState,
}

impl DeleteAnnotation {
    /// Create the operation
    pub fn new(annotation: AnnotationId) -> Self {
        Self {
            annotation,
            removed: None,
            description: format!("Delete annotation {}", annotation.0),
            state: OperationState::Created,
        }
    }
}

impl GraphOperation for DeleteAnnotation {
    fn identifier(&self) -> u64 {
        ElementId::Annotation(self.annotation).key()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn execute(&mut self, graph: &mut Graph, emit_events: bool) -> Result<OpOutcome, OperationError> {
        ensure_executable(self.state, &self.description)?;
        let id = self.annotation;
        let removed = with_events(graph, emit_events, |graph| graph.remove_annotation(id))
            .map_err(graph_error(&self.description))?;
        self.removed = Some(removed);
        self.state = OperationState::Executed;
        Ok(OpOutcome::Changed)
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        if let Some((index, annotation)) = &self.removed {
            graph
                .restore_annotation(annotation.clone(), Some(*index))
                .map_err(graph_error(&self.description))?;
        }
        self.removed = None;
        self.state = OperationState::Undone;
        Ok(())
    }
}

// ── Layout and naming ──

/// Move a node or annotation
#[derive(Debug)]
pub struct MoveElement {
    element: ElementId,
    old: Option<[f32; 2]>,
    new: [f32; 2],
    description: String,
    state: OperationState,
}

impl MoveElement {
    /// Move `element` to `position`; the old position is read on execute
    pub fn new(element: ElementId, position: [f32; 2]) -> Self {
        Self {
            element,
            old: None,
            new: position,
            description: format!("Move {element}"),
            state: OperationState::Created,
        }
    }

    /// Record a move whose starting point is already known, e.g. after a drag
    pub fn recorded(element: ElementId, old: [f32; 2], new: [f32; 2]) -> Self {
        Self {
            old: Some(old),
            ..Self::new(element, new)
        }
    }
}

impl GraphOperation for MoveElement {
    fn identifier(&self) -> u64 {
        self.element.key()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn execute(&mut self, graph: &mut Graph, emit_events: bool) -> Result<OpOutcome, OperationError> {
        ensure_executable(self.state, &self.description)?;
        let old = match self.old {
            Some(old) => old,
            None => graph
                .position_of(self.element)
                .map_err(graph_error(&self.description))?,
        };

        let (element, new) = (self.element, self.new);
        let changed = with_events(graph, emit_events, |graph| graph.move_element(element, new))
            .map_err(graph_error(&self.description))?;

        self.old = Some(old);
        self.state = OperationState::Executed;
        Ok(if changed || old != new {
            OpOutcome::Changed
        } else {
            OpOutcome::Unchanged
        })
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        if let Some(old) = self.old {
            graph
                .move_element(self.element, old)
                .map_err(graph_error(&self.description))?;
        }
        self.state = OperationState::Undone;
        Ok(())
    }
}

/// Resize a node or annotation
#[derive(Debug)]
pub struct ResizeElement {
    element: ElementId,
    old: Option<[f32; 2]>,
    new: [f32; 2],
    description: String,
    state: OperationState,
}

impl ResizeElement {
    /// Resize `element` to `size`; the old size is read on execute
    pub fn new(element: ElementId, size: [f32; 2]) -> Self {
        Self {
            element,
            old: None,
            new: size,
            description: format!("Resize {element}"),
            state: OperationState::Created,
        }
    }

    /// Record a resize whose starting size is already known
    pub fn recorded(element: ElementId, old: [f32; 2], new: [f32; 2]) -> Self {
        Self {
            old: Some(old),
            ..Self::new(element, new)
        }
    }
}

impl GraphOperation for ResizeElement {
    fn identifier(&self) -> u64 {
        self.element.key()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn execute(&mut self, graph: &mut Graph, emit_events: bool) -> Result<OpOutcome, OperationError> {
        ensure_executable(self.state, &self.description)?;
        let old = match self.old {
            Some(old) => old,
            None => graph
                .size_of(self.element)
                .map_err(graph_error(&self.description))?,
        };

        let (element, new) = (self.element, self.new);
        let changed = with_events(graph, emit_events, |graph| graph.resize_element(element, new))
            .map_err(graph_error(&self.description))?;

        self.old = Some(old);
        self.state = OperationState::Executed;
        Ok(if changed || old != new {
            OpOutcome::Changed
        } else {
            OpOutcome::Unchanged
        })
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        if let Some(old) = self.old {
            graph
                .resize_element(self.element, old)
                .map_err(graph_error(&self.description))?;
        }
        self.state = OperationState::Undone;
        Ok(())
    }
}

/// Rename a node or annotation
#[derive(Debug)]
pub struct RenameElement {
    element: ElementId,
    old: Option<String>,
    new: String,
    description: String,
    state: OperationState,
}

impl RenameElement {
    /// Rename `element`; the old name is read on execute
    pub fn new(element: ElementId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            element,
            old: None,
            description: format!("Rename {element} to '{name}'"),
            new: name,
            state: OperationState::Created,
        }
    }
}

impl GraphOperation for RenameElement {
    fn identifier(&self) -> u64 {
        self.element.key()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn execute(&mut self, graph: &mut Graph, emit_events: bool) -> Result<OpOutcome, OperationError> {
        ensure_executable(self.state, &self.description)?;
        let old = match self.old.take() {
            Some(old) => old,
            None => graph
                .name_of(self.element)
                .map_err(graph_error(&self.description))?,
        };

        let element = self.element;
        let new = &self.new;
        let changed = with_events(graph, emit_events, |graph| graph.rename_element(element, new));
        self.old = Some(old);
        let changed = changed.map_err(graph_error(&self.description))?;

        self.state = OperationState::Executed;
        Ok(if changed {
            OpOutcome::Changed
        } else {
            OpOutcome::Unchanged
        })
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        if let Some(old) = &self.old {
            graph
                .rename_element(self.element, old)
                .map_err(graph_error(&self.description))?;
        }
        self.state = OperationState::Undone;
        Ok(())
    }
}

// ── Settings ──

/// Change one node setting.
///
/// The value is only written when it differs from the current one, on
/// execute and on undo alike. The last writer wins.
#[derive(Debug)]
pub struct ChangeSetting {
    node: NodeId,
    property: String,
    /// Value before the change, `None` until known
    old: Option<Option<SettingValue>>,
    new: SettingValue,
    description: String,
    state: OperationState,
}

impl ChangeSetting {
    /// Change a setting; the old value is read on execute
    pub fn new(node: NodeId, property: impl Into<String>, value: SettingValue) -> Self {
        let property = property.into();
        Self {
            description: format!("Set {property} = {value}"),
            node,
            property,
            old: None,
            new: value,
            state: OperationState::Created,
        }
    }

    /// Change a setting, taking the old value from the recorded history.
    ///
    /// Use this when the settings object may already hold the new value.
    pub fn from_history(
        history: &SettingsHistory,
        node: NodeId,
        property: impl Into<String>,
        value: SettingValue,
    ) -> Self {
        let mut operation = Self::new(node, property, value);
        operation.old = Some(history.get(node, &operation.property).cloned());
        operation
    }
}

impl GraphOperation for ChangeSetting {
    fn identifier(&self) -> u64 {
        ElementId::Node(self.node).key()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn execute(&mut self, graph: &mut Graph, emit_events: bool) -> Result<OpOutcome, OperationError> {
        ensure_executable(self.state, &self.description)?;
        let old = match &self.old {
            Some(old) => old.clone(),
            None => graph
                .setting(self.node, &self.property)
                .map_err(graph_error(&self.description))?,
        };

        let (node, property, new) = (self.node, &self.property, &self.new);
        with_events(graph, emit_events, |graph| graph.set_setting(node, property, new.clone()))
            .map_err(graph_error(&self.description))?;

        let changed = old.as_ref() != Some(&self.new);
        self.old = Some(old);
        self.state = OperationState::Executed;
        Ok(if changed {
            OpOutcome::Changed
        } else {
            OpOutcome::Unchanged
        })
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        if let Some(Some(old)) = &self.old {
            graph
                .set_setting(self.node, &self.property, old.clone())
                .map_err(graph_error(&self.description))?;
        }
        self.state = OperationState::Undone;
        Ok(())
    }
}

// ── Composite ──

/// Several operations applied and reverted as one
#[derive(Debug)]
pub struct Multi {
    children: Vec<Box<dyn GraphOperation>>,
    description: String,
    state: OperationState,
}

impl Multi {
    /// Create a composite of `children`, executed in order
    pub fn new(description: impl Into<String>, children: Vec<Box<dyn GraphOperation>>) -> Self {
        Self {
            children,
            description: description.into(),
            state: OperationState::Created,
        }
    }

    /// Number of child operations
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether there are no child operations
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl GraphOperation for Multi {
    fn identifier(&self) -> u64 {
        self.children
            .iter()
            .fold(0u64, |sum, child| sum.wrapping_add(child.identifier()))
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn execute(&mut self, graph: &mut Graph, emit_events: bool) -> Result<OpOutcome, OperationError> {
        ensure_executable(self.state, &self.description)?;
        let events = graph.events().clone();

        events.mute();
        let mut changed = false;
        let mut failure = None;
        for (index, child) in self.children.iter_mut().enumerate() {
            match child.execute(graph, false) {
                Ok(outcome) => changed |= outcome.is_change(),
                Err(error) => {
                    failure = Some((index, error));
                    break;
                }
            }
        }

        if let Some((index, source)) = failure {
            for child in self.children[..index].iter_mut().rev() {
                if let Err(error) = child.undo(graph) {
                    tracing::error!(operation = %self.description, %error, "Rollback step failed");
                }
            }
            events.unmute();
            tracing::warn!(operation = %self.description, step = index, error = %source, "Composite rolled back");
            return Err(OperationError::Batch {
                operation: self.description.clone(),
                index,
                source: Box::new(source),
            });
        }
        events.unmute();

        self.state = OperationState::Executed;
        if emit_events {
            events.emit(GraphEvent::BatchApplied {
                description: self.description.clone(),
                reverted: false,
            });
        }
        Ok(if changed {
            OpOutcome::Changed
        } else {
            OpOutcome::Unchanged
        })
    }

    fn undo(&mut self, graph: &mut Graph) -> Result<(), OperationError> {
        ensure_undoable(self.state, &self.description)?;
        let events = graph.events().clone();

        events.mute();
        for index in (0..self.children.len()).rev() {
            if let Err(source) = self.children[index].undo(graph) {
                // Re-apply what was already reverted
                for child in &mut self.children[index + 1..] {
                    if let Err(error) = child.execute(graph, false) {
                        tracing::error!(operation = %self.description, %error, "Re-apply step failed");
                    }
                }
                events.unmute();
                return Err(OperationError::Batch {
                    operation: self.description.clone(),
                    index,
                    source: Box::new(source),
                });
            }
        }
        events.unmute();

        self.state = OperationState::Undone;
        events.emit(GraphEvent::BatchApplied {
            description: self.description.clone(),
            reverted: true,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherflow_graph::{
        Configurable, ExecutionContext, NodeCategory, NodeError, NodeInputs, NodeOutputs,
        NodeRegistry, NodeType, PortSpec, PortType, PropertyBag, PropertySpec, SettingKind,
    };
    use std::sync::Arc;

    fn noop(
        _: &NodeInputs,
        _: &dyn Configurable,
        _: &ExecutionContext,
    ) -> Result<NodeOutputs, NodeError> {
        Ok(NodeOutputs::new())
    }

    fn graph() -> Graph {
        let mut registry = NodeRegistry::new();
        registry.register_with_settings(
            NodeType::new("caesar", "Caesar", NodeCategory::Cipher)
                .with_port(PortSpec::input("text", PortType::Text))
                .with_port(PortSpec::output("out", PortType::Text)),
            noop,
            || {
                Box::new(PropertyBag::new().with(
                    PropertySpec::new("shift", SettingKind::Int),
                    SettingValue::Int(3),
                ))
            },
        );
        Graph::new("ops", Arc::new(registry))
    }

    fn ports(graph: &Graph, from: NodeId, to: NodeId) -> (PortId, PortId) {
        (
            graph.node(from).unwrap().output("out").unwrap().id,
            graph.node(to).unwrap().input("text").unwrap().id,
        )
    }

    #[test]
    fn test_new_node_redo_keeps_ids() {
        let mut graph = graph();
        let mut op = NewNode::new(NodeSpec::new("caesar"));

        let OpOutcome::Created(ElementId::Node(id)) = op.execute(&mut graph, true).unwrap() else {
            panic!("expected a created node");
        };
        let ports: Vec<_> = graph.node(id).unwrap().ports().map(|p| p.id).collect();

        op.undo(&mut graph).unwrap();
        assert_eq!(graph.node_count(), 0);

        op.execute(&mut graph, true).unwrap();
        let again: Vec<_> = graph.node(id).unwrap().ports().map(|p| p.id).collect();
        assert_eq!(ports, again);
    }

    #[test]
    fn test_lifecycle_is_enforced() {
        let mut graph = graph();
        let mut op = NewNode::new(NodeSpec::new("caesar"));

        assert!(matches!(
            op.undo(&mut graph),
            Err(OperationError::InvalidState { action: "undo", .. })
        ));
        op.execute(&mut graph, true).unwrap();
        assert!(matches!(
            op.execute(&mut graph, true),
            Err(OperationError::InvalidState { action: "execute", .. })
        ));
        op.undo(&mut graph).unwrap();
        assert_eq!(op.state(), OperationState::Undone);
        assert!(op.undo(&mut graph).is_err());
    }

    #[test]
    fn test_delete_node_undo_restores_edges() {
        let mut graph = graph();
        let a = graph.add_node(NodeSpec::new("caesar")).unwrap();
        let b = graph.add_node(NodeSpec::new("caesar")).unwrap();
        let (from, to) = ports(&graph, a, b);
        graph.add_edge(from, to, false).unwrap();
        let before = graph.to_document();

        let mut op = DeleteNode::new(a);
        op.execute(&mut graph, true).unwrap();
        assert_eq!(graph.connection_count(), 0);

        op.undo(&mut graph).unwrap();
        assert_eq!(graph.to_document(), before);
    }

    #[test]
    fn test_move_captures_old_position() {
        let mut graph = graph();
        let a = graph.add_node(NodeSpec::new("caesar").with_position(1.0, 2.0)).unwrap();

        let mut op = MoveElement::new(a.into(), [10.0, 20.0]);
        assert_eq!(op.execute(&mut graph, true).unwrap(), OpOutcome::Changed);
        assert_eq!(graph.node(a).unwrap().position, [10.0, 20.0]);

        op.undo(&mut graph).unwrap();
        assert_eq!(graph.node(a).unwrap().position, [1.0, 2.0]);

        let mut same = MoveElement::new(a.into(), [1.0, 2.0]);
        assert_eq!(same.execute(&mut graph, true).unwrap(), OpOutcome::Unchanged);
    }

    #[test]
    fn test_rename_undo() {
        let mut graph = graph();
        let a = graph.add_node(NodeSpec::new("caesar")).unwrap();

        let mut op = RenameElement::new(a.into(), "ROT13");
        op.execute(&mut graph, true).unwrap();
        assert_eq!(graph.node(a).unwrap().name, "ROT13");
        op.undo(&mut graph).unwrap();
        assert_eq!(graph.node(a).unwrap().name, "Caesar");
    }

    #[test]
    fn test_change_setting_guards_current_value() {
        let mut graph = graph();
        let a = graph.add_node(NodeSpec::new("caesar")).unwrap();
        let mut history = SettingsHistory::new();
        history.store_current(&graph);

        // The value was already written, as a property editor would
        graph.set_setting(a, "shift", SettingValue::Int(13)).unwrap();
        let mut op = ChangeSetting::from_history(&history, a, "shift", SettingValue::Int(13));

        assert_eq!(op.execute(&mut graph, true).unwrap(), OpOutcome::Changed);
        op.undo(&mut graph).unwrap();
        assert_eq!(graph.setting(a, "shift").unwrap(), Some(SettingValue::Int(3)));

        op.execute(&mut graph, true).unwrap();
        assert_eq!(graph.setting(a, "shift").unwrap(), Some(SettingValue::Int(13)));
    }

    #[test]
    fn test_multi_rolls_back_on_failure() {
        let mut graph = graph();
        let a = graph.add_node(NodeSpec::new("caesar")).unwrap();
        let before = graph.to_document();
        let rx = graph.subscribe();

        let mut op = Multi::new(
            "Broken batch",
            vec![
                Box::new(MoveElement::new(a.into(), [50.0, 50.0])),
                Box::new(NewNode::new(NodeSpec::new("caesar"))),
                Box::new(DeleteNode::new(NodeId::new())),
            ],
        );

        let error = op.execute(&mut graph, true).unwrap_err();
        assert!(matches!(error, OperationError::Batch { index: 2, .. }));
        assert_eq!(graph.to_document(), before);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_multi_undo_is_one_step() {
        let mut graph = graph();
        let a = graph.add_node(NodeSpec::new("caesar")).unwrap();
        let b = graph.add_node(NodeSpec::new("caesar")).unwrap();
        let (from, to) = ports(&graph, a, b);
        let before = graph.to_document();
        let rx = graph.subscribe();

        let mut op = Multi::new(
            "Wire up",
            vec![
                Box::new(NewEdge::new(from, to, false)),
                Box::new(MoveElement::new(b.into(), [300.0, 0.0])),
                Box::new(ChangeSetting::new(b, "shift", SettingValue::Int(5))),
            ],
        );
        op.execute(&mut graph, true).unwrap();
        assert_eq!(graph.connection_count(), 1);
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![GraphEvent::BatchApplied {
                description: "Wire up".into(),
                reverted: false
            }]
        );

        op.undo(&mut graph).unwrap();
        assert_eq!(graph.to_document(), before);
    }

    #[test]
    fn test_multi_identifier_sums_children() {
        let a = NodeId::new();
        let b = NodeId::new();
        let op = Multi::new(
            "Delete two",
            vec![Box::new(DeleteNode::new(a)), Box::new(DeleteNode::new(b))],
        );
        assert_eq!(
            op.identifier(),
            ElementId::Node(a).key().wrapping_add(ElementId::Node(b).key())
        );
    }
}
