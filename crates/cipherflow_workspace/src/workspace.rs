// SPDX-License-Identifier: MIT OR Apache-2.0
//! A graph together with its edit history and scheduler.
//!
//! Every edit goes through [`Workspace::modify`]: the operation is executed,
//! recorded for undo when it changed something, and the settings history is
//! refreshed. Edits coming from other threads are queued on an [`EditQueue`]
//! and applied between scheduler steps or on [`Workspace::apply_pending`].

use crate::clone::{select_connections, ClipboardError, ClipboardPayload, CloneResult, CopyOperation};
use crate::config::WorkspaceConfig;
use crate::history::{History, HistoryError};
use crate::operations::{
    ChangeSetting, DeleteAnnotation, DeleteEdge, DeleteNode, GraphOperation, MoveElement, Multi,
    NewAnnotation, NewEdge, NewNode, OpOutcome, OperationError, RenameElement, ResizeElement,
};
use crate::settings_history::SettingsHistory;
use cipherflow_graph::{
    Annotation, AnnotationId, ConnectionId, ElementId, ExecutionError, Graph, GraphDocument,
    GraphEvent, LoadWarning, NodeId, NodeRegistry, NodeSpec, PersistenceError, PortId, RunReport,
    Scheduler, SettingValue, StopHandle,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{mpsc, Arc};
use thiserror::Error;

/// Workspace errors
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// An edit failed; the graph is unchanged
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Undo or redo failed
    #[error(transparent)]
    History(#[from] HistoryError),

    /// A run failed
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Clipboard data could not be used
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),

    /// Saving or loading failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// An operation did not produce what its wrapper expects
    #[error("Operation '{operation}' returned an unexpected outcome")]
    UnexpectedOutcome {
        /// Operation description
        operation: String,
    },
}

/// Result type for workspace calls
pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// Edits waiting to be applied to a workspace.
///
/// Cloneable and usable from any thread.
#[derive(Debug, Clone, Default)]
pub struct EditQueue {
    pending: Arc<Mutex<VecDeque<Box<dyn GraphOperation>>>>,
}

impl EditQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an edit
    pub fn push(&self, operation: Box<dyn GraphOperation>) {
        self.pending.lock().push_back(operation);
    }

    /// Number of queued edits
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn drain(&self) -> Vec<Box<dyn GraphOperation>> {
        self.pending.lock().drain(..).collect()
    }
}

/// An editable, runnable graph
#[derive(Debug)]
pub struct Workspace {
    graph: Graph,
    history: History,
    settings_history: SettingsHistory,
    scheduler: Scheduler,
    edits: EditQueue,
    dispatch: Option<tracing::Dispatch>,
    config: WorkspaceConfig,
}

impl Workspace {
    /// Create an empty workspace
    pub fn new(name: impl Into<String>, registry: Arc<NodeRegistry>, config: WorkspaceConfig) -> Self {
        Self::from_graph(Graph::new(name, registry), config)
    }

    /// Wrap an existing graph
    pub fn from_graph(graph: Graph, config: WorkspaceConfig) -> Self {
        let mut settings_history = SettingsHistory::new();
        settings_history.store_current(&graph);
        Self {
            graph,
            history: History::with_max_depth(config.history_depth),
            settings_history,
            scheduler: Scheduler::new(config.scheduler.clone()),
            edits: EditQueue::new(),
            dispatch: None,
            config,
        }
    }

    /// Send this workspace's logs to `dispatch` instead of the default subscriber
    pub fn with_dispatch(mut self, dispatch: tracing::Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// The graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Configuration
    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Undo history
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Settings as of the last applied edit
    pub fn settings_history(&self) -> &SettingsHistory {
        &self.settings_history
    }

    /// Subscribe to graph events
    pub fn subscribe(&self) -> mpsc::Receiver<GraphEvent> {
        self.graph.subscribe()
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        match self.dispatch.clone() {
            Some(dispatch) => tracing::dispatcher::with_default(&dispatch, || f(self)),
            None => f(self),
        }
    }

    // ── Editing ──

    /// Apply an edit and record it for undo if it changed the graph
    pub fn modify(&mut self, operation: Box<dyn GraphOperation>) -> Result<OpOutcome> {
        self.scoped(|ws| {
            apply(&mut ws.graph, &mut ws.history, &mut ws.settings_history, operation)
                .map_err(Into::into)
        })
    }

    /// Add a node
    pub fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId> {
        let operation = NewNode::new(spec);
        let description = operation.description().to_string();
        match self.modify(Box::new(operation))? {
            OpOutcome::Created(ElementId::Node(id)) => Ok(id),
            _ => Err(WorkspaceError::UnexpectedOutcome {
                operation: description,
            }),
        }
    }

    /// Delete a node and its connections
    pub fn delete_node(&mut self, node: NodeId) -> Result<()> {
        self.modify(Box::new(DeleteNode::new(node)))?;
        Ok(())
    }

    /// Connect two ports
    pub fn add_edge(&mut self, from: PortId, to: PortId, is_control: bool) -> Result<ConnectionId> {
        let operation = NewEdge::new(from, to, is_control);
        let description = operation.description().to_string();
        match self.modify(Box::new(operation))? {
            OpOutcome::Created(ElementId::Edge(id)) => Ok(id),
            _ => Err(WorkspaceError::UnexpectedOutcome {
                operation: description,
            }),
        }
    }

    /// Delete a connection
    pub fn delete_edge(&mut self, edge: ConnectionId) -> Result<()> {
        self.modify(Box::new(DeleteEdge::new(edge)))?;
        Ok(())
    }

    /// Add an annotation
    pub fn add_annotation(&mut self, annotation: Annotation) -> Result<AnnotationId> {
        let operation = NewAnnotation::new(annotation);
        let description = operation.description().to_string();
        match self.modify(Box::new(operation))? {
            OpOutcome::Created(ElementId::Annotation(id)) => Ok(id),
            _ => Err(WorkspaceError::UnexpectedOutcome {
                operation: description,
            }),
        }
    }

    /// Delete an annotation
    pub fn delete_annotation(&mut self, annotation: AnnotationId) -> Result<()> {
        self.modify(Box::new(DeleteAnnotation::new(annotation)))?;
        Ok(())
    }

    /// Move an element; returns whether it moved
    pub fn move_element(&mut self, element: ElementId, position: [f32; 2]) -> Result<bool> {
        Ok(self.modify(Box::new(MoveElement::new(element, position)))?.is_change())
    }

    /// Resize an element; returns whether the size changed
    pub fn resize_element(&mut self, element: ElementId, size: [f32; 2]) -> Result<bool> {
        Ok(self.modify(Box::new(ResizeElement::new(element, size)))?.is_change())
    }

    /// Rename an element; returns whether the name changed
    pub fn rename_element(&mut self, element: ElementId, name: impl Into<String>) -> Result<bool> {
        Ok(self.modify(Box::new(RenameElement::new(element, name)))?.is_change())
    }

    /// Change a node setting.
    ///
    /// The value to restore on undo is the one recorded after the last
    /// applied edit, so a change already made on the settings object is
    /// still undoable.
    pub fn change_setting(
        &mut self,
        node: NodeId,
        property: impl Into<String>,
        value: SettingValue,
    ) -> Result<bool> {
        let operation = ChangeSetting::from_history(&self.settings_history, node, property, value);
        Ok(self.modify(Box::new(operation))?.is_change())
    }

    /// Apply several edits as one undo step
    pub fn batch(
        &mut self,
        description: impl Into<String>,
        operations: Vec<Box<dyn GraphOperation>>,
    ) -> Result<OpOutcome> {
        self.modify(Box::new(Multi::new(description, operations)))
    }

    // ── Copy and paste ──

    /// Duplicate `nodes` in place, offset by the configured paste offset
    pub fn clone_selection(&mut self, nodes: &[NodeId]) -> Result<CloneResult> {
        let selection = select_connections(&self.graph, nodes);
        let payload = ClipboardPayload::capture(&self.graph, &selection);
        self.paste_payload(payload)
    }

    /// Encode `nodes` for the clipboard
    pub fn copy(&self, nodes: &[NodeId]) -> Result<Vec<u8>> {
        let selection = select_connections(&self.graph, nodes);
        Ok(ClipboardPayload::capture(&self.graph, &selection).to_bytes()?)
    }

    /// Insert clipboard data produced by [`Workspace::copy`]
    pub fn paste(&mut self, bytes: &[u8]) -> Result<CloneResult> {
        let payload = ClipboardPayload::from_bytes(bytes)?;
        self.paste_payload(payload)
    }

    fn paste_payload(&mut self, payload: ClipboardPayload) -> Result<CloneResult> {
        if payload.is_empty() {
            return Ok(CloneResult::default());
        }
        let operation = CopyOperation::new(payload, self.config.paste_offset);
        let description = operation.description().to_string();
        match self.modify(Box::new(operation))? {
            OpOutcome::Copied(result) => Ok(result),
            _ => Err(WorkspaceError::UnexpectedOutcome {
                operation: description,
            }),
        }
    }

    // ── History ──

    /// Undo the last edit, returning its description
    pub fn undo(&mut self) -> Result<String> {
        self.scoped(|ws| {
            let description = ws.history.undo(&mut ws.graph)?;
            ws.settings_history.store_current(&ws.graph);
            Ok(description)
        })
    }

    /// Redo the last undone edit, returning its description
    pub fn redo(&mut self) -> Result<String> {
        self.scoped(|ws| {
            let description = ws.history.redo(&mut ws.graph)?;
            ws.settings_history.store_current(&ws.graph);
            Ok(description)
        })
    }

    /// Whether there is an edit to undo
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    /// Whether there is an edit to redo
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ── Running ──

    /// Handle for queueing edits from other threads
    pub fn edit_queue(&self) -> EditQueue {
        self.edits.clone()
    }

    /// Apply queued edits now; returns how many were applied
    pub fn apply_pending(&mut self) -> usize {
        self.scoped(|ws| {
            apply_queued(
                &ws.edits,
                &mut ws.graph,
                &mut ws.history,
                &mut ws.settings_history,
            )
        })
    }

    /// Handle that stops the current run from any thread
    pub fn stop_handle(&self) -> StopHandle {
        self.scheduler.stop_handle()
    }

    /// Run the graph; queued edits are applied between steps
    pub fn run(&mut self) -> Result<RunReport> {
        self.scoped(|ws| {
            let Self {
                graph,
                history,
                settings_history,
                scheduler,
                edits,
                ..
            } = ws;

            let mut barrier = |graph: &mut Graph| {
                apply_queued(edits, graph, history, settings_history);
            };
            Ok(scheduler.run_with(graph, &mut barrier)?)
        })
    }

    // ── Persistence ──

    /// Snapshot of the graph
    pub fn to_document(&self) -> GraphDocument {
        self.graph.to_document()
    }

    /// Save the graph as RON and mark the history as saved
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.scoped(|ws| {
            ws.graph.to_document().save(path)?;
            ws.history.mark_saved();
            tracing::info!(path = %path.display(), "Workspace saved");
            Ok(())
        })
    }

    /// Load a workspace saved with [`Workspace::save`]
    pub fn load(
        path: &Path,
        registry: Arc<NodeRegistry>,
        config: WorkspaceConfig,
    ) -> Result<(Self, Vec<LoadWarning>)> {
        let document = GraphDocument::load(path)?;
        let (graph, warnings) = Graph::from_document(document, registry)?;
        for warning in &warnings {
            tracing::warn!(%warning, "Load warning");
        }
        tracing::info!(path = %path.display(), nodes = graph.node_count(), "Workspace loaded");
        Ok((Self::from_graph(graph, config), warnings))
    }

    /// Whether there are edits since the last save
    pub fn has_changes(&self) -> bool {
        self.history.has_changes()
    }

    /// Mark the current state as saved
    pub fn mark_saved(&mut self) {
        self.history.mark_saved();
    }
}

fn apply(
    graph: &mut Graph,
    history: &mut History,
    settings_history: &mut SettingsHistory,
    mut operation: Box<dyn GraphOperation>,
) -> std::result::Result<OpOutcome, OperationError> {
    let result = operation.execute(graph, true);
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(error) => {
            tracing::warn!(operation = operation.description(), %error, "Edit rejected");
            return Err(error);
        }
    };

    if outcome.is_change() {
        tracing::debug!(operation = operation.description(), "Edit applied");
        history.did_operation(operation);
    }
    settings_history.store_current(graph);
    Ok(outcome)
}

fn apply_queued(
    edits: &EditQueue,
    graph: &mut Graph,
    history: &mut History,
    settings_history: &mut SettingsHistory,
) -> usize {
    let mut applied = 0;
    for operation in edits.drain() {
        // Rejected edits are logged by `apply`
        if apply(graph, history, settings_history, operation).is_ok() {
            applied += 1;
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherflow_graph::{
        Configurable, ExecutionContext, NodeCategory, NodeError, NodeInputs, NodeOutputs, NodeType,
        PortSpec, PortType, PortValue, PropertyBag, PropertySpec, SettingKind,
    };

    fn source(
        _: &NodeInputs,
        settings: &dyn Configurable,
        _: &ExecutionContext,
    ) -> std::result::Result<NodeOutputs, NodeError> {
        let value = match settings.get("value") {
            Some(SettingValue::Int(v)) => v,
            _ => 0,
        };
        Ok(NodeOutputs::new().with("out", PortValue::Int(value)))
    }

    fn double(
        inputs: &NodeInputs,
        _: &dyn Configurable,
        _: &ExecutionContext,
    ) -> std::result::Result<NodeOutputs, NodeError> {
        Ok(NodeOutputs::new().with("out", PortValue::Int(inputs.int("in")? * 2)))
    }

    fn registry() -> Arc<NodeRegistry> {
        let mut registry = NodeRegistry::new();
        registry.register_with_settings(
            NodeType::new("const", "Constant", NodeCategory::Input)
                .with_port(PortSpec::output("out", PortType::Int)),
            source,
            || {
                Box::new(PropertyBag::new().with(
                    PropertySpec::new("value", SettingKind::Int),
                    SettingValue::Int(1),
                ))
            },
        );
        registry.register(
            NodeType::new("double", "Double", NodeCategory::Logic)
                .with_port(PortSpec::input("in", PortType::Int))
                .with_port(PortSpec::output("out", PortType::Int)),
            double,
        );
        Arc::new(registry)
    }

    fn workspace() -> Workspace {
        Workspace::new("test", registry(), WorkspaceConfig::default())
    }

    fn port(ws: &Workspace, node: NodeId, name: &str) -> PortId {
        let node = ws.graph().node(node).unwrap();
        node.input(name).or_else(|| node.output(name)).unwrap().id
    }

    #[test]
    fn test_unchanged_edits_are_not_recorded() {
        let mut ws = workspace();
        let a = ws.add_node(NodeSpec::new("const").with_position(10.0, 10.0)).unwrap();
        assert_eq!(ws.history().undo_depth(), 1);

        assert!(!ws.move_element(a.into(), [10.0, 10.0]).unwrap());
        assert_eq!(ws.history().undo_depth(), 1);

        assert!(ws.move_element(a.into(), [20.0, 10.0]).unwrap());
        assert_eq!(ws.history().undo_depth(), 2);
    }

    #[test]
    fn test_failed_edit_is_not_recorded() {
        let mut ws = workspace();
        let a = ws.add_node(NodeSpec::new("const")).unwrap();
        let out = port(&ws, a, "out");

        let result = ws.add_edge(out, out, false);
        assert!(matches!(result, Err(WorkspaceError::Operation(_))));
        assert_eq!(ws.history().undo_depth(), 1);
    }

    #[test]
    fn test_change_setting_undo_uses_recorded_value() {
        let mut ws = workspace();
        let a = ws.add_node(NodeSpec::new("const")).unwrap();

        assert!(ws.change_setting(a, "value", SettingValue::Int(7)).unwrap());
        assert_eq!(ws.graph().setting(a, "value").unwrap(), Some(SettingValue::Int(7)));

        ws.undo().unwrap();
        assert_eq!(ws.graph().setting(a, "value").unwrap(), Some(SettingValue::Int(1)));
        ws.redo().unwrap();
        assert_eq!(ws.graph().setting(a, "value").unwrap(), Some(SettingValue::Int(7)));
    }

    #[test]
    fn test_run_applies_queued_edits() {
        let mut ws = workspace();
        let a = ws.add_node(NodeSpec::new("const")).unwrap();
        let b = ws.add_node(NodeSpec::new("double")).unwrap();
        ws.add_edge(port(&ws, a, "out"), port(&ws, b, "in"), false).unwrap();

        ws.edit_queue()
            .push(Box::new(ChangeSetting::new(a, "value", SettingValue::Int(21))));
        let report = ws.run().unwrap();

        assert_eq!(report.executed, vec![a, b]);
        let result = ws.graph().node(b).unwrap().output("out").unwrap().value.clone();
        assert_eq!(result, Some(PortValue::Int(42)));
        assert!(ws.edit_queue().is_empty());
        assert_eq!(ws.history().undo_depth(), 4);
    }

    #[test]
    fn test_apply_pending_skips_rejected_edits() {
        let mut ws = workspace();
        let a = ws.add_node(NodeSpec::new("const")).unwrap();
        let queue = ws.edit_queue();
        queue.push(Box::new(DeleteNode::new(NodeId::new())));
        queue.push(Box::new(RenameElement::new(a.into(), "seed")));

        assert_eq!(ws.apply_pending(), 1);
        assert_eq!(ws.graph().node(a).unwrap().name, "seed");
    }

    #[test]
    fn test_copy_paste_between_workspaces() {
        let mut source = workspace();
        let a = source.add_node(NodeSpec::new("const")).unwrap();
        source.change_setting(a, "value", SettingValue::Int(9)).unwrap();
        let bytes = source.copy(&[a]).unwrap();

        let mut target = workspace();
        let result = target.paste(&bytes).unwrap();
        assert_eq!(result.nodes.len(), 1);
        let copy = result.nodes[0];
        assert_ne!(copy, a);
        assert_eq!(target.graph().setting(copy, "value").unwrap(), Some(SettingValue::Int(9)));

        target.undo().unwrap();
        assert_eq!(target.graph().node_count(), 0);
    }

    #[test]
    fn test_paste_empty_selection() {
        let mut ws = workspace();
        let bytes = ws.copy(&[NodeId::new()]).unwrap();
        let result = ws.paste(&bytes).unwrap();
        assert!(result.nodes.is_empty());
        assert!(!ws.can_undo());
    }

    #[test]
    fn test_save_load_and_saved_marker() {
        let mut ws = workspace();
        let a = ws.add_node(NodeSpec::new("const").with_name("seed")).unwrap();
        ws.change_setting(a, "value", SettingValue::Int(3)).unwrap();
        assert!(ws.has_changes());

        let path = std::env::temp_dir().join(format!("cipherflow-ws-{}.ron", std::process::id()));
        ws.save(&path).unwrap();
        assert!(!ws.has_changes());

        let (loaded, warnings) = Workspace::load(&path, registry(), WorkspaceConfig::default()).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(warnings.is_empty());
        assert_eq!(loaded.to_document(), ws.to_document());
        assert!(!loaded.can_undo());
        assert_eq!(loaded.settings_history().get(a, "value"), Some(&SettingValue::Int(3)));
    }

    #[test]
    fn test_dispatch_receives_workspace_logs() {
        let (dispatch, logs) = crate::logging::build_dispatch(&crate::config::LogConfig {
            filter: "cipherflow_workspace=debug".to_string(),
            echo_to_stdout: false,
        })
        .unwrap();
        let mut ws = workspace().with_dispatch(dispatch);
        ws.add_node(NodeSpec::new("const")).unwrap();

        assert!(logs.try_iter().any(|record| record.message.starts_with("Edit applied")));
    }
}
