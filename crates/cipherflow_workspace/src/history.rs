// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undo/redo history of executed graph operations.

use crate::operations::{GraphOperation, OperationError};
use cipherflow_graph::Graph;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Maximum undo history depth
pub const MAX_HISTORY: usize = 100;

/// History errors
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Nothing to undo
    #[error("Nothing to undo")]
    NothingToUndo,

    /// Nothing to redo
    #[error("Nothing to redo")]
    NothingToRedo,

    /// The operation could not be replayed; the history is unchanged
    #[error(transparent)]
    Operation(#[from] OperationError),
}

/// Result type for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;

/// History statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Total operations in undo stack
    pub undo_count: usize,
    /// Total operations in redo stack
    pub redo_count: usize,
    /// Maximum history depth
    pub max_depth: usize,
}

/// A recorded operation with its position in the edit sequence
#[derive(Debug)]
struct Entry {
    revision: u64,
    operation: Box<dyn GraphOperation>,
}

/// Undo/redo history manager
#[derive(Debug)]
pub struct History {
    /// Undo stack
    undo_stack: VecDeque<Entry>,
    /// Redo stack
    redo_stack: VecDeque<Entry>,
    /// Next revision number
    next_revision: u64,
    /// Maximum history depth
    max_depth: usize,
    /// Revision at the top of the undo stack when last saved
    saved_revision: u64,
    /// Revision of the newest entry dropped by the depth limit
    floor_revision: u64,
}

impl History {
    /// Create a new history manager
    pub fn new() -> Self {
        Self::with_max_depth(MAX_HISTORY)
    }

    /// Create with custom maximum depth
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            next_revision: 1,
            max_depth,
            saved_revision: 0,
            floor_revision: 0,
        }
    }

    /// Record an operation that was just executed
    pub fn did_operation(&mut self, operation: Box<dyn GraphOperation>) {
        // Clear redo stack
        self.redo_stack.clear();

        let revision = self.next_revision;
        self.next_revision += 1;
        self.undo_stack.push_back(Entry { revision, operation });

        // Enforce history limit
        while self.undo_stack.len() > self.max_depth {
            if let Some(dropped) = self.undo_stack.pop_front() {
                self.floor_revision = dropped.revision;
            }
        }
    }

    /// Undo the last operation, returning its description
    pub fn undo(&mut self, graph: &mut Graph) -> Result<String> {
        let mut entry = self
            .undo_stack
            .pop_back()
            .ok_or(HistoryError::NothingToUndo)?;

        if let Err(error) = entry.operation.undo(graph) {
            self.undo_stack.push_back(entry);
            return Err(error.into());
        }

        let description = entry.operation.description().to_string();
        tracing::debug!(operation = %description, "Undo");
        self.redo_stack.push_back(entry);
        Ok(description)
    }

    /// Redo the last undone operation, returning its description
    pub fn redo(&mut self, graph: &mut Graph) -> Result<String> {
        let mut entry = self
            .redo_stack
            .pop_back()
            .ok_or(HistoryError::NothingToRedo)?;

        if let Err(error) = entry.operation.execute(graph, true) {
            self.redo_stack.push_back(entry);
            return Err(error.into());
        }

        let description = entry.operation.description().to_string();
        tracing::debug!(operation = %description, "Redo");
        self.undo_stack.push_back(entry);
        Ok(description)
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Get undo stack depth
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Get redo stack depth
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.saved_revision = 0;
        self.floor_revision = 0;
    }

    /// Get history statistics
    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            undo_count: self.undo_stack.len(),
            redo_count: self.redo_stack.len(),
            max_depth: self.max_depth,
        }
    }

    /// Get description of next undo operation
    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.back().map(|e| e.operation.description())
    }

    /// Get description of next redo operation
    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.back().map(|e| e.operation.description())
    }

    /// Remember the current position as saved
    pub fn mark_saved(&mut self) {
        self.saved_revision = self.current_revision();
    }

    /// Whether the graph differs from the last saved position
    pub fn has_changes(&self) -> bool {
        self.current_revision() != self.saved_revision
    }

    fn current_revision(&self) -> u64 {
        self.undo_stack
            .back()
            .map_or(self.floor_revision, |e| e.revision)
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{MoveElement, NewNode, OpOutcome};
    use cipherflow_graph::{
        Configurable, ExecutionContext, NodeCategory, NodeError, NodeInputs, NodeOutputs,
        NodeRegistry, NodeSpec, NodeType,
    };
    use std::sync::Arc;

    fn noop(
        _: &NodeInputs,
        _: &dyn Configurable,
        _: &ExecutionContext,
    ) -> std::result::Result<NodeOutputs, NodeError> {
        Ok(NodeOutputs::new())
    }

    fn graph() -> Graph {
        let mut registry = NodeRegistry::new();
        registry.register(NodeType::new("hash", "Hash", NodeCategory::Hash), noop);
        Graph::new("history", Arc::new(registry))
    }

    fn apply(history: &mut History, graph: &mut Graph, mut op: Box<dyn GraphOperation>) -> OpOutcome {
        let outcome = op.execute(graph, true).unwrap();
        history.did_operation(op);
        outcome
    }

    #[test]
    fn test_undo_redo() {
        let mut graph = graph();
        let mut history = History::new();
        assert!(!history.can_undo());

        apply(&mut history, &mut graph, Box::new(NewNode::new(NodeSpec::new("hash"))));
        assert_eq!(graph.node_count(), 1);
        assert_eq!(history.undo_description(), Some("Add hash"));

        history.undo(&mut graph).unwrap();
        assert_eq!(graph.node_count(), 0);
        assert!(history.can_redo());

        history.redo(&mut graph).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert!(matches!(history.redo(&mut graph), Err(HistoryError::NothingToRedo)));
    }

    #[test]
    fn test_new_operation_clears_redo() {
        let mut graph = graph();
        let mut history = History::new();
        apply(&mut history, &mut graph, Box::new(NewNode::new(NodeSpec::new("hash"))));
        history.undo(&mut graph).unwrap();

        apply(&mut history, &mut graph, Box::new(NewNode::new(NodeSpec::new("hash"))));
        assert!(!history.can_redo());
    }

    #[test]
    fn test_max_depth() {
        let mut graph = graph();
        let id = graph.add_node(NodeSpec::new("hash")).unwrap();
        let mut history = History::with_max_depth(3);

        for i in 0..5 {
            let x = i as f32 * 10.0 + 10.0;
            apply(&mut history, &mut graph, Box::new(MoveElement::new(id.into(), [x, 0.0])));
        }

        assert_eq!(
            history.stats(),
            HistoryStats {
                undo_count: 3,
                redo_count: 0,
                max_depth: 3
            }
        );
    }

    #[test]
    fn test_saved_marker() {
        let mut graph = graph();
        let mut history = History::new();
        assert!(!history.has_changes());

        apply(&mut history, &mut graph, Box::new(NewNode::new(NodeSpec::new("hash"))));
        assert!(history.has_changes());
        history.mark_saved();
        assert!(!history.has_changes());

        history.undo(&mut graph).unwrap();
        assert!(history.has_changes());
        history.redo(&mut graph).unwrap();
        assert!(!history.has_changes());
    }

    #[test]
    fn test_changes_tracked_without_history() {
        let mut graph = graph();
        let mut history = History::with_max_depth(0);
        assert!(!history.has_changes());

        apply(&mut history, &mut graph, Box::new(NewNode::new(NodeSpec::new("hash"))));
        assert!(!history.can_undo());
        assert!(history.has_changes());

        history.mark_saved();
        assert!(!history.has_changes());
        let id = graph.node_ids().next().unwrap();
        apply(&mut history, &mut graph, Box::new(MoveElement::new(id.into(), [3.0, 3.0])));
        assert!(history.has_changes());
    }

    #[test]
    fn test_undo_past_dropped_entries_is_a_change() {
        let mut graph = graph();
        let mut history = History::with_max_depth(1);
        apply(&mut history, &mut graph, Box::new(NewNode::new(NodeSpec::new("hash"))));
        let id = graph.node_ids().next().unwrap();
        apply(&mut history, &mut graph, Box::new(MoveElement::new(id.into(), [3.0, 3.0])));

        history.undo(&mut graph).unwrap();

        assert!(!history.can_undo());
        assert!(history.has_changes());
    }
}
