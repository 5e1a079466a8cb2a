// SPDX-License-Identifier: MIT OR Apache-2.0
//! Last recorded value of every node setting.
//!
//! Refreshed after each applied operation, so a setting change made directly
//! on a settings object can still be undone to the value it had before.

use cipherflow_graph::{Graph, NodeId, SettingValue};
use std::collections::HashMap;

/// Setting values as of the last applied operation
#[derive(Debug, Clone, Default)]
pub struct SettingsHistory {
    values: HashMap<(NodeId, String), SettingValue>,
}

impl SettingsHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded value of `property` on `node`
    pub fn get(&self, node: NodeId, property: &str) -> Option<&SettingValue> {
        self.values.get(&(node, property.to_string()))
    }

    /// Record the current value of every setting in `graph`
    pub fn store_current(&mut self, graph: &Graph) {
        self.values.clear();
        for node in graph.nodes() {
            for spec in node.settings.properties() {
                if let Some(value) = node.settings.get(&spec.name) {
                    self.values.insert((node.id, spec.name), value);
                }
            }
        }
    }

    /// Number of recorded values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is recorded
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
