// SPDX-License-Identifier: MIT OR Apache-2.0
//! Registry of node types supplied by the host.

use crate::evaluation::NodeBehavior;
use crate::node::{Node, NodeCategory, NodeId, NodeType};
use crate::settings::{Configurable, PropertyBag};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Builds a fresh settings object for a node
pub type SettingsFactory = Arc<dyn Fn() -> Box<dyn Configurable> + Send + Sync>;

/// A node type together with its computation
#[derive(Clone)]
pub struct RegisteredType {
    /// Port schema and metadata
    pub descriptor: NodeType,
    /// Computation
    pub behavior: Arc<dyn NodeBehavior>,
    settings: SettingsFactory,
}

impl RegisteredType {
    /// Create a fresh settings object
    pub fn create_settings(&self) -> Box<dyn Configurable> {
        (self.settings)()
    }
}

impl fmt::Debug for RegisteredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredType")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Registry of available node types
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    /// Registered node types by ID
    types: IndexMap<String, RegisteredType>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type whose settings start as an empty bag
    pub fn register(&mut self, descriptor: NodeType, behavior: impl NodeBehavior + 'static) {
        self.register_with_settings(descriptor, behavior, || Box::new(PropertyBag::new()));
    }

    /// Register a node type with its own settings constructor
    pub fn register_with_settings<F>(
        &mut self,
        descriptor: NodeType,
        behavior: impl NodeBehavior + 'static,
        settings: F,
    ) where
        F: Fn() -> Box<dyn Configurable> + Send + Sync + 'static,
    {
        if self.types.contains_key(&descriptor.id) {
            tracing::debug!(node_type = %descriptor.id, "Replacing registered node type");
        }
        self.types.insert(
            descriptor.id.clone(),
            RegisteredType {
                descriptor,
                behavior: Arc::new(behavior),
                settings: Arc::new(settings),
            },
        );
    }

    /// Get a registered type by ID
    pub fn get(&self, id: &str) -> Option<&RegisteredType> {
        self.types.get(id)
    }

    /// Get a node type descriptor by ID
    pub fn descriptor(&self, id: &str) -> Option<&NodeType> {
        self.get(id).map(|t| &t.descriptor)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values().map(|t| &t.descriptor)
    }

    /// Get types by category
    pub fn types_in_category(&self, category: NodeCategory) -> impl Iterator<Item = &NodeType> {
        self.types().filter(move |t| t.category == category)
    }

    /// Create a node with fresh ports and default settings
    pub fn create_node(&self, type_id: &str, id: NodeId) -> Option<Node> {
        self.get(type_id)
            .map(|t| Node::new(id, &t.descriptor, t.create_settings()))
    }
}
