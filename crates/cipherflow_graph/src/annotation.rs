// SPDX-License-Identifier: MIT OR Apache-2.0
//! Free-standing workspace annotations and the closed set of element kinds.

use crate::connection::ConnectionId;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnnotationId(pub Uuid);

impl AnnotationId {
    /// Create a new random annotation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnnotationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Annotation content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnnotationKind {
    /// A text note
    Text(String),
    /// An image, referenced by URI
    Image(String),
}

/// A text or image element placed on the workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Unique annotation ID
    pub id: AnnotationId,
    /// Content
    pub kind: AnnotationKind,
    /// Display name
    pub name: String,
    /// Position in the workspace
    pub position: [f32; 2],
    /// Width and height in the workspace
    pub size: [f32; 2],
}

impl Annotation {
    /// Create a text note
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(AnnotationKind::Text(content.into()))
    }

    /// Create an image reference
    pub fn image(uri: impl Into<String>) -> Self {
        Self::new(AnnotationKind::Image(uri.into()))
    }

    fn new(kind: AnnotationKind) -> Self {
        let name = match &kind {
            AnnotationKind::Text(_) => "Text",
            AnnotationKind::Image(_) => "Image",
        };
        Self {
            id: AnnotationId::new(),
            kind,
            name: name.to_string(),
            position: [0.0, 0.0],
            size: [200.0, 100.0],
        }
    }

    /// Set the position
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = [x, y];
        self
    }
}

/// Any element of a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementId {
    /// A node
    Node(NodeId),
    /// A connection
    Edge(ConnectionId),
    /// An annotation
    Annotation(AnnotationId),
}

impl ElementId {
    /// Stable numeric key for grouping operations on the same element
    pub fn key(&self) -> u64 {
        let uuid = match self {
            Self::Node(id) => id.0,
            Self::Edge(id) => id.0,
            Self::Annotation(id) => id.0,
        };
        let (high, low) = uuid.as_u64_pair();
        high ^ low
    }
}

impl From<NodeId> for ElementId {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<ConnectionId> for ElementId {
    fn from(id: ConnectionId) -> Self {
        Self::Edge(id)
    }
}

impl From<AnnotationId> for ElementId {
    fn from(id: AnnotationId) -> Self {
        Self::Annotation(id)
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node {}", id.0),
            Self::Edge(id) => write!(f, "edge {}", id.0),
            Self::Annotation(id) => write!(f, "annotation {}", id.0),
        }
    }
}
