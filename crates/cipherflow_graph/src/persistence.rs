// SPDX-License-Identifier: MIT OR Apache-2.0
//! Saving and loading graphs as RON documents.
//!
//! A document stores every element by value. Node computations are not
//! stored; loading resolves node types against a [`NodeRegistry`].

use crate::annotation::Annotation;
use crate::connection::{Connection, ConnectionId};
use crate::graph::{Graph, GraphError};
use crate::node::NodeId;
use crate::port::{PortDirection, PortId, PortValue};
use crate::registry::NodeRegistry;
use crate::settings::{SettingsRestoreError, SettingsSnapshot};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Current document format version
pub const DOCUMENT_VERSION: u32 = 1;

/// Serialized form of a whole graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Format version
    pub version: u32,
    /// Graph name
    pub name: String,
    /// Nodes in graph order
    pub nodes: Vec<NodeRecord>,
    /// Connections in graph order
    pub connections: Vec<Connection>,
    /// Annotations in graph order
    pub annotations: Vec<Annotation>,
}

/// Serialized form of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node ID
    pub id: NodeId,
    /// Registered type ID
    pub node_type: String,
    /// Display name
    pub name: String,
    /// Position in the workspace
    pub position: [f32; 2],
    /// Width and height
    pub size: [f32; 2],
    /// Port identities and values
    pub ports: Vec<PortRecord>,
    /// Persisted settings
    pub settings: SettingsSnapshot,
}

/// Serialized form of a port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRecord {
    /// Port ID, kept across save and load
    pub id: PortId,
    /// Port name in the type's schema
    pub name: String,
    /// Port direction
    pub direction: PortDirection,
    /// Current value
    pub value: Option<PortValue>,
}

/// Something that could not be loaded and was skipped
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadWarning {
    /// The node type no longer declares this port
    #[error("Node {node} has no {direction:?} port named {port}")]
    UnmatchedPort {
        /// Node
        node: NodeId,
        /// Port name
        port: String,
        /// Port direction
        direction: PortDirection,
    },

    /// A setting could not be restored
    #[error("Node {node}: {error}")]
    Setting {
        /// Node
        node: NodeId,
        /// Failure
        error: SettingsRestoreError,
    },

    /// A connection referred to missing ports
    #[error("Dropped connection {connection:?}: {error}")]
    DroppedConnection {
        /// Connection
        connection: ConnectionId,
        /// Failure
        error: GraphError,
    },
}

/// Errors while saving or loading a document
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Failed to read or write the file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize
    #[error("Serialization failed: {0}")]
    Serialize(#[from] ron::Error),

    /// Failed to parse
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Document written by a newer version
    #[error("Document version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the document
        found: u32,
        /// Newest readable version
        supported: u32,
    },

    /// Document could not be turned into a graph
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl GraphDocument {
    /// Serialize to pretty RON
    pub fn to_ron(&self) -> Result<String, PersistenceError> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Parse from RON
    pub fn from_ron(s: &str) -> Result<Self, PersistenceError> {
        let document: Self = ron::from_str(s)?;
        if document.version > DOCUMENT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: document.version,
                supported: DOCUMENT_VERSION,
            });
        }
        Ok(document)
    }

    /// Write to a file
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    /// Read from a file
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
    }
}

impl Graph {
    /// Capture the graph by value
    pub fn to_document(&self) -> GraphDocument {
        let nodes = self
            .nodes()
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
                        value: port.value.clone(),
                    })
                    .collect(),
                settings: SettingsSnapshot::capture(node.settings.as_ref()),
            })
            .collect();

        GraphDocument {
            version: DOCUMENT_VERSION,
            name: self.name.clone(),
            nodes,
            connections: self.connections().cloned().collect(),
            annotations: self.annotations().cloned().collect(),
        }
    }

    /// Rebuild a graph from a document.
    ///
    /// Unknown node types fail the load. Ports, settings and connections
    /// that no longer fit are skipped and reported as warnings.
    pub fn from_document(
        document: GraphDocument,
        registry: Arc<NodeRegistry>,
    ) -> Result<(Graph, Vec<LoadWarning>), PersistenceError> {
        if document.version > DOCUMENT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: document.version,
                supported: DOCUMENT_VERSION,
            });
        }

        let mut graph = Graph::new(document.name, Arc::clone(&registry));
        let mut warnings = Vec::new();

        for record in document.nodes {
            let mut node = registry
                .create_node(&record.node_type, record.id)
                .ok_or_else(|| GraphError::UnknownNodeType(record.node_type.clone()))?;
            node.name = record.name;
            node.position = record.position;
            node.size = record.size;

            for port_record in record.ports {
                let ports = match port_record.direction {
                    PortDirection::Input => &mut node.inputs,
                    PortDirection::Output => &mut node.outputs,
                };
                match ports.iter_mut().find(|p| p.name == port_record.name) {
                    Some(port) => {
                        port.id = port_record.id;
                        port.value = port_record.value;
                    }
                    None => warnings.push(LoadWarning::UnmatchedPort {
                        node: record.id,
                        port: port_record.name,
                        direction: port_record.direction,
                    }),
                }
            }

            for error in record.settings.restore(node.settings.as_mut()) {
                warnings.push(LoadWarning::Setting {
                    node: record.id,
                    error,
                });
            }

            graph.insert_node(node)?;
        }

        for connection in document.connections {
            let id = connection.id;
            if let Err(error) = graph.restore_connection(connection, None) {
                tracing::warn!(connection = ?id, %error, "Dropping connection while loading");
                warnings.push(LoadWarning::DroppedConnection {
                    connection: id,
                    error,
                });
            }
        }

        for annotation in document.annotations {
            graph.add_annotation(annotation)?;
        }

        tracing::debug!(
            nodes = graph.node_count(),
            connections = graph.connection_count(),
            warnings = warnings.len(),
            "Loaded graph document"
        );
        Ok((graph, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{ExecutionContext, NodeError, NodeInputs, NodeOutputs};
    use crate::node::{NodeCategory, NodeSpec, NodeType};
    use crate::port::{PortSpec, PortType};
    use crate::settings::{Configurable, PropertyBag, PropertySpec, SettingKind, SettingValue};

    fn noop(
        _: &NodeInputs,
        _: &dyn Configurable,
        _: &ExecutionContext,
    ) -> Result<NodeOutputs, NodeError> {
        Ok(NodeOutputs::new())
    }

    fn registry() -> Arc<NodeRegistry> {
        let mut registry = NodeRegistry::new();
        registry.register_with_settings(
            NodeType::new("caesar", "Caesar", NodeCategory::Cipher)
                .with_port(PortSpec::input("text", PortType::Text))
                .with_port(PortSpec::output("out", PortType::Text)),
            noop,
            || {
                Box::new(
                    PropertyBag::new()
                        .with(PropertySpec::new("shift", SettingKind::Int), SettingValue::Int(3))
                        .with(
                            PropertySpec::new("preview", SettingKind::Bool).transient(),
                            SettingValue::Bool(false),
                        ),
                )
            },
        );
        Arc::new(registry)
    }

    fn sample() -> Graph {
        let mut graph = Graph::new("sample", registry());
        let a = graph.add_node(NodeSpec::new("caesar").with_name("First")).unwrap();
        let b = graph
            .add_node(NodeSpec::new("caesar").with_position(200.0, 0.0))
            .unwrap();
        graph.set_setting(b, "shift", SettingValue::Int(13)).unwrap();
        let out = graph.node(a).unwrap().outputs[0].id;
        let input = graph.node(b).unwrap().inputs[0].id;
        graph.add_edge(out, input, false).unwrap();
        graph
            .add_annotation(Annotation::text("ROT13 after Caesar").with_position(0.0, 150.0))
            .unwrap();
        graph
    }

    #[test]
    fn test_document_survives_ron() {
        let graph = sample();
        let document = graph.to_document();

        let text = document.to_ron().unwrap();
        let parsed = GraphDocument::from_ron(&text).unwrap();
        assert_eq!(parsed, document);

        let (loaded, warnings) = Graph::from_document(parsed, registry()).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(loaded.to_document(), document);
    }

    #[test]
    fn test_transient_settings_are_not_saved() {
        let document = sample().to_document();
        let settings = &document.nodes[0].settings;
        assert!(settings.entry("shift").is_some());
        assert!(settings.entry("preview").is_none());
    }

    #[test]
    fn test_bad_setting_and_dangling_connection_are_skipped() {
        let mut document = sample().to_document();
        document.nodes[1]
            .settings
            .entry_mut("shift")
            .unwrap()
            .value = "thirteen".into();
        let dropped = document.connections[0].id;
        document.connections[0].to_port = PortId::new();

        let (graph, warnings) = Graph::from_document(document, registry()).unwrap();

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.connection_count(), 0);
        assert_eq!(warnings.len(), 2);
        assert!(matches!(&warnings[0], LoadWarning::Setting { error, .. } if error.property == "shift"));
        assert!(matches!(
            &warnings[1],
            LoadWarning::DroppedConnection { connection, .. } if *connection == dropped
        ));
    }

    #[test]
    fn test_unknown_type_and_newer_version_fail() {
        let mut document = sample().to_document();
        document.nodes[0].node_type = "enigma".into();
        assert!(matches!(
            Graph::from_document(document.clone(), registry()),
            Err(PersistenceError::Graph(GraphError::UnknownNodeType(_)))
        ));

        document.version = DOCUMENT_VERSION + 1;
        let text = document.to_ron().unwrap();
        assert!(matches!(
            GraphDocument::from_ron(&text),
            Err(PersistenceError::UnsupportedVersion { .. })
        ));
    }
}
