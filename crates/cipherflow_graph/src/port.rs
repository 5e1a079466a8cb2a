// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inputs/outputs.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub Uuid);

impl PortId {
    /// Create a new random port ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

/// Data type that can flow through ports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    /// Boolean value
    Bool,
    /// 64-bit integer
    Int,
    /// 128-bit integer (key material, moduli)
    BigInt,
    /// Floating point value
    Float,
    /// UTF-8 text
    Text,
    /// Raw bytes
    Bytes,
    /// Any type (for generic nodes)
    Any,
    /// Host-defined type, only compatible with itself
    Custom(String),
}

/// How well two port types fit together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionLevel {
    /// Same type, or one side accepts anything
    Exact,
    /// Values are converted on the way through the edge
    Implicit,
    /// Cannot be connected
    Incompatible,
}

impl PortType {
    /// Classify a connection from a port of this type to `target`
    pub fn conversion_to(&self, target: &PortType) -> ConversionLevel {
        if self == target || matches!(self, Self::Any) || matches!(target, Self::Any) {
            return ConversionLevel::Exact;
        }

        match (self, target) {
            (Self::Int, Self::BigInt | Self::Float)
            | (Self::Int | Self::BigInt | Self::Float | Self::Bool, Self::Text)
            | (Self::Text, Self::Bytes)
            | (Self::Bytes, Self::Text) => ConversionLevel::Implicit,
            _ => ConversionLevel::Incompatible,
        }
    }

    /// Check if this type can connect to another type
    pub fn can_connect_to(&self, other: &PortType) -> bool {
        self.conversion_to(other) != ConversionLevel::Incompatible
    }
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::BigInt => f.write_str("bigint"),
            Self::Float => f.write_str("float"),
            Self::Text => f.write_str("text"),
            Self::Bytes => f.write_str("bytes"),
            Self::Any => f.write_str("any"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Value that can be stored in a port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Wide integer
    BigInt(i128),
    /// Float
    Float(f64),
    /// Text
    Text(String),
    /// Bytes
    Bytes(Vec<u8>),
}

impl PortValue {
    /// Get the port type for this value
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Bool(_) => PortType::Bool,
            Self::Int(_) => PortType::Int,
            Self::BigInt(_) => PortType::BigInt,
            Self::Float(_) => PortType::Float,
            Self::Text(_) => PortType::Text,
            Self::Bytes(_) => PortType::Bytes,
        }
    }

    /// Convert this value for a port of type `target`.
    ///
    /// Returns `None` when the types are incompatible or the bytes are not
    /// valid UTF-8 for a text target.
    pub fn convert_to(&self, target: &PortType) -> Option<PortValue> {
        let source = self.port_type();
        match source.conversion_to(target) {
            ConversionLevel::Exact => Some(self.clone()),
            ConversionLevel::Incompatible => None,
            ConversionLevel::Implicit => match (self, target) {
                (Self::Int(v), PortType::BigInt) => Some(Self::BigInt(i128::from(*v))),
                #[allow(clippy::cast_precision_loss)]
                (Self::Int(v), PortType::Float) => Some(Self::Float(*v as f64)),
                (Self::Int(v), PortType::Text) => Some(Self::Text(v.to_string())),
                (Self::BigInt(v), PortType::Text) => Some(Self::Text(v.to_string())),
                (Self::Float(v), PortType::Text) => Some(Self::Text(v.to_string())),
                (Self::Bool(v), PortType::Text) => Some(Self::Text(v.to_string())),
                (Self::Text(v), PortType::Bytes) => Some(Self::Bytes(v.as_bytes().to_vec())),
                (Self::Bytes(v), PortType::Text) => String::from_utf8(v.clone()).ok().map(Self::Text),
                _ => None,
            },
        }
    }

    /// Integer payload, if this is an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text payload, if this is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Byte payload, if this is bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

/// Port declaration in a node type's schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port name, unique per direction on a node type
    pub name: String,
    /// Data type
    pub port_type: PortType,
    /// Port direction
    pub direction: PortDirection,
    /// Control ports carry live interface state rather than plain data
    pub is_control: bool,
    /// Value an input starts each run with
    pub default_value: Option<PortValue>,
}

impl PortSpec {
    /// Declare an input port
    pub fn input(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            direction: PortDirection::Input,
            is_control: false,
            default_value: None,
        }
    }

    /// Declare an output port
    pub fn output(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            direction: PortDirection::Output,
            is_control: false,
            default_value: None,
        }
    }

    /// Mark as a control port
    pub fn control(mut self) -> Self {
        self.is_control = true;
        self
    }

    /// Set the default value
    pub fn with_default(mut self, value: PortValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Instantiate a port for `node`
    pub fn instantiate(&self, node: NodeId) -> Port {
        Port {
            id: PortId::new(),
            node,
            name: self.name.clone(),
            direction: self.direction,
            port_type: self.port_type.clone(),
            is_control: self.is_control,
            value: None,
            default_value: self.default_value.clone(),
        }
    }
}

/// A port on a node
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    /// Unique port ID
    pub id: PortId,
    /// Owning node
    pub node: NodeId,
    /// Port name
    pub name: String,
    /// Port direction
    pub direction: PortDirection,
    /// Data type
    pub port_type: PortType,
    /// Whether this is a control port
    pub is_control: bool,
    /// Current value, empty until first write
    pub value: Option<PortValue>,
    /// Default value (for inputs)
    pub default_value: Option<PortValue>,
}

impl Port {
    /// Classify a connection from this port into `other`.
    ///
    /// Opposite directions are required; the types decide the level.
    pub fn conversion_to(&self, other: &Port) -> ConversionLevel {
        if self.direction == other.direction {
            return ConversionLevel::Incompatible;
        }
        self.port_type.conversion_to(&other.port_type)
    }

    /// Current value, falling back to the default
    pub fn value_or_default(&self) -> Option<&PortValue> {
        self.value.as_ref().or(self.default_value.as_ref())
    }
}
