// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node settings exposed through an explicit property surface.
//!
//! Each node carries a [`Configurable`] object. The graph, the copy
//! machinery and persistence only ever talk to settings through
//! `properties` / `get` / `set`, so node types decide for themselves which
//! fields exist and which of them are persisted.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a settings property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingKind {
    /// Boolean flag
    Bool,
    /// Integer
    Int,
    /// Floating point number
    Float,
    /// Free text
    Text,
    /// One of a fixed list of options, stored as an index
    Choice(Vec<String>),
}

/// Value of a settings property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettingValue {
    /// Boolean flag
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Free text
    Text(String),
    /// Index into the option list of a choice property
    Choice(usize),
}

impl SettingValue {
    /// Render the value in its persisted string form
    pub fn to_persisted(&self) -> String {
        match self {
            Self::Bool(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Text(v) => v.clone(),
            Self::Choice(v) => v.to_string(),
        }
    }

    /// Check whether this value fits `kind`
    pub fn matches(&self, kind: &SettingKind) -> bool {
        match (self, kind) {
            (Self::Bool(_), SettingKind::Bool)
            | (Self::Int(_), SettingKind::Int)
            | (Self::Float(_), SettingKind::Float)
            | (Self::Text(_), SettingKind::Text) => true,
            (Self::Choice(index), SettingKind::Choice(options)) => *index < options.len(),
            _ => false,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_persisted())
    }
}

impl SettingKind {
    /// Parse a persisted string back into a value of this kind
    pub fn parse(&self, raw: &str) -> Result<SettingValue, SettingsError> {
        let invalid = || SettingsError::Malformed {
            raw: raw.to_string(),
            kind: self.clone(),
        };
        match self {
            Self::Bool => raw.trim().parse().map(SettingValue::Bool).map_err(|_| invalid()),
            Self::Int => raw.trim().parse().map(SettingValue::Int).map_err(|_| invalid()),
            Self::Float => raw.trim().parse().map(SettingValue::Float).map_err(|_| invalid()),
            Self::Text => Ok(SettingValue::Text(raw.to_string())),
            Self::Choice(options) => {
                let index: usize = raw.trim().parse().map_err(|_| invalid())?;
                if index < options.len() {
                    Ok(SettingValue::Choice(index))
                } else {
                    Err(invalid())
                }
            }
        }
    }
}

/// Declaration of one settings property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Property name
    pub name: String,
    /// Property kind
    pub kind: SettingKind,
    /// Whether the property is saved and copied
    pub persist: bool,
}

impl PropertySpec {
    /// Declare a persisted property
    pub fn new(name: impl Into<String>, kind: SettingKind) -> Self {
        Self {
            name: name.into(),
            kind,
            persist: true,
        }
    }

    /// Exclude the property from saving and copying
    pub fn transient(mut self) -> Self {
        self.persist = false;
        self
    }
}

/// Errors raised by a settings object
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    /// No property with this name
    #[error("Unknown setting property: {0}")]
    UnknownProperty(String),

    /// Value does not fit the property's kind
    #[error("Setting {property} expects {expected:?}, got {value:?}")]
    KindMismatch {
        /// Property name
        property: String,
        /// Declared kind
        expected: SettingKind,
        /// Offending value
        value: SettingValue,
    },

    /// Persisted string could not be parsed
    #[error("Cannot parse {raw:?} as {kind:?}")]
    Malformed {
        /// Persisted string
        raw: String,
        /// Kind it was parsed as
        kind: SettingKind,
    },

    /// The settings object refused the value
    #[error("Setting {property} rejected value: {reason}")]
    Rejected {
        /// Property name
        property: String,
        /// Reason given by the settings object
        reason: String,
    },
}

/// A property that could not be restored from a snapshot.
///
/// Restoring skips the property and carries on with the rest.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Could not restore setting {property:?}: {source}")]
pub struct SettingsRestoreError {
    /// Property name
    pub property: String,
    /// Underlying error
    #[source]
    pub source: SettingsError,
}

/// Property surface of a node's settings
pub trait Configurable: fmt::Debug + Send + Sync {
    /// List the properties this object exposes
    fn properties(&self) -> Vec<PropertySpec>;

    /// Read a property
    fn get(&self, name: &str) -> Option<SettingValue>;

    /// Write a property
    fn set(&mut self, name: &str, value: SettingValue) -> Result<(), SettingsError>;

    /// Clone into a new independent box
    fn box_clone(&self) -> Box<dyn Configurable>;
}

impl Clone for Box<dyn Configurable> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Ordered bag of typed properties.
///
/// This is the settings object handed out by the registry for node types
/// that do not bring their own [`Configurable`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    specs: Vec<PropertySpec>,
    values: IndexMap<String, SettingValue>,
}

impl PropertyBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a property with its initial value
    pub fn with(mut self, spec: PropertySpec, value: SettingValue) -> Self {
        self.declare(spec, value);
        self
    }

    /// Declare a property with its initial value
    pub fn declare(&mut self, spec: PropertySpec, value: SettingValue) {
        self.values.insert(spec.name.clone(), value);
        if let Some(existing) = self.specs.iter_mut().find(|s| s.name == spec.name) {
            *existing = spec;
        } else {
            self.specs.push(spec);
        }
    }

    fn spec(&self, name: &str) -> Option<&PropertySpec> {
        self.specs.iter().find(|s| s.name == name)
    }
}

impl Configurable for PropertyBag {
    fn properties(&self) -> Vec<PropertySpec> {
        self.specs.clone()
    }

    fn get(&self, name: &str) -> Option<SettingValue> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: SettingValue) -> Result<(), SettingsError> {
        let spec = self
            .spec(name)
            .ok_or_else(|| SettingsError::UnknownProperty(name.to_string()))?;
        if !value.matches(&spec.kind) {
            return Err(SettingsError::KindMismatch {
                property: name.to_string(),
                expected: spec.kind.clone(),
                value,
            });
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn Configurable> {
        Box::new(self.clone())
    }
}

/// One persisted property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSetting {
    /// Property name
    pub name: String,
    /// Property kind at capture time
    pub kind: SettingKind,
    /// Value in string form
    pub value: String,
}

/// By-value copy of every persisted property of a settings object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    /// Captured properties, in declaration order
    pub entries: Vec<PersistedSetting>,
}

impl SettingsSnapshot {
    /// Capture all persisted properties of `settings`
    pub fn capture(settings: &dyn Configurable) -> Self {
        let entries = settings
            .properties()
            .into_iter()
            .filter(|spec| spec.persist)
            .filter_map(|spec| {
                settings.get(&spec.name).map(|value| PersistedSetting {
                    value: value.to_persisted(),
                    name: spec.name,
                    kind: spec.kind,
                })
            })
            .collect();
        Self { entries }
    }

    /// Write the snapshot into `settings`.
    ///
    /// A property that cannot be parsed or is refused is skipped and
    /// reported; the remaining properties are still restored.
    pub fn restore(&self, settings: &mut dyn Configurable) -> Vec<SettingsRestoreError> {
        let specs = settings.properties();
        let mut failures = Vec::new();

        for entry in &self.entries {
            let result = match specs.iter().find(|s| s.name == entry.name) {
                None => Err(SettingsError::UnknownProperty(entry.name.clone())),
                Some(spec) if !spec.persist => continue,
                Some(spec) => spec
                    .kind
                    .parse(&entry.value)
                    .and_then(|value| settings.set(&entry.name, value)),
            };

            if let Err(source) = result {
                tracing::warn!(property = %entry.name, error = %source, "Skipping setting during restore");
                failures.push(SettingsRestoreError {
                    property: entry.name.clone(),
                    source,
                });
            }
        }

        failures
    }

    /// Find a captured entry by name
    pub fn entry(&self, name: &str) -> Option<&PersistedSetting> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Find a captured entry by name for editing
    pub fn entry_mut(&mut self, name: &str) -> Option<&mut PersistedSetting> {
        self.entries.iter_mut().find(|e| e.name == name)
    }
}
