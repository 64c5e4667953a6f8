//! Resolved attribute model
//!
//! An [`AttributeRecord`] is either static (value fixed at provisioning
//! time) or dynamic (value arrives later as telemetry, optionally computed
//! by an expression). An [`AttributeList`] keeps both kinds in two disjoint
//! ordered sequences, the shape the IoT Agent expects on the wire.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Static or dynamic nature of an attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeKind {
    /// Fixed value
    Static(Value),
    /// Measured value, with an optional computing expression
    Dynamic(Option<String>),
}

/// One attribute declaration as written in a descriptor file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
}

/// A fully resolved attribute. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRecord {
    name: String,
    attr_type: String,
    kind: AttributeKind,
    object_id: Option<String>,
    entity_name: Option<String>,
    entity_type: Option<String>,
}

impl AttributeRecord {
    pub fn new(name: impl Into<String>, attr_type: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            attr_type: attr_type.into(),
            kind,
            object_id: None,
            entity_name: None,
            entity_type: None,
        }
    }

    /// Shorthand for a dynamic attribute without expression
    pub fn dynamic(name: impl Into<String>, attr_type: impl Into<String>) -> Self {
        Self::new(name, attr_type, AttributeKind::Dynamic(None))
    }

    /// Shorthand for a static attribute
    pub fn fixed(name: impl Into<String>, attr_type: impl Into<String>, value: Value) -> Self {
        Self::new(name, attr_type, AttributeKind::Static(value))
    }

    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr_type(&self) -> &str {
        &self.attr_type
    }

    pub fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    pub fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, AttributeKind::Static(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.kind {
            AttributeKind::Static(value) => Some(value),
            AttributeKind::Dynamic(_) => None,
        }
    }

    pub fn expression(&self) -> Option<&str> {
        match &self.kind {
            AttributeKind::Static(_) => None,
            AttributeKind::Dynamic(expression) => expression.as_deref(),
        }
    }

    /// Clone this record with a fixed value. The copy is always static.
    pub fn with_value(&self, value: Value) -> Self {
        Self {
            kind: AttributeKind::Static(value),
            ..self.clone()
        }
    }
}

impl From<AttributeDecl> for AttributeRecord {
    fn from(decl: AttributeDecl) -> Self {
        // A declared value wins over an expression: the attribute is static
        let kind = match decl.value {
            Some(value) => AttributeKind::Static(value),
            None => AttributeKind::Dynamic(decl.expression),
        };
        Self {
            name: decl.name,
            attr_type: decl.attr_type,
            kind,
            object_id: decl.object_id,
            entity_name: decl.entity_name,
            entity_type: decl.entity_type,
        }
    }
}

impl Serialize for AttributeRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("name", &self.name)?;
        map.serialize_entry("type", &self.attr_type)?;
        match &self.kind {
            AttributeKind::Static(value) => map.serialize_entry("value", value)?,
            AttributeKind::Dynamic(Some(expression)) => {
                map.serialize_entry("expression", expression)?
            }
            AttributeKind::Dynamic(None) => {}
        }
        if let Some(object_id) = &self.object_id {
            map.serialize_entry("object_id", object_id)?;
        }
        if let Some(entity_name) = &self.entity_name {
            map.serialize_entry("entity_name", entity_name)?;
        }
        if let Some(entity_type) = &self.entity_type {
            map.serialize_entry("entity_type", entity_type)?;
        }
        map.end()
    }
}

/// Entity type plus its static and dynamic attributes.
///
/// Every record lives in exactly one of the two sequences, picked by its
/// [`AttributeKind`] when the list is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeList {
    entity_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    static_attributes: Vec<AttributeRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<AttributeRecord>,
}

impl AttributeList {
    /// Partition `records` by kind, preserving their relative order.
    pub fn from_records(
        entity_type: impl Into<String>,
        records: impl IntoIterator<Item = AttributeRecord>,
    ) -> Self {
        let (static_attributes, attributes) = records.into_iter().partition(|r| r.is_static());
        Self {
            entity_type: entity_type.into(),
            static_attributes,
            attributes,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn static_attributes(&self) -> &[AttributeRecord] {
        &self.static_attributes
    }

    /// Dynamic attributes
    pub fn attributes(&self) -> &[AttributeRecord] {
        &self.attributes
    }

    /// Static attributes first, then dynamic ones
    pub fn iter(&self) -> impl Iterator<Item = &AttributeRecord> {
        self.static_attributes.iter().chain(self.attributes.iter())
    }

    pub fn get(&self, name: &str) -> Option<&AttributeRecord> {
        self.iter().find(|r| r.name() == name)
    }

    pub fn has_dynamic(&self) -> bool {
        !self.attributes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.static_attributes.len() + self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
