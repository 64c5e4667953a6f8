//! Device groups and devices
//!
//! Both pair their identity fields with a resolved [`AttributeList`] and
//! serialize to the IoT Agent provisioning format.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::attrib::AttributeList;
use crate::error::ResolveError;
use crate::resolver::{
    InheritanceResolver, RawRecord, ATTRIBUTES_FIELD, ENTITY_TYPE_FIELD, INHERIT_FIELD,
};

const GROUP_FIELDS: &[&str] = &[
    "apikey",
    "protocol",
    ENTITY_TYPE_FIELD,
    ATTRIBUTES_FIELD,
    INHERIT_FIELD,
];

const ENTITY_FIELDS: &[&str] = &[
    "device_id",
    "entity_name",
    "protocol",
    ENTITY_TYPE_FIELD,
    ATTRIBUTES_FIELD,
    INHERIT_FIELD,
];

/// Anything dispatched under a resolution key
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Provisioning template shared by many devices
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub apikey: String,
    pub protocol: Vec<String>,
    #[serde(flatten)]
    pub attributes: AttributeList,
}

impl Group {
    /// Resolve a group record. `origin` names the record in errors when
    /// its apikey is missing.
    pub fn resolve(
        resolver: &mut InheritanceResolver,
        origin: &str,
        record: &RawRecord,
    ) -> Result<Self, ResolveError> {
        let apikey = required_str(origin, record, "apikey")?;
        check_fields(&apikey, record, GROUP_FIELDS)?;
        let protocol = match record.get("protocol") {
            Some(Value::String(p)) => vec![p.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        ResolveError::structural(&apikey, "protocol list must contain strings")
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None | Some(Value::Null) => return Err(ResolveError::missing(&apikey, "protocol")),
            Some(other) => {
                return Err(ResolveError::structural(
                    &apikey,
                    format!("protocol must be a string or list, found {}", other),
                ))
            }
        };
        if protocol.is_empty() {
            return Err(ResolveError::missing(&apikey, "protocol"));
        }
        let attributes = resolver.resolve(&apikey, record)?;
        Ok(Self {
            apikey,
            protocol,
            attributes,
        })
    }

    pub fn entity_type(&self) -> &str {
        self.attributes.entity_type()
    }
}

/// A single provisioned device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub device_id: String,
    pub entity_name: String,
    pub protocol: String,
    #[serde(flatten)]
    pub attributes: AttributeList,
}

impl Entity {
    pub fn resolve(
        resolver: &mut InheritanceResolver,
        origin: &str,
        record: &RawRecord,
    ) -> Result<Self, ResolveError> {
        let device_id = required_str(origin, record, "device_id")?;
        check_fields(&device_id, record, ENTITY_FIELDS)?;
        let entity_name = required_str(&device_id, record, "entity_name")?;
        if entity_name.chars().any(char::is_whitespace) {
            return Err(ResolveError::structural(
                &device_id,
                format!("entity_name '{}' contains whitespace", entity_name),
            ));
        }
        let protocol = required_str(&device_id, record, "protocol")?;
        let attributes = resolver.resolve(&device_id, record)?;
        Ok(Self {
            device_id,
            entity_name,
            protocol,
            attributes,
        })
    }

    pub fn entity_type(&self) -> &str {
        self.attributes.entity_type()
    }

    /// Devices with measured attributes go through the IoT Agent; the rest
    /// are plain context entities.
    pub fn needs_agent(&self) -> bool {
        self.attributes.has_dynamic()
    }

    /// Context Broker representation: id, type and static attributes
    pub fn context_entity(&self) -> Value {
        let mut data = Map::new();
        data.insert("id".to_string(), json!(self.device_id));
        data.insert("type".to_string(), json!(self.entity_type()));
        for attr in self.attributes.static_attributes() {
            data.insert(
                attr.name().to_string(),
                json!({
                    "type": attr.attr_type(),
                    "value": attr.value(),
                }),
            );
        }
        Value::Object(data)
    }
}

impl Keyed for Group {
    fn key(&self) -> &str {
        &self.apikey
    }
}

impl Keyed for Entity {
    fn key(&self) -> &str {
        &self.device_id
    }
}

fn required_str(key: &str, record: &RawRecord, field: &str) -> Result<String, ResolveError> {
    match record.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) | Some(Value::Null) | None => Err(ResolveError::missing(key, field)),
        Some(other) => Err(ResolveError::structural(
            key,
            format!("{} must be a string, found {}", field, other),
        )),
    }
}

fn check_fields(key: &str, record: &RawRecord, allowed: &[&str]) -> Result<(), ResolveError> {
    match record.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(unknown) => Err(ResolveError::structural(key, format!("unknown field '{}'", unknown))),
        None => Ok(()),
    }
}
