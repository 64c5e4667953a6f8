//! Inheritance resolution for descriptor records
//!
//! A record may inherit the attributes of any record resolved before it,
//! referenced by `device_id` (entities) or `apikey` (groups):
//!
//! ```yaml
//! _inherit:
//!   - apikey: waste-containers
//!   - device_id: container-base
//!     values:
//!       zone: north
//! ```
//!
//! Merge precedence, highest first: the record's own attributes, then the
//! last listed inheritance entry, down to the first listed one. The first
//! attribute seen for a given name wins.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::attrib::{AttributeDecl, AttributeList, AttributeRecord};
use crate::error::ResolveError;

/// A descriptor record as produced by the loaders.
pub type RawRecord = Map<String, Value>;

pub const INHERIT_FIELD: &str = "_inherit";
pub const ATTRIBUTES_FIELD: &str = "attributes";
pub const ENTITY_TYPE_FIELD: &str = "entity_type";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InheritDecl {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    apikey: Option<String>,
    #[serde(default)]
    values: Option<Map<String, Value>>,
}

/// Reference to an already resolved record, with optional value overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct InheritanceSpec {
    reference: String,
    overrides: Map<String, Value>,
}

impl InheritanceSpec {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            overrides: Map::new(),
        }
    }

    pub fn with_override(mut self, name: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(name.into(), value);
        self
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    fn parse(key: &str, raw: &Value) -> Result<Self, ResolveError> {
        let decl: InheritDecl = serde_json::from_value(raw.clone()).map_err(|e| {
            ResolveError::structural(key, format!("invalid {}: {}", INHERIT_FIELD, e))
        })?;
        let reference = match (decl.device_id, decl.apikey) {
            (Some(device_id), None) => device_id,
            (None, Some(apikey)) => apikey,
            (Some(_), Some(_)) => {
                return Err(ResolveError::structural(
                    key,
                    format!("{} sets both device_id and apikey", INHERIT_FIELD),
                ))
            }
            (None, None) => {
                return Err(ResolveError::structural(
                    key,
                    format!("{} needs either device_id or apikey", INHERIT_FIELD),
                ))
            }
        };
        Ok(Self {
            reference,
            overrides: decl.values.unwrap_or_default(),
        })
    }

    /// Apply this spec's overrides to one inherited attribute
    fn apply(&self, record: &AttributeRecord) -> AttributeRecord {
        match self.overrides.get(record.name()) {
            Some(value) if !value.is_null() => record.with_value(value.clone()),
            _ => record.clone(),
        }
    }
}

/// Resolved attribute lists of one run, by resolution key.
#[derive(Debug, Default)]
pub struct Registry {
    lists: HashMap<String, AttributeList>,
}

impl Registry {
    pub fn get(&self, key: &str) -> Option<&AttributeList> {
        self.lists.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lists.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

/// Resolution context for one run. Records must be resolved in
/// declaration order so that references are registered before use.
#[derive(Debug, Default)]
pub struct InheritanceResolver {
    registry: Registry,
}

impl InheritanceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolve `record` into an attribute list and register it under `key`.
    ///
    /// Nothing is registered when resolution fails.
    pub fn resolve(
        &mut self,
        key: &str,
        record: &RawRecord,
    ) -> Result<AttributeList, ResolveError> {
        if self.registry.contains(key) {
            return Err(ResolveError::DuplicateKey {
                key: key.to_string(),
            });
        }

        let specs = parse_inherit(key, record.get(INHERIT_FIELD))?;
        let parents = specs
            .iter()
            .map(|spec| {
                self.registry
                    .get(spec.reference())
                    .map(|list| (spec, list))
                    .ok_or_else(|| ResolveError::Reference {
                        key: key.to_string(),
                        reference: spec.reference().to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let entity_type = match own_entity_type(key, record)? {
            Some(entity_type) => entity_type,
            None => parents
                .last()
                .map(|(_, list)| list.entity_type().to_string())
                .ok_or_else(|| ResolveError::missing(key, ENTITY_TYPE_FIELD))?,
        };

        let own = parse_attributes(key, record.get(ATTRIBUTES_FIELD))?;
        let inherited = parents
            .iter()
            .rev()
            .flat_map(|(spec, list)| list.iter().map(move |attr| spec.apply(attr)));

        let mut seen = HashSet::new();
        let merged: Vec<AttributeRecord> = own
            .into_iter()
            .chain(inherited)
            .filter(|attr| seen.insert(attr.name().to_string()))
            .collect();

        let list = AttributeList::from_records(entity_type, merged);
        debug!(
            key,
            entity_type = list.entity_type(),
            inherits = specs.len(),
            static_count = list.static_attributes().len(),
            dynamic_count = list.attributes().len(),
            "Resolved record"
        );
        self.registry.lists.insert(key.to_string(), list.clone());
        Ok(list)
    }
}

/// Accepts a single inheritance mapping or an ordered list of them
fn parse_inherit(key: &str, raw: Option<&Value>) -> Result<Vec<InheritanceSpec>, ResolveError> {
    match raw {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(single @ Value::Object(_)) => Ok(vec![InheritanceSpec::parse(key, single)?]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| InheritanceSpec::parse(key, item))
            .collect(),
        Some(other) => Err(ResolveError::structural(
            key,
            format!("{} must be a list or mapping, not {}", INHERIT_FIELD, other),
        )),
    }
}

fn own_entity_type(key: &str, record: &RawRecord) -> Result<Option<String>, ResolveError> {
    match record.get(ENTITY_TYPE_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ResolveError::structural(
            key,
            format!("{} must be a string, found {}", ENTITY_TYPE_FIELD, other),
        )),
    }
}

fn parse_attributes(key: &str, raw: Option<&Value>) -> Result<Vec<AttributeRecord>, ResolveError> {
    let items = match raw {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(ResolveError::structural(
                key,
                format!("{} must be a list, found {}", ATTRIBUTES_FIELD, other),
            ))
        }
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<AttributeDecl>(item.clone())
                .map(AttributeRecord::from)
                .map_err(|e| {
                    ResolveError::structural(key, format!("attribute #{}: {}", index + 1, e))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    fn names(list: &AttributeList) -> Vec<&str> {
        list.iter().map(|a| a.name()).collect()
    }

    fn group_resolver() -> InheritanceResolver {
        let mut resolver = InheritanceResolver::new();
        resolver
            .resolve(
                "containers",
                &record(json!({
                    "entity_type": "WasteContainer",
                    "attributes": [
                        {"name": "fill", "type": "Number", "object_id": "f"},
                        {"name": "zone", "type": "Text", "value": "centre"},
                        {"name": "a", "type": "Number"}
                    ]
                })),
            )
            .unwrap();
        resolver
    }

    #[test]
    fn test_plain_record_partitions_attributes() {
        let resolver = group_resolver();
        let list = resolver.registry().get("containers").unwrap();
        assert_eq!(list.entity_type(), "WasteContainer");
        assert_eq!(list.static_attributes().len(), 1);
        assert_eq!(list.attributes().len(), 2);
    }

    #[test]
    fn test_entity_type_inherited_from_last_spec() {
        let mut resolver = group_resolver();
        resolver
            .resolve(
                "sensors",
                &record(json!({"entity_type": "Sensor", "attributes": []})),
            )
            .unwrap();
        let list = resolver
            .resolve(
                "dev-1",
                &record(json!({"_inherit": [{"apikey": "containers"}, {"apikey": "sensors"}]})),
            )
            .unwrap();
        assert_eq!(list.entity_type(), "Sensor");
    }

    #[test]
    fn test_missing_entity_type_without_inheritance() {
        let mut resolver = InheritanceResolver::new();
        let err = resolver
            .resolve("dev-1", &record(json!({"attributes": []})))
            .unwrap_err();
        match err {
            ResolveError::MissingField { field, .. } => assert_eq!(field, "entity_type"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_single_mapping_inherit_block() {
        let mut resolver = group_resolver();
        let list = resolver
            .resolve(
                "dev-1",
                &record(json!({"_inherit": {"apikey": "containers", "values": {"fill": 40}}})),
            )
            .unwrap();
        assert!(list.get("fill").unwrap().is_static());
        assert_eq!(list.get("fill").unwrap().value(), Some(&json!(40)));
        assert!(!list.get("a").unwrap().is_static());
    }

    /// Direct declarations beat inherited overrides.
    #[test]
    fn test_direct_attribute_beats_inherited_override() {
        let mut resolver = group_resolver();
        let list = resolver
            .resolve(
                "dev-1",
                &record(json!({
                    "_inherit": {"apikey": "containers", "values": {"a": 2}},
                    "attributes": [{"name": "a", "type": "Number", "value": 1}]
                })),
            )
            .unwrap();
        assert_eq!(list.get("a").unwrap().value(), Some(&json!(1)));
    }

    /// With two specs overriding the same name, the later-listed wins.
    #[test]
    fn test_later_spec_override_wins() {
        let mut resolver = group_resolver();
        resolver
            .resolve(
                "other",
                &record(json!({
                    "entity_type": "Other",
                    "attributes": [{"name": "a", "type": "Number"}]
                })),
            )
            .unwrap();
        let list = resolver
            .resolve(
                "dev-1",
                &record(json!({
                    "_inherit": [
                        {"apikey": "containers", "values": {"a": 10}},
                        {"apikey": "other", "values": {"a": 20}}
                    ]
                })),
            )
            .unwrap();
        assert_eq!(list.get("a").unwrap().value(), Some(&json!(20)));
        assert_eq!(list.entity_type(), "Other");
    }

    #[test]
    fn test_merge_order_and_unique_names() {
        let mut resolver = group_resolver();
        let list = resolver
            .resolve(
                "dev-1",
                &record(json!({
                    "_inherit": {"apikey": "containers"},
                    "attributes": [
                        {"name": "battery", "type": "Number"},
                        {"name": "zone", "type": "Text", "value": "south"},
                        {"name": "battery", "type": "Text", "value": "dup"}
                    ]
                })),
            )
            .unwrap();

        let all = names(&list);
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), unique.len());
        assert_eq!(all.len(), 4);

        // own attributes come first within each partition
        let dynamic: Vec<_> = list.attributes().iter().map(|a| a.name()).collect();
        assert_eq!(dynamic, vec!["battery", "fill", "a"]);
        assert_eq!(list.get("zone").unwrap().value(), Some(&json!("south")));
    }

    #[test]
    fn test_static_iff_value_present() {
        let mut resolver = group_resolver();
        let raw = json!({
            "_inherit": {"apikey": "containers", "values": {"fill": 5, "a": null}}
        });
        let list = resolver.resolve("dev-1", &record(raw)).unwrap();
        for attr in list.static_attributes() {
            assert!(attr.value().is_some());
        }
        for attr in list.attributes() {
            assert!(attr.value().is_none());
        }
        // a null override leaves the attribute untouched
        assert!(!list.get("a").unwrap().is_static());
    }

    #[test]
    fn test_unknown_reference_registers_nothing() {
        let mut resolver = group_resolver();
        let ghost = record(json!({"_inherit": {"device_id": "ghost"}}));
        let err = resolver.resolve("dev-1", &ghost).unwrap_err();
        assert!(err.is_reference());
        assert!(!resolver.registry().contains("dev-1"));
        assert_eq!(resolver.registry().len(), 1);

        // the key stays free for a corrected record
        let fixed = record(json!({"_inherit": {"apikey": "containers"}}));
        resolver.resolve("dev-1", &fixed).unwrap();
    }

    #[test]
    fn test_inherit_entry_parses_reference_and_values() {
        let raw = json!({"device_id": "container-base", "values": {"zone": "north"}});
        let spec = InheritanceSpec::parse("dev-1", &raw).unwrap();
        let expected = InheritanceSpec::new("container-base").with_override("zone", json!("north"));
        assert_eq!(spec, expected);
        assert_eq!(spec.reference(), "container-base");
    }

    #[test]
    fn test_ambiguous_or_absent_identification() {
        let mut resolver = group_resolver();
        let both = resolver
            .resolve(
                "dev-1",
                &record(json!({"_inherit": {"apikey": "containers", "device_id": "containers"}})),
            )
            .unwrap_err();
        assert!(matches!(both, ResolveError::Structural { .. }));

        let no_reference = record(json!({"_inherit": [{"values": {"a": 1}}]}));
        let neither = resolver.resolve("dev-2", &no_reference).unwrap_err();
        assert!(matches!(neither, ResolveError::Structural { .. }));
        assert!(resolver.registry().get("dev-2").is_none());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut resolver = group_resolver();
        let err = resolver
            .resolve("containers", &record(json!({"entity_type": "Other"})))
            .unwrap_err();
        assert!(matches!(err, ResolveError::DuplicateKey { .. }));
        assert_eq!(
            resolver.registry().get("containers").unwrap().entity_type(),
            "WasteContainer"
        );
    }

    #[test]
    fn test_invalid_attribute_declaration() {
        let mut resolver = InheritanceResolver::new();
        let err = resolver
            .resolve(
                "dev-1",
                &record(json!({"entity_type": "T", "attributes": [{"name": "x"}]})),
            )
            .unwrap_err();
        assert!(err.to_string().contains("attribute #1"));
    }
}
