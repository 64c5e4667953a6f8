//! YAML descriptor documents
//!
//! ```yaml
//! _templates:
//!   sensor: &sensor
//!     protocol: IoTA-JSON
//!     entity_type: Sensor
//! groups:
//!   - apikey: sensors
//!     <<: *sensor
//! entities:
//!   sensor-1:
//!     device_id: sensor-1
//!     entity_name: Sensor:1
//!     <<: *sensor
//! ```
//!
//! Top level keys starting with `_` hold anchors and are ignored, as are
//! `_` prefixed names inside a mapping section. Merge keys are applied
//! before records are extracted.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use super::{DescriptorRecord, RecordKind};
use crate::error::LoadError;
use crate::resolver::RawRecord;

const GROUPS_SECTION: &str = "groups";
const ENTITIES_SECTION: &str = "entities";

/// Parse one YAML document into raw records, groups first
pub fn parse_descriptor_yaml(path: &Path, text: &str) -> Result<Vec<DescriptorRecord>, LoadError> {
    let mut document: Value = serde_yaml::from_str(text).map_err(|source| LoadError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    document.apply_merge().map_err(|source| LoadError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;

    let top = match document {
        Value::Null => return Ok(Vec::new()),
        Value::Mapping(top) => top,
        _ => return Err(format_error(path, "top level must be a mapping")),
    };

    for key in top.keys() {
        match key.as_str() {
            Some(GROUPS_SECTION) | Some(ENTITIES_SECTION) => {}
            Some(name) if name.starts_with('_') => {}
            Some(name) => {
                return Err(format_error(path, format!("unknown section '{}'", name)))
            }
            None => return Err(format_error(path, "section names must be strings")),
        }
    }

    let mut records = Vec::new();
    for (section, kind) in [
        (GROUPS_SECTION, RecordKind::Group),
        (ENTITIES_SECTION, RecordKind::Entity),
    ] {
        if let Some(body) = top.get(section) {
            section_records(path, section, kind, body, &mut records)?;
        }
    }
    Ok(records)
}

fn section_records(
    path: &Path,
    section: &str,
    kind: RecordKind,
    body: &Value,
    out: &mut Vec<DescriptorRecord>,
) -> Result<(), LoadError> {
    match body {
        Value::Null => Ok(()),
        Value::Sequence(items) => {
            for (index, item) in items.iter().enumerate() {
                let origin = format!("{}:{}[{}]", path.display(), section, index);
                let fields = to_record(path, &origin, item)?;
                out.push(DescriptorRecord {
                    kind,
                    origin,
                    fields,
                });
            }
            Ok(())
        }
        Value::Mapping(named) => named_records(path, section, kind, named, out),
        _ => Err(format_error(
            path,
            format!("section '{}' must be a list or a mapping", section),
        )),
    }
}

fn named_records(
    path: &Path,
    section: &str,
    kind: RecordKind,
    named: &Mapping,
    out: &mut Vec<DescriptorRecord>,
) -> Result<(), LoadError> {
    for (name, item) in named {
        let name = name.as_str().ok_or_else(|| {
            format_error(path, format!("names in '{}' must be strings", section))
        })?;
        if name.starts_with('_') {
            continue;
        }
        let origin = format!("{}:{}.{}", path.display(), section, name);
        let fields = to_record(path, &origin, item)?;
        out.push(DescriptorRecord {
            kind,
            origin,
            fields,
        });
    }
    Ok(())
}

fn to_record(path: &Path, origin: &str, item: &Value) -> Result<RawRecord, LoadError> {
    if !item.is_mapping() {
        return Err(format_error(path, format!("{} is not a mapping", origin)));
    }
    match serde_json::to_value(item) {
        Ok(serde_json::Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(format_error(path, format!("{} is not a mapping", origin))),
        Err(e) => Err(format_error(path, format!("{}: {}", origin, e))),
    }
}

fn format_error(path: &Path, message: impl Into<String>) -> LoadError {
    LoadError::Format {
        path: path.to_path_buf(),
        message: message.into(),
    }
}
