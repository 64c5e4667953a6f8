//! CSV descriptor tables
//!
//! The header row names the identity columns (`entityID`, `entityType`,
//! `deviceID`, `apikey`/`apiKey`, `protocol`). Every other column is an
//! attribute declared as `object_id:name<Type>`, e.g. `t:temperature<Number>`.
//! A row with an `entityID` is an entity, a row with an `apikey` a group.

use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use serde_json::{json, Map, Value};

use super::DescriptorRecord;
use crate::error::LoadError;
use crate::resolver::{RawRecord, ATTRIBUTES_FIELD, ENTITY_TYPE_FIELD};

const DEFAULT_ATTRIBUTE_TYPE: &str = "Text";
/// Set by the IoT Agent on every measure
const SKIPPED_ATTRIBUTE: &str = "TimeInstant";

/// How a cell is turned into an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    Text,
    /// Float, `,` accepted as decimal separator
    Number,
    Json,
}

impl Cast {
    fn for_type(attr_type: &str) -> Self {
        if attr_type == "Number" {
            Cast::Number
        } else if attr_type.contains("json") {
            Cast::Json
        } else {
            Cast::Text
        }
    }

    fn apply(self, text: &str) -> Result<Value, String> {
        match self {
            Cast::Text => Ok(Value::String(text.to_string())),
            Cast::Number => {
                let number: f64 = text
                    .replace(',', ".")
                    .parse()
                    .map_err(|_| format!("'{}' is not a number", text))?;
                serde_json::Number::from_f64(number)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{}' is not a finite number", text))
            }
            Cast::Json => {
                serde_json::from_str(text).map_err(|e| format!("invalid JSON '{}': {}", text, e))
            }
        }
    }
}

/// An attribute column of the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeColumn {
    pub column: usize,
    pub name: String,
    pub attr_type: String,
    pub object_id: Option<String>,
    pub cast: Cast,
}

impl AttributeColumn {
    /// Parse an `object_id:name<Type>` header. Returns `None` for columns
    /// that are never provisioned.
    pub fn from_header(column: usize, header: &str) -> Option<Self> {
        let header = header.trim();
        let (mut name, attr_type) = match header.split_once('<') {
            Some((name, rest)) => (name.trim(), rest.trim_end_matches('>').trim()),
            None => (header, DEFAULT_ATTRIBUTE_TYPE),
        };
        let mut object_id = None;
        if let Some((id, rest)) = name.split_once(':') {
            object_id = Some(id.trim().to_string());
            name = rest.trim();
        }
        if name == SKIPPED_ATTRIBUTE {
            return None;
        }
        Some(Self {
            column,
            name: name.to_string(),
            attr_type: attr_type.to_string(),
            object_id,
            cast: Cast::for_type(attr_type),
        })
    }

    /// Attribute declaration for one cell. Empty cells produce nothing,
    /// unless the column maps a measure, which is then declared without value.
    pub fn declare(&self, cell: Option<&str>) -> Result<Option<Value>, String> {
        let cell = cell.map(str::trim).filter(|c| !c.is_empty());
        if cell.is_none() && self.object_id.is_none() {
            return Ok(None);
        }
        let mut decl = Map::new();
        decl.insert("name".to_string(), json!(self.name));
        decl.insert("type".to_string(), json!(self.attr_type));
        if let Some(object_id) = &self.object_id {
            decl.insert("object_id".to_string(), json!(object_id));
        }
        match cell {
            None => {}
            Some(text) if text.contains("${") => {
                decl.insert("expression".to_string(), json!(text));
            }
            Some(text) => {
                let value = self
                    .cast
                    .apply(text)
                    .map_err(|e| format!("column '{}': {}", self.name, e))?;
                decl.insert("value".to_string(), value);
            }
        }
        Ok(Some(Value::Object(decl)))
    }
}

/// Column positions read from the header row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvLayout {
    pub entity_type: usize,
    pub entity_id: Option<usize>,
    pub device_id: Option<usize>,
    pub apikey: Option<usize>,
    pub protocol: Option<usize>,
    pub attributes: Vec<AttributeColumn>,
    default_protocol: String,
}

impl CsvLayout {
    pub fn from_header(header: &StringRecord, default_protocol: &str) -> Result<Self, String> {
        let mut entity_type = None;
        let mut entity_id = None;
        let mut device_id = None;
        let mut apikey = None;
        let mut protocol = None;
        let mut attributes = Vec::new();
        for (column, text) in header.iter().enumerate() {
            match text.trim() {
                "entityID" => entity_id = Some(column),
                "entityType" => entity_type = Some(column),
                "apikey" | "apiKey" => apikey = Some(column),
                "deviceID" => device_id = Some(column),
                "protocol" => protocol = Some(column),
                other => attributes.extend(AttributeColumn::from_header(column, other)),
            }
        }
        if entity_id.is_none() && apikey.is_none() {
            return Err("header needs an entityID or an apikey column".to_string());
        }
        let entity_type =
            entity_type.ok_or_else(|| "header needs an entityType column".to_string())?;
        Ok(Self {
            entity_type,
            entity_id,
            device_id,
            apikey,
            protocol,
            attributes,
            default_protocol: default_protocol.to_string(),
        })
    }

    /// Build the raw record of one data row
    pub fn read_row(&self, row: &StringRecord, origin: String) -> Result<DescriptorRecord, String> {
        let cell = |index: Option<usize>| {
            index
                .and_then(|i| row.get(i))
                .map(str::trim)
                .filter(|c| !c.is_empty())
        };

        let entity_type = cell(Some(self.entity_type))
            .ok_or_else(|| "entityType must not be empty".to_string())?;
        let entity_id = cell(self.entity_id);
        let apikey = cell(self.apikey);
        let protocol = cell(self.protocol).unwrap_or(&self.default_protocol);

        let mut attributes = Vec::new();
        for column in &self.attributes {
            if let Some(decl) = column.declare(row.get(column.column))? {
                attributes.push(decl);
            }
        }

        let mut fields = RawRecord::new();
        fields.insert(ENTITY_TYPE_FIELD.to_string(), json!(entity_type));
        fields.insert(ATTRIBUTES_FIELD.to_string(), Value::Array(attributes));
        match (entity_id, apikey) {
            (Some(entity_id), None) => {
                let device_id = cell(self.device_id).unwrap_or(entity_id);
                fields.insert("device_id".to_string(), json!(device_id));
                fields.insert("entity_name".to_string(), json!(entity_id));
                fields.insert("protocol".to_string(), json!(protocol));
                Ok(DescriptorRecord::entity(origin, fields))
            }
            (None, Some(apikey)) => {
                let protocols = if protocol.contains('[') {
                    serde_json::from_str(protocol)
                        .map_err(|e| format!("invalid protocol list '{}': {}", protocol, e))?
                } else {
                    json!([protocol])
                };
                fields.insert("apikey".to_string(), json!(apikey));
                fields.insert("protocol".to_string(), protocols);
                Ok(DescriptorRecord::group(origin, fields))
            }
            (Some(_), Some(_)) => {
                Err("only one of entityID or apikey may have a value".to_string())
            }
            (None, None) => Err("one of entityID or apikey must have a value".to_string()),
        }
    }
}

/// Parse a CSV table into raw records, in row order.
///
/// Blank rows are skipped; any other malformed row fails the whole file with
/// its row number.
pub fn parse_descriptor_csv<R: Read>(
    path: &Path,
    reader: R,
    default_protocol: &str,
) -> Result<Vec<DescriptorRecord>, LoadError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let csv_error = |source: csv::Error| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let row_error = |row: usize, message: String| LoadError::Row {
        path: path.to_path_buf(),
        row,
        message,
    };

    let mut rows = reader.records();
    let header = match rows.next() {
        Some(header) => header.map_err(csv_error)?,
        None => return Ok(Vec::new()),
    };
    let layout = CsvLayout::from_header(&header, default_protocol).map_err(|m| row_error(1, m))?;

    let mut records = Vec::new();
    for row in rows {
        let row = row.map_err(csv_error)?;
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let line = row.position().map_or(0, |p| p.line() as usize);
        let origin = format!("{}:{}", path.display(), line);
        let record = layout.read_row(&row, origin).map_err(|m| row_error(line, m))?;
        records.push(record);
    }
    Ok(records)
}
