//! Descriptor loading
//!
//! Turns descriptor files (YAML or CSV) into raw records tagged as groups or
//! entities. Records keep their file order; files are read in the order the
//! paths were given, directories contributing their descriptor files sorted
//! by name.

mod csv_file;
mod yaml_file;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::LoadError;
use crate::resolver::RawRecord;

pub use csv_file::{parse_descriptor_csv, AttributeColumn, Cast, CsvLayout};
pub use yaml_file::parse_descriptor_yaml;

const YAML_EXTENSIONS: &[&str] = &["yml", "yaml"];
const CSV_EXTENSIONS: &[&str] = &["csv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Group,
    Entity,
}

/// One raw record and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorRecord {
    pub kind: RecordKind,
    /// File and position, used in logs when the record has no key
    pub origin: String,
    pub fields: RawRecord,
}

impl DescriptorRecord {
    pub fn group(origin: impl Into<String>, fields: RawRecord) -> Self {
        Self {
            kind: RecordKind::Group,
            origin: origin.into(),
            fields,
        }
    }

    pub fn entity(origin: impl Into<String>, fields: RawRecord) -> Self {
        Self {
            kind: RecordKind::Entity,
            origin: origin.into(),
            fields,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Csv,
}

fn format_of(path: &Path) -> Option<Format> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if YAML_EXTENSIONS.contains(&ext.as_str()) {
        Some(Format::Yaml)
    } else if CSV_EXTENSIONS.contains(&ext.as_str()) {
        Some(Format::Csv)
    } else {
        None
    }
}

/// Expand the given paths into the list of descriptor files to read.
///
/// Files are taken as given; directories are scanned (not recursively)
/// for `.yml`, `.yaml` and `.csv` files.
pub fn descriptor_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            let entries = fs::read_dir(path).map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;
            let mut found = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|source| LoadError::Io {
                    path: path.clone(),
                    source,
                })?;
                let candidate = entry.path();
                if candidate.is_file() && format_of(&candidate).is_some() {
                    found.push(candidate);
                }
            }
            found.sort();
            debug!(dir = %path.display(), files = found.len(), "Scanned descriptor directory");
            files.extend(found);
        } else {
            return Err(LoadError::NotFound(path.clone()));
        }
    }
    Ok(files)
}

/// Read one descriptor file
pub fn load_file(path: &Path, default_protocol: &str) -> Result<Vec<DescriptorRecord>, LoadError> {
    let format = format_of(path).ok_or_else(|| LoadError::Format {
        path: path.to_path_buf(),
        message: "unsupported file extension, expected .yml, .yaml or .csv".to_string(),
    })?;
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records = match format {
        Format::Yaml => parse_descriptor_yaml(path, &text)?,
        Format::Csv => parse_descriptor_csv(path, text.as_bytes(), default_protocol)?,
    };
    debug!(path = %path.display(), records = records.len(), "Loaded descriptor file");
    Ok(records)
}

/// Read every descriptor under `paths`, in order
pub fn load_paths(
    paths: &[PathBuf],
    default_protocol: &str,
) -> Result<Vec<DescriptorRecord>, LoadError> {
    let files = descriptor_files(paths)?;
    let mut records = Vec::new();
    for file in &files {
        records.extend(load_file(file, default_protocol)?);
    }
    let groups = records
        .iter()
        .filter(|r| r.kind == RecordKind::Group)
        .count();
    info!(
        files = files.len(),
        groups,
        entities = records.len() - groups,
        "Loaded descriptors"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_directory_scan_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.yaml"), "groups: []\n").unwrap();
        fs::write(dir.path().join("a.csv"), "entityID,entityType\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("C.YML"), "entities: []\n").unwrap();

        let files = descriptor_files(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["C.YML", "a.csv", "b.yaml"]);
    }

    #[test]
    fn test_missing_path() {
        let err = descriptor_files(&[PathBuf::from("/definitely/not/here")]).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn test_load_paths_keeps_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("groups.yaml");
        fs::write(
            &yaml,
            "groups:\n  - apikey: waste\n    protocol: IoTA-JSON\n    entity_type: Container\n",
        )
        .unwrap();
        let csv = dir.path().join("devices.csv");
        fs::write(
            &csv,
            "entityID,entityType,fill<Number>\nwc-1,WasteContainer,\"0,5\"\n",
        )
        .unwrap();

        let records = load_paths(&[yaml, csv], "IoTA-UL").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, RecordKind::Group);
        assert_eq!(records[1].kind, RecordKind::Entity);
        assert_eq!(records[1].fields["protocol"], "IoTA-UL");
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("descriptors.json");
        fs::write(&path, "{}").unwrap();
        assert!(matches!(load_file(&path, "IoTA-JSON"), Err(LoadError::Format { .. })));
    }
}
