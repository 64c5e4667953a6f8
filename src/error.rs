//! Error types for descriptor resolution, loading and dispatch
//!
//! Resolution errors are fatal to a single record, dispatch errors are
//! buffered by the pool and surfaced once all in-flight work has drained.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn one raw descriptor record into an attribute list.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Record '{key}' is malformed: {reason}")]
    Structural { key: String, reason: String },

    #[error("Record '{key}' is missing required field '{field}'")]
    MissingField { key: String, field: String },

    #[error("Record '{key}' inherits from '{reference}', which has not been declared before it")]
    Reference { key: String, reference: String },

    #[error("Record '{key}' is declared more than once")]
    DuplicateKey { key: String },
}

impl ResolveError {
    pub fn structural(key: &str, reason: impl Into<String>) -> Self {
        ResolveError::Structural {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing(key: &str, field: &str) -> Self {
        ResolveError::MissingField {
            key: key.to_string(),
            field: field.to_string(),
        }
    }

    /// Resolution key of the record that failed
    pub fn key(&self) -> &str {
        match self {
            ResolveError::Structural { key, .. }
            | ResolveError::MissingField { key, .. }
            | ResolveError::Reference { key, .. }
            | ResolveError::DuplicateKey { key } => key,
        }
    }

    /// True for errors caused by declaration order rather than record shape
    pub fn is_reference(&self) -> bool {
        matches!(self, ResolveError::Reference { .. })
    }
}

/// Failure to read descriptor files
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Path {} is neither a file nor a directory", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid CSV in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{} row {row}: {message}", path.display())]
    Row {
        path: PathBuf,
        row: usize,
        message: String,
    },

    #[error("{}: {message}", path.display())]
    Format { path: PathBuf, message: String },
}

/// Invalid run configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {name} URL '{value}': {reason}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Setting {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// A remote call for one chunk failed
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("{method} {url} for [{keys}] returned status {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        keys: String,
        status: u16,
        body: String,
    },

    #[error("{method} {url} for [{keys}] failed: {source}")]
    Transport {
        method: &'static str,
        url: String,
        keys: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to encode payload for [{keys}]: {source}")]
    Encode {
        keys: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Every failure recorded by one pool run.
///
/// Only one run result is returned to the caller, but it carries all
/// chunk errors so none of them is lost.
#[derive(Debug)]
pub struct AggregatedError<E = DispatchError> {
    pub label: String,
    pub chunks_total: usize,
    pub chunks_started: usize,
    pub errors: Vec<E>,
}

impl<E> AggregatedError<E> {
    /// Chunks that were never dequeued because the pool was shutting down
    pub fn chunks_skipped(&self) -> usize {
        self.chunks_total - self.chunks_started
    }

    pub fn first(&self) -> Option<&E> {
        self.errors.first()
    }
}

impl<E: fmt::Display> fmt::Display for AggregatedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} of {} chunks failed ({} not started)",
            self.label,
            self.errors.len(),
            self.chunks_total,
            self.chunks_skipped()
        )?;
        if let Some(first) = self.first() {
            write!(f, "; first error: {}", first)?;
        }
        Ok(())
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for AggregatedError<E> {}
