//! twin-provision - bulk provisioning of IoT device groups and devices
//!
//! Descriptor files (YAML or CSV) are loaded into raw records, resolved
//! through single-pass inheritance into typed groups and entities, and then
//! created on (or deleted from) the IoT Agent and Context Broker in bounded
//! concurrent batches.
//!
//! ## Pipeline
//! loader -> catalog (InheritanceResolver) -> provision (DispatchPool,
//! gather_all) -> platform
//!
//! ```rust,no_run
//! use twin_provision::{InheritanceResolver, RawRecord};
//! use serde_json::json;
//!
//! let mut resolver = InheritanceResolver::new();
//! let record: RawRecord = json!({
//!     "entity_type": "Sensor",
//!     "attributes": [{"name": "temperature", "type": "Number", "object_id": "t"}]
//! })
//! .as_object()
//! .cloned()
//! .unwrap_or_default();
//! let attributes = resolver.resolve("sensor-base", &record).unwrap();
//! assert!(attributes.has_dynamic());
//! ```

// Core error handling
pub mod error;

// Attribute model and inheritance
pub mod attrib;
pub mod model;
pub mod resolver;

// Descriptor files
pub mod catalog;
pub mod loader;

// Dispatch
pub mod aggregate;
pub mod platform;
pub mod pool;
pub mod provision;

pub mod config;
pub mod report;
pub mod run;

#[cfg(test)]
mod testing;

pub use aggregate::gather_all;
pub use attrib::{AttributeKind, AttributeList, AttributeRecord};
pub use catalog::{Catalog, RecordFailure};
pub use config::{Credentials, Endpoints, HttpOptions, ProvisionConfig, RunMode};
pub use error::{AggregatedError, ConfigError, DispatchError, LoadError, ResolveError};
pub use loader::{load_paths, DescriptorRecord, RecordKind};
pub use model::{Entity, Group, Keyed};
pub use platform::{BatchKind, DeleteOutcome, DeleteRequest, HttpPlatform, Platform};
pub use pool::{DispatchPool, DispatchSummary, PoolConfig, WorkerState};
pub use provision::Provisioner;
pub use report::render_markdown;
pub use resolver::{InheritanceResolver, InheritanceSpec, RawRecord, Registry};
pub use run::{dispatch, execute, RunReport};
