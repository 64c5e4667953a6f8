//! Resolved set of groups and entities for one run

use tracing::{info, warn};

use crate::error::ResolveError;
use crate::loader::{DescriptorRecord, RecordKind};
use crate::model::{Entity, Group};
use crate::resolver::InheritanceResolver;

/// A record that could not be resolved, skipped for the rest of the run
#[derive(Debug)]
pub struct RecordFailure {
    pub origin: String,
    pub error: ResolveError,
}

#[derive(Debug, Default)]
pub struct Catalog {
    pub groups: Vec<Group>,
    pub entities: Vec<Entity>,
    pub failures: Vec<RecordFailure>,
}

impl Catalog {
    /// Resolve every group, then every entity, in load order. Failed
    /// records are kept in `failures` and do not stop the others.
    pub fn build(records: Vec<DescriptorRecord>) -> Self {
        let mut resolver = InheritanceResolver::new();
        let mut catalog = Catalog::default();
        let (groups, entities): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|record| record.kind == RecordKind::Group);

        for record in groups {
            match Group::resolve(&mut resolver, &record.origin, &record.fields) {
                Ok(group) => catalog.groups.push(group),
                Err(error) => catalog.fail(record.origin, error),
            }
        }
        for record in entities {
            match Entity::resolve(&mut resolver, &record.origin, &record.fields) {
                Ok(entity) => catalog.entities.push(entity),
                Err(error) => catalog.fail(record.origin, error),
            }
        }

        info!(
            groups = catalog.groups.len(),
            entities = catalog.entities.len(),
            failed = catalog.failures.len(),
            "Resolved descriptors"
        );
        catalog
    }

    fn fail(&mut self, origin: String, error: ResolveError) {
        warn!(origin = %origin, key = error.key(), "Skipping record: {}", error);
        self.failures.push(RecordFailure { origin, error });
    }

    /// True when every record resolved
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.entities.is_empty()
    }
}
