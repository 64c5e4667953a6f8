//! Maps groups and entities onto platform calls
//!
//! Each stream (groups, IoT Agent devices, Context Broker entities) goes
//! through the [`DispatchPool`]; independent streams run side by side under
//! [`gather_all`] so that one failing stream never hides the others.

use futures::future::FutureExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::aggregate::gather_all;
use crate::error::{AggregatedError, DispatchError};
use crate::model::{Entity, Group, Keyed};
use crate::platform::{BatchKind, DeleteOutcome, DeleteRequest, Platform};
use crate::pool::DispatchPool;

pub struct Provisioner<P> {
    platform: P,
    pool: DispatchPool,
}

impl<P: Platform> Provisioner<P> {
    pub fn new(platform: P, pool: DispatchPool) -> Self {
        Self { platform, pool }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Create groups and entities concurrently
    pub async fn create(
        &self,
        groups: &[Group],
        entities: &[Entity],
    ) -> Result<(), AggregatedError> {
        info!(
            groups = groups.len(),
            entities = entities.len(),
            "Creating objects"
        );
        gather_all(vec![
            self.create_groups(groups).boxed_local(),
            self.create_entities(entities).boxed_local(),
        ])
        .await
    }

    /// Delete groups and entities concurrently
    pub async fn delete(
        &self,
        groups: &[Group],
        entities: &[Entity],
    ) -> Result<(), AggregatedError> {
        info!(
            groups = groups.len(),
            entities = entities.len(),
            "Deleting objects"
        );
        gather_all(vec![
            self.delete_groups(groups).boxed_local(),
            self.delete_entities(entities).boxed_local(),
        ])
        .await
    }

    pub async fn create_groups(&self, groups: &[Group]) -> Result<(), AggregatedError> {
        self.create_batches(BatchKind::Services, groups.iter(), |group: &Group| {
            serde_json::to_value(group)
        })
        .await
    }

    /// Devices with dynamic attributes are registered in the IoT Agent,
    /// the others are written straight to the Context Broker.
    pub async fn create_entities(&self, entities: &[Entity]) -> Result<(), AggregatedError> {
        let (devices, plain): (Vec<&Entity>, Vec<&Entity>) =
            entities.iter().partition(|entity| entity.needs_agent());
        gather_all(vec![
            self.create_batches(BatchKind::Devices, devices, |entity: &Entity| {
                serde_json::to_value(entity)
            })
            .boxed_local(),
            self.create_batches(BatchKind::ContextEntities, plain, |entity: &Entity| {
                Ok(entity.context_entity())
            })
            .boxed_local(),
        ])
        .await
    }

    /// One delete per group and protocol
    pub async fn delete_groups(&self, groups: &[Group]) -> Result<(), AggregatedError> {
        let url = self.platform.endpoints().iot_services();
        let requests = groups
            .iter()
            .flat_map(|group| {
                let url = url.clone();
                group.protocol.iter().map(move |protocol| DeleteRequest {
                    url: url.clone(),
                    params: vec![
                        ("apikey".to_string(), group.apikey.clone()),
                        ("protocol".to_string(), protocol.clone()),
                    ],
                    key: group.apikey.clone(),
                })
            })
            .collect();
        self.delete_all("delete services", requests).await
    }

    /// Agent devices are removed from the IoT Agent; every entity is
    /// removed from the Context Broker.
    pub async fn delete_entities(&self, entities: &[Entity]) -> Result<(), AggregatedError> {
        let endpoints = self.platform.endpoints();
        let devices = entities
            .iter()
            .filter(|entity| entity.needs_agent())
            .map(|entity| DeleteRequest {
                url: endpoints.iot_device(&entity.device_id),
                params: vec![("protocol".to_string(), entity.protocol.clone())],
                key: entity.device_id.clone(),
            })
            .collect();
        let context = entities
            .iter()
            .map(|entity| DeleteRequest {
                url: endpoints.context_entity(&entity.device_id),
                params: Vec::new(),
                key: entity.device_id.clone(),
            })
            .collect();
        gather_all([
            self.delete_all("delete devices", devices),
            self.delete_all("delete context entities", context),
        ])
        .await
    }

    async fn create_batches<'a, T, I, F>(
        &self,
        kind: BatchKind,
        items: I,
        encode: F,
    ) -> Result<(), AggregatedError>
    where
        T: Keyed + 'a,
        I: IntoIterator<Item = &'a T>,
        F: Fn(&T) -> serde_json::Result<Value>,
    {
        let platform = &self.platform;
        let encode = &encode;
        let label = format!("create {}", kind.label());
        self.pool
            .run(
                &label,
                move |chunk: Vec<&'a T>| async move {
                    let keys = chunk
                        .iter()
                        .map(|item| item.key())
                        .collect::<Vec<_>>()
                        .join(", ");
                    let payload = chunk
                        .iter()
                        .map(|&item| encode(item))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|source| DispatchError::Encode {
                            keys: keys.clone(),
                            source,
                        })?;
                    platform.create_batch(kind, payload, &keys).await
                },
                items,
            )
            .await
            .map(|_| ())
    }

    /// Deletes in a chunk run one after another; the first failure ends
    /// the chunk.
    async fn delete_all(
        &self,
        label: &str,
        requests: Vec<DeleteRequest>,
    ) -> Result<(), AggregatedError> {
        let platform = &self.platform;
        self.pool
            .run(
                label,
                move |chunk: Vec<DeleteRequest>| async move {
                    for request in &chunk {
                        if platform.delete_one(request).await? == DeleteOutcome::AlreadyGone {
                            debug!(key = %request.key, url = %request.url, "Nothing to delete");
                        }
                    }
                    Ok::<(), DispatchError>(())
                },
                requests,
            )
            .await
            .map(|_| ())
    }
}
