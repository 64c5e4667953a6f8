//! End-to-end provisioning flow against an in-memory platform

use std::collections::HashSet;
use std::fs;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use twin_provision::{
    dispatch, load_paths, BatchKind, Catalog, DeleteOutcome, DeleteRequest, DispatchError,
    DispatchPool, Endpoints, Platform, PoolConfig, Provisioner, RunMode,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Create { kind: BatchKind, payload: Vec<Value> },
    Delete(DeleteRequest),
}

/// Records every call; fails batches containing any of `failing` keys and
/// reports `gone` keys as already deleted.
struct RecordingPlatform {
    endpoints: Endpoints,
    calls: Mutex<Vec<Call>>,
    failing: HashSet<String>,
    gone: HashSet<String>,
}

impl RecordingPlatform {
    fn new() -> Self {
        Self {
            endpoints: Endpoints::parse(
                "http://keystone:5001",
                "http://orion:1026",
                "http://iota:4041",
            )
            .unwrap(),
            calls: Mutex::new(Vec::new()),
            failing: HashSet::new(),
            gone: HashSet::new(),
        }
    }

    fn failing(mut self, key: &str) -> Self {
        self.failing.insert(key.to_string());
        self
    }

    fn gone(mut self, key: &str) -> Self {
        self.gone.insert(key.to_string());
        self
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn created(&self, kind: BatchKind) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Create { kind: k, payload } if k == kind => Some(payload),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn deleted_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete(request) => Some(request.url),
                _ => None,
            })
            .collect();
        urls.sort();
        urls
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn create_batch(
        &self,
        kind: BatchKind,
        payload: Vec<Value>,
        keys: &str,
    ) -> Result<(), DispatchError> {
        tokio::task::yield_now().await;
        self.record(Call::Create { kind, payload });
        if keys.split(", ").any(|key| self.failing.contains(key)) {
            return Err(DispatchError::Other(format!("rejected [{}]", keys)));
        }
        Ok(())
    }

    async fn delete_one(&self, request: &DeleteRequest) -> Result<DeleteOutcome, DispatchError> {
        tokio::task::yield_now().await;
        self.record(Call::Delete(request.clone()));
        if self.failing.contains(&request.key) {
            return Err(DispatchError::Other(format!("cannot delete {}", request.key)));
        }
        if self.gone.contains(&request.key) {
            return Ok(DeleteOutcome::AlreadyGone);
        }
        Ok(DeleteOutcome::Deleted)
    }
}

const GROUPS_YAML: &str = r#"
groups:
  - apikey: waste
    protocol: [IoTA-JSON, IoTA-UL]
    entity_type: WasteContainer
    attributes:
      - name: fill
        type: Number
        object_id: f
      - name: zone
        type: Text
        value: centre
"#;

const DEVICES_CSV: &str = "\
entityID,deviceID,entityType,material,f:fill<Number>
WasteContainer:1,wc-1,WasteContainer,steel,
WasteContainer:2,wc-2,WasteContainer,plastic,
";

const ENTITIES_YAML: &str = r#"
entities:
  wc-3:
    device_id: wc-3
    entity_name: WasteContainer:3
    protocol: IoTA-UL
    _inherit:
      apikey: waste
      values:
        zone: east
  bench-1:
    device_id: bench-1
    entity_name: Bench:1
    protocol: IoTA-JSON
    entity_type: Bench
    attributes:
      - name: material
        type: Text
        value: wood
  broken:
    device_id: broken
    entity_name: Broken:1
    protocol: IoTA-JSON
    _inherit:
      device_id: does-not-exist
"#;

fn load_catalog() -> Catalog {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("01-groups.yaml"), GROUPS_YAML).unwrap();
    fs::write(dir.path().join("02-devices.csv"), DEVICES_CSV).unwrap();
    fs::write(dir.path().join("03-entities.yml"), ENTITIES_YAML).unwrap();
    let records = load_paths(&[dir.path().to_path_buf()], "IoTA-JSON").unwrap();
    Catalog::build(records)
}

fn pool(pool_size: usize, chunk_size: usize) -> DispatchPool {
    DispatchPool::new(PoolConfig {
        pool_size,
        chunk_size,
    })
}

/// Descriptors from several files resolve into one catalog; bad records are
/// kept aside.
#[test]
fn test_catalog_from_directory() {
    let catalog = load_catalog();
    assert_eq!(catalog.groups.len(), 1);
    assert_eq!(catalog.entities.len(), 4);
    assert_eq!(catalog.failures.len(), 1);
    assert!(catalog.failures[0].origin.ends_with("entities.broken"));

    let wc3 = catalog
        .entities
        .iter()
        .find(|e| e.device_id == "wc-3")
        .unwrap();
    assert_eq!(wc3.entity_type(), "WasteContainer");
    assert_eq!(
        wc3.attributes.get("zone").unwrap().value(),
        Some(&Value::from("east"))
    );
}

/// Unresolved records fail the run even when every call succeeds.
#[tokio::test]
async fn test_dispatch_reports_unresolved_records() {
    let catalog = load_catalog();
    let platform = RecordingPlatform::new();
    let report = dispatch(catalog, platform, pool(4, 2), RunMode::Create).await;
    assert!(report.dispatch.is_none());
    assert_eq!(report.unresolved.len(), 1);
    assert!(!report.is_success());
}

/// Devices with measures go to the IoT Agent, the rest to the Context Broker.
#[tokio::test]
async fn test_create_payloads() {
    let catalog = load_catalog();
    let provisioner = Provisioner::new(RecordingPlatform::new(), pool(4, 2));
    provisioner
        .create(&catalog.groups, &catalog.entities)
        .await
        .unwrap();
    let platform = provisioner.platform();

    let services = platform.created(BatchKind::Services);
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["apikey"], "waste");
    assert_eq!(
        services[0]["protocol"],
        serde_json::json!(["IoTA-JSON", "IoTA-UL"])
    );

    let mut devices: Vec<String> = platform
        .created(BatchKind::Devices)
        .iter()
        .map(|d| d["device_id"].as_str().unwrap().to_string())
        .collect();
    devices.sort();
    assert_eq!(devices, vec!["wc-1", "wc-2", "wc-3"]);

    let plain = platform.created(BatchKind::ContextEntities);
    assert_eq!(
        plain,
        vec![serde_json::json!({
            "id": "bench-1",
            "type": "Bench",
            "material": {"type": "Text", "value": "wood"}
        })]
    );
}

/// A failing batch does not stop the other streams; the run still fails.
#[tokio::test]
async fn test_partial_failure_runs_every_stream() {
    let catalog = load_catalog();
    let platform = RecordingPlatform::new().failing("waste");
    let provisioner = Provisioner::new(platform, pool(4, 8));
    let err = provisioner
        .create(&catalog.groups, &catalog.entities)
        .await
        .unwrap_err();
    assert_eq!(err.errors.len(), 1);
    assert!(err.to_string().contains("waste"));

    let platform = provisioner.platform();
    assert_eq!(platform.created(BatchKind::Devices).len(), 3);
    assert_eq!(platform.created(BatchKind::ContextEntities).len(), 1);
}

/// Missing objects count as deleted.
#[tokio::test]
async fn test_delete_tolerates_missing_objects() {
    let catalog = load_catalog();
    let platform = RecordingPlatform::new().gone("wc-2").gone("bench-1");
    let report = dispatch(catalog, platform, pool(2, 3), RunMode::Delete).await;
    assert!(report.dispatch.is_none());
}

#[tokio::test]
async fn test_delete_requests() {
    let catalog = load_catalog();
    let provisioner = Provisioner::new(RecordingPlatform::new(), pool(2, 3));
    provisioner
        .delete(&catalog.groups, &catalog.entities)
        .await
        .unwrap();

    let calls = provisioner.platform().calls();
    let services: Vec<&DeleteRequest> = calls
        .iter()
        .filter_map(|call| match call {
            Call::Delete(request) if request.url.ends_with("/iot/services") => Some(request),
            _ => None,
        })
        .collect();
    assert_eq!(services.len(), 2);
    let apikey = ("apikey".to_string(), "waste".to_string());
    assert!(services.iter().all(|r| r.params.contains(&apikey)));

    assert_eq!(
        provisioner.platform().deleted_urls(),
        vec![
            "http://iota:4041/iot/devices/wc-1",
            "http://iota:4041/iot/devices/wc-2",
            "http://iota:4041/iot/devices/wc-3",
            "http://iota:4041/iot/services",
            "http://iota:4041/iot/services",
            "http://orion:1026/v2/entities/bench-1",
            "http://orion:1026/v2/entities/wc-1",
            "http://orion:1026/v2/entities/wc-2",
            "http://orion:1026/v2/entities/wc-3",
        ]
    );
}

/// The first failing delete ends its chunk; other chunks and streams go on.
#[tokio::test]
async fn test_delete_failure_is_reported() {
    let catalog = load_catalog();
    let platform = RecordingPlatform::new().failing("wc-1");
    let report = dispatch(catalog, platform, pool(4, 8), RunMode::Delete).await;
    let err = report.dispatch.unwrap();
    assert!(err.to_string().contains("wc-1"));
}
