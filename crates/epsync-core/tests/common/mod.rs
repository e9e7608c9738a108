//! Test doubles and common utilities for pass contract tests
//!
//! The fakes record every call and share their state through `Arc`, so a
//! test can keep a handle while the engine owns a boxed clone.

use epsync_core::classify::{EndpointRecord, ServiceArea};
use epsync_core::config::{Instance, SyncConfig, TargetToggles};
use epsync_core::error::{Error, Result};
use epsync_core::identity::ClientIdentity;
use epsync_core::traits::{
    DeviceClient, EndpointService, ObjectKind, ObjectParams, ObjectState,
};
use epsync_core::version::VersionRecord;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One recorded device operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    FailoverStatus,
    Query(ObjectKind, String),
    Create(ObjectKind, String, ObjectParams),
    Modify(ObjectKind, String, ObjectParams),
    SaveConfig,
    SyncGroup(String),
}

#[derive(Default)]
struct DeviceInner {
    objects: HashSet<(ObjectKind, String)>,
    calls: Vec<DeviceCall>,
    failover: Option<String>,
    /// (operation, object name) pairs that fail
    failures: HashSet<(&'static str, String)>,
    fail_save: bool,
}

/// A device that keeps objects in memory and records every call
#[derive(Clone, Default)]
pub struct FakeDevice {
    inner: Arc<Mutex<DeviceInner>>,
}

impl FakeDevice {
    /// A stand-alone device with no objects
    pub fn new() -> Self {
        Self::default()
    }

    /// Failover status text returned by the probe; `None` makes the probe fail
    pub fn with_failover(self, status: Option<&str>) -> Self {
        self.inner.lock().unwrap().failover = status.map(str::to_string);
        self
    }

    /// Pre-existing object
    pub fn with_object(self, kind: ObjectKind, name: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .objects
            .insert((kind, name.to_string()));
        self
    }

    /// Make `operation` ("query", "create", "modify") on `name` fail
    pub fn failing(self, operation: &'static str, name: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .failures
            .insert((operation, name.to_string()));
        self
    }

    pub fn failing_save(self) -> Self {
        self.inner.lock().unwrap().fail_save = true;
        self
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn creates(&self) -> Vec<DeviceCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, DeviceCall::Create(..)))
            .collect()
    }

    pub fn exists(&self, kind: ObjectKind, name: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .objects
            .contains(&(kind, name.to_string()))
    }

    fn record(&self, call: DeviceCall) {
        self.inner.lock().unwrap().calls.push(call);
    }

    fn check(&self, operation: &'static str, kind: ObjectKind, name: &str) -> Result<()> {
        if self
            .inner
            .lock()
            .unwrap()
            .failures
            .contains(&(operation, name.to_string()))
        {
            return Err(Error::device_cli(operation, format!("{kind} {name}"), "injected failure"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DeviceClient for FakeDevice {
    async fn failover_status(&self) -> Result<String> {
        self.record(DeviceCall::FailoverStatus);
        self.inner
            .lock()
            .unwrap()
            .failover
            .clone()
            .ok_or_else(|| Error::device_cli("show", "failover-status", "probe failed"))
    }

    async fn query(&self, kind: ObjectKind, name: &str) -> Result<ObjectState> {
        self.record(DeviceCall::Query(kind, name.to_string()));
        self.check("query", kind, name)?;
        if self.exists(kind, name) {
            Ok(ObjectState::present(format!("{kind} {name} {{ }}")))
        } else {
            Ok(ObjectState::absent(format!("{kind} {name} was not found")))
        }
    }

    async fn create(&self, kind: ObjectKind, name: &str, params: &ObjectParams) -> Result<()> {
        self.record(DeviceCall::Create(kind, name.to_string(), params.clone()));
        self.check("create", kind, name)?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.objects.insert((kind, name.to_string())) {
            return Err(Error::device_cli("create", name, "object already exists"));
        }
        Ok(())
    }

    async fn modify(&self, kind: ObjectKind, name: &str, params: &ObjectParams) -> Result<()> {
        self.record(DeviceCall::Modify(kind, name.to_string(), params.clone()));
        self.check("modify", kind, name)?;
        if !self.exists(kind, name) {
            return Err(Error::device_cli("modify", name, "object does not exist"));
        }
        Ok(())
    }

    async fn save_config(&self) -> Result<()> {
        self.record(DeviceCall::SaveConfig);
        if self.inner.lock().unwrap().fail_save {
            return Err(Error::device_cli("save", "sys config", "injected failure"));
        }
        Ok(())
    }

    async fn sync_group(&self, group: &str) -> Result<()> {
        self.record(DeviceCall::SyncGroup(group.to_string()));
        Ok(())
    }

    fn device_name(&self) -> &'static str {
        "fake"
    }
}

/// An endpoint service answering from fixed data
#[derive(Clone)]
pub struct ScriptedEndpointService {
    /// Version records, or the HTTP status to fail with
    versions: std::result::Result<Vec<VersionRecord>, u16>,
    /// Endpoint records, or the HTTP status to fail with
    endpoints: std::result::Result<Vec<EndpointRecord>, u16>,
    version_calls: Arc<AtomicUsize>,
    endpoint_calls: Arc<AtomicUsize>,
    identities: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEndpointService {
    pub fn new(version: &str, endpoints: Vec<EndpointRecord>) -> Self {
        Self {
            versions: Ok(vec![VersionRecord::new("Worldwide", version)]),
            endpoints: Ok(endpoints),
            version_calls: Arc::new(AtomicUsize::new(0)),
            endpoint_calls: Arc::new(AtomicUsize::new(0)),
            identities: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_versions(mut self, status: u16) -> Self {
        self.versions = Err(status);
        self
    }

    pub fn failing_endpoints(mut self, status: u16) -> Self {
        self.endpoints = Err(status);
        self
    }

    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }

    pub fn endpoint_calls(&self) -> usize {
        self.endpoint_calls.load(Ordering::SeqCst)
    }

    /// Client identities seen across all requests
    pub fn identities(&self) -> Vec<String> {
        self.identities.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EndpointService for ScriptedEndpointService {
    async fn fetch_versions(&self, identity: &ClientIdentity) -> Result<Vec<VersionRecord>> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        self.identities.lock().unwrap().push(identity.to_string());
        self.versions
            .clone()
            .map_err(|status| Error::transport_status(status, "scripted version failure"))
    }

    async fn fetch_endpoints(
        &self,
        _instance: Instance,
        identity: &ClientIdentity,
    ) -> Result<Vec<EndpointRecord>> {
        self.endpoint_calls.fetch_add(1, Ordering::SeqCst);
        self.identities.lock().unwrap().push(identity.to_string());
        self.endpoints
            .clone()
            .map_err(|status| Error::transport_status(status, "scripted endpoint failure"))
    }

    fn service_name(&self) -> &'static str {
        "scripted"
    }
}

/// The single Exchange record used by the pass scenarios
pub fn exchange_record() -> EndpointRecord {
    EndpointRecord::new(1, ServiceArea::Exchange)
        .with_urls(["*.outlook.com"])
        .with_ips(["13.107.6.152/31", "2603:1006::/40"])
}

/// A record outside the Exchange interest set
pub fn sharepoint_record() -> EndpointRecord {
    EndpointRecord::new(2, ServiceArea::SharePoint)
        .with_urls(["*.sharepoint.com"])
        .with_ips(["13.107.136.0/22"])
}

/// Config with every target enabled and only Exchange of interest
pub fn exchange_config() -> SyncConfig {
    let mut config = SyncConfig::new();
    config.targets = TargetToggles::all();
    config.service_areas = vec![ServiceArea::Exchange];
    config
}

/// Config with HA enabled on top of [`exchange_config`]
pub fn ha_config() -> SyncConfig {
    let mut config = exchange_config();
    config.ha.enabled = true;
    config
}

/// Map of created objects by kind, for assertions
pub fn created_by_kind(device: &FakeDevice) -> HashMap<ObjectKind, Vec<String>> {
    let mut map: HashMap<ObjectKind, Vec<String>> = HashMap::new();
    for call in device.creates() {
        if let DeviceCall::Create(kind, name, _) = call {
            map.entry(kind).or_default().push(name);
        }
    }
    map
}

pub const ACTIVE_STATUS: &str = "cm failover-status {\n    color green\n    status ACTIVE\n}";
pub const STANDBY_STATUS: &str = "cm failover-status {\n    color gray\n    status STANDBY\n}";
