// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`ServiceApi`] used by reconciler and controller tests.
//!
//! Core Services written through the fake are fed into an [`OwnerIndexWriter`]
//! the same way the watcher would feed them, so the reconciler sees its own
//! writes on the next pass. Every write is recorded for assertions.

use super::resources::ServiceApi;
use crate::constants::{API_GROUP_VERSION, KIND_SERVICE};
use crate::crd::{
    Endpoint, EndpointSpec, EndpointStatus, ExposedService, ExposedServiceSpec,
    ExposedServiceStatus, ServicePortMapping, ServiceState,
};
use crate::index::{owner_index, OwnerIndex, OwnerIndexWriter};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::core::Status;
use kube::runtime::watcher;
use kube::ResourceExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Operations the fake can be told to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FakeOp {
    GetExposedService,
    LabelExposedService,
    AnnotateExposedService,
    PatchState,
    GetEndpoint,
    GetCoreService,
    CreateCoreService,
    ReplaceCoreService,
    DeleteCoreService,
}

/// A write performed through the fake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Write {
    Label { name: String, key: String, value: String },
    Annotate { name: String, key: String, value: String },
    State { name: String, state: ServiceState },
    Create { name: String },
    Replace { name: String },
    Delete { name: String },
}

struct FakeState {
    exposed: BTreeMap<Key, ExposedService>,
    endpoints: BTreeMap<Key, Endpoint>,
    core: BTreeMap<Key, Service>,
    writes: Vec<Write>,
    failures: HashMap<FakeOp, u16>,
    index: OwnerIndexWriter,
    index_lag: bool,
    assign_cluster_ips: bool,
    next_suffix: u32,
    next_ip: u32,
}

pub struct FakeServiceApi {
    state: Mutex<FakeState>,
}

impl FakeServiceApi {
    /// A fake with an empty, already primed owner index.
    pub fn new() -> (Self, OwnerIndex) {
        let (index, mut writer) = owner_index();
        writer.apply_watcher_event(&watcher::Event::Init);
        writer.apply_watcher_event(&watcher::Event::InitDone);
        let fake = Self {
            state: Mutex::new(FakeState {
                exposed: BTreeMap::new(),
                endpoints: BTreeMap::new(),
                core: BTreeMap::new(),
                writes: Vec::new(),
                failures: HashMap::new(),
                index: writer,
                index_lag: false,
                assign_cluster_ips: true,
                next_suffix: 0,
                next_ip: 5,
            }),
        };
        (fake, index)
    }

    pub fn insert_exposed_service(&self, service: ExposedService) {
        let k = key(&service.namespace().unwrap_or_default(), &service.name_any());
        self.state.lock().exposed.insert(k, service);
    }

    pub fn remove_exposed_service(&self, namespace: &str, name: &str) {
        self.state.lock().exposed.remove(&key(namespace, name));
    }

    pub fn exposed_service(&self, namespace: &str, name: &str) -> Option<ExposedService> {
        self.state.lock().exposed.get(&key(namespace, name)).cloned()
    }

    pub fn insert_endpoint(&self, endpoint: Endpoint) {
        let k = key(&endpoint.namespace().unwrap_or_default(), &endpoint.name_any());
        self.state.lock().endpoints.insert(k, endpoint);
    }

    /// Store a core Service as if it already existed, and index it.
    pub fn insert_core_service(&self, service: Service) {
        let mut state = self.state.lock();
        let k = key(&service.namespace().unwrap_or_default(), &service.name_any());
        state.index.apply_watcher_event(&watcher::Event::Apply(service.clone()));
        state.core.insert(k, service);
    }

    pub fn core_service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state.lock().core.get(&key(namespace, name)).cloned()
    }

    pub fn core_services(&self, namespace: &str) -> Vec<Service> {
        self.state
            .lock()
            .core
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, svc)| svc.clone())
            .collect()
    }

    /// Delete a stored core Service behind the controller's back.
    ///
    /// The index sees the delete unless index lag is on.
    pub fn remove_core_service(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock();
        let Some(removed) = state.core.remove(&key(namespace, name)) else {
            return;
        };
        if !state.index_lag {
            state.index.apply_watcher_event(&watcher::Event::Delete(removed));
        }
    }

    /// Set the cluster IP of a stored core Service and re-index it.
    pub fn set_cluster_ip(&self, namespace: &str, name: &str, ip: &str) {
        let mut state = self.state.lock();
        let Some(service) = state.core.get_mut(&key(namespace, name)) else {
            return;
        };
        service.spec.get_or_insert_with(ServiceSpec::default).cluster_ip = Some(ip.to_string());
        let service = service.clone();
        state.index.apply_watcher_event(&watcher::Event::Apply(service));
    }

    pub fn fail(&self, op: FakeOp, code: u16) {
        self.state.lock().failures.insert(op, code);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// When set, core Service writes are not reflected in the owner index
    /// until [`FakeServiceApi::relist_index`] is called.
    pub fn set_index_lag(&self, lag: bool) {
        self.state.lock().index_lag = lag;
    }

    pub fn set_assign_cluster_ips(&self, assign: bool) {
        self.state.lock().assign_cluster_ips = assign;
    }

    /// Replay every stored core Service into the owner index as a re-list.
    pub fn relist_index(&self) {
        let mut state = self.state.lock();
        let services: Vec<Service> = state.core.values().cloned().collect();
        state.index.apply_watcher_event(&watcher::Event::Init);
        for service in services {
            state
                .index
                .apply_watcher_event(&watcher::Event::InitApply(service));
        }
        state.index.apply_watcher_event(&watcher::Event::InitDone);
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    fn check(state: &FakeState, op: FakeOp) -> Result<(), kube::Error> {
        match state.failures.get(&op) {
            Some(code) => Err(api_error(*code)),
            None => Ok(()),
        }
    }
}

/// A `kube::Error::Api` with the given HTTP status code.
pub fn api_error(code: u16) -> kube::Error {
    let reason = match code {
        404 => "NotFound",
        409 => "Conflict",
        403 => "Forbidden",
        _ => "InternalError",
    };
    kube::Error::Api(
        Status::failure(&format!("{reason} injected by test"), reason)
            .with_code(code)
            .boxed(),
    )
}

#[async_trait]
impl ServiceApi for FakeServiceApi {
    async fn get_exposed_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ExposedService>, kube::Error> {
        let state = self.state.lock();
        Self::check(&state, FakeOp::GetExposedService)?;
        Ok(state.exposed.get(&key(namespace, name)).cloned())
    }

    async fn label_exposed_service(
        &self,
        namespace: &str,
        name: &str,
        label: &str,
        value: &str,
    ) -> Result<ExposedService, kube::Error> {
        let mut state = self.state.lock();
        Self::check(&state, FakeOp::LabelExposedService)?;
        let service = state
            .exposed
            .get_mut(&key(namespace, name))
            .ok_or_else(|| api_error(404))?;
        service
            .labels_mut()
            .insert(label.to_string(), value.to_string());
        let updated = service.clone();
        state.writes.push(Write::Label {
            name: name.to_string(),
            key: label.to_string(),
            value: value.to_string(),
        });
        Ok(updated)
    }

    async fn annotate_exposed_service(
        &self,
        namespace: &str,
        name: &str,
        annotation: &str,
        value: &str,
    ) -> Result<ExposedService, kube::Error> {
        let mut state = self.state.lock();
        Self::check(&state, FakeOp::AnnotateExposedService)?;
        let service = state
            .exposed
            .get_mut(&key(namespace, name))
            .ok_or_else(|| api_error(404))?;
        service
            .annotations_mut()
            .insert(annotation.to_string(), value.to_string());
        let updated = service.clone();
        state.writes.push(Write::Annotate {
            name: name.to_string(),
            key: annotation.to_string(),
            value: value.to_string(),
        });
        Ok(updated)
    }

    async fn patch_exposed_service_state(
        &self,
        namespace: &str,
        name: &str,
        new_state: ServiceState,
    ) -> Result<(), kube::Error> {
        let mut state = self.state.lock();
        Self::check(&state, FakeOp::PatchState)?;
        let service = state
            .exposed
            .get_mut(&key(namespace, name))
            .ok_or_else(|| api_error(404))?;
        service.status = Some(ExposedServiceStatus {
            state: Some(new_state),
        });
        state.writes.push(Write::State {
            name: name.to_string(),
            state: new_state,
        });
        Ok(())
    }

    async fn get_endpoint(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Endpoint>, kube::Error> {
        let state = self.state.lock();
        Self::check(&state, FakeOp::GetEndpoint)?;
        Ok(state.endpoints.get(&key(namespace, name)).cloned())
    }

    async fn get_core_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, kube::Error> {
        let state = self.state.lock();
        Self::check(&state, FakeOp::GetCoreService)?;
        Ok(state.core.get(&key(namespace, name)).cloned())
    }

    async fn create_core_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, kube::Error> {
        let mut state = self.state.lock();
        Self::check(&state, FakeOp::CreateCoreService)?;

        state.next_suffix += 1;
        let name = match (&service.metadata.name, &service.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => format!("{prefix}{:05}", state.next_suffix),
            (None, None) => return Err(api_error(422)),
        };
        if state.core.contains_key(&key(namespace, &name)) {
            return Err(api_error(409));
        }

        let mut created = service.clone();
        created.metadata.name = Some(name.clone());
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(format!("uid-{name}"));
        created.metadata.resource_version = Some("1".to_string());
        if state.assign_cluster_ips {
            state.next_ip += 1;
            let ip = format!("10.0.0.{}", state.next_ip - 1);
            created
                .spec
                .get_or_insert_with(ServiceSpec::default)
                .cluster_ip = Some(ip);
        }

        state.core.insert(key(namespace, &name), created.clone());
        if !state.index_lag {
            state
                .index
                .apply_watcher_event(&watcher::Event::Apply(created.clone()));
        }
        state.writes.push(Write::Create { name });
        Ok(created)
    }

    async fn replace_core_service(
        &self,
        namespace: &str,
        name: &str,
        service: &Service,
    ) -> Result<Service, kube::Error> {
        let mut state = self.state.lock();
        Self::check(&state, FakeOp::ReplaceCoreService)?;
        let stored = state
            .core
            .get(&key(namespace, name))
            .ok_or_else(|| api_error(404))?;
        if stored.metadata.resource_version != service.metadata.resource_version {
            return Err(api_error(409));
        }

        let mut replaced = service.clone();
        let version = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        replaced.metadata.resource_version = Some((version + 1).to_string());

        state.core.insert(key(namespace, name), replaced.clone());
        if !state.index_lag {
            state
                .index
                .apply_watcher_event(&watcher::Event::Apply(replaced.clone()));
        }
        state.writes.push(Write::Replace {
            name: name.to_string(),
        });
        Ok(replaced)
    }

    async fn delete_core_service(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        let mut state = self.state.lock();
        Self::check(&state, FakeOp::DeleteCoreService)?;
        if let Some(removed) = state.core.remove(&key(namespace, name)) {
            if !state.index_lag {
                state
                    .index
                    .apply_watcher_event(&watcher::Event::Delete(removed));
            }
        }
        state.writes.push(Write::Delete {
            name: name.to_string(),
        });
        Ok(())
    }
}

/// An exposed service `namespace/name` routed through `endpoint`, selecting
/// `app=web` and exposing port 80 to 8080.
pub fn exposed_service(namespace: &str, name: &str, endpoint: &str) -> ExposedService {
    let mut service = ExposedService::new(
        name,
        ExposedServiceSpec {
            endpoint: endpoint.to_string(),
            selector: BTreeMap::from([("app".to_string(), "web".to_string())]),
            ports: vec![ServicePortMapping {
                name: Some("http".to_string()),
                protocol: None,
                port: 80,
                target_port: Some(8080),
                remote_port: Some(18080),
            }],
            service_labels: None,
        },
    );
    service.metadata.namespace = Some(namespace.to_string());
    service.metadata.uid = Some(format!("uid-{namespace}-{name}"));
    service
}

/// Mark an exposed service as being deleted.
pub fn mark_deleting(service: &mut ExposedService) {
    let timestamp: Time = serde_json::from_value(serde_json::json!("2025-06-01T12:00:00Z"))
        .expect("valid RFC 3339 timestamp");
    service.metadata.deletion_timestamp = Some(timestamp);
}

pub fn endpoint(namespace: &str, name: &str, state: Option<&str>) -> Endpoint {
    let mut endpoint = Endpoint::new(
        name,
        EndpointSpec {
            server_addr: "frps.example.com".to_string(),
            server_port: 7000,
            token_secret_ref: None,
        },
    );
    endpoint.metadata.namespace = Some(namespace.to_string());
    endpoint.status = state.map(|s| EndpointStatus {
        state: Some(s.to_string()),
    });
    endpoint
}

/// A core Service in `namespace` owned by the exposed service `owner`.
pub fn owned_core_service(namespace: &str, name: &str, owner: &str, ip: Option<&str>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("1".to_string()),
            owner_references: Some(vec![
                k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                    api_version: API_GROUP_VERSION.to_string(),
                    kind: KIND_SERVICE.to_string(),
                    name: owner.to_string(),
                    uid: format!("uid-{namespace}-{owner}"),
                    controller: Some(true),
                    block_owner_deletion: Some(true),
                },
            ]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: ip.map(str::to_string),
            ..Default::default()
        }),
        ..Default::default()
    }
}
