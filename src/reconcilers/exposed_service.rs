// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation of exposed services.
//!
//! One pass takes the identity of an exposed service and converges:
//!
//! 1. the endpoint label on the exposed service,
//! 2. the owned core Service (created lazily, then updated in place so its
//!    cluster IP stays stable),
//! 3. the cluster IP annotation on the exposed service,
//! 4. `status.state`, derived from the referenced endpoint.
//!
//! Every write is conditioned on an actual difference. A second pass with no
//! external change performs no writes, which keeps the slow/fast re-check
//! schedule from being disturbed by self-inflicted watch events.
//!
//! Owned core Services are found through the [`OwnerIndex`], never through a
//! list stored on the exposed service.

use super::backoff::requeue_for_state;
use super::resources::ServiceApi;
use super::status_changed;
use crate::constants::{
    DEFAULT_PORT_PROTOCOL, ENDPOINT_STATE_CONNECTED, HEADLESS_CLUSTER_IP, KIND_SERVICE,
    RESOURCE_TYPE_CORE_SERVICE,
};
use crate::crd::{Endpoint, ExposedService, ServicePortMapping, ServiceState};
use crate::errors::ReconcileError;
use crate::index::{OwnerIndex, OwnerKey};
use crate::labels::{CLUSTER_IP_ANNOTATION, ENDPOINT_NAME_LABEL};
use crate::metrics;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the caller should do after a successful pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing left to watch for (the exposed service is gone).
    Done,
    /// Reconcile again after the given delay.
    RequeueAfter(Duration),
}

impl ReconcileOutcome {
    /// The controller runtime action for this outcome.
    #[must_use]
    pub fn into_action(self) -> Action {
        match self {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Reconcile the exposed service `namespace/name`.
///
/// Safe to call repeatedly and out of order. A missing exposed service is a
/// deletion and ends with [`ReconcileOutcome::Done`].
///
/// # Errors
///
/// Returns [`ReconcileError`] when any API call fails with something other
/// than an expected 404. Writes made before the failure are kept; the next
/// pass picks up from whatever state the cluster is in.
pub async fn reconcile_exposed_service<A>(
    api: &A,
    index: &OwnerIndex,
    namespace: &str,
    name: &str,
) -> Result<ReconcileOutcome, ReconcileError>
where
    A: ServiceApi + ?Sized,
{
    let fetched = api
        .get_exposed_service(namespace, name)
        .await
        .map_err(|e| ReconcileError::kube("fetching exposed service", namespace, name, e))?;

    let Some(mut exposed) = fetched else {
        index.forget_created(&OwnerKey::new(namespace, name));
        delete_exposed_service(namespace, name);
        return Ok(ReconcileOutcome::Done);
    };

    if exposed.metadata.deletion_timestamp.is_some() {
        debug!(namespace, name, "Exposed service is being deleted");
        index.forget_created(&OwnerKey::new(namespace, name));
        delete_exposed_service(namespace, name);
        return Ok(ReconcileOutcome::Done);
    }

    debug!(namespace, name, endpoint = %exposed.spec.endpoint, "Reconciling exposed service");

    ensure_endpoint_label(api, &mut exposed, namespace, name).await?;

    let bound = sync_core_service(api, index, &exposed, namespace, name).await?;

    if let Some(address) = bound.as_deref().and_then(cluster_ip) {
        ensure_cluster_ip_annotation(api, &mut exposed, namespace, name, address).await?;
    }

    let endpoint = api
        .get_endpoint(namespace, &exposed.spec.endpoint)
        .await
        .map_err(|e| ReconcileError::kube("fetching endpoint", namespace, name, e))?;
    if endpoint.is_none() {
        info!(
            namespace,
            name,
            endpoint = %exposed.spec.endpoint,
            "Endpoint does not exist yet, will check again later"
        );
    }

    let state = derive_service_state(endpoint.as_ref());
    let current = exposed.status.as_ref().and_then(|s| s.state);
    if status_changed(&current, &Some(state)) {
        info!(namespace, name, from = ?current, to = %state, "Updating exposed service state");
        api.patch_exposed_service_state(namespace, name, state)
            .await
            .map_err(|e| ReconcileError::kube("updating status", namespace, name, e))?;
    }

    Ok(ReconcileOutcome::RequeueAfter(requeue_for_state(state)))
}

/// Hook run when an exposed service no longer exists.
///
/// Owned core Services carry an owner reference, so the garbage collector
/// removes them; nothing is deleted here.
pub fn delete_exposed_service(namespace: &str, name: &str) {
    info!(namespace, name, "Exposed service deleted, owned Services are garbage collected");
}

/// Derive the state of an exposed service from its endpoint.
///
/// `Active` only when the endpoint exists and reports `Connected`.
#[must_use]
pub fn derive_service_state(endpoint: Option<&Endpoint>) -> ServiceState {
    let connected = endpoint
        .and_then(|e| e.status.as_ref())
        .and_then(|s| s.state.as_deref())
        == Some(ENDPOINT_STATE_CONNECTED);
    if connected {
        ServiceState::Active
    } else {
        ServiceState::Inactive
    }
}

async fn ensure_endpoint_label<A>(
    api: &A,
    exposed: &mut ExposedService,
    namespace: &str,
    name: &str,
) -> Result<(), ReconcileError>
where
    A: ServiceApi + ?Sized,
{
    let wanted = exposed.spec.endpoint.as_str();
    if exposed.labels().get(ENDPOINT_NAME_LABEL).map(String::as_str) == Some(wanted) {
        return Ok(());
    }

    debug!(namespace, name, endpoint = wanted, "Labelling exposed service with endpoint");
    let updated = api
        .label_exposed_service(namespace, name, ENDPOINT_NAME_LABEL, wanted)
        .await
        .map_err(|e| ReconcileError::kube("updating labels", namespace, name, e))?;
    exposed.metadata = updated.metadata;
    Ok(())
}

async fn ensure_cluster_ip_annotation<A>(
    api: &A,
    exposed: &mut ExposedService,
    namespace: &str,
    name: &str,
    cluster_ip: &str,
) -> Result<(), ReconcileError>
where
    A: ServiceApi + ?Sized,
{
    if exposed.annotations().get(CLUSTER_IP_ANNOTATION).map(String::as_str) == Some(cluster_ip) {
        return Ok(());
    }

    info!(namespace, name, cluster_ip, "Recording cluster IP on exposed service");
    let updated = api
        .annotate_exposed_service(namespace, name, CLUSTER_IP_ANNOTATION, cluster_ip)
        .await
        .map_err(|e| ReconcileError::kube("updating annotations", namespace, name, e))?;
    exposed.metadata = updated.metadata;
    Ok(())
}

/// Make sure exactly one owned core Service exists and matches the spec.
///
/// Returns the bound Service as last seen (after any write).
async fn sync_core_service<A>(
    api: &A,
    index: &OwnerIndex,
    exposed: &ExposedService,
    namespace: &str,
    name: &str,
) -> Result<Option<Arc<Service>>, ReconcileError>
where
    A: ServiceApi + ?Sized,
{
    let owner = OwnerKey::new(namespace, name);
    let children = owned_children(api, index, &owner, exposed).await?;

    let Some(bound_at) = pick_bound(&children, exposed) else {
        let created = create_core_service(api, exposed, namespace, name).await?;
        index.record_created(&owner, &created.name_any());
        return Ok(Some(Arc::new(created)));
    };

    for (position, surplus) in children.iter().enumerate() {
        if position == bound_at {
            continue;
        }
        let surplus_name = surplus.name_any();
        warn!(
            namespace,
            name,
            service = %surplus_name,
            "Deleting surplus core Service owned by exposed service"
        );
        api.delete_core_service(namespace, &surplus_name)
            .await
            .map_err(|e| ReconcileError::kube("deleting surplus core Service", namespace, name, e))?;
        metrics::record_resource_deleted(RESOURCE_TYPE_CORE_SERVICE);
    }

    let existing = &children[bound_at];
    let Some(desired) = updated_core_service(existing, exposed) else {
        return Ok(Some(Arc::clone(existing)));
    };

    let service_name = existing.name_any();
    info!(namespace, name, service = %service_name, "Updating core Service");
    let replaced = api
        .replace_core_service(namespace, &service_name, &desired)
        .await
        .map_err(|e| ReconcileError::kube("updating core Service", namespace, name, e))?;
    metrics::record_resource_updated(RESOURCE_TYPE_CORE_SERVICE);
    Ok(Some(Arc::new(replaced)))
}

/// Owned core Services, ordered by name, including one this controller
/// created that the watcher has not delivered yet.
async fn owned_children<A>(
    api: &A,
    index: &OwnerIndex,
    owner: &OwnerKey,
    exposed: &ExposedService,
) -> Result<Vec<Arc<Service>>, ReconcileError>
where
    A: ServiceApi + ?Sized,
{
    let mut children = index.owned_by(owner);
    let Some(created) = index.unindexed_create(owner) else {
        return Ok(children);
    };

    let (namespace, name) = (owner.namespace.as_str(), owner.name.as_str());
    let fetched = api
        .get_core_service(namespace, &created)
        .await
        .map_err(|e| ReconcileError::kube("fetching created core Service", namespace, name, e))?;
    let uid = exposed.uid();
    match fetched {
        Some(service)
            if service
                .owner_references()
                .iter()
                .any(|o| Some(&o.uid) == uid.as_ref()) =>
        {
            debug!(namespace, name, service = %created, "Core Service not indexed yet, using it directly");
            children.push(Arc::new(service));
            children.sort_by_key(|child| child.name_any());
        }
        _ => {
            debug!(namespace, name, service = %created, "Created core Service is gone");
            index.forget_created(owner);
        }
    }
    Ok(children)
}

async fn create_core_service<A>(
    api: &A,
    exposed: &ExposedService,
    namespace: &str,
    name: &str,
) -> Result<Service, ReconcileError>
where
    A: ServiceApi + ?Sized,
{
    let service = build_core_service(exposed, namespace)?;
    info!(namespace, name, "Creating core Service for exposed service");
    let created = api
        .create_core_service(namespace, &service)
        .await
        .map_err(|e| ReconcileError::kube("creating core Service", namespace, name, e))?;
    metrics::record_resource_created(RESOURCE_TYPE_CORE_SERVICE);
    info!(namespace, name, service = %created.name_any(), "Created core Service");
    Ok(created)
}

/// Choose which owned Service is bound.
///
/// Prefers the one whose cluster IP is already recorded on the exposed
/// service so the published address survives cleanup of duplicates;
/// otherwise the first by name.
fn pick_bound(children: &[Arc<Service>], exposed: &ExposedService) -> Option<usize> {
    if children.is_empty() {
        return None;
    }
    let recorded = exposed
        .annotations()
        .get(CLUSTER_IP_ANNOTATION)
        .map(String::as_str);
    let by_address = recorded.and_then(|ip| {
        children
            .iter()
            .position(|child| cluster_ip(child) == Some(ip))
    });
    Some(by_address.unwrap_or(0))
}

/// Build a new core Service for `exposed`, owned by it.
///
/// # Errors
///
/// Returns [`ReconcileError::MissingMetadata`] if `exposed` has no uid, since
/// an owner reference cannot be built without one.
pub fn build_core_service(
    exposed: &ExposedService,
    namespace: &str,
) -> Result<Service, ReconcileError> {
    let name = exposed.name_any();
    let owner = exposed
        .controller_owner_ref(&())
        .ok_or_else(|| ReconcileError::MissingMetadata {
            kind: KIND_SERVICE,
            field: "uid",
            namespace: namespace.to_string(),
            name: name.clone(),
        })?;

    let labels = exposed
        .spec
        .service_labels
        .clone()
        .unwrap_or_else(|| exposed.labels().clone());

    Ok(Service {
        metadata: ObjectMeta {
            generate_name: Some(format!("{name}-")),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: desired_selector(exposed),
            ports: Some(desired_ports(&exposed.spec.ports)),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// The Service to write if `existing` has drifted from `exposed`, or `None`.
///
/// Selector and ports are overwritten. Labels are replaced by the overrides
/// when configured and left alone otherwise.
#[must_use]
pub fn updated_core_service(existing: &Service, exposed: &ExposedService) -> Option<Service> {
    let selector = desired_selector(exposed);
    let ports = desired_ports(&exposed.spec.ports);
    let labels = exposed.spec.service_labels.as_ref();

    let spec = existing.spec.as_ref();
    let selector_matches = spec.and_then(|s| s.selector.as_ref()).filter(|s| !s.is_empty())
        == selector.as_ref();
    let ports_match = ports_equal(
        spec.and_then(|s| s.ports.as_deref()).unwrap_or_default(),
        &ports,
    );
    let labels_match = labels.is_none_or(|wanted| existing.labels() == wanted);

    if selector_matches && ports_match && labels_match {
        return None;
    }

    let mut updated = existing.clone();
    let spec = updated.spec.get_or_insert_with(ServiceSpec::default);
    spec.selector = selector;
    spec.ports = Some(ports);
    if let Some(wanted) = labels {
        updated.metadata.labels = Some(wanted.clone());
    }
    Some(updated)
}

fn desired_selector(exposed: &ExposedService) -> Option<BTreeMap<String, String>> {
    if exposed.spec.selector.is_empty() {
        None
    } else {
        Some(exposed.spec.selector.clone())
    }
}

/// Core Service ports for the given mappings, with API server defaults filled in.
#[must_use]
pub fn desired_ports(mappings: &[ServicePortMapping]) -> Vec<ServicePort> {
    mappings
        .iter()
        .map(|mapping| ServicePort {
            name: mapping.name.clone(),
            protocol: Some(
                mapping
                    .protocol
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PORT_PROTOCOL.to_string()),
            ),
            port: mapping.port,
            target_port: Some(IntOrString::Int(mapping.target_port.unwrap_or(mapping.port))),
            ..Default::default()
        })
        .collect()
}

/// Compare ports on the fields this controller owns, applying server defaults.
fn ports_equal(existing: &[ServicePort], desired: &[ServicePort]) -> bool {
    existing.len() == desired.len()
        && existing
            .iter()
            .zip(desired)
            .all(|(have, want)| port_key(have) == port_key(want))
}

fn port_key(port: &ServicePort) -> (Option<&str>, &str, i32, IntOrString) {
    (
        port.name.as_deref(),
        port.protocol.as_deref().unwrap_or(DEFAULT_PORT_PROTOCOL),
        port.port,
        port.target_port
            .clone()
            .unwrap_or(IntOrString::Int(port.port)),
    )
}

/// Assigned cluster IP of a core Service, if any.
#[must_use]
pub fn cluster_ip(service: &Service) -> Option<&str> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != HEADLESS_CLUSTER_IP)
}

#[cfg(test)]
#[path = "exposed_service_tests.rs"]
mod exposed_service_tests;
