// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Owner index: core Services grouped by the exposed service that owns them.
//!
//! The controller never stores a list of children on the parent. Instead the
//! children are re-derived on every reconciliation from this index, which is
//! kept current by a watcher on core Services.
//!
//! # Architecture
//!
//! The index follows the same split as kube-rs reflector stores:
//!
//! - [`OwnerIndexWriter`] is the single writer. It is driven by watcher events
//!   (see [`index_watcher`]) and buffers a full re-list before swapping it in.
//! - [`OwnerIndex`] is a cheap, cloneable read handle shared by all
//!   reconciliation workers.
//!
//! Only owner references whose API group is [`API_GROUP`] and whose kind is
//! [`KIND_SERVICE`] are indexed. References to unrelated kinds that happen to
//! share a name are ignored.
//!
//! # Own writes
//!
//! A Service created by a reconciliation reaches the index only once the
//! watcher delivers it. Until then its name is remembered with
//! [`OwnerIndex::record_created`] and reported by
//! [`OwnerIndex::unindexed_create`], so the next pass can look it up directly
//! instead of creating another one.
//!
//! # Example
//!
//! ```rust
//! use frpcontroller::index::{owner_index, OwnerKey};
//!
//! let (index, _writer) = owner_index();
//! let web = OwnerKey::new("apps", "web");
//! index.record_created(&web, "web-x7k2p");
//! assert!(index.owned_by(&web).is_empty());
//! assert_eq!(index.unindexed_create(&web).as_deref(), Some("web-x7k2p"));
//! ```

use crate::constants::{API_GROUP, KIND_SERVICE};
use futures::{Stream, TryStreamExt};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::watcher;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Identity of an owning exposed service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey {
    pub namespace: String,
    pub name: String,
}

impl OwnerKey {
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Identity of an indexed core Service.
type ChildKey = (String, String);

#[derive(Default)]
struct IndexState {
    children: HashMap<OwnerKey, BTreeMap<String, Arc<Service>>>,
    owners: HashMap<ChildKey, BTreeSet<OwnerKey>>,
}

impl IndexState {
    fn upsert(&mut self, service: &Service) {
        let Some(child) = child_key(service) else {
            return;
        };
        self.remove(&child);

        let owners = owner_keys(service);
        if owners.is_empty() {
            return;
        }

        let service = Arc::new(service.clone());
        for owner in &owners {
            self.children
                .entry(owner.clone())
                .or_default()
                .insert(child.1.clone(), Arc::clone(&service));
        }
        self.owners.insert(child, owners);
    }

    fn remove(&mut self, child: &ChildKey) {
        let Some(owners) = self.owners.remove(child) else {
            return;
        };
        for owner in owners {
            if let Some(children) = self.children.get_mut(&owner) {
                children.remove(&child.1);
                if children.is_empty() {
                    self.children.remove(&owner);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.owners.len()
    }
}

/// Read handle on the owner index.
#[derive(Clone)]
pub struct OwnerIndex {
    state: Arc<RwLock<IndexState>>,
    created: Arc<Mutex<HashMap<OwnerKey, String>>>,
    ready: watch::Receiver<bool>,
}

/// Single writer feeding the owner index from watcher events.
pub struct OwnerIndexWriter {
    state: Arc<RwLock<IndexState>>,
    relist: Option<IndexState>,
    ready: watch::Sender<bool>,
}

/// Create an empty owner index and the writer that maintains it.
#[must_use]
pub fn owner_index() -> (OwnerIndex, OwnerIndexWriter) {
    let state = Arc::new(RwLock::new(IndexState::default()));
    let (ready_tx, ready_rx) = watch::channel(false);
    (
        OwnerIndex {
            state: Arc::clone(&state),
            created: Arc::default(),
            ready: ready_rx,
        },
        OwnerIndexWriter {
            state,
            relist: None,
            ready: ready_tx,
        },
    )
}

impl OwnerIndex {
    /// Core Services owned by the given exposed service, ordered by name.
    #[must_use]
    pub fn owned_by(&self, owner: &OwnerKey) -> Vec<Arc<Service>> {
        self.state
            .read()
            .children
            .get(owner)
            .map(|children| children.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of core Services currently indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the initial list has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Remember that `service` was just created for `owner`.
    ///
    /// Replaces any earlier record for the same owner.
    pub fn record_created(&self, owner: &OwnerKey, service: &str) {
        self.created.lock().insert(owner.clone(), service.to_string());
    }

    /// Name of a Service created for `owner` that the watcher has not delivered yet.
    ///
    /// The record is dropped as soon as the Service shows up in the index.
    #[must_use]
    pub fn unindexed_create(&self, owner: &OwnerKey) -> Option<String> {
        let mut created = self.created.lock();
        let service = created.get(owner)?;
        let indexed = self
            .state
            .read()
            .children
            .get(owner)
            .is_some_and(|children| children.contains_key(service));
        if indexed {
            created.remove(owner);
            return None;
        }
        Some(service.clone())
    }

    /// Drop the created-Service record for `owner`, if any.
    pub fn forget_created(&self, owner: &OwnerKey) {
        self.created.lock().remove(owner);
    }
}

impl OwnerIndexWriter {
    /// Apply one watcher event to the index.
    ///
    /// `Init`..`InitDone` is collected into a fresh map which replaces the live
    /// map in one step, so readers never observe a half-built re-list.
    pub fn apply_watcher_event(&mut self, event: &watcher::Event<Service>) {
        match event {
            watcher::Event::Apply(service) => {
                trace!(service = ?child_key(service), "Indexing applied core Service");
                self.state.write().upsert(service);
            }
            watcher::Event::Delete(service) => {
                if let Some(child) = child_key(service) {
                    trace!(service = ?child, "Removing deleted core Service from index");
                    self.state.write().remove(&child);
                }
            }
            watcher::Event::Init => {
                debug!("Owner index re-list started");
                self.relist = Some(IndexState::default());
            }
            watcher::Event::InitApply(service) => {
                self.relist.get_or_insert_with(IndexState::default).upsert(service);
            }
            watcher::Event::InitDone => {
                let fresh = self.relist.take().unwrap_or_default();
                let indexed = fresh.len();
                *self.state.write() = fresh;
                debug!(indexed, "Owner index re-list complete");
                self.ready.send_replace(true);
            }
        }
        crate::metrics::record_index_size(self.state.read().len());
    }
}

/// Feed a core Service watcher stream into the owner index.
///
/// Events pass through unchanged so the stream can be consumed further.
pub fn index_watcher<W>(
    mut writer: OwnerIndexWriter,
    stream: W,
) -> impl Stream<Item = watcher::Result<watcher::Event<Service>>>
where
    W: Stream<Item = watcher::Result<watcher::Event<Service>>>,
{
    stream.inspect_ok(move |event| writer.apply_watcher_event(event))
}

/// Owners of `service` that are exposed services, keyed within its namespace.
#[must_use]
pub fn owner_keys(service: &Service) -> BTreeSet<OwnerKey> {
    let Some(namespace) = service.metadata.namespace.as_deref() else {
        return BTreeSet::new();
    };
    service
        .metadata
        .owner_references
        .iter()
        .flatten()
        .filter(|owner| is_exposed_service_owner(owner))
        .map(|owner| OwnerKey::new(namespace, &owner.name))
        .collect()
}

/// Whether an owner reference points at an exposed service (any version of our group).
#[must_use]
pub fn is_exposed_service_owner(owner: &OwnerReference) -> bool {
    let group = owner
        .api_version
        .split_once('/')
        .map_or("", |(group, _version)| group);
    owner.kind == KIND_SERVICE && group == API_GROUP
}

fn child_key(service: &Service) -> Option<ChildKey> {
    Some((
        service.metadata.namespace.clone()?,
        service.metadata.name.clone()?,
    ))
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod index_tests;
