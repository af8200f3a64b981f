// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes API operations used by the exposed service reconciler.
//!
//! The reconciler talks to the cluster only through [`ServiceApi`]. The
//! production implementation, [`KubeServiceApi`], maps each operation onto a
//! single `kube::Api` request, so every call is one bounded request/response.
//!
//! # Write Strategies
//!
//! - **Merge patch** for the label, annotation and status of the exposed
//!   service: each write touches exactly one key.
//! - **Replace** for owned core Services: the label set must be replaced
//!   rather than merged, and the cached `resourceVersion` gives optimistic
//!   concurrency (a stale copy fails with 409 and is retried).
//!
//! # Example
//!
//! ```rust,no_run
//! use frpcontroller::reconcilers::resources::{KubeServiceApi, ServiceApi};
//! use kube::Client;
//!
//! async fn example(client: Client) -> Result<(), kube::Error> {
//!     let api = KubeServiceApi::new(client);
//!     if let Some(endpoint) = api.get_endpoint("apps", "office-gateway").await? {
//!         println!("{:?}", endpoint.status);
//!     }
//!     Ok(())
//! }
//! ```

use crate::constants::FIELD_MANAGER;
use crate::crd::{Endpoint, ExposedService, ServiceState};
use crate::errors::is_not_found;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::debug;

/// Cluster operations needed to reconcile one exposed service.
///
/// Getters return `Ok(None)` for 404 so callers can tell "absent" apart from
/// a failed request.
#[async_trait]
pub trait ServiceApi: Send + Sync {
    /// Fetch an exposed service.
    async fn get_exposed_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ExposedService>, kube::Error>;

    /// Set one label on an exposed service, returning the updated object.
    async fn label_exposed_service(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<ExposedService, kube::Error>;

    /// Set one annotation on an exposed service, returning the updated object.
    async fn annotate_exposed_service(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<ExposedService, kube::Error>;

    /// Write `status.state` through the status sub-resource.
    async fn patch_exposed_service_state(
        &self,
        namespace: &str,
        name: &str,
        state: ServiceState,
    ) -> Result<(), kube::Error>;

    /// Fetch a tunnel endpoint.
    async fn get_endpoint(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Endpoint>, kube::Error>;

    /// Fetch a core Service by name.
    async fn get_core_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, kube::Error>;

    /// Create a core Service. The name may be generated by the API server.
    async fn create_core_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, kube::Error>;

    /// Replace a core Service wholesale.
    async fn replace_core_service(
        &self,
        namespace: &str,
        name: &str,
        service: &Service,
    ) -> Result<Service, kube::Error>;

    /// Delete a core Service. Deleting an absent Service succeeds.
    async fn delete_core_service(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
}

/// [`ServiceApi`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeServiceApi {
    client: Client,
}

impl KubeServiceApi {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn exposed_services(&self, namespace: &str) -> Api<ExposedService> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn core_services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ServiceApi for KubeServiceApi {
    async fn get_exposed_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ExposedService>, kube::Error> {
        self.exposed_services(namespace).get_opt(name).await
    }

    async fn label_exposed_service(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<ExposedService, kube::Error> {
        debug!(namespace, name, key, value, "Patching label on exposed service");
        let patch = json!({ "metadata": { "labels": { key: value } } });
        self.exposed_services(namespace)
            .patch(name, &Self::patch_params(), &Patch::Merge(&patch))
            .await
    }

    async fn annotate_exposed_service(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<ExposedService, kube::Error> {
        debug!(namespace, name, key, value, "Patching annotation on exposed service");
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        self.exposed_services(namespace)
            .patch(name, &Self::patch_params(), &Patch::Merge(&patch))
            .await
    }

    async fn patch_exposed_service_state(
        &self,
        namespace: &str,
        name: &str,
        state: ServiceState,
    ) -> Result<(), kube::Error> {
        debug!(namespace, name, state = %state, "Patching exposed service status");
        let patch = json!({ "status": { "state": state } });
        self.exposed_services(namespace)
            .patch_status(name, &Self::patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_endpoint(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Endpoint>, kube::Error> {
        Api::<Endpoint>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
    }

    async fn get_core_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, kube::Error> {
        self.core_services(namespace).get_opt(name).await
    }

    async fn create_core_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, kube::Error> {
        self.core_services(namespace)
            .create(&Self::post_params(), service)
            .await
    }

    async fn replace_core_service(
        &self,
        namespace: &str,
        name: &str,
        service: &Service,
    ) -> Result<Service, kube::Error> {
        self.core_services(namespace)
            .replace(name, &Self::post_params(), service)
            .await
    }

    async fn delete_core_service(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        match self
            .core_services(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(namespace, name, "Core Service already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
