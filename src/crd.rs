// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for exposing frp tunnel endpoints.
//!
//! # Resource Types
//!
//! - [`ExposedService`] (kind `Service`) - Declares that a set of pods should be
//!   reachable through a tunnel endpoint, and which ports to expose.
//! - [`Endpoint`] - One reverse-proxy connection to an frp server. Its
//!   `status.state` is published by the tunnel client; this controller only reads it.
//!
//! # Example: Declaring an Exposed Service
//!
//! ```rust,no_run
//! use frpcontroller::crd::{ExposedServiceSpec, ServicePortMapping};
//! use std::collections::BTreeMap;
//!
//! let spec = ExposedServiceSpec {
//!     endpoint: "office-gateway".to_string(),
//!     selector: BTreeMap::from([("app".to_string(), "web".to_string())]),
//!     ports: vec![ServicePortMapping {
//!         name: Some("http".to_string()),
//!         protocol: None,
//!         port: 80,
//!         target_port: Some(8080),
//!         remote_port: Some(18080),
//!     }],
//!     service_labels: None,
//! };
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single port exposed through the tunnel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortMapping {
    /// Port name, required by Kubernetes when more than one port is exposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Transport protocol: `TCP` (default) or `UDP`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(regex(pattern = r"^(TCP|UDP)$"))]
    pub protocol: Option<String>,

    /// Port served by the produced cluster Service.
    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,

    /// Port on the selected pods. Defaults to `port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 65535))]
    pub target_port: Option<i32>,

    /// Port published on the frp server. Consumed by the tunnel client only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 65535))]
    pub remote_port: Option<i32>,
}

/// `ExposedService` declares pods to publish through a tunnel endpoint.
///
/// The controller creates one core `Service` owned by this resource, keeps its
/// selector, ports and (optionally) labels in sync, and reports whether the
/// referenced endpoint is connected.
///
/// # Example
///
/// ```yaml
/// apiVersion: core.go.build4.fun/v1
/// kind: Service
/// metadata:
///   name: web
///   namespace: apps
/// spec:
///   endpoint: office-gateway
///   selector:
///     app: web
///   ports:
///     - name: http
///       port: 80
///       targetPort: 8080
///       remotePort: 18080
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "core.go.build4.fun",
    version = "v1",
    kind = "Service",
    root = "ExposedService",
    namespaced,
    shortname = "frpsvc",
    doc = "Service exposes a set of pods through an frp tunnel endpoint. The controller maintains one owned core Service mirroring its selector and ports.",
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.endpoint"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "ExposedServiceStatus")]
#[serde(rename_all = "camelCase")]
pub struct ExposedServiceSpec {
    /// Name of the `Endpoint` in the same namespace that carries the tunnel.
    pub endpoint: String,

    /// Pod label selector copied onto the produced Service.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    /// Ports exposed by the produced Service.
    #[serde(default)]
    pub ports: Vec<ServicePortMapping>,

    /// Labels for the produced Service. When set, they replace the Service's
    /// label set entirely; when absent, labels are inherited at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_labels: Option<BTreeMap<String, String>>,
}

/// Whether an exposed service is currently reachable through its tunnel.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum ServiceState {
    /// The referenced endpoint exists and is connected.
    Active,
    /// The referenced endpoint is missing or not connected.
    #[default]
    Inactive,
}

impl ServiceState {
    /// The string form stored in `status.state`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Active => "Active",
            ServiceState::Inactive => "Inactive",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of an [`ExposedService`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposedServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ServiceState>,
}

/// `Endpoint` describes one connection to an frp server.
///
/// The tunnel client owns `status.state`; values other than `Connected` are
/// treated as not connected.
///
/// # Example
///
/// ```yaml
/// apiVersion: core.go.build4.fun/v1
/// kind: Endpoint
/// metadata:
///   name: office-gateway
///   namespace: apps
/// spec:
///   serverAddr: frps.example.com
///   serverPort: 7000
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "core.go.build4.fun",
    version = "v1",
    kind = "Endpoint",
    namespaced,
    doc = "Endpoint represents one reverse-proxy connection to an frp server and reports its connection state.",
    printcolumn = r#"{"name":"Server","type":"string","jsonPath":".spec.serverAddr"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[kube(status = "EndpointStatus")]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    /// Address of the frp server.
    pub server_addr: String,

    /// Control port of the frp server.
    #[serde(default = "default_server_port")]
    #[schemars(range(min = 1, max = 65535))]
    pub server_port: i32,

    /// Name of a Secret in the same namespace holding the frp auth token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret_ref: Option<String>,
}

fn default_server_port() -> i32 {
    7000
}

/// Connection state of an [`Endpoint`], e.g. `Connected` or `Disconnected`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
