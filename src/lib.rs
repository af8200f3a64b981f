// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # frpcontroller - frp tunnel exposure for Kubernetes
//!
//! A Kubernetes controller that keeps a cluster `Service` in step with each
//! exposed service custom resource (`core.go.build4.fun/v1`, kind `Service`)
//! and reports whether the tunnel endpoint it routes through is connected.
//!
//! ## Overview
//!
//! For every exposed service the controller:
//!
//! - labels it with the name of its endpoint
//! - creates one owned core Service with the declared selector and ports, and
//!   updates it in place afterwards so its cluster IP stays stable
//! - records that cluster IP in an annotation
//! - sets `status.state` to `Active` or `Inactive` from the endpoint's state
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - Reconciliation logic and the cluster API seam
//! - [`index`] - Owner index of core Services
//! - [`controller`] - Controller runtime wiring, error policy and cancellation
//! - [`context`] - Shared state passed to every reconciliation
//! - [`server`] - Metrics and probe endpoints
//! - [`config`] - Command-line and environment configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use frpcontroller::crd::{ExposedService, ExposedServiceSpec, ServicePortMapping};
//! use std::collections::BTreeMap;
//!
//! let web = ExposedService::new(
//!     "web",
//!     ExposedServiceSpec {
//!         endpoint: "office-gateway".to_string(),
//!         selector: BTreeMap::from([("app".to_string(), "web".to_string())]),
//!         ports: vec![ServicePortMapping {
//!             name: Some("http".to_string()),
//!             protocol: None,
//!             port: 80,
//!             target_port: Some(8080),
//!             remote_port: Some(18080),
//!         }],
//!         service_labels: None,
//!     },
//! );
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod controller;
pub mod crd;
pub mod errors;
pub mod index;
pub mod labels;
pub mod metrics;
pub mod reconcilers;
pub mod server;
