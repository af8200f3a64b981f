// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Label and annotation keys written by the controller.
//!
//! Both values are derived caches: safe to recompute, never authoritative.

/// Label on an exposed `Service` recording which `Endpoint` it targets
pub const ENDPOINT_NAME_LABEL: &str = "frp.1eb100.net/endpoint";

/// Annotation on an exposed `Service` mirroring the cluster IP of its bound core Service
pub const CLUSTER_IP_ANNOTATION: &str = "frp.1eb100.net/cluster-ip";
