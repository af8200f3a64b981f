// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the frp controller.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all frp CRDs
pub const API_GROUP: &str = "core.go.build4.fun";

/// API version for all frp CRDs
pub const API_VERSION: &str = "v1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "core.go.build4.fun/v1";

/// Kind name for the exposed `Service` resource
pub const KIND_SERVICE: &str = "Service";

/// Kind name for the tunnel `Endpoint` resource
pub const KIND_ENDPOINT: &str = "Endpoint";

/// Resource type label used for metrics on produced core Services
pub const RESOURCE_TYPE_CORE_SERVICE: &str = "CoreService";

// ============================================================================
// Endpoint Connection States
// ============================================================================

/// Connection state published by the tunnel client when the endpoint is up
pub const ENDPOINT_STATE_CONNECTED: &str = "Connected";

/// Connection state published by the tunnel client when the endpoint is down
pub const ENDPOINT_STATE_DISCONNECTED: &str = "Disconnected";

// ============================================================================
// Re-check Intervals
// ============================================================================

/// Re-check interval once an exposed service is `Active` (slow poll)
pub const ACTIVE_REQUEUE_SECS: u64 = 30;

/// Re-check interval while an exposed service is not `Active` (fast poll)
pub const INACTIVE_REQUEUE_SECS: u64 = 10;

/// Retry delay for a reconciliation that arrives before the owner index is primed
pub const INDEX_PRIMING_REQUEUE_SECS: u64 = 1;

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// First requeue delay after a failed reconciliation
pub const ERROR_BACKOFF_INITIAL_SECS: u64 = 1;

/// Upper bound for the exponential error requeue delay (5 minutes)
pub const ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Growth factor applied to the error requeue delay after each failure
pub const ERROR_BACKOFF_MULTIPLIER: u32 = 2;

// ============================================================================
// Service Defaults
// ============================================================================

/// Protocol assumed for a port mapping that does not name one
pub const DEFAULT_PORT_PROTOCOL: &str = "TCP";

/// Cluster IP value the API server uses for headless services
pub const HEADLESS_CLUSTER_IP: &str = "None";

/// Field manager name used for patches issued by this controller
pub const FIELD_MANAGER: &str = "frpcontroller";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Default number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Thread name prefix for Tokio worker threads
pub const TOKIO_THREAD_NAME: &str = "frp-controller";

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Default bind address for the metrics and probe HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Path for the liveness probe
pub const HEALTHZ_PATH: &str = "/healthz";

/// Path for the readiness probe
pub const READYZ_PATH: &str = "/readyz";
