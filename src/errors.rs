// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for exposed service reconciliation.
//!
//! Not-found responses for the exposed service itself and for its endpoint are
//! expected conditions and never surface here. Everything that does surface is
//! fatal for the current attempt only: the controller's error policy requeues
//! the object with exponential back-off.

use thiserror::Error;

/// Errors that abort a single reconciliation attempt.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// A Kubernetes API call failed with something other than an expected 404.
    #[error("Kubernetes API call failed while {action} for {namespace}/{name}: {source}")]
    Kube {
        /// What the controller was doing (e.g. "creating core Service")
        action: &'static str,
        /// Namespace of the exposed service being reconciled
        namespace: String,
        /// Name of the exposed service being reconciled
        name: String,
        /// The underlying client error
        #[source]
        source: kube::Error,
    },

    /// An object lacks metadata the controller needs to build an owner reference.
    #[error("{kind} {namespace}/{name} is missing metadata.{field}")]
    MissingMetadata {
        /// Kind of the incomplete object
        kind: &'static str,
        /// Name of the missing metadata field
        field: &'static str,
        /// Namespace of the object
        namespace: String,
        /// Name of the object
        name: String,
    },

    /// Shutdown interrupted the reconciliation before it finished.
    #[error("reconciliation of {namespace}/{name} cancelled by shutdown")]
    Cancelled {
        /// Namespace of the exposed service
        namespace: String,
        /// Name of the exposed service
        name: String,
    },
}

impl ReconcileError {
    /// Wrap a client error with the action and object it relates to.
    #[must_use]
    pub fn kube(action: &'static str, namespace: &str, name: &str, source: kube::Error) -> Self {
        ReconcileError::Kube {
            action,
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        }
    }

    /// Short category used as the `error_type` metrics label.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            ReconcileError::Kube { source, .. } if is_conflict(source) => "conflict",
            ReconcileError::Kube { .. } => "api_error",
            ReconcileError::MissingMetadata { .. } => "missing_metadata",
            ReconcileError::Cancelled { .. } => "cancelled",
        }
    }
}

/// Returns `true` when the API server answered 404 Not Found.
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Returns `true` when the API server rejected a write because of a stale resourceVersion.
#[must_use]
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
