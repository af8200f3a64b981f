// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the exposed service controller.
//!
//! Every reconciliation receives an `Arc<Context>` that contains:
//! - the cluster API seam ([`ServiceApi`])
//! - the owner index of core Services
//! - per-object error back-off state
//! - the shutdown signal, used to cancel in-flight work

use crate::index::OwnerIndex;
use crate::reconcilers::backoff::ErrorBackoff;
use crate::reconcilers::resources::{KubeServiceApi, ServiceApi};
use tokio::sync::watch;

/// Shared context passed to every reconciliation.
///
/// Generic over the API so tests can run the controller callbacks against an
/// in-memory cluster.
pub struct Context<A: ServiceApi + ?Sized = KubeServiceApi> {
    /// Index of owned core Services, kept current by the Service watcher
    pub index: OwnerIndex,

    /// Consecutive failure counts driving the error policy
    pub backoff: ErrorBackoff,

    /// Flips to `true` when the process starts shutting down
    pub shutdown: watch::Receiver<bool>,

    /// Cluster operations
    pub api: A,
}

impl<A: ServiceApi> Context<A> {
    #[must_use]
    pub fn new(api: A, index: OwnerIndex, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            index,
            backoff: ErrorBackoff::new(),
            shutdown,
            api,
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
