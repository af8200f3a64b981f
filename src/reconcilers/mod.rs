// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic for exposed services.
//!
//! # Reconciliation Architecture
//!
//! The controller follows the standard Kubernetes level-triggered pattern:
//!
//! 1. **Fetch** - Re-read the exposed service by identity; never trust the event payload
//! 2. **Converge** - Make the owned core Service match the spec, found through the owner index
//! 3. **Publish** - Record the cluster IP and endpoint-derived state on the exposed service
//! 4. **Requeue** - Re-check after 30s when `Active`, 10s otherwise
//!
//! # Modules
//!
//! - [`exposed_service`] - [`reconcile_exposed_service`] and its pure helpers
//! - [`resources`] - The [`ServiceApi`] seam and its Kubernetes implementation
//! - [`backoff`] - Requeue schedule and per-object error back-off
//!
//! # Example: Running One Pass
//!
//! ```rust,no_run
//! use frpcontroller::index::owner_index;
//! use frpcontroller::reconcilers::{reconcile_exposed_service, KubeServiceApi};
//! use kube::Client;
//!
//! async fn run_once(client: Client) -> anyhow::Result<()> {
//!     let (index, _writer) = owner_index();
//!     let api = KubeServiceApi::new(client);
//!     let outcome = reconcile_exposed_service(&api, &index, "apps", "web").await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod exposed_service;
pub mod resources;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::{error_delay, requeue_for_state, ErrorBackoff};
pub use exposed_service::{
    delete_exposed_service, derive_service_state, reconcile_exposed_service, ReconcileOutcome,
};
pub use resources::{KubeServiceApi, ServiceApi};

/// Check if a status value has actually changed compared to the current status.
///
/// Status writes raise watch events on the exposed service, which trigger
/// another reconciliation. Writing only on change keeps a converged object
/// quiet between scheduled re-checks.
///
/// # Example
///
/// ```rust
/// use frpcontroller::crd::ServiceState;
/// use frpcontroller::reconcilers::status_changed;
///
/// assert!(status_changed(&None, &Some(ServiceState::Inactive)));
/// assert!(!status_changed(&Some(ServiceState::Active), &Some(ServiceState::Active)));
/// ```
#[must_use]
pub fn status_changed<T: PartialEq>(current_value: &Option<T>, new_value: &Option<T>) -> bool {
    current_value != new_value
}
