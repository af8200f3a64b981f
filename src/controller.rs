// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller wiring for exposed services.
//!
//! Watches exposed services (the primary resource) and the core Services they
//! own. Any event on either is routed to the owning exposed service's key, and
//! the runtime guarantees at most one in-flight reconciliation per key.
//!
//! The core Service trigger is the same stream that feeds the [`OwnerIndex`],
//! so by the time a Service event triggers a pass the index already holds it.
//!
//! Each reconciliation re-reads the object by identity, so the event payload
//! is only used for its namespace and name.

use crate::constants::{INDEX_PRIMING_REQUEUE_SECS, KIND_SERVICE};
use crate::context::Context;
use crate::crd::ExposedService;
use crate::errors::ReconcileError;
use crate::index::{OwnerIndex, OwnerKey};
use crate::metrics;
use crate::reconcilers::exposed_service::{reconcile_exposed_service, ReconcileOutcome};
use crate::reconcilers::resources::{KubeServiceApi, ServiceApi};
use futures::channel::oneshot;
use futures::{FutureExt, Stream, StreamExt};
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use kube::runtime::watcher::{self, Config};
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Reconcile callback handed to the controller runtime.
///
/// Passes that arrive before the owner index is primed are deferred, since
/// an empty index would look like an exposed service with no Service yet.
///
/// # Errors
///
/// Returns the pass's [`ReconcileError`], or [`ReconcileError::Cancelled`]
/// when shutdown interrupts it.
pub async fn reconcile<A>(
    obj: Arc<ExposedService>,
    ctx: Arc<Context<A>>,
) -> Result<Action, ReconcileError>
where
    A: ServiceApi + 'static,
{
    let start = Instant::now();
    let name = obj.name_any();
    let Some(namespace) = obj.namespace() else {
        return Err(ReconcileError::MissingMetadata {
            kind: KIND_SERVICE,
            field: "namespace",
            namespace: String::new(),
            name,
        });
    };

    if !ctx.index.is_ready() {
        debug!(%namespace, %name, indexed = ctx.index.len(), "Owner index not primed yet, deferring");
        metrics::record_reconciliation_requeue(KIND_SERVICE, "priming");
        return Ok(Action::requeue(Duration::from_secs(INDEX_PRIMING_REQUEUE_SECS)));
    }

    let pass = reconcile_exposed_service(&ctx.api, &ctx.index, &namespace, &name);
    let Some(result) = run_cancellable(pass, ctx.shutdown.clone()).await else {
        info!(%namespace, %name, "Reconciliation cancelled by shutdown");
        return Err(ReconcileError::Cancelled { namespace, name });
    };

    match result {
        Ok(outcome) => {
            ctx.backoff.reset(&OwnerKey::new(&namespace, &name));
            metrics::record_reconciliation_success(KIND_SERVICE, start.elapsed());
            if let ReconcileOutcome::RequeueAfter(delay) = outcome {
                debug!(%namespace, %name, ?delay, "Reconciled exposed service");
                metrics::record_reconciliation_requeue(KIND_SERVICE, "recheck");
            }
            Ok(outcome.into_action())
        }
        Err(e) => {
            metrics::record_reconciliation_error(KIND_SERVICE, start.elapsed());
            error!(%namespace, %name, error = %e, "Failed to reconcile exposed service");
            Err(e)
        }
    }
}

/// Error policy: exponential back-off per exposed service.
pub fn error_policy<A>(obj: Arc<ExposedService>, err: &ReconcileError, ctx: Arc<Context<A>>) -> Action
where
    A: ServiceApi + 'static,
{
    metrics::record_error(KIND_SERVICE, err.metric_label());
    if matches!(err, ReconcileError::Cancelled { .. }) {
        return Action::await_change();
    }

    let key = OwnerKey::new(&obj.namespace().unwrap_or_default(), &obj.name_any());
    let delay = ctx.backoff.next_delay(&key);
    metrics::record_reconciliation_requeue(KIND_SERVICE, "error");
    warn!(
        namespace = %key.namespace,
        name = %key.name,
        failures = ctx.backoff.failures(&key),
        ?delay,
        "Retrying exposed service after error"
    );
    Action::requeue(delay)
}

/// Run `fut` to completion unless shutdown is signalled first.
///
/// Returns `None` when cancelled. A dropped sender is not a shutdown signal.
pub async fn run_cancellable<F>(fut: F, mut shutdown: watch::Receiver<bool>) -> Option<F::Output>
where
    F: Future,
{
    if *shutdown.borrow_and_update() {
        return None;
    }
    tokio::select! {
        biased;
        () = shutdown_requested(&mut shutdown) => None,
        output = fut => Some(output),
    }
}

/// Resolves once the shutdown flag turns `true`.
///
/// Never resolves if the sender is dropped without signalling.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run the exposed service controller until shutdown is signalled.
///
/// `namespace` restricts the exposed service watch to one namespace; `None`
/// watches all. `owned` is the core Service stream that also feeds `index`
/// (see [`crate::index::index_watcher`]). In-flight reconciliations are
/// cancelled through the shutdown signal.
pub async fn run<S>(
    client: Client,
    namespace: Option<&str>,
    index: OwnerIndex,
    owned: S,
    shutdown: watch::Receiver<bool>,
) where
    S: Stream<Item = Result<Service, watcher::Error>> + Send + 'static,
{
    let exposed: Api<ExposedService> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut stop_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_requested(&mut stop_signal).await;
        if stop_tx.send(()).is_err() {
            debug!("Controller already stopped");
        }
    });

    let ctx = Arc::new(Context::new(KubeServiceApi::new(client), index, shutdown));

    info!(namespace = namespace.unwrap_or("<all>"), "Starting exposed service controller");

    Controller::new(exposed, Config::default())
        .owns_stream(owned)
        .graceful_shutdown_on(stop_rx.map(|_| ()))
        .run(
            reconcile::<KubeServiceApi>,
            error_policy::<KubeServiceApi>,
            ctx,
        )
        .for_each(|result| {
            match result {
                Ok((obj, _action)) => {
                    debug!(namespace = ?obj.namespace, name = %obj.name, "Reconcile completed");
                }
                Err(e) => debug!(error = %e, "Reconcile did not complete"),
            }
            futures::future::ready(())
        })
        .await;

    info!("Exposed service controller stopped");
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
