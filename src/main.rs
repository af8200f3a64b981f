// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use frpcontroller::{
    config::{ControllerArgs, LogFormat},
    constants::TOKIO_THREAD_NAME,
    controller,
    index::{index_watcher, owner_index},
    server,
};
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Client,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    let args = ControllerArgs::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.worker_threads)
        .thread_name(TOKIO_THREAD_NAME)
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

fn init_tracing(format: LogFormat) {
    // Respects RUST_LOG if set, otherwise defaults to INFO level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(args: ControllerArgs) -> Result<()> {
    init_tracing(args.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting frp exposed service controller");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => {
                info!(signal, "Received termination signal, initiating graceful shutdown");
                shutdown_tx.send_replace(true);
            }
            Err(e) => error!(error = %e, "Failed to install signal handlers"),
        }
    });

    let namespace = args.watch_namespace.as_deref();
    let services: Api<Service> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    // One core Service watch feeds the owner index and triggers the controller
    let (index, writer) = owner_index();
    let owned = index_watcher(writer, watcher(services, watcher::Config::default()))
        .inspect_err(|e| warn!(error = %e, "Core Service watch error, retrying"))
        .touched_objects()
        .default_backoff();

    let metrics_server = tokio::spawn(server::serve(
        args.metrics_bind_address,
        index.clone(),
        shutdown_rx.clone(),
    ));

    // The controller only returns on shutdown; the metrics server should never exit first
    tokio::select! {
        () = controller::run(client, namespace, index, owned, shutdown_rx) => {
            info!("Controller stopped, exiting");
            Ok(())
        }
        result = metrics_server => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result??;
            anyhow::bail!("Metrics server exited unexpectedly without error")
        }
    }
}

/// Resolve when SIGINT or SIGTERM arrives, naming the signal.
async fn wait_for_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok("SIGINT")
            }
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT")
    }
}
