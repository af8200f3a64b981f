// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command-line configuration for the controller binary.
//!
//! Every flag can also be set through an environment variable, which is how
//! the deployment manifests configure the controller.

use crate::constants::{METRICS_SERVER_BIND_ADDRESS, TOKIO_WORKER_THREADS};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;

/// frp exposed service controller
#[derive(Parser, Debug, Clone)]
#[command(name = "frpcontroller", version, about, long_about = None)]
pub struct ControllerArgs {
    /// Address for the metrics and health probe server
    #[arg(long, env = "FRP_METRICS_BIND_ADDRESS", default_value = METRICS_SERVER_BIND_ADDRESS)]
    pub metrics_bind_address: SocketAddr,

    /// Only watch this namespace (all namespaces when unset)
    #[arg(long, env = "FRP_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Number of tokio worker threads
    #[arg(long, env = "FRP_WORKER_THREADS", default_value_t = TOKIO_WORKER_THREADS)]
    pub worker_threads: usize,

    /// Log output format
    #[arg(long, env = "RUST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, ignore_case = true)]
    pub log_format: LogFormat,
}

/// Output format for log lines.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact, human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
