// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Re-check and error back-off policy for exposed services.
//!
//! Successful passes requeue on a fixed schedule chosen by the resulting
//! state: slow while `Active`, fast otherwise, since endpoint health changes
//! are only noticed by polling.
//!
//! Failed passes are retried by the controller's error policy with
//! exponential back-off per object. The failure count is reset by the next
//! successful pass.

use crate::constants::{
    ACTIVE_REQUEUE_SECS, ERROR_BACKOFF_INITIAL_SECS, ERROR_BACKOFF_MAX_SECS,
    ERROR_BACKOFF_MULTIPLIER, INACTIVE_REQUEUE_SECS,
};
use crate::crd::ServiceState;
use crate::index::OwnerKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Re-check delay after a successful pass that left the service in `state`.
#[must_use]
pub fn requeue_for_state(state: ServiceState) -> Duration {
    match state {
        ServiceState::Active => Duration::from_secs(ACTIVE_REQUEUE_SECS),
        ServiceState::Inactive => Duration::from_secs(INACTIVE_REQUEUE_SECS),
    }
}

/// Delay before retrying after the `attempt`-th consecutive failure (1-based).
#[must_use]
pub fn error_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let factor = u64::from(ERROR_BACKOFF_MULTIPLIER)
        .checked_pow(exponent)
        .unwrap_or(u64::MAX);
    let secs = ERROR_BACKOFF_INITIAL_SECS
        .saturating_mul(factor)
        .min(ERROR_BACKOFF_MAX_SECS);
    Duration::from_secs(secs)
}

/// Consecutive failure counts per exposed service.
#[derive(Default)]
pub struct ErrorBackoff {
    failures: Mutex<HashMap<OwnerKey, u32>>,
}

impl ErrorBackoff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure for `key` and return how long to wait before retrying.
    pub fn next_delay(&self, key: &OwnerKey) -> Duration {
        let mut failures = self.failures.lock();
        let attempt = failures.entry(key.clone()).or_insert(0);
        *attempt = attempt.saturating_add(1);
        error_delay(*attempt)
    }

    /// Forget past failures for `key`.
    pub fn reset(&self, key: &OwnerKey) {
        self.failures.lock().remove(key);
    }

    /// Current consecutive failure count for `key`.
    #[must_use]
    pub fn failures(&self, key: &OwnerKey) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod backoff_tests;
