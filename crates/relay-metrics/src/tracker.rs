use std::sync::Mutex;

use serde::Serialize;

/// Counters reported by the health and stats endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub requests: u64,
    pub premium_requests_used: f64,
}

/// Process-lifetime usage counters. Reset on restart, never evicted.
#[derive(Debug, Default)]
pub struct UsageTracker {
    counters: Mutex<UsageSnapshot>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one forwarded request weighted by `multiplier`.
    pub fn record(&self, multiplier: f64) {
        let weight = if multiplier.is_finite() && multiplier >= 0.0 {
            multiplier
        } else {
            tracing::warn!("Ignoring invalid usage multiplier {}", multiplier);
            0.0
        };

        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters.requests += 1;
        counters.premium_requests_used += weight;
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        *self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
