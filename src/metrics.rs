//! Process-wide pipeline counters.
//!
//! A deliberately small collector: named monotonic counters plus a
//! snapshot for shutdown reporting and tests. Constructed once by the
//! orchestrator and passed by reference to the components that record
//! into it.

use std::collections::HashMap;
use std::sync::Mutex;

/// Counter names used across the pipeline.
pub mod counter {
    pub const EVENTS_RECEIVED: &str = "events_received";
    pub const POOLS_DETECTED: &str = "pools_detected";
    pub const ANALYSES_RUN: &str = "analyses_run";
    pub const ANALYSES_PASSED: &str = "analyses_passed";
    pub const BUYS_ATTEMPTED: &str = "buys_attempted";
    pub const BUYS_LANDED: &str = "buys_landed";
    pub const SELLS_ATTEMPTED: &str = "sells_attempted";
    pub const SELLS_LANDED: &str = "sells_landed";
    pub const BUNDLE_FALLBACKS: &str = "bundle_fallbacks";
    pub const RPC_FAILOVERS: &str = "rpc_failovers";
    pub const SWEEPS_COMPLETED: &str = "sweeps_completed";
}

#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<HashMap<&'static str, u64>>,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub counters: HashMap<&'static str, u64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &'static str, delta: u64) {
        let mut counters = self.counters.lock().expect("metrics lock");
        *counters.entry(name).or_insert(0) += delta;
    }

    pub fn get(&self, name: &'static str) -> u64 {
        self.counters
            .lock()
            .expect("metrics lock")
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.lock().expect("metrics lock").clone(),
        }
    }
}
