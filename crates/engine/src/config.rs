//! Configuration for the arbitration engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Arbitration engine configuration.
///
/// The windows and deadlines are tunables, not contract; the defaults match
/// the values the scenario harness verifies against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Two cross-source decisions on one subject within this window conflict
    pub coincidence_window: Duration,

    /// Hard end-to-end budget from conflict creation to resolution
    pub resolution_deadline: Duration,

    /// A source unseen for longer than this is reported dead
    pub liveness_window: Duration,

    /// Per-subscriber bus queue bound before oldest-first eviction
    pub bus_queue_capacity: usize,

    /// Per-subject lane queue bound
    pub lane_queue_capacity: usize,

    /// Resolutions retained for history queries
    pub history_capacity: usize,

    /// Source id the engine signs synthesized decisions with
    pub arbiter_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coincidence_window: Duration::from_millis(500),
            resolution_deadline: Duration::from_millis(5000),
            liveness_window: Duration::from_secs(10),
            bus_queue_capacity: 1024,
            lane_queue_capacity: 64,
            history_capacity: 10_000,
            arbiter_id: "arbitration".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the coincidence window
    pub fn with_coincidence_window(mut self, window: Duration) -> Self {
        self.coincidence_window = window;
        self
    }

    /// Set the resolution deadline
    pub fn with_resolution_deadline(mut self, deadline: Duration) -> Self {
        self.resolution_deadline = deadline;
        self
    }

    /// Set the liveness window
    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    /// Set the per-subscriber bus queue bound
    pub fn with_bus_queue_capacity(mut self, capacity: usize) -> Self {
        self.bus_queue_capacity = capacity.max(1);
        self
    }

    /// Set the per-subject lane queue bound
    pub fn with_lane_queue_capacity(mut self, capacity: usize) -> Self {
        self.lane_queue_capacity = capacity.max(1);
        self
    }

    /// Set the resolution history capacity
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    /// Set the engine's own source id
    pub fn with_arbiter_id(mut self, id: impl Into<String>) -> Self {
        self.arbiter_id = id.into();
        self
    }
}
