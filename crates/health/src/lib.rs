//! Health and observability aggregator
//!
//! Maintains a rolling view of each decision source's liveness and the
//! system's aggregate health. Overall health is weighted by each source's
//! importance from the interaction policy, not a flat average: the
//! `authority` source going dark costs more than a peripheral one.
//! Writers are many (one per source worker); readers tolerate eventually
//! consistent snapshots.

use chrono::{DateTime, Utc};
use dae_core::{Envelope, EnvelopeKind, SourceId};
use dae_policy::InteractionPolicy;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-source view inside a [`HealthSnapshot`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    /// Observed within the liveness window
    pub alive: bool,

    /// Milliseconds since the source was last seen
    pub last_seen_ms: u64,

    /// Importance weight from the interaction policy
    pub weight: f32,

    /// Decisions observed from this source
    pub decisions: u64,

    /// Heartbeats observed from this source
    pub heartbeats: u64,
}

/// Point-in-time view of system health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Per-source liveness, keyed by source id
    pub per_source: BTreeMap<SourceId, SourceHealth>,

    /// Weighted fraction of alive sources, 0..=100
    pub overall_percent: f32,

    /// When this snapshot was taken
    pub taken_at: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Whether a majority-weighted quorum of sources is alive.
    pub fn quorum(&self) -> bool {
        self.overall_percent > 50.0
    }
}

struct SourceActivity {
    last_seen: Instant,
    decisions: u64,
    heartbeats: u64,
}

/// Aggregates liveness signals from all bus traffic
pub struct HealthAggregator {
    sources: DashMap<SourceId, SourceActivity>,
    weights: BTreeMap<SourceId, f32>,
    liveness_window: Duration,
}

impl HealthAggregator {
    /// Seed the aggregator with the policy's known sources.
    ///
    /// Sources start with a fresh last-seen mark so the system does not
    /// report dead before the first heartbeat can arrive.
    pub fn new(policy: &InteractionPolicy, liveness_window: Duration) -> Self {
        let sources = DashMap::new();
        let mut weights = BTreeMap::new();
        for source in policy.sources() {
            sources.insert(
                source.clone(),
                SourceActivity {
                    last_seen: Instant::now(),
                    decisions: 0,
                    heartbeats: 0,
                },
            );
            weights.insert(source.clone(), policy.source_weight(source));
        }
        Self {
            sources,
            weights,
            liveness_window,
        }
    }

    /// Record an explicit heartbeat.
    pub fn record_heartbeat(&self, source: &SourceId) {
        if let Some(mut entry) = self.sources.get_mut(source) {
            entry.last_seen = Instant::now();
            entry.heartbeats += 1;
        } else {
            debug!(%source, "heartbeat from unregistered source ignored");
        }
    }

    /// Record any bus traffic as a liveness signal.
    pub fn record_envelope(&self, envelope: &Envelope) {
        let Envelope::Inbound(inner) = envelope else {
            return;
        };
        if let Some(mut entry) = self.sources.get_mut(&inner.source_id) {
            entry.last_seen = Instant::now();
            if inner.kind == EnvelopeKind::Decision {
                entry.decisions += 1;
            }
        }
    }

    /// Compute the current weighted health snapshot. Read-only and
    /// side-effect-free.
    pub fn current_health(&self) -> HealthSnapshot {
        let mut per_source = BTreeMap::new();
        let mut alive_weight = 0.0f32;
        let mut total_weight = 0.0f32;

        for entry in self.sources.iter() {
            let source = entry.key();
            let activity = entry.value();
            let elapsed = activity.last_seen.elapsed();
            let alive = elapsed <= self.liveness_window;
            let weight = self.weights.get(source).copied().unwrap_or(1.0);

            total_weight += weight;
            if alive {
                alive_weight += weight;
            }

            per_source.insert(
                source.clone(),
                SourceHealth {
                    alive,
                    last_seen_ms: elapsed.as_millis() as u64,
                    weight,
                    decisions: activity.decisions,
                    heartbeats: activity.heartbeats,
                },
            );
        }

        let overall_percent = if total_weight > 0.0 {
            alive_weight / total_weight * 100.0
        } else {
            0.0
        };

        HealthSnapshot {
            per_source,
            overall_percent,
            taken_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dae_core::InboundEnvelope;
    use dae_policy::default_commerce;

    fn aggregator(window_ms: u64) -> HealthAggregator {
        HealthAggregator::new(&default_commerce(), Duration::from_millis(window_ms))
    }

    #[test]
    fn test_all_sources_start_alive() {
        let health = aggregator(10_000).current_health();
        assert_eq!(health.per_source.len(), 7);
        assert!(health.per_source.values().all(|s| s.alive));
        assert!((health.overall_percent - 100.0).abs() < f32::EPSILON);
        assert!(health.quorum());
    }

    #[test]
    fn test_silent_source_drops_weighted_health() {
        let agg = aggregator(50);
        std::thread::sleep(Duration::from_millis(80));

        // Everyone but resource-distributor heartbeats.
        for source in default_commerce().sources() {
            if source.as_str() != "resource-distributor" {
                agg.record_heartbeat(source);
            }
        }

        let health = agg.current_health();
        let silent = &health.per_source[&SourceId::new("resource-distributor")];
        assert!(!silent.alive);

        // The drop matches the silent source's normalized weight.
        let total: f32 = health.per_source.values().map(|s| s.weight).sum();
        let expected = 100.0 * (1.0 - silent.weight / total);
        assert!((health.overall_percent - expected).abs() < 0.5);
        assert!(health.quorum());
    }

    #[test]
    fn test_authority_outage_costs_more_than_peripheral() {
        let policy = default_commerce();
        let window = Duration::from_millis(50);

        let run = |dead: &str| {
            let agg = HealthAggregator::new(&policy, window);
            std::thread::sleep(Duration::from_millis(80));
            for source in policy.sources() {
                if source.as_str() != dead {
                    agg.record_heartbeat(source);
                }
            }
            agg.current_health().overall_percent
        };

        assert!(run("authority") < run("meta-learner"));
    }

    #[test]
    fn test_decision_traffic_counts_as_liveness() {
        let agg = aggregator(50);
        std::thread::sleep(Duration::from_millis(80));

        let decision = dae_core::Decision::new(
            "pricing-adjuster",
            "p1",
            "adjust_price",
            serde_json::json!({}),
            5,
        );
        agg.record_envelope(&Envelope::Inbound(InboundEnvelope::decision(&decision)));

        let health = agg.current_health();
        let source = &health.per_source[&SourceId::new("pricing-adjuster")];
        assert!(source.alive);
        assert_eq!(source.decisions, 1);
    }

    #[test]
    fn test_unknown_source_traffic_is_ignored() {
        let agg = aggregator(10_000);
        agg.record_heartbeat(&SourceId::new("intruder"));
        assert_eq!(agg.current_health().per_source.len(), 7);
    }
}
