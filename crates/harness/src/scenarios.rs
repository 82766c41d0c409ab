//! The canonical verification scenarios

use crate::{await_outbound, report, Scenario, ScenarioReport};
use async_trait::async_trait;
use dae_core::{Decision, Envelope, InboundEnvelope, OutboundEnvelope, SourceId, Winner};
use dae_engine::{ArbitrationEngine, EngineConfig, ScriptedSource};
use dae_policy::commerce::{
    ANOMALY_DETECTOR, AUTHORITY, PRICING_ADJUSTER, RESOURCE_DISTRIBUTOR,
};
use dae_policy::default_commerce;
use rand::Rng;
use serde_json::json;
use std::time::{Duration, Instant};

/// The full canonical suite, in documentation order.
pub fn all_scenarios() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(OverrideWinner),
        Box::new(SilentSource),
        Box::new(ThreeWayConflict),
        Box::new(DecisionBurst),
        Box::new(ContradictionAudit),
    ]
}

fn engine_with(config: EngineConfig) -> ArbitrationEngine {
    ArbitrationEngine::new(default_commerce(), config)
}

/// Two sources disagree on one subject; the policy's override relationship
/// designates the winner.
pub struct OverrideWinner;

impl OverrideWinner {
    async fn execute(&self) -> Result<String, String> {
        let engine = engine_with(EngineConfig::default());
        engine.start().map_err(|e| e.to_string())?;
        let outbound = engine.subscribe_outbound("harness");

        let adjust = Decision::new(
            PRICING_ADJUSTER,
            "product-P1",
            "adjust_price",
            json!({ "new_price": 10 }),
            5,
        );
        let freeze = Decision::new(ANOMALY_DETECTOR, "product-P1", "freeze", json!({}), 10);

        // One lightweight worker per source, publishing in parallel.
        engine.spawn_source(ScriptedSource::new(
            PRICING_ADJUSTER,
            [InboundEnvelope::decision(&adjust)],
        ));
        engine.spawn_source(ScriptedSource::new(
            ANOMALY_DETECTOR,
            [InboundEnvelope::decision(&freeze)],
        ));

        let resolved = await_outbound(&outbound, Duration::from_millis(5000), |out| {
            matches!(
                out,
                OutboundEnvelope::FinalDecision { resolution: Some(_), .. }
            )
        })
        .await
        .ok_or_else(|| "no resolution within 5000 ms".to_string())?;

        let Envelope::Outbound(OutboundEnvelope::FinalDecision {
            decision,
            resolution: Some(resolution),
            ..
        }) = resolved.as_ref()
        else {
            return Err("unexpected envelope shape".to_string());
        };

        if resolution.winner != Winner::Source(SourceId::new(ANOMALY_DETECTOR)) {
            return Err(format!("wrong winner: {}", resolution.winner));
        }
        if decision.action != "freeze" {
            return Err(format!("wrong final action: {}", decision.action));
        }
        if resolution.resolution_time_ms >= 5000 {
            return Err(format!(
                "resolution took {} ms",
                resolution.resolution_time_ms
            ));
        }

        engine.shutdown().await.map_err(|e| e.to_string())?;
        Ok(format!(
            "winner={} final=freeze in {} ms",
            resolution.winner, resolution.resolution_time_ms
        ))
    }
}

#[async_trait]
impl Scenario for OverrideWinner {
    fn name(&self) -> &'static str {
        "override_winner"
    }

    async fn run(&self) -> ScenarioReport {
        let started = Instant::now();
        let outcome = self.execute().await;
        report(self.name(), started, outcome)
    }
}

/// One source goes silent; aggregate health drops by that source's weight
/// but stays above the quorum threshold, and the rest keep resolving.
pub struct SilentSource;

impl SilentSource {
    async fn execute(&self) -> Result<String, String> {
        let window = Duration::from_millis(250);
        let engine = engine_with(EngineConfig::default().with_liveness_window(window));
        engine.start().map_err(|e| e.to_string())?;
        let outbound = engine.subscribe_outbound("harness");

        // Let every seed mark lapse, then revive everyone except the
        // resource distributor.
        tokio::time::sleep(Duration::from_millis(320)).await;
        for source in engine.policy().sources() {
            if source.as_str() != RESOURCE_DISTRIBUTOR {
                engine.publish_heartbeat(source.clone());
            }
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        let health = engine.current_health();
        let silent = health
            .per_source
            .get(&SourceId::new(RESOURCE_DISTRIBUTOR))
            .ok_or_else(|| "silent source missing from snapshot".to_string())?;
        if silent.alive {
            return Err("resource-distributor still reported alive".to_string());
        }

        let total: f32 = health.per_source.values().map(|s| s.weight).sum();
        let expected = 100.0 * (1.0 - silent.weight / total);
        if (health.overall_percent - expected).abs() > 1.0 {
            return Err(format!(
                "health {:.1} does not match expected {:.1}",
                health.overall_percent, expected
            ));
        }
        if !health.quorum() {
            return Err(format!(
                "quorum lost at {:.1}%",
                health.overall_percent
            ));
        }

        // Decisions from the remaining sources still resolve normally.
        let adjust = Decision::new(PRICING_ADJUSTER, "product-P2", "adjust_price", json!({}), 5);
        let freeze = Decision::new(ANOMALY_DETECTOR, "product-P2", "freeze", json!({}), 10);
        engine.publish_decision(&adjust);
        engine.publish_decision(&freeze);

        await_outbound(&outbound, Duration::from_millis(5000), |out| {
            matches!(
                out,
                OutboundEnvelope::FinalDecision { resolution: Some(_), .. }
            )
        })
        .await
        .ok_or_else(|| "conflict did not resolve in degraded mode".to_string())?;

        engine.shutdown().await.map_err(|e| e.to_string())?;
        Ok(format!(
            "health {:.1}% (expected {:.1}%), quorum held, conflicts still resolve",
            health.overall_percent, expected
        ))
    }
}

#[async_trait]
impl Scenario for SilentSource {
    fn name(&self) -> &'static str {
        "silent_source"
    }

    async fn run(&self) -> ScenarioReport {
        let started = Instant::now();
        let outcome = self.execute().await;
        report(self.name(), started, outcome)
    }
}

/// Three sources pile onto one subject nearly simultaneously; every created
/// conflict resolves within the deadline and none is left pending.
pub struct ThreeWayConflict;

impl ThreeWayConflict {
    async fn execute(&self) -> Result<String, String> {
        let engine = engine_with(EngineConfig::default());
        engine.start().map_err(|e| e.to_string())?;

        let subject = "order-77";
        engine.publish_decision(&Decision::new(
            AUTHORITY,
            subject,
            "approve",
            json!({ "approved": true }),
            7,
        ));
        engine.publish_decision(&Decision::new(
            PRICING_ADJUSTER,
            subject,
            "adjust_price",
            json!({ "new_price": 12 }),
            5,
        ));
        engine.publish_decision(&Decision::new(
            ANOMALY_DETECTOR,
            subject,
            "freeze",
            json!({}),
            10,
        ));

        // A fourth decision collides with whichever one reopened the cycle.
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.publish_decision(&Decision::new(
            PRICING_ADJUSTER,
            subject,
            "adjust_price",
            json!({ "new_price": 13 }),
            5,
        ));

        let deadline = Instant::now() + Duration::from_millis(5000);
        loop {
            let stats = engine.stats();
            if stats.resolutions.total_conflicts >= 2 && stats.unresolved_subjects == 0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(format!("conflicts did not settle: {stats:?}"));
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let history = engine.resolution_history(100);
        for resolution in &history {
            if resolution.resolution_time_ms >= 5000 {
                return Err(format!(
                    "resolution {} exceeded the deadline: {} ms",
                    resolution.conflict_id, resolution.resolution_time_ms
                ));
            }
        }

        let count = history.len();
        engine.shutdown().await.map_err(|e| e.to_string())?;
        Ok(format!(
            "{count} pairwise conflicts resolved, none pending"
        ))
    }
}

#[async_trait]
impl Scenario for ThreeWayConflict {
    fn name(&self) -> &'static str {
        "three_way_conflict"
    }

    async fn run(&self) -> ScenarioReport {
        let started = Instant::now();
        let outcome = self.execute().await;
        report(self.name(), started, outcome)
    }
}

/// A burst of conflicting decisions across 100 subjects from three source
/// pairs: no resolution is dropped, none is duplicated, latency is bounded.
pub struct DecisionBurst;

impl DecisionBurst {
    async fn execute(&self) -> Result<String, String> {
        let engine = engine_with(EngineConfig::default());
        engine.start().map_err(|e| e.to_string())?;

        let subjects: u64 = 100;
        {
        let mut rng = rand::thread_rng();
        for i in 0..subjects {
            let subject = format!("subject-{i:03}");
            let price: u32 = rng.gen_range(1..100);
            let (first, second) = match i % 3 {
                0 => (
                    Decision::new(
                        PRICING_ADJUSTER,
                        subject.as_str(),
                        "adjust_price",
                        json!({ "new_price": price }),
                        5,
                    ),
                    Decision::new(ANOMALY_DETECTOR, subject.as_str(), "freeze", json!({}), 10),
                ),
                1 => (
                    Decision::new(
                        RESOURCE_DISTRIBUTOR,
                        subject.as_str(),
                        "reallocate",
                        json!({ "units": price }),
                        6,
                    ),
                    Decision::new(
                        AUTHORITY,
                        subject.as_str(),
                        "redirect",
                        json!({ "region": "north" }),
                        7,
                    ),
                ),
                _ => (
                    Decision::new(
                        PRICING_ADJUSTER,
                        subject.as_str(),
                        "adjust_price",
                        json!({ "new_price": price }),
                        5,
                    ),
                    Decision::new(
                        AUTHORITY,
                        subject.as_str(),
                        "approve",
                        json!({ "approved": true }),
                        7,
                    ),
                ),
            };
            engine.publish_decision(&first);
            engine.publish_decision(&second);
        }
        }

        let deadline = Instant::now() + Duration::from_millis(10_000);
        loop {
            let stats = engine.stats();
            if stats.resolutions.total_conflicts >= subjects && stats.unresolved_subjects == 0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(format!("burst did not settle in 10 s: {stats:?}"));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let history = engine.resolution_history(subjects as usize * 2);
        if history.len() as u64 != subjects {
            return Err(format!(
                "expected {subjects} resolutions, found {}",
                history.len()
            ));
        }

        let mut ids: Vec<_> = history.iter().map(|r| r.conflict_id).collect();
        ids.sort_by_key(|id| id.0);
        ids.dedup();
        if ids.len() as u64 != subjects {
            return Err("duplicate resolutions detected".to_string());
        }

        let worst = history
            .iter()
            .map(|r| r.resolution_time_ms)
            .max()
            .unwrap_or(0);
        if worst >= 10_000 {
            return Err(format!("worst per-conflict resolution time {worst} ms"));
        }

        engine.shutdown().await.map_err(|e| e.to_string())?;
        Ok(format!(
            "{subjects} conflicts, 0 dropped, 0 duplicated, worst {worst} ms"
        ))
    }
}

#[async_trait]
impl Scenario for DecisionBurst {
    fn name(&self) -> &'static str {
        "decision_burst"
    }

    async fn run(&self) -> ScenarioReport {
        let started = Instant::now();
        let outcome = self.execute().await;
        report(self.name(), started, outcome)
    }
}

/// A resolved contradiction is observable as well-formed structured history
/// for an external learning process. The harness asserts the record only;
/// learning itself is out of scope.
pub struct ContradictionAudit;

impl ContradictionAudit {
    async fn execute(&self) -> Result<String, String> {
        let engine = engine_with(EngineConfig::default());
        engine.start().map_err(|e| e.to_string())?;
        let outbound = engine.subscribe_outbound("harness");

        engine.publish_decision(&Decision::new(
            RESOURCE_DISTRIBUTOR,
            "stock-9",
            "reallocate",
            json!({ "units": 40 }),
            6,
        ));
        engine.publish_decision(&Decision::new(
            AUTHORITY,
            "stock-9",
            "redirect",
            json!({ "region": "south" }),
            7,
        ));

        await_outbound(&outbound, Duration::from_millis(5000), |out| {
            matches!(
                out,
                OutboundEnvelope::FinalDecision { resolution: Some(_), .. }
            )
        })
        .await
        .ok_or_else(|| "contradiction did not resolve".to_string())?;

        let stats = engine.stats();
        let contradictions = stats
            .resolutions
            .by_type
            .get("decision_contradiction")
            .copied()
            .unwrap_or(0);
        if contradictions == 0 {
            return Err(format!(
                "no decision_contradiction recorded: {:?}",
                stats.resolutions.by_type
            ));
        }

        let history = engine.resolution_history(10);
        let record = history
            .last()
            .ok_or_else(|| "resolution history is empty".to_string())?;

        // Well-formed structured record: every audit field present in JSON.
        let encoded =
            serde_json::to_value(record).map_err(|e| format!("history not serializable: {e}"))?;
        for field in [
            "conflict_id",
            "winner",
            "final_decision",
            "reason",
            "resolved_at",
            "resolution_time_ms",
        ] {
            if encoded.get(field).is_none() {
                return Err(format!("history record missing field {field}"));
            }
        }
        if record.reason.is_empty() {
            return Err("history record has an empty reason".to_string());
        }

        engine.shutdown().await.map_err(|e| e.to_string())?;
        Ok(format!(
            "structured history present, winner={}, reason=\"{}\"",
            record.winner, record.reason
        ))
    }
}

#[async_trait]
impl Scenario for ContradictionAudit {
    fn name(&self) -> &'static str {
        "contradiction_audit"
    }

    async fn run(&self) -> ScenarioReport {
        let started = Instant::now();
        let outcome = self.execute().await;
        report(self.name(), started, outcome)
    }
}
