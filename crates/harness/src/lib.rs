//! Scenario harness for the Decision Arbitration Engine
//!
//! Injects synthetic conflicting decisions and load through the public bus
//! surface, then asserts resolution correctness, latency bounds and
//! degraded-mode behavior. Run all scenarios with the `dae-scenarios`
//! binary or through the integration tests.

pub mod scenarios;

pub use scenarios::all_scenarios;

use async_trait::async_trait;
use dae_bus::Subscription;
use dae_core::{Envelope, OutboundEnvelope};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Outcome of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub details: String,
}

/// A self-contained, repeatable verification scenario
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drive the pipeline and verify; never panics, failures are reported.
    async fn run(&self) -> ScenarioReport;
}

/// Build a report from a scenario body's `Ok(details)` / `Err(details)`.
pub(crate) fn report(
    name: &'static str,
    started: Instant,
    outcome: std::result::Result<String, String>,
) -> ScenarioReport {
    let duration_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(details) => ScenarioReport {
            name: name.to_string(),
            success: true,
            duration_ms,
            details,
        },
        Err(details) => ScenarioReport {
            name: name.to_string(),
            success: false,
            duration_ms,
            details,
        },
    }
}

/// Read outbound envelopes until one satisfies the predicate, or time out.
pub async fn await_outbound<F>(
    sub: &Subscription,
    wait: Duration,
    mut predicate: F,
) -> Option<Arc<Envelope>>
where
    F: FnMut(&OutboundEnvelope) -> bool,
{
    tokio::time::timeout(wait, async {
        loop {
            let envelope = sub.recv().await?;
            if let Envelope::Outbound(out) = envelope.as_ref() {
                if predicate(out) {
                    return Some(envelope.clone());
                }
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Run every scenario whose name contains `filter` (all when `None`).
pub async fn run_matching(filter: Option<&str>) -> Vec<ScenarioReport> {
    let mut reports = Vec::new();
    for scenario in all_scenarios() {
        if let Some(f) = filter {
            if !scenario.name().contains(f) {
                continue;
            }
        }
        info!(scenario = scenario.name(), "running scenario");
        let report = scenario.run().await;
        info!(
            scenario = %report.name,
            success = report.success,
            duration_ms = report.duration_ms,
            "scenario finished"
        );
        reports.push(report);
    }
    reports
}

/// Run the full canonical suite.
pub async fn run_all() -> Vec<ScenarioReport> {
    run_matching(None).await
}
