//! The conflict resolver
//!
//! Turns pairwise policy + priority into a single authoritative decision
//! within a hard time budget. Every path out of this module converges on a
//! resolution: policy gaps, merge failures, panics and timeouts all
//! downgrade to an escalation rather than crashing the engine.

use crate::registry::{ConflictRegistry, RegisterOutcome, SubjectPhase};
use dae_core::{Conflict, ConflictId, ConflictType, Decision, Resolution, SourceId, Winner};
use dae_policy::{ContextHints, InteractionKind, InteractionPolicy, ResolutionStrategy};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Statistics about conflict resolution
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ResolutionStats {
    /// Total conflicts processed
    pub total_conflicts: u64,

    /// Conflicts won outright by one source
    pub source_wins: u64,

    /// Conflicts resolved by merging payloads
    pub merges: u64,

    /// Conflicts escalated for external handling
    pub escalations: u64,

    /// Escalations forced by the resolution deadline
    pub timeouts: u64,

    /// Average resolution time in milliseconds
    pub avg_resolution_time_ms: u64,

    /// Breakdown by conflict type
    pub by_type: HashMap<String, u64>,

    /// Breakdown by outcome
    pub by_outcome: HashMap<String, u64>,
}

/// Resolves conflicts between cross-source decisions.
///
/// Safe to share behind an `Arc`; per-subject ordering is the caller's
/// responsibility (the engine serializes each subject on its own lane).
pub struct ConflictResolver {
    policy: Arc<InteractionPolicy>,
    registry: ConflictRegistry,
    arbiter_id: SourceId,
    deadline: Duration,
    history: RwLock<VecDeque<Resolution>>,
    history_capacity: usize,
    stats: Mutex<ResolutionStats>,
}

impl ConflictResolver {
    pub fn new(
        policy: Arc<InteractionPolicy>,
        arbiter_id: SourceId,
        coincidence_window: Duration,
        deadline: Duration,
        history_capacity: usize,
    ) -> Self {
        Self {
            policy,
            registry: ConflictRegistry::new(coincidence_window),
            arbiter_id,
            deadline,
            history: RwLock::new(VecDeque::new()),
            history_capacity: history_capacity.max(1),
            stats: Mutex::new(ResolutionStats::default()),
        }
    }

    /// Register a decision; see [`ConflictRegistry::register`].
    pub fn register(&self, decision: Decision) -> RegisterOutcome {
        self.registry.register(decision)
    }

    pub fn registry(&self) -> &ConflictRegistry {
        &self.registry
    }

    /// Classify the overlap between two decisions, most specific first.
    pub fn classify(&self, a: &Decision, b: &Decision) -> ConflictType {
        // A validator rejecting the other side trumps everything else.
        for (validator, other) in [(a, b), (b, a)] {
            let validates = self
                .policy
                .lookup(&validator.source_id, &other.source_id)
                .iter()
                .any(|r| r.kind == InteractionKind::Validate);
            if validates && validator.is_rejection() {
                return ConflictType::ValidationFailure;
            }
        }

        if let (Some(ra), Some(rb)) = (a.exclusive_resource(), b.exclusive_resource()) {
            if ra == rb {
                return ConflictType::ResourceContention;
            }
        }

        let pa = self.effective_priority(a);
        let pb = self.effective_priority(b);
        if pa >= 9 && pb >= 9 {
            return ConflictType::PriorityClash;
        }

        ConflictType::DecisionContradiction
    }

    fn effective_priority(&self, decision: &Decision) -> u8 {
        let hints = ContextHints {
            security_classified: decision.is_security_classified(),
        };
        self.policy.effective_priority(&decision.source_id, &hints)
    }

    /// Assemble the conflict record for an overlap the registry reported.
    pub fn build_conflict(&self, existing: Decision, incoming: Decision) -> Conflict {
        let conflict_type = self.classify(&existing, &incoming);
        let subject_id = incoming.subject_id.clone();
        let conflict = Conflict {
            id: ConflictId::new(),
            conflict_type,
            decision_a: existing,
            decision_b: incoming,
            subject_id,
            detected_at: Utc::now(),
        };
        debug!(conflict = %conflict.id, subject = %conflict.subject_id,
            conflict_type = %conflict.conflict_type, "conflict detected");
        conflict
    }

    /// Resolve a conflict, bounded by the hard deadline.
    ///
    /// The policy dispatch and any merge combinator run on a blocking
    /// worker; a combinator that panics or overruns the deadline is
    /// abandoned and the conflict escalates instead.
    pub async fn resolve(&self, conflict: &Conflict) -> Resolution {
        let start = Instant::now();
        self.registry
            .set_phase(&conflict.subject_id, SubjectPhase::Resolving);

        let policy = Arc::clone(&self.policy);
        let arbiter = self.arbiter_id.clone();
        let work_conflict = conflict.clone();
        let work =
            tokio::task::spawn_blocking(move || apply_policy(&policy, &arbiter, &work_conflict));

        let mut timed_out = false;
        let (winner, final_decision, reason) = match tokio::time::timeout(self.deadline, work).await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => {
                warn!(conflict = %conflict.id, %join_error,
                    "merge combinator panicked, escalating");
                self.escalate_outcome(
                    conflict,
                    format!("merge combinator panicked: {join_error}"),
                )
            }
            Err(_) => {
                timed_out = true;
                warn!(conflict = %conflict.id, deadline_ms = self.deadline.as_millis() as u64,
                    "resolution deadline exceeded, forcing escalation");
                self.escalate_outcome(
                    conflict,
                    format!(
                        "resolution deadline of {} ms exceeded",
                        self.deadline.as_millis()
                    ),
                )
            }
        };

        let resolution = Resolution {
            conflict_id: conflict.id,
            winner,
            final_decision,
            reason,
            resolved_at: Utc::now(),
            resolution_time_ms: start.elapsed().as_millis() as u64,
        };
        self.finish(conflict, &resolution, timed_out);
        resolution
    }

    /// Immediately escalate a conflict without consulting policy.
    ///
    /// Used by the engine to flush in-flight conflicts at shutdown; still
    /// produces a full resolution so no conflict is left pending.
    pub fn escalate_now(&self, conflict: &Conflict, reason: impl Into<String>) -> Resolution {
        let (winner, final_decision, reason) = self.escalate_outcome(conflict, reason.into());
        let elapsed_ms = (Utc::now() - conflict.detected_at).num_milliseconds().max(0) as u64;
        let resolution = Resolution {
            conflict_id: conflict.id,
            winner,
            final_decision,
            reason,
            resolved_at: Utc::now(),
            resolution_time_ms: elapsed_ms,
        };
        self.finish(conflict, &resolution, false);
        resolution
    }

    fn escalate_outcome(
        &self,
        conflict: &Conflict,
        reason: String,
    ) -> (Winner, Decision, String) {
        (
            Winner::Escalate,
            Decision::hold(self.arbiter_id.clone(), conflict.subject_id.clone()),
            reason,
        )
    }

    fn finish(&self, conflict: &Conflict, resolution: &Resolution, timed_out: bool) {
        {
            let mut history = self.history.write();
            history.push_back(resolution.clone());
            if history.len() > self.history_capacity {
                history.pop_front();
            }
        }

        {
            let mut stats = self.stats.lock();
            stats.total_conflicts += 1;
            match &resolution.winner {
                Winner::Source(_) => stats.source_wins += 1,
                Winner::Merge => stats.merges += 1,
                Winner::Escalate => stats.escalations += 1,
            }
            if timed_out {
                stats.timeouts += 1;
            }

            let total_time = stats.avg_resolution_time_ms * (stats.total_conflicts - 1)
                + resolution.resolution_time_ms;
            stats.avg_resolution_time_ms = total_time / stats.total_conflicts;

            *stats
                .by_type
                .entry(conflict.conflict_type.to_string())
                .or_insert(0) += 1;
            let outcome_key = match &resolution.winner {
                Winner::Source(_) => "source_wins".to_string(),
                Winner::Merge => "merge".to_string(),
                Winner::Escalate => "escalate".to_string(),
            };
            *stats.by_outcome.entry(outcome_key).or_insert(0) += 1;
        }

        self.registry
            .set_phase(&conflict.subject_id, SubjectPhase::Resolved);

        info!(conflict = %conflict.id, subject = %conflict.subject_id,
            winner = %resolution.winner, time_ms = resolution.resolution_time_ms,
            "conflict resolved");
    }

    /// The most recent resolutions, oldest first, at most `limit`.
    pub fn resolution_history(&self, limit: usize) -> Vec<Resolution> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self) -> ResolutionStats {
        self.stats.lock().clone()
    }
}

/// Pure policy dispatch; runs on a blocking worker under the deadline.
fn apply_policy(
    policy: &InteractionPolicy,
    arbiter: &SourceId,
    conflict: &Conflict,
) -> (Winner, Decision, String) {
    let a = &conflict.decision_a;
    let b = &conflict.decision_b;

    let escalate = |reason: String| {
        (
            Winner::Escalate,
            Decision::hold(arbiter.clone(), conflict.subject_id.clone()),
            reason,
        )
    };

    let rule = match policy.conflict_rule(&a.source_id, &b.source_id) {
        Some(rule) => rule,
        None => {
            return escalate(format!(
                "no applicable policy rule between {} and {}",
                a.source_id, b.source_id
            ))
        }
    };

    match rule.resolution {
        ResolutionStrategy::FromWins | ResolutionStrategy::ToWins => {
            let winner_source = if rule.resolution == ResolutionStrategy::FromWins {
                rule.from.clone()
            } else {
                rule.to.clone()
            };
            let (winning, losing) = if a.source_id == winner_source {
                (a, b)
            } else {
                (b, a)
            };
            let reason = format!(
                "{} has {} authority over {} (priority {})",
                winner_source,
                rule.kind.as_str(),
                losing.source_id,
                rule.priority
            );
            (Winner::Source(winner_source), winning.clone(), reason)
        }
        ResolutionStrategy::Merge => {
            let combinator = match policy.merge_combinator(&a.source_id, &b.source_id) {
                Some(c) => c,
                None => {
                    return escalate(format!(
                        "merge requested but no combinator registered for {} / {}",
                        a.source_id, b.source_id
                    ))
                }
            };
            match combinator(&a.payload, &b.payload) {
                Ok(payload) => {
                    let merged = Decision {
                        source_id: arbiter.clone(),
                        subject_id: conflict.subject_id.clone(),
                        action: if a.action == b.action {
                            a.action.clone()
                        } else {
                            "merge".to_string()
                        },
                        payload,
                        priority: a.priority.max(b.priority),
                        emitted_at: Utc::now(),
                    };
                    (
                        Winner::Merge,
                        merged,
                        format!(
                            "payloads of {} and {} merged by policy combinator",
                            a.source_id, b.source_id
                        ),
                    )
                }
                Err(e) => escalate(format!("merge combinator failed: {e}")),
            }
        }
        ResolutionStrategy::Escalate => escalate(format!(
            "policy routes conflicts between {} and {} to external handling",
            a.source_id, b.source_id
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dae_policy::{InteractionKind, MergeFn, PolicyBuilder};
    use serde_json::json;

    fn decision(source: &str, subject: &str, action: &str, priority: u8) -> Decision {
        Decision::new(source, subject, action, json!({}), priority)
    }

    fn resolver_with(policy: InteractionPolicy) -> ConflictResolver {
        ConflictResolver::new(
            Arc::new(policy),
            SourceId::new("arbitration"),
            Duration::from_millis(500),
            Duration::from_millis(5000),
            100,
        )
    }

    fn override_policy() -> InteractionPolicy {
        PolicyBuilder::new()
            .rule(
                "anomaly-detector",
                "pricing-adjuster",
                InteractionKind::Override,
                10,
                ResolutionStrategy::FromWins,
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_override_winner_is_deterministic() {
        let resolver = resolver_with(override_policy());
        let a = decision("pricing-adjuster", "p1", "adjust_price", 5);
        let b = decision("anomaly-detector", "p1", "freeze", 10);
        let conflict = resolver.build_conflict(a, b);

        let resolution = resolver.resolve(&conflict).await;
        assert_eq!(
            resolution.winner,
            Winner::Source(SourceId::new("anomaly-detector"))
        );
        assert_eq!(resolution.final_decision.action, "freeze");

        // Same inputs, same winner: no randomness.
        let a = decision("pricing-adjuster", "p1", "adjust_price", 5);
        let b = decision("anomaly-detector", "p1", "freeze", 10);
        let conflict = resolver.build_conflict(a, b);
        let again = resolver.resolve(&conflict).await;
        assert_eq!(again.winner, resolution.winner);
    }

    #[tokio::test]
    async fn test_policy_gap_escalates() {
        let policy = PolicyBuilder::new()
            .rule(
                "route-planner",
                "meta-learner",
                InteractionKind::Inform,
                5,
                ResolutionStrategy::Merge,
            )
            .build()
            .unwrap();
        let resolver = resolver_with(policy);

        let a = decision("route-planner", "r1", "reroute", 5);
        let b = decision("meta-learner", "r1", "suggest_route", 5);
        let conflict = resolver.build_conflict(a, b);

        let resolution = resolver.resolve(&conflict).await;
        assert_eq!(resolution.winner, Winner::Escalate);
        assert_eq!(resolution.final_decision.action, "hold");
        assert!(resolution.reason.contains("no applicable policy rule"));
    }

    #[tokio::test]
    async fn test_merge_combinator_produces_synthesized_decision() {
        let union: MergeFn = Arc::new(|a, b| {
            let mut out = a.as_object().cloned().unwrap_or_default();
            if let Some(mb) = b.as_object() {
                for (k, v) in mb {
                    out.insert(k.clone(), v.clone());
                }
            }
            Ok(serde_json::Value::Object(out))
        });
        let policy = PolicyBuilder::new()
            .rule(
                "meta-learner",
                "route-planner",
                InteractionKind::Validate,
                5,
                ResolutionStrategy::Merge,
            )
            .merge_combinator("meta-learner", "route-planner", union)
            .build()
            .unwrap();
        let resolver = resolver_with(policy);

        let mut a = decision("meta-learner", "r1", "suggest_route", 5);
        a.payload = json!({ "via": "north" });
        let mut b = decision("route-planner", "r1", "reroute", 6);
        b.payload = json!({ "eta_minutes": 42 });
        let conflict = resolver.build_conflict(a, b);

        let resolution = resolver.resolve(&conflict).await;
        assert_eq!(resolution.winner, Winner::Merge);
        assert_eq!(resolution.final_decision.payload["via"], "north");
        assert_eq!(resolution.final_decision.payload["eta_minutes"], 42);
        assert_eq!(resolution.final_decision.priority, 6);
    }

    #[tokio::test]
    async fn test_merge_panic_downgrades_to_escalate() {
        let bomb: MergeFn = Arc::new(|_, _| panic!("combinator bug"));
        let policy = PolicyBuilder::new()
            .rule(
                "meta-learner",
                "route-planner",
                InteractionKind::Validate,
                5,
                ResolutionStrategy::Merge,
            )
            .merge_combinator("meta-learner", "route-planner", bomb)
            .build()
            .unwrap();
        let resolver = resolver_with(policy);

        let a = decision("meta-learner", "r1", "suggest_route", 5);
        let b = decision("route-planner", "r1", "reroute", 6);
        let conflict = resolver.build_conflict(a, b);

        let resolution = resolver.resolve(&conflict).await;
        assert_eq!(resolution.winner, Winner::Escalate);
        assert!(resolution.reason.contains("panicked"));
    }

    #[tokio::test]
    async fn test_deadline_forces_escalation() {
        let stall: MergeFn = Arc::new(|_, _| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(json!({}))
        });
        let policy = PolicyBuilder::new()
            .rule(
                "meta-learner",
                "route-planner",
                InteractionKind::Validate,
                5,
                ResolutionStrategy::Merge,
            )
            .merge_combinator("meta-learner", "route-planner", stall)
            .build()
            .unwrap();
        let resolver = ConflictResolver::new(
            Arc::new(policy),
            SourceId::new("arbitration"),
            Duration::from_millis(500),
            Duration::from_millis(50),
            100,
        );

        let a = decision("meta-learner", "r1", "suggest_route", 5);
        let b = decision("route-planner", "r1", "reroute", 6);
        let conflict = resolver.build_conflict(a, b);

        let resolution = resolver.resolve(&conflict).await;
        assert_eq!(resolution.winner, Winner::Escalate);
        assert!(resolution.reason.contains("deadline"));
        assert_eq!(resolver.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_validation_failure_classification() {
        let policy = PolicyBuilder::new()
            .rule(
                "authority",
                "pricing-adjuster",
                InteractionKind::Validate,
                6,
                ResolutionStrategy::FromWins,
            )
            .build()
            .unwrap();
        let resolver = resolver_with(policy);

        let proposal = decision("pricing-adjuster", "p1", "adjust_price", 5);
        let veto = decision("authority", "p1", "reject", 6);
        assert_eq!(
            resolver.classify(&proposal, &veto),
            ConflictType::ValidationFailure
        );

        // The validator wins the resolution.
        let conflict = resolver.build_conflict(proposal, veto);
        let resolution = resolver.resolve(&conflict).await;
        assert_eq!(resolution.winner, Winner::Source(SourceId::new("authority")));
    }

    #[tokio::test]
    async fn test_resource_contention_classification() {
        let resolver = resolver_with(override_policy());
        let mut a = decision("anomaly-detector", "w1", "allocate", 5);
        a.payload = json!({ "exclusive_resource": "truck-1" });
        let mut b = decision("pricing-adjuster", "w1", "allocate", 5);
        b.payload = json!({ "exclusive_resource": "truck-1" });
        assert_eq!(
            resolver.classify(&a, &b),
            ConflictType::ResourceContention
        );
    }

    #[tokio::test]
    async fn test_priority_clash_classification() {
        let resolver = resolver_with(override_policy());
        // Both sources touch the priority-10 override rule.
        let a = decision("anomaly-detector", "p1", "freeze", 10);
        let b = decision("pricing-adjuster", "p1", "adjust_price", 9);
        assert_eq!(resolver.classify(&a, &b), ConflictType::PriorityClash);
    }

    #[tokio::test]
    async fn test_history_is_append_only_and_bounded() {
        let resolver = ConflictResolver::new(
            Arc::new(override_policy()),
            SourceId::new("arbitration"),
            Duration::from_millis(500),
            Duration::from_millis(5000),
            2,
        );

        for i in 0..4 {
            let a = decision("pricing-adjuster", &format!("p{i}"), "adjust_price", 5);
            let b = decision("anomaly-detector", &format!("p{i}"), "freeze", 10);
            let conflict = resolver.build_conflict(a, b);
            resolver.resolve(&conflict).await;
        }

        assert_eq!(resolver.resolution_history(10).len(), 2);
        assert_eq!(resolver.resolution_history(1).len(), 1);
        assert_eq!(resolver.stats().total_conflicts, 4);
    }
}
