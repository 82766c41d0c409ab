//! Per-subject open-decision registry
//!
//! The registry enforces the central invariant: at most one decision is
//! open for a subject at any instant. A second decision from a different
//! source inside the coincidence window consumes both into a conflict.

use dae_core::{Decision, DecisionIdentity, SubjectId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// Lifecycle phase of a subject's arbitration cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectPhase {
    /// No conflict in flight
    Idle,

    /// A conflict was detected and awaits resolution
    PendingConflict,

    /// Resolution is running
    Resolving,

    /// Terminal; a new decision restarts the cycle
    Resolved,
}

/// Outcome of registering a decision
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    /// The decision is now the subject's open decision
    Registered,

    /// The source superseded its own earlier decision (no conflict)
    Superseded(Decision),

    /// A cross-source overlap inside the coincidence window; the previously
    /// open decision is returned and the slot is consumed
    Conflicted(Decision),

    /// Identical identity was already processed; dropped for idempotence
    Duplicate,
}

struct OpenDecision {
    decision: Decision,
    registered_at: Instant,
}

/// Bounded identity memory for idempotence checks
struct SeenSet {
    order: VecDeque<DecisionIdentity>,
    members: HashSet<DecisionIdentity>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false if the identity was already present.
    fn insert(&mut self, identity: DecisionIdentity) -> bool {
        if !self.members.insert(identity.clone()) {
            return false;
        }
        self.order.push_back(identity);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }
}

/// Tracks the open decision and lifecycle phase per subject
pub struct ConflictRegistry {
    open: DashMap<SubjectId, OpenDecision>,
    phases: DashMap<SubjectId, SubjectPhase>,
    seen: Mutex<SeenSet>,
    coincidence_window: Duration,
}

impl ConflictRegistry {
    pub fn new(coincidence_window: Duration) -> Self {
        Self {
            open: DashMap::new(),
            phases: DashMap::new(),
            seen: Mutex::new(SeenSet::new(4096)),
            coincidence_window,
        }
    }

    /// Register a decision for its subject.
    ///
    /// Callers must serialize registrations per subject (the engine's
    /// subject lanes do); registrations for different subjects may run
    /// concurrently.
    pub fn register(&self, decision: Decision) -> RegisterOutcome {
        if !self.seen.lock().insert(decision.identity()) {
            debug!(subject = %decision.subject_id, source = %decision.source_id,
                "duplicate decision dropped");
            return RegisterOutcome::Duplicate;
        }

        let subject = decision.subject_id.clone();

        // Take the slot out if it conflicts; otherwise update it in place.
        if let Some(mut entry) = self.open.get_mut(&subject) {
            if entry.decision.source_id == decision.source_id {
                // Last-write against itself is allowed.
                let old = std::mem::replace(
                    &mut entry.decision,
                    decision,
                );
                entry.registered_at = Instant::now();
                return RegisterOutcome::Superseded(old);
            }

            if entry.registered_at.elapsed() <= self.coincidence_window {
                let existing = entry.decision.clone();
                drop(entry);
                self.open.remove(&subject);
                self.phases.insert(subject, SubjectPhase::PendingConflict);
                return RegisterOutcome::Conflicted(existing);
            }

            // The earlier decision's window lapsed; it already took effect
            // downstream. Replace it.
            entry.decision = decision;
            entry.registered_at = Instant::now();
            return RegisterOutcome::Registered;
        }

        self.open.insert(
            subject.clone(),
            OpenDecision {
                decision,
                registered_at: Instant::now(),
            },
        );
        self.phases.insert(subject, SubjectPhase::Idle);
        RegisterOutcome::Registered
    }

    pub fn set_phase(&self, subject: &SubjectId, phase: SubjectPhase) {
        self.phases.insert(subject.clone(), phase);
    }

    pub fn phase(&self, subject: &SubjectId) -> SubjectPhase {
        self.phases
            .get(subject)
            .map(|p| *p)
            .unwrap_or(SubjectPhase::Idle)
    }

    /// Number of subjects with an open decision.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Number of subjects stuck between conflict detection and resolution.
    pub fn unresolved_count(&self) -> usize {
        self.phases
            .iter()
            .filter(|e| matches!(*e.value(), SubjectPhase::PendingConflict | SubjectPhase::Resolving))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decision(source: &str, subject: &str, action: &str) -> Decision {
        Decision::new(source, subject, action, json!({}), 5)
    }

    fn registry() -> ConflictRegistry {
        ConflictRegistry::new(Duration::from_millis(500))
    }

    #[test]
    fn test_first_decision_registers() {
        let reg = registry();
        let outcome = reg.register(decision("pricing-adjuster", "p1", "adjust_price"));
        assert_eq!(outcome, RegisterOutcome::Registered);
        assert_eq!(reg.open_count(), 1);
        assert_eq!(reg.phase(&SubjectId::new("p1")), SubjectPhase::Idle);
    }

    #[test]
    fn test_same_source_supersedes_itself() {
        let reg = registry();
        reg.register(decision("pricing-adjuster", "p1", "adjust_price"));
        let outcome = reg.register(decision("pricing-adjuster", "p1", "adjust_price_again"));
        match outcome {
            RegisterOutcome::Superseded(old) => assert_eq!(old.action, "adjust_price"),
            other => panic!("expected supersede, got {other:?}"),
        }
        assert_eq!(reg.open_count(), 1);
    }

    #[test]
    fn test_cross_source_overlap_conflicts() {
        let reg = registry();
        reg.register(decision("pricing-adjuster", "p1", "adjust_price"));
        let outcome = reg.register(decision("anomaly-detector", "p1", "freeze"));
        match outcome {
            RegisterOutcome::Conflicted(existing) => {
                assert_eq!(existing.action, "adjust_price");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        // The slot is consumed; at most one open decision per subject.
        assert_eq!(reg.open_count(), 0);
        assert_eq!(reg.phase(&SubjectId::new("p1")), SubjectPhase::PendingConflict);
    }

    #[test]
    fn test_overlap_outside_window_is_no_conflict() {
        let reg = ConflictRegistry::new(Duration::from_millis(0));
        reg.register(decision("pricing-adjuster", "p1", "adjust_price"));
        std::thread::sleep(Duration::from_millis(5));
        let outcome = reg.register(decision("anomaly-detector", "p1", "freeze"));
        assert_eq!(outcome, RegisterOutcome::Registered);
    }

    #[test]
    fn test_duplicate_identity_is_dropped() {
        let reg = registry();
        let d = decision("pricing-adjuster", "p1", "adjust_price");
        assert_eq!(reg.register(d.clone()), RegisterOutcome::Registered);
        assert_eq!(reg.register(d), RegisterOutcome::Duplicate);
    }

    #[test]
    fn test_different_subjects_do_not_interact() {
        let reg = registry();
        reg.register(decision("pricing-adjuster", "p1", "adjust_price"));
        let outcome = reg.register(decision("anomaly-detector", "p2", "freeze"));
        assert_eq!(outcome, RegisterOutcome::Registered);
        assert_eq!(reg.open_count(), 2);
    }
}
