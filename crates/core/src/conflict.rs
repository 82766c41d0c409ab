//! Conflict and resolution records

use crate::decision::Decision;
use crate::types::{ConflictId, SourceId, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Types of conflicts between cross-source decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Two sources take semantically opposed actions on the same subject
    DecisionContradiction,

    /// Both decisions claim exclusive use of the same limited resource
    ResourceContention,

    /// Two high-priority actions collide
    PriorityClash,

    /// A validator rejects the other source's decision
    ValidationFailure,
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DecisionContradiction => "decision_contradiction",
            Self::ResourceContention => "resource_contention",
            Self::PriorityClash => "priority_clash",
            Self::ValidationFailure => "validation_failure",
        };
        write!(f, "{s}")
    }
}

/// Two open, contradictory decisions on the same subject.
///
/// Created once by the registry, consumed exactly once by resolution, and
/// never mutated afterwards; the outcome lives in a separate [`Resolution`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique identifier for this conflict
    pub id: ConflictId,

    /// Classified conflict type
    pub conflict_type: ConflictType,

    /// The decision that was already open for the subject
    pub decision_a: Decision,

    /// The decision whose arrival triggered the conflict
    pub decision_b: Decision,

    /// The contested subject
    pub subject_id: SubjectId,

    /// When the registry observed the overlap
    pub detected_at: DateTime<Utc>,
}

/// The winning side of a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    /// One source's decision won outright
    Source(SourceId),

    /// Both decisions were combined into a synthesized one
    Merge,

    /// No automatic winner; the subject is held for external handling
    Escalate,
}

impl std::fmt::Display for Winner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source(id) => write!(f, "{id}"),
            Self::Merge => write!(f, "merge"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// The authoritative, audited outcome of resolving a [`Conflict`].
///
/// Every conflict yields exactly one resolution; the history is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// The conflict this resolution settles
    pub conflict_id: ConflictId,

    /// Who won, or how the conflict ended
    pub winner: Winner,

    /// The decision downstream code should apply
    pub final_decision: Decision,

    /// Human-readable explanation of the outcome
    pub reason: String,

    /// When the resolution was produced
    pub resolved_at: DateTime<Utc>,

    /// Time from conflict detection to resolution, milliseconds
    pub resolution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_winner_display() {
        assert_eq!(Winner::Source(SourceId::new("authority")).to_string(), "authority");
        assert_eq!(Winner::Merge.to_string(), "merge");
        assert_eq!(Winner::Escalate.to_string(), "escalate");
    }

    #[test]
    fn test_resolution_round_trips_through_json() {
        let decision = Decision::new("anomaly-detector", "product-1", "freeze", json!({}), 10);
        let resolution = Resolution {
            conflict_id: ConflictId::new(),
            winner: Winner::Source(SourceId::new("anomaly-detector")),
            final_decision: decision,
            reason: "anomaly-detector has override authority".to_string(),
            resolved_at: Utc::now(),
            resolution_time_ms: 3,
        };

        let encoded = serde_json::to_string(&resolution).unwrap();
        let decoded: Resolution = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.winner, resolution.winner);
        assert_eq!(decoded.final_decision.action, "freeze");
    }
}
