//! Autonomous decisions emitted by sources

use crate::types::{SourceId, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// An autonomous decision about a shared business subject.
///
/// Decisions are immutable once emitted. A source may emit a new decision
/// superseding its own prior one for the same subject; only cross-source
/// overlap is treated as a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// The source that emitted this decision
    pub source_id: SourceId,

    /// The business entity this decision affects
    pub subject_id: SubjectId,

    /// Action verb, e.g. `adjust_price`, `freeze`, `reroute`
    pub action: String,

    /// Opaque action parameters
    pub payload: JsonValue,

    /// Priority derived from source and context (1..=10)
    pub priority: u8,

    /// Wall-clock emission time, for audit records only
    pub emitted_at: DateTime<Utc>,
}

/// Identity of a decision for idempotence checks.
///
/// Re-publishing a decision with the same identity must not create a
/// duplicate conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionIdentity {
    pub source_id: SourceId,
    pub subject_id: SubjectId,
    pub emitted_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(
        source_id: impl Into<SourceId>,
        subject_id: impl Into<SubjectId>,
        action: impl Into<String>,
        payload: JsonValue,
        priority: u8,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            subject_id: subject_id.into(),
            action: action.into(),
            payload,
            priority: priority.clamp(1, 10),
            emitted_at: Utc::now(),
        }
    }

    /// A synthesized "hold" decision used when a conflict escalates:
    /// downstream appliers freeze the subject pending external review.
    pub fn hold(arbiter: SourceId, subject_id: SubjectId) -> Self {
        Self {
            source_id: arbiter,
            subject_id,
            action: "hold".to_string(),
            payload: serde_json::json!({ "status": "pending_external_review" }),
            priority: 10,
            emitted_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> DecisionIdentity {
        DecisionIdentity {
            source_id: self.source_id.clone(),
            subject_id: self.subject_id.clone(),
            emitted_at: self.emitted_at,
        }
    }

    /// Whether this decision rejects another source's proposal.
    ///
    /// A validator expresses rejection either through its action verb or an
    /// explicit `approved: false` payload field.
    pub fn is_rejection(&self) -> bool {
        if self.action == "reject" || self.action == "veto" {
            return true;
        }
        matches!(self.payload.get("approved"), Some(JsonValue::Bool(false)))
    }

    /// The exclusive resource this decision claims, if any.
    pub fn exclusive_resource(&self) -> Option<&str> {
        self.payload.get("exclusive_resource").and_then(JsonValue::as_str)
    }

    /// Whether the surrounding context marks this decision as
    /// security-classified (boosts effective priority to the maximum).
    pub fn is_security_classified(&self) -> bool {
        matches!(
            self.payload.get("security_classified"),
            Some(JsonValue::Bool(true))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_is_clamped() {
        let d = Decision::new("pricing-adjuster", "product-1", "adjust_price", json!({}), 99);
        assert_eq!(d.priority, 10);

        let d = Decision::new("pricing-adjuster", "product-1", "adjust_price", json!({}), 0);
        assert_eq!(d.priority, 1);
    }

    #[test]
    fn test_rejection_detection() {
        let veto = Decision::new("authority", "acct-7", "veto", json!({}), 8);
        assert!(veto.is_rejection());

        let denied = Decision::new(
            "authority",
            "acct-7",
            "review",
            json!({ "approved": false }),
            8,
        );
        assert!(denied.is_rejection());

        let ok = Decision::new("authority", "acct-7", "review", json!({ "approved": true }), 8);
        assert!(!ok.is_rejection());
    }

    #[test]
    fn test_exclusive_resource_claim() {
        let d = Decision::new(
            "resource-distributor",
            "warehouse-3",
            "allocate",
            json!({ "exclusive_resource": "truck-12" }),
            7,
        );
        assert_eq!(d.exclusive_resource(), Some("truck-12"));
    }

    #[test]
    fn test_hold_decision() {
        let d = Decision::hold(SourceId::new("arbitration"), SubjectId::new("product-1"));
        assert_eq!(d.action, "hold");
        assert_eq!(d.priority, 10);
    }
}
