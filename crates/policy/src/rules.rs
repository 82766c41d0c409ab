//! Rule vocabulary: interaction kinds, resolution strategies, rules

use dae_core::SourceId;
use serde::{Deserialize, Serialize};

/// How one source relates to another.
///
/// Only `Validate` and `Override` relationships can govern a conflict; the
/// rest describe ordinary collaboration traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// A causes B to act
    Trigger,

    /// A notifies B, no conflict implied
    Inform,

    /// A asks B for a resource or decision
    Request,

    /// A must approve B's decision before it is final
    Validate,

    /// A's decision supersedes B's unconditionally
    Override,
}

impl InteractionKind {
    /// Whether a rule of this kind can decide a conflict.
    pub fn governs_conflicts(self) -> bool {
        matches!(self, Self::Validate | Self::Override)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Inform => "inform",
            Self::Request => "request",
            Self::Validate => "validate",
            Self::Override => "override",
        }
    }
}

/// Strategy for resolving a conflict governed by a rule.
///
/// A small, closed set dispatched by pattern match; not an extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The rule's `from` side wins
    FromWins,

    /// The rule's `to` side wins
    ToWins,

    /// No automatic winner; hold the subject for external handling
    Escalate,

    /// Combine both payloads with a policy-supplied combinator
    Merge,
}

/// One directed relationship between two decision sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRule {
    /// Originating source
    pub from: SourceId,

    /// Target source
    pub to: SourceId,

    /// Kind of relationship
    pub kind: InteractionKind,

    /// Priority 1..=10, 10 highest
    pub priority: u8,

    /// How a conflict governed by this rule resolves
    pub resolution: ResolutionStrategy,
}

impl InteractionRule {
    pub fn new(
        from: impl Into<SourceId>,
        to: impl Into<SourceId>,
        kind: InteractionKind,
        priority: u8,
        resolution: ResolutionStrategy,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            priority,
            resolution,
        }
    }

    /// Whether this rule involves the given source on either side.
    pub fn touches(&self, source: &SourceId) -> bool {
        &self.from == source || &self.to == source
    }
}
