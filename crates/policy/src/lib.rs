//! Interaction Policy for the Decision Arbitration Engine
//!
//! The policy is a static, declarative table of directed relationships
//! between decision sources. It is audited configuration: loaded once at
//! startup, read-only thereafter, and shared by all readers without locking.

pub mod commerce;
pub mod policy;
pub mod rules;

pub use commerce::default_commerce;
pub use policy::{ContextHints, InteractionPolicy, MergeFn, PolicyBuilder};
pub use rules::{InteractionKind, InteractionRule, ResolutionStrategy};

use dae_core::SourceId;

/// Policy construction errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("rule from {0} to itself is not allowed")]
    SelfLoop(SourceId),

    #[error("rule {from} -> {to} has priority {priority}, expected 1..=10")]
    PriorityOutOfRange {
        from: SourceId,
        to: SourceId,
        priority: u8,
    },

    #[error("duplicate rule {from} -> {to} with kind {kind}")]
    DuplicateRule {
        from: SourceId,
        to: SourceId,
        kind: String,
    },

    #[error("merge combinator registered for unknown pair {0} / {1}")]
    UnknownMergePair(SourceId, SourceId),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
