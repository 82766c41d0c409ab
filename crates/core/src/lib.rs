//! Core data structures for the Decision Arbitration Engine

pub mod conflict;
pub mod decision;
pub mod envelope;
pub mod types;

pub use conflict::{Conflict, ConflictType, Resolution, Winner};
pub use decision::{Decision, DecisionIdentity};
pub use envelope::{Envelope, EnvelopeKind, InboundEnvelope, OutboundEnvelope};
pub use types::{ConflictId, SourceId, SubjectId};

/// Core error types
#[derive(thiserror::Error, Debug)]
pub enum DaeError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

/// Errors raised when an inbound envelope is rejected at ingestion.
///
/// A rejected envelope never enters the conflict registry, so it cannot
/// create a false conflict.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown source: {0}")]
    UnknownSource(SourceId),

    #[error("decision from {0} is missing a subject")]
    MissingSubject(SourceId),

    #[error("decision from {0} has an empty action")]
    EmptyAction(SourceId),

    #[error("decision payload from {0} does not decode")]
    MalformedPayload(SourceId),
}

pub type Result<T> = std::result::Result<T, DaeError>;
