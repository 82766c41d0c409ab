//! Message envelopes carried by the bus
//!
//! Decision sources publish inbound envelopes; the arbitration engine
//! publishes outbound envelopes for business code to apply. No source talks
//! to another directly.

use crate::conflict::Resolution;
use crate::decision::Decision;
use crate::types::{ConflictId, SourceId, SubjectId};
use crate::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// Kind of an inbound envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Decision,
    Alert,
    Event,
    Command,
}

/// Envelope published by a decision source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub source_id: SourceId,
    pub kind: EnvelopeKind,
    pub subject_id: Option<SubjectId>,
    pub payload: JsonValue,
    pub emitted_at: DateTime<Utc>,
}

impl InboundEnvelope {
    pub fn new(
        source_id: impl Into<SourceId>,
        kind: EnvelopeKind,
        subject_id: Option<SubjectId>,
        payload: JsonValue,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            subject_id,
            payload,
            emitted_at: Utc::now(),
        }
    }

    /// Wrap a decision for publication.
    pub fn decision(decision: &Decision) -> Self {
        Self {
            source_id: decision.source_id.clone(),
            kind: EnvelopeKind::Decision,
            subject_id: Some(decision.subject_id.clone()),
            payload: serde_json::to_value(decision).unwrap_or(JsonValue::Null),
            emitted_at: decision.emitted_at,
        }
    }

    /// A bare liveness heartbeat.
    pub fn heartbeat(source_id: impl Into<SourceId>) -> Self {
        Self::new(
            source_id,
            EnvelopeKind::Event,
            None,
            serde_json::json!({ "event": "heartbeat" }),
        )
    }

    /// Reject malformed envelopes before they can reach the registry.
    pub fn validate(&self, known_sources: &HashSet<SourceId>) -> Result<(), ValidationError> {
        if !known_sources.contains(&self.source_id) {
            return Err(ValidationError::UnknownSource(self.source_id.clone()));
        }
        if self.kind == EnvelopeKind::Decision && self.subject_id.is_none() {
            return Err(ValidationError::MissingSubject(self.source_id.clone()));
        }
        Ok(())
    }

    /// Decode the carried decision, if this envelope holds one.
    pub fn as_decision(&self) -> Option<Decision> {
        if self.kind != EnvelopeKind::Decision {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Envelope published by the arbitration engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    /// The authoritative decision downstream code should apply
    FinalDecision {
        subject_id: SubjectId,
        decision: Decision,
        resolution: Option<Box<Resolution>>,
    },

    /// A losing source's decision was discarded
    DecisionRejected {
        subject_id: SubjectId,
        decision: Decision,
        conflict_id: ConflictId,
    },

    /// No automatic winner; external handling required
    ConflictUnresolved {
        subject_id: SubjectId,
        conflict_id: ConflictId,
        resolution: Box<Resolution>,
    },

    /// A slow subscriber's oldest messages were evicted
    BusOverflow { subscriber: String, dropped: u64 },
}

impl OutboundEnvelope {
    pub fn subject_id(&self) -> Option<&SubjectId> {
        match self {
            Self::FinalDecision { subject_id, .. }
            | Self::DecisionRejected { subject_id, .. }
            | Self::ConflictUnresolved { subject_id, .. } => Some(subject_id),
            Self::BusOverflow { .. } => None,
        }
    }
}

/// Any message on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Inbound(InboundEnvelope),
    Outbound(OutboundEnvelope),
}

impl Envelope {
    pub fn source_id(&self) -> Option<&SourceId> {
        match self {
            Self::Inbound(env) => Some(&env.source_id),
            Self::Outbound(_) => None,
        }
    }

    pub fn subject_id(&self) -> Option<&SubjectId> {
        match self {
            Self::Inbound(env) => env.subject_id.as_ref(),
            Self::Outbound(env) => env.subject_id(),
        }
    }

    pub fn is_overflow_diagnostic(&self) -> bool {
        matches!(self, Self::Outbound(OutboundEnvelope::BusOverflow { .. }))
    }
}

impl From<InboundEnvelope> for Envelope {
    fn from(env: InboundEnvelope) -> Self {
        Self::Inbound(env)
    }
}

impl From<OutboundEnvelope> for Envelope {
    fn from(env: OutboundEnvelope) -> Self {
        Self::Outbound(env)
    }
}
