//! Subscription filters

use dae_core::{Envelope, EnvelopeKind, OutboundEnvelope, SourceId, SubjectId};

/// Broad class of an envelope, for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeClass {
    Decision,
    Alert,
    Event,
    Command,
    FinalDecision,
    DecisionRejected,
    ConflictUnresolved,
    BusOverflow,
}

impl EnvelopeClass {
    pub fn of(envelope: &Envelope) -> Self {
        match envelope {
            Envelope::Inbound(env) => match env.kind {
                EnvelopeKind::Decision => Self::Decision,
                EnvelopeKind::Alert => Self::Alert,
                EnvelopeKind::Event => Self::Event,
                EnvelopeKind::Command => Self::Command,
            },
            Envelope::Outbound(env) => match env {
                OutboundEnvelope::FinalDecision { .. } => Self::FinalDecision,
                OutboundEnvelope::DecisionRejected { .. } => Self::DecisionRejected,
                OutboundEnvelope::ConflictUnresolved { .. } => Self::ConflictUnresolved,
                OutboundEnvelope::BusOverflow { .. } => Self::BusOverflow,
            },
        }
    }
}

/// Predicate deciding which envelopes a subscriber receives.
///
/// Empty dimensions match everything, so `SubscriptionFilter::all()` is the
/// firehose.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    classes: Option<Vec<EnvelopeClass>>,
    sources: Option<Vec<SourceId>>,
    subjects: Option<Vec<SubjectId>>,
}

impl SubscriptionFilter {
    /// Match every envelope on the bus.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match inbound envelopes of the given kinds.
    pub fn classes(classes: impl IntoIterator<Item = EnvelopeClass>) -> Self {
        Self {
            classes: Some(classes.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Inbound decisions, alerts, events and commands: everything the
    /// arbitration engine ingests.
    pub fn inbound() -> Self {
        Self::classes([
            EnvelopeClass::Decision,
            EnvelopeClass::Alert,
            EnvelopeClass::Event,
            EnvelopeClass::Command,
        ])
    }

    /// Everything the arbitration engine emits.
    pub fn outbound() -> Self {
        Self::classes([
            EnvelopeClass::FinalDecision,
            EnvelopeClass::DecisionRejected,
            EnvelopeClass::ConflictUnresolved,
            EnvelopeClass::BusOverflow,
        ])
    }

    /// Restrict to envelopes from the given sources.
    pub fn from_sources(mut self, sources: impl IntoIterator<Item = SourceId>) -> Self {
        self.sources = Some(sources.into_iter().collect());
        self
    }

    /// Restrict to envelopes about the given subjects.
    pub fn about_subjects(mut self, subjects: impl IntoIterator<Item = SubjectId>) -> Self {
        self.subjects = Some(subjects.into_iter().collect());
        self
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        if let Some(classes) = &self.classes {
            if !classes.contains(&EnvelopeClass::of(envelope)) {
                return false;
            }
        }
        if let Some(sources) = &self.sources {
            match envelope.source_id() {
                Some(source) if sources.contains(source) => {}
                _ => return false,
            }
        }
        if let Some(subjects) = &self.subjects {
            match envelope.subject_id() {
                Some(subject) if subjects.contains(subject) => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dae_core::InboundEnvelope;
    use serde_json::json;

    fn decision_env(source: &str, subject: &str) -> Envelope {
        Envelope::Inbound(InboundEnvelope::new(
            source,
            EnvelopeKind::Decision,
            Some(SubjectId::new(subject)),
            json!({}),
        ))
    }

    #[test]
    fn test_all_matches_everything() {
        let filter = SubscriptionFilter::all();
        assert!(filter.matches(&decision_env("anomaly-detector", "p1")));
        assert!(filter.matches(&Envelope::Outbound(OutboundEnvelope::BusOverflow {
            subscriber: "x".to_string(),
            dropped: 1,
        })));
    }

    #[test]
    fn test_class_filter() {
        let filter = SubscriptionFilter::classes([EnvelopeClass::Decision]);
        assert!(filter.matches(&decision_env("anomaly-detector", "p1")));
        assert!(!filter.matches(&Envelope::Inbound(InboundEnvelope::heartbeat("anomaly-detector"))));
    }

    #[test]
    fn test_source_and_subject_filters_compose() {
        let filter = SubscriptionFilter::inbound()
            .from_sources([SourceId::new("anomaly-detector")])
            .about_subjects([SubjectId::new("p1")]);

        assert!(filter.matches(&decision_env("anomaly-detector", "p1")));
        assert!(!filter.matches(&decision_env("anomaly-detector", "p2")));
        assert!(!filter.matches(&decision_env("pricing-adjuster", "p1")));
    }

    #[test]
    fn test_subject_filter_rejects_subjectless_traffic() {
        let filter = SubscriptionFilter::all().about_subjects([SubjectId::new("p1")]);
        assert!(!filter.matches(&Envelope::Inbound(InboundEnvelope::heartbeat("anomaly-detector"))));
    }
}
