//! Decision-source worker seam
//!
//! The business logic inside a source is an external collaborator; it only
//! needs to honor the envelope contract. The engine runs one lightweight
//! worker per source.

use async_trait::async_trait;
use dae_core::{InboundEnvelope, SourceId};
use std::collections::VecDeque;
use std::time::Duration;

/// An independent producer of decisions about shared subjects.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    /// Stable identity of this source.
    fn id(&self) -> SourceId;

    /// The next envelope to publish, or `None` when the source is done.
    async fn next_envelope(&mut self) -> Option<InboundEnvelope>;
}

/// A source replaying a fixed script of envelopes, optionally paced.
///
/// Used by the scenario harness to inject synthetic conflicting decisions.
pub struct ScriptedSource {
    id: SourceId,
    script: VecDeque<InboundEnvelope>,
    pace: Option<Duration>,
}

impl ScriptedSource {
    pub fn new(id: impl Into<SourceId>, script: impl IntoIterator<Item = InboundEnvelope>) -> Self {
        Self {
            id: id.into(),
            script: script.into_iter().collect(),
            pace: None,
        }
    }

    /// Sleep this long before each emission.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }
}

#[async_trait]
impl DecisionSource for ScriptedSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    async fn next_envelope(&mut self) -> Option<InboundEnvelope> {
        let envelope = self.script.pop_front()?;
        if let Some(pace) = self.pace {
            tokio::time::sleep(pace).await;
        }
        Some(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dae_core::Decision;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_source_drains_in_order() {
        let first = Decision::new("pricing-adjuster", "p1", "adjust_price", json!({}), 5);
        let second = Decision::new("pricing-adjuster", "p2", "adjust_price", json!({}), 5);
        let mut source = ScriptedSource::new(
            "pricing-adjuster",
            [
                InboundEnvelope::decision(&first),
                InboundEnvelope::decision(&second),
            ],
        );

        let a = source.next_envelope().await.unwrap();
        assert_eq!(a.subject_id.as_ref().unwrap().as_str(), "p1");
        let b = source.next_envelope().await.unwrap();
        assert_eq!(b.subject_id.as_ref().unwrap().as_str(), "p2");
        assert!(source.next_envelope().await.is_none());
    }
}
