//! The interaction policy table and its builder

use crate::rules::{InteractionKind, InteractionRule, ResolutionStrategy};
use crate::PolicyError;
use dae_core::SourceId;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

/// A pure combinator producing a merged payload from two conflicting ones.
///
/// Combinators are supplied alongside the policy, one per unordered source
/// pair. They must not touch external state; a failing or panicking
/// combinator downgrades the resolution to an escalation.
pub type MergeFn =
    Arc<dyn Fn(&JsonValue, &JsonValue) -> std::result::Result<JsonValue, String> + Send + Sync>;

/// Context accompanying a decision that can boost its effective priority
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextHints {
    /// Security-classified decisions always get the maximum priority
    pub security_classified: bool,
}

/// The static directed multigraph of interaction rules.
///
/// Built once via [`PolicyBuilder`], then shared read-only behind an `Arc`.
pub struct InteractionPolicy {
    rules: Vec<InteractionRule>,
    index: HashMap<(SourceId, SourceId), Vec<usize>>,
    merges: HashMap<(SourceId, SourceId), MergeFn>,
    sources: BTreeSet<SourceId>,
}

impl InteractionPolicy {
    /// Start building a policy.
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::new()
    }

    /// All rules from `from` toward `to`. Directional: absence of a forward
    /// rule does not imply absence of a reverse one.
    pub fn lookup(&self, from: &SourceId, to: &SourceId) -> &[InteractionRule] {
        match self.index.get(&(from.clone(), to.clone())) {
            Some(indices) => {
                // Indices are contiguous per pair by construction, but a
                // slice cannot be borrowed through the index vec; fall back
                // to the first/last span.
                let first = indices[0];
                let last = indices[indices.len() - 1];
                &self.rules[first..=last]
            }
            None => &[],
        }
    }

    /// The rule governing a conflict between `a` and `b`, if any.
    ///
    /// Only `Validate`/`Override` rules qualify. If both directions carry a
    /// governing rule, the higher priority governs; an exact tie yields
    /// `None` and the caller escalates.
    pub fn conflict_rule(&self, a: &SourceId, b: &SourceId) -> Option<&InteractionRule> {
        let best = |from: &SourceId, to: &SourceId| {
            self.lookup(from, to)
                .iter()
                .filter(|r| r.kind.governs_conflicts())
                .max_by_key(|r| r.priority)
        };

        match (best(a, b), best(b, a)) {
            (Some(fwd), Some(rev)) if fwd.priority == rev.priority => None,
            (Some(fwd), Some(rev)) => {
                if fwd.priority > rev.priority {
                    Some(fwd)
                } else {
                    Some(rev)
                }
            }
            (Some(rule), None) | (None, Some(rule)) => Some(rule),
            (None, None) => {
                warn!(a = %a, b = %b, "no governing rule for conflicting pair (policy gap)");
                None
            }
        }
    }

    /// Effective priority of a source under the given context.
    pub fn effective_priority(&self, source: &SourceId, hints: &ContextHints) -> u8 {
        if hints.security_classified {
            return 10;
        }
        self.rules
            .iter()
            .filter(|r| r.touches(source))
            .map(|r| r.priority)
            .max()
            .unwrap_or(5)
    }

    /// Importance weight of a source, from the priorities of the rules
    /// touching it. Consumed by the health aggregator.
    pub fn source_weight(&self, source: &SourceId) -> f32 {
        let weight: u32 = self
            .rules
            .iter()
            .filter(|r| r.touches(source))
            .map(|r| r.priority as u32)
            .sum();
        (weight as f32).max(1.0)
    }

    /// The merge combinator for an unordered pair, if registered.
    pub fn merge_combinator(&self, a: &SourceId, b: &SourceId) -> Option<&MergeFn> {
        self.merges.get(&pair_key(a, b))
    }

    /// All sources referenced by the policy. This is the known-source set
    /// used to validate envelopes at ingestion.
    pub fn sources(&self) -> &BTreeSet<SourceId> {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Report coverage problems without failing: sources with fewer than
    /// `min_interactions` touching rules, and pairs that can conflict but
    /// have no governing rule (those fall back to escalation).
    pub fn coverage_errors(&self, min_interactions: usize) -> Vec<String> {
        let mut errors = Vec::new();

        for source in &self.sources {
            let touching = self.rules.iter().filter(|r| r.touches(source)).count();
            if touching < min_interactions {
                errors.push(format!(
                    "source \"{source}\" has only {touching} interactions (minimum {min_interactions} expected)"
                ));
            }
        }

        for a in &self.sources {
            for b in &self.sources {
                if a >= b {
                    continue;
                }
                let governed = self
                    .lookup(a, b)
                    .iter()
                    .chain(self.lookup(b, a).iter())
                    .any(|r| r.kind.governs_conflicts());
                if !governed {
                    errors.push(format!(
                        "pair {a} / {b} has no validate/override rule; conflicts will escalate"
                    ));
                }
            }
        }

        errors
    }
}

impl std::fmt::Debug for InteractionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionPolicy")
            .field("rules", &self.rules.len())
            .field("sources", &self.sources.len())
            .field("merge_combinators", &self.merges.len())
            .finish()
    }
}

fn pair_key(a: &SourceId, b: &SourceId) -> (SourceId, SourceId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Builder assembling and validating an [`InteractionPolicy`]
#[derive(Default)]
pub struct PolicyBuilder {
    rules: Vec<InteractionRule>,
    merges: Vec<((SourceId, SourceId), MergeFn)>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one directed rule.
    pub fn rule(
        mut self,
        from: impl Into<SourceId>,
        to: impl Into<SourceId>,
        kind: InteractionKind,
        priority: u8,
        resolution: ResolutionStrategy,
    ) -> Self {
        self.rules
            .push(InteractionRule::new(from, to, kind, priority, resolution));
        self
    }

    /// Register a merge combinator for an unordered source pair.
    pub fn merge_combinator(
        mut self,
        a: impl Into<SourceId>,
        b: impl Into<SourceId>,
        combinator: MergeFn,
    ) -> Self {
        self.merges.push((pair_key(&a.into(), &b.into()), combinator));
        self
    }

    /// Validate and freeze the policy.
    pub fn build(self) -> crate::Result<InteractionPolicy> {
        let mut seen: BTreeSet<(SourceId, SourceId, InteractionKind)> = BTreeSet::new();
        for rule in &self.rules {
            if rule.from == rule.to {
                return Err(PolicyError::SelfLoop(rule.from.clone()));
            }
            if rule.priority == 0 || rule.priority > 10 {
                return Err(PolicyError::PriorityOutOfRange {
                    from: rule.from.clone(),
                    to: rule.to.clone(),
                    priority: rule.priority,
                });
            }
            if !seen.insert((rule.from.clone(), rule.to.clone(), rule.kind)) {
                return Err(PolicyError::DuplicateRule {
                    from: rule.from.clone(),
                    to: rule.to.clone(),
                    kind: rule.kind.as_str().to_string(),
                });
            }
        }

        let mut sources = BTreeSet::new();
        for rule in &self.rules {
            sources.insert(rule.from.clone());
            sources.insert(rule.to.clone());
        }

        for ((a, b), _) in &self.merges {
            if !sources.contains(a) || !sources.contains(b) {
                return Err(PolicyError::UnknownMergePair(a.clone(), b.clone()));
            }
        }

        // Sort rules so each (from, to) pair occupies a contiguous span,
        // then index the spans.
        let mut rules = self.rules;
        rules.sort_by(|x, y| {
            (&x.from, &x.to, std::cmp::Reverse(x.priority))
                .cmp(&(&y.from, &y.to, std::cmp::Reverse(y.priority)))
        });

        let mut index: HashMap<(SourceId, SourceId), Vec<usize>> = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            index
                .entry((rule.from.clone(), rule.to.clone()))
                .or_default()
                .push(i);
        }

        Ok(InteractionPolicy {
            rules,
            index,
            merges: self.merges.into_iter().collect(),
            sources,
        })
    }
}
