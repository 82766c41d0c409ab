//! Arbitration engine context and lifecycle
//!
//! One engine per process, constructed explicitly and dependency-injected:
//! `new` wires the policy, bus, resolver and health aggregator together,
//! `start` spawns the ingest worker, `shutdown` drains and flushes in-flight
//! conflicts to escalation. No global mutable state.

pub mod config;
pub mod source;

pub use config::EngineConfig;
pub use source::{DecisionSource, ScriptedSource};

use dae_bus::{BusStats, MessageBus, Subscription, SubscriptionFilter};
use dae_core::{
    Conflict, Decision, Envelope, EnvelopeKind, InboundEnvelope, OutboundEnvelope, Resolution,
    SourceId, SubjectId, ValidationError, Winner,
};
use dae_health::{HealthAggregator, HealthSnapshot};
use dae_policy::InteractionPolicy;
use dae_resolver::{ConflictResolver, RegisterOutcome, ResolutionStats};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Engine lifecycle errors
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("engine already running")]
    AlreadyRunning,

    #[error("engine not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Aggregate view over all engine components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub resolutions: ResolutionStats,
    pub bus: BusStats,
    pub validation_errors: u64,
    pub open_subjects: usize,
    pub unresolved_subjects: usize,
}

/// The arbitration engine: policy + bus + resolver + health, one per process.
pub struct ArbitrationEngine {
    policy: Arc<InteractionPolicy>,
    bus: MessageBus,
    resolver: Arc<ConflictResolver>,
    health: Arc<HealthAggregator>,
    config: EngineConfig,
    known_sources: Arc<HashSet<SourceId>>,
    lanes: Arc<DashMap<SubjectId, mpsc::Sender<Decision>>>,
    running: AtomicBool,
    accepting: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    validation_errors: Arc<AtomicU64>,
}

impl ArbitrationEngine {
    /// Wire an engine from an audited policy and a configuration.
    pub fn new(policy: InteractionPolicy, config: EngineConfig) -> Self {
        let policy = Arc::new(policy);
        let arbiter_id = SourceId::new(config.arbiter_id.clone());

        let known_sources: HashSet<SourceId> = policy.sources().iter().cloned().collect();

        let resolver = Arc::new(ConflictResolver::new(
            Arc::clone(&policy),
            arbiter_id,
            config.coincidence_window,
            config.resolution_deadline,
            config.history_capacity,
        ));
        let health = Arc::new(HealthAggregator::new(&policy, config.liveness_window));
        let bus = MessageBus::new(config.bus_queue_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            policy,
            bus,
            resolver,
            health,
            config,
            known_sources: Arc::new(known_sources),
            lanes: Arc::new(DashMap::new()),
            running: AtomicBool::new(false),
            accepting: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
            validation_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start accepting and arbitrating decisions.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }
        self.accepting.store(true, Ordering::SeqCst);

        let subscription = self
            .bus
            .subscribe("arbitration-ingest", SubscriptionFilter::inbound());

        let worker = IngestWorker {
            subscription,
            bus: self.bus.clone(),
            resolver: Arc::clone(&self.resolver),
            health: Arc::clone(&self.health),
            known_sources: Arc::clone(&self.known_sources),
            lanes: Arc::clone(&self.lanes),
            accepting: Arc::clone(&self.accepting),
            tasks: Arc::clone(&self.tasks),
            validation_errors: Arc::clone(&self.validation_errors),
            shutdown_rx: self.shutdown_tx.subscribe(),
            lane_queue_capacity: self.config.lane_queue_capacity,
        };
        let handle = tokio::spawn(worker.run());
        self.tasks.lock().push(handle);

        info!(sources = self.known_sources.len(), rules = self.policy.len(),
            "arbitration engine started");
        Ok(())
    }

    /// Stop accepting new decisions, drain queues and flush in-flight
    /// resolutions to escalation.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(EngineError::NotRunning);
        }
        self.accepting.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        self.bus.close();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("arbitration engine stopped");
        Ok(())
    }

    /// Publish a decision on behalf of a source.
    pub fn publish_decision(&self, decision: &Decision) {
        self.bus.publish(InboundEnvelope::decision(decision));
    }

    /// Publish a bare heartbeat for a source.
    pub fn publish_heartbeat(&self, source: impl Into<SourceId>) {
        self.bus.publish(InboundEnvelope::heartbeat(source));
    }

    /// Publish a raw inbound envelope (alerts, events, commands, or a
    /// hand-built decision envelope).
    pub fn publish_envelope(&self, envelope: InboundEnvelope) {
        self.bus.publish(envelope);
    }

    /// Run one lightweight worker publishing a source's envelopes onto the
    /// bus until the source is exhausted or the engine shuts down.
    pub fn spawn_source<S: DecisionSource + 'static>(&self, mut source: S) {
        let bus = self.bus.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let id = source.id();
        let handle = tokio::spawn(async move {
            debug!(source = %id, "source worker started");
            loop {
                tokio::select! {
                    maybe = source.next_envelope() => match maybe {
                        Some(envelope) => bus.publish(envelope),
                        None => break,
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!(source = %id, "source worker stopped");
        });
        self.tasks.lock().push(handle);
    }

    /// Subscribe to the engine's outbound event stream (for business code
    /// applying effects, or a dashboard).
    pub fn subscribe_outbound(&self, label: impl Into<String>) -> Subscription {
        self.bus.subscribe(label, SubscriptionFilter::outbound())
    }

    /// Subscribe with a custom filter.
    pub fn subscribe(&self, label: impl Into<String>, filter: SubscriptionFilter) -> Subscription {
        self.bus.subscribe(label, filter)
    }

    // Read-only query surface; all side-effect-free.

    pub fn current_health(&self) -> HealthSnapshot {
        self.health.current_health()
    }

    pub fn resolution_history(&self, limit: usize) -> Vec<Resolution> {
        self.resolver.resolution_history(limit)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            resolutions: self.resolver.stats(),
            bus: self.bus.stats(),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            open_subjects: self.resolver.registry().open_count(),
            unresolved_subjects: self.resolver.registry().unresolved_count(),
        }
    }

    pub fn policy(&self) -> &InteractionPolicy {
        &self.policy
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// The single ingest worker: validates, records liveness, and dispatches
/// decisions to per-subject lanes in arrival order.
struct IngestWorker {
    subscription: Subscription,
    bus: MessageBus,
    resolver: Arc<ConflictResolver>,
    health: Arc<HealthAggregator>,
    known_sources: Arc<HashSet<SourceId>>,
    lanes: Arc<DashMap<SubjectId, mpsc::Sender<Decision>>>,
    accepting: Arc<AtomicBool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    validation_errors: Arc<AtomicU64>,
    shutdown_rx: watch::Receiver<bool>,
    lane_queue_capacity: usize,
}

impl IngestWorker {
    async fn run(self) {
        while let Some(envelope) = self.subscription.recv().await {
            self.handle(&envelope).await;
        }
        debug!("ingest worker drained");
    }

    async fn handle(&self, envelope: &Envelope) {
        self.health.record_envelope(envelope);

        let Envelope::Inbound(inbound) = envelope else {
            return;
        };

        if let Err(error) = inbound.validate(&self.known_sources) {
            self.reject(error);
            return;
        }

        if inbound.kind != EnvelopeKind::Decision {
            // Alerts, events and commands carry no decision to arbitrate.
            return;
        }
        let decision = match inbound.as_decision() {
            Some(decision) if !decision.action.is_empty() => decision,
            Some(_) => {
                self.reject(ValidationError::EmptyAction(inbound.source_id.clone()));
                return;
            }
            None => {
                self.reject(ValidationError::MalformedPayload(inbound.source_id.clone()));
                return;
            }
        };

        if !self.accepting.load(Ordering::SeqCst) {
            debug!(subject = %decision.subject_id, "engine draining, decision not accepted");
            return;
        }

        let subject = decision.subject_id.clone();
        let sender = self
            .lanes
            .entry(subject.clone())
            .or_insert_with(|| self.spawn_lane(subject))
            .clone();

        if sender.send(decision).await.is_err() {
            // Lane already stopped by shutdown; nothing to do.
            debug!("subject lane closed before dispatch");
        }
    }

    fn reject(&self, error: ValidationError) {
        self.validation_errors.fetch_add(1, Ordering::Relaxed);
        warn!(%error, "validation_error: envelope rejected at ingestion");
    }

    /// Lanes serialize decisions per subject while different subjects
    /// resolve fully in parallel.
    fn spawn_lane(&self, subject: SubjectId) -> mpsc::Sender<Decision> {
        let (tx, rx) = mpsc::channel(self.lane_queue_capacity);
        let lane = SubjectLane {
            subject,
            resolver: Arc::clone(&self.resolver),
            bus: self.bus.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
        };
        let handle = tokio::spawn(lane.run(rx));
        self.tasks.lock().push(handle);
        tx
    }
}

struct SubjectLane {
    subject: SubjectId,
    resolver: Arc<ConflictResolver>,
    bus: MessageBus,
    shutdown_rx: watch::Receiver<bool>,
}

impl SubjectLane {
    async fn run(mut self, mut rx: mpsc::Receiver<Decision>) {
        debug!(subject = %self.subject, "subject lane started");
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            let decision = tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(decision) => decision,
                    None => break,
                },
                _ = self.shutdown_rx.changed() => break,
            };
            self.process(decision).await;
        }
        debug!(subject = %self.subject, "subject lane stopped");
    }

    async fn process(&mut self, decision: Decision) {
        match self.resolver.register(decision.clone()) {
            RegisterOutcome::Duplicate => {}
            RegisterOutcome::Registered | RegisterOutcome::Superseded(_) => {
                // No conflict: the decision takes effect immediately
                // downstream. A conflict inside the coincidence window will
                // supersede it with a fresh final decision.
                self.bus.publish(OutboundEnvelope::FinalDecision {
                    subject_id: decision.subject_id.clone(),
                    decision,
                    resolution: None,
                });
            }
            RegisterOutcome::Conflicted(existing) => {
                let conflict = self.resolver.build_conflict(existing, decision);
                let resolution = tokio::select! {
                    resolution = self.resolver.resolve(&conflict) => resolution,
                    _ = self.shutdown_rx.changed() => {
                        self.resolver.escalate_now(&conflict, "engine shutdown")
                    }
                };
                self.publish_outcome(&conflict, resolution);
            }
        }
    }

    fn publish_outcome(&self, conflict: &Conflict, resolution: Resolution) {
        match &resolution.winner {
            Winner::Source(winner) => {
                let loser = if &conflict.decision_a.source_id == winner {
                    conflict.decision_b.clone()
                } else {
                    conflict.decision_a.clone()
                };
                self.bus.publish(OutboundEnvelope::DecisionRejected {
                    subject_id: conflict.subject_id.clone(),
                    decision: loser,
                    conflict_id: conflict.id,
                });
            }
            Winner::Merge => {}
            Winner::Escalate => {
                self.bus.publish(OutboundEnvelope::ConflictUnresolved {
                    subject_id: conflict.subject_id.clone(),
                    conflict_id: conflict.id,
                    resolution: Box::new(resolution.clone()),
                });
            }
        }

        self.bus.publish(OutboundEnvelope::FinalDecision {
            subject_id: conflict.subject_id.clone(),
            decision: resolution.final_decision.clone(),
            resolution: Some(Box::new(resolution)),
        });
    }
}
