//! Conflict detection and resolution for the Decision Arbitration Engine
//!
//! Nothing here returns a fatal error: malformed input is rejected before it
//! reaches the registry, and every failure during resolution (policy gap,
//! merge failure, panic, deadline overrun) converges on an escalation.

pub mod registry;
pub mod resolver;

pub use registry::{ConflictRegistry, RegisterOutcome, SubjectPhase};
pub use resolver::{ConflictResolver, ResolutionStats};
