//! Benchmarks for the Decision Arbitration Engine
//!
//! This crate contains performance benchmarks for the hot paths of the
//! arbitration pipeline: policy lookup, conflict classification and bus
//! fan-out.

/// Re-export core crates for benchmarks
pub use dae_bus;
pub use dae_core;
pub use dae_policy;
pub use dae_resolver;
