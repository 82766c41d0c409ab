//! Built-in policy for the commerce deployment
//!
//! Seven always-on decision sources share the catalog, order and account
//! state. The table below is the audited precedence configuration between
//! them; any deployment may supply its own via [`PolicyBuilder`].

use crate::policy::{InteractionPolicy, MergeFn, PolicyBuilder};
use crate::rules::InteractionKind::{Inform, Override, Request, Trigger, Validate};
use crate::rules::ResolutionStrategy::{Escalate, FromWins, Merge, ToWins};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub const ANOMALY_DETECTOR: &str = "anomaly-detector";
pub const PRICING_ADJUSTER: &str = "pricing-adjuster";
pub const RESOURCE_DISTRIBUTOR: &str = "resource-distributor";
pub const ROUTE_PLANNER: &str = "route-planner";
pub const RESILIENCE_MONITOR: &str = "resilience-monitor";
pub const META_LEARNER: &str = "meta-learner";
pub const AUTHORITY: &str = "authority";

/// Shallow-union merge: fields of both payloads, the newer side winning on
/// key collisions; non-object payloads fall back to the first argument.
fn union_merge(a: &JsonValue, b: &JsonValue) -> Result<JsonValue, String> {
    match (a, b) {
        (JsonValue::Object(ma), JsonValue::Object(mb)) => {
            let mut out = ma.clone();
            for (k, v) in mb {
                out.insert(k.clone(), v.clone());
            }
            Ok(JsonValue::Object(out))
        }
        (JsonValue::Number(na), JsonValue::Number(nb)) => {
            match (na.as_f64(), nb.as_f64()) {
                (Some(x), Some(y)) => Ok(JsonValue::from((x + y) / 2.0)),
                _ => Err("non-finite numeric payloads".to_string()),
            }
        }
        _ => Ok(a.clone()),
    }
}

/// The default interaction policy for the commerce deployment.
pub fn default_commerce() -> InteractionPolicy {
    let union: MergeFn = Arc::new(union_merge);

    PolicyBuilder::new()
        // anomaly-detector: security decisions outrank pricing outright
        .rule(ANOMALY_DETECTOR, RESILIENCE_MONITOR, Trigger, 10, FromWins)
        .rule(ANOMALY_DETECTOR, META_LEARNER, Inform, 7, Merge)
        .rule(ANOMALY_DETECTOR, AUTHORITY, Request, 9, Escalate)
        .rule(ANOMALY_DETECTOR, PRICING_ADJUSTER, Override, 10, FromWins)
        .rule(ANOMALY_DETECTOR, PRICING_ADJUSTER, Validate, 6, FromWins)
        // meta-learner: shares learned patterns, never wins a conflict
        .rule(META_LEARNER, ANOMALY_DETECTOR, Inform, 6, Merge)
        .rule(META_LEARNER, ROUTE_PLANNER, Inform, 5, Merge)
        .rule(META_LEARNER, PRICING_ADJUSTER, Inform, 5, Merge)
        .rule(META_LEARNER, RESOURCE_DISTRIBUTOR, Inform, 5, Merge)
        // resource-distributor: asks for routes and approval
        .rule(RESOURCE_DISTRIBUTOR, ANOMALY_DETECTOR, Inform, 7, Escalate)
        .rule(RESOURCE_DISTRIBUTOR, ROUTE_PLANNER, Request, 8, ToWins)
        .rule(RESOURCE_DISTRIBUTOR, AUTHORITY, Request, 7, ToWins)
        .rule(RESOURCE_DISTRIBUTOR, META_LEARNER, Inform, 4, Merge)
        // route-planner
        .rule(ROUTE_PLANNER, META_LEARNER, Inform, 5, Merge)
        .rule(ROUTE_PLANNER, RESOURCE_DISTRIBUTOR, Inform, 6, FromWins)
        .rule(ROUTE_PLANNER, RESILIENCE_MONITOR, Request, 7, ToWins)
        .rule(ROUTE_PLANNER, PRICING_ADJUSTER, Inform, 5, FromWins)
        // resilience-monitor: emergency lockdown overrides even authority
        .rule(RESILIENCE_MONITOR, ANOMALY_DETECTOR, Inform, 10, FromWins)
        .rule(RESILIENCE_MONITOR, AUTHORITY, Override, 10, FromWins)
        .rule(RESILIENCE_MONITOR, META_LEARNER, Inform, 6, Merge)
        .rule(RESILIENCE_MONITOR, ROUTE_PLANNER, Inform, 9, FromWins)
        // pricing-adjuster: proposes, others dispose
        .rule(PRICING_ADJUSTER, ANOMALY_DETECTOR, Request, 7, ToWins)
        .rule(PRICING_ADJUSTER, META_LEARNER, Inform, 4, Merge)
        .rule(PRICING_ADJUSTER, AUTHORITY, Request, 6, ToWins)
        .rule(PRICING_ADJUSTER, RESOURCE_DISTRIBUTOR, Inform, 5, Merge)
        // authority: validates consequential decisions
        .rule(AUTHORITY, ANOMALY_DETECTOR, Inform, 6, Escalate)
        .rule(AUTHORITY, META_LEARNER, Inform, 5, Merge)
        .rule(AUTHORITY, RESOURCE_DISTRIBUTOR, Validate, 7, FromWins)
        .rule(AUTHORITY, PRICING_ADJUSTER, Validate, 6, FromWins)
        .rule(AUTHORITY, ROUTE_PLANNER, Validate, 7, FromWins)
        .merge_combinator(META_LEARNER, ANOMALY_DETECTOR, union.clone())
        .merge_combinator(META_LEARNER, ROUTE_PLANNER, union.clone())
        .merge_combinator(META_LEARNER, PRICING_ADJUSTER, union.clone())
        .merge_combinator(META_LEARNER, RESOURCE_DISTRIBUTOR, union.clone())
        .merge_combinator(META_LEARNER, RESILIENCE_MONITOR, union.clone())
        .merge_combinator(META_LEARNER, AUTHORITY, union)
        .build()
        .expect("built-in commerce policy must be valid")
}
