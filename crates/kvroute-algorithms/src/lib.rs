//! Routing policies for KV-Route.
//!
//! This crate provides the [`RoutingPolicy`] trait and the built-in
//! implementations used by the cache-aware router:
//!
//! | Policy | Strategy | Best For |
//! |--------|----------|----------|
//! | [`KvCost`] | Minimize recompute + decode + load cost | Shared prompts, mixed load |
//! | [`LeastLoaded`] | Random idle worker, else fewest in flight | Pools without a prefix index |

pub mod kv_cost;
pub mod least_loaded;
pub mod traits;

pub use kv_cost::KvCost;
pub use least_loaded::LeastLoaded;
pub use traits::*;

/// Create a routing policy by name.
pub fn policy_by_name(name: &str) -> Option<Box<dyn RoutingPolicy>> {
    match name {
        "kv_cost" => Some(Box::new(KvCost::new())),
        "least_loaded" => Some(Box::new(LeastLoaded::new())),
        _ => None,
    }
}

/// List all available built-in policy names.
pub fn available_policies() -> Vec<&'static str> {
    vec!["kv_cost", "least_loaded"]
}
