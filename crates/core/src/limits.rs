//! Graph traversal ceilings for the ReBAC engine
//!
//! Hard limits enforced during userset-rewrite traversal. When any ceiling
//! is hit, the check fails closed with an indeterminate result; the HTTP
//! translation is 503 for a timeout and 429 for the rest.

use serde::{Deserialize, Serialize};

/// Hard ceilings enforced during a ReBAC traversal
///
/// These protect the engine from adversarial or accidental deep graphs
/// (DoS protection). An exceeded ceiling never produces a definite answer
/// and is never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphLimits {
    /// Maximum rewrite-tree recursion depth
    pub max_depth: u32,
    /// Maximum tuples expanded from a single tupleset node
    pub max_fan_out: u32,
    /// Maximum distinct (object, permission) nodes visited
    pub max_visited_nodes: u32,
    /// Maximum tuple-store queries per check
    pub max_tuple_queries: u32,
    /// Maximum wall-clock execution time in milliseconds
    pub max_execution_time_ms: u64,
}

impl Default for GraphLimits {
    fn default() -> Self {
        GraphLimits {
            max_depth: 50,
            max_fan_out: 100,
            max_visited_nodes: 10_000,
            max_tuple_queries: 1_000,
            max_execution_time_ms: 5_000,
        }
    }
}

impl GraphLimits {
    /// Permissive limits for tests that build deliberately deep graphs
    pub fn unbounded_for_tests() -> Self {
        GraphLimits {
            max_depth: u32::MAX,
            max_fan_out: u32::MAX,
            max_visited_nodes: u32::MAX,
            max_tuple_queries: u32::MAX,
            max_execution_time_ms: u64::MAX,
        }
    }
}
