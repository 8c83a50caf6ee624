//! nexus-rebac: relationship-based access control
//!
//! Three layers in one crate:
//!
//! - the engine: namespace configs, userset-rewrite evaluation over the
//!   tuple store, graph-limit DoS protection, L1 decision cache keyed by
//!   revision bucket, consistency tokens;
//! - the resolver: per-subject mount tables with binary-search visibility
//!   and a positive/negative dcache;
//! - the enforcer: deny-by-default decision chain with system and admin
//!   bypasses, cross-zone fencing, ancestor walks, and audit trails.

pub mod enforcer;
pub mod engine;
pub mod namespace;
pub mod resolver;

pub use enforcer::{AccessContext, PermissionEnforcer};
pub use engine::{
    CheckResult, Consistency, LimitInfo, RebacEngine, TupleInput, WriteResult,
};
pub use namespace::{NamespaceConfig, NamespaceRegistry, Rewrite};
pub use resolver::{bisect_visible, NamespaceResolver, ResolverMetrics};
