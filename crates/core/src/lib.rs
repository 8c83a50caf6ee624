//! nexus-core: shared types for the Nexus agent filesystem
//!
//! Foundational vocabulary used by every other crate in the workspace:
//! identity and path types, the unified error model, per-component
//! configuration, ReBAC graph limits, MAC'd consistency tokens, the
//! backend response envelope, and the storage port traits.

pub mod config;
pub mod error;
pub mod limits;
pub mod response;
pub mod token;
pub mod traits;
pub mod types;

pub use config::{
    CasConfig, DaemonConfig, EnforcerConfig, LockConfig, RebacConfig, ResolverConfig,
};
pub use error::{DenialReason, LimitType, NexusError, Result};
pub use limits::GraphLimits;
pub use response::{Response, ResponseCode};
pub use token::{ConsistencyToken, TokenCodec};
pub use traits::{BackendCapabilities, BackendFileInfo, ContentBackend};
pub use types::{ObjectRef, Permission, SourceType, Subject, VirtualPath, ZoneId};
