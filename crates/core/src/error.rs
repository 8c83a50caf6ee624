//! Error types for the Nexus filesystem core
//!
//! This module defines the unified error type used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Error Categories
//!
//! - **Not Found**: path, content hash, or tuple absent (non-fatal)
//! - **Conflict**: uniqueness violation or stale optimistic-lock generation
//! - **Permission Denied**: enforcer rejected the call, with a reason tag
//! - **Validation**: schema invariant failed before any write
//! - **Limit Exceeded**: ReBAC graph ceiling hit during traversal
//! - **Indeterminate**: ReBAC returned no definite answer (fail-closed)
//! - **Backend**: wraps storage / IO / JSON / lock-file failures
//!
//! Layers below the enforcer surface typed errors; the enforcer is the only
//! component that converts permission failures into user-visible messages.

use std::io;
use thiserror::Error;

/// Result type alias for Nexus operations
pub type Result<T> = std::result::Result<T, NexusError>;

/// Which graph ceiling was hit during a ReBAC traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LimitType {
    /// Rewrite-tree recursion depth
    Depth,
    /// Tuples expanded from a single node
    FanOut,
    /// Distinct nodes visited
    VisitedNodes,
    /// Tuple-store queries issued
    TupleQueries,
    /// Wall-clock execution time
    ExecutionTime,
}

impl std::fmt::Display for LimitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LimitType::Depth => "depth",
            LimitType::FanOut => "fan_out",
            LimitType::VisitedNodes => "visited_nodes",
            LimitType::TupleQueries => "tuple_queries",
            LimitType::ExecutionTime => "execution_time",
        };
        f.write_str(s)
    }
}

/// Reason tag attached to a permission denial
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DenialReason {
    /// No tuple chain grants the permission
    NoGrant,
    /// Subject's zone differs from the object's zone
    WrongZone,
    /// Admin bypass is disabled by configuration
    AdminKillSwitch,
    /// Admin lacks the capability the operation requires
    MissingCapability,
    /// System subject touched a path outside /system/
    SystemBypassNotAllowed,
    /// Empty or malformed subject in the request context
    InvalidContext,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenialReason::NoGrant => "no_grant",
            DenialReason::WrongZone => "wrong_zone",
            DenialReason::AdminKillSwitch => "admin_kill_switch",
            DenialReason::MissingCapability => "missing_capability",
            DenialReason::SystemBypassNotAllowed => "system_bypass_not_allowed",
            DenialReason::InvalidContext => "invalid_context",
        };
        f.write_str(s)
    }
}

/// Unified error type for the Nexus core
#[derive(Debug, Error)]
pub enum NexusError {
    /// Path, content hash, or tuple absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation or concurrent-modification conflict
    #[error("conflict: {0}")]
    Conflict(String),

    /// Enforcer rejected the call
    #[error("permission denied ({reason}): {message}")]
    PermissionDenied {
        /// Machine-readable reason tag
        reason: DenialReason,
        /// Human-readable context
        message: String,
    },

    /// Schema invariant failed before a write
    #[error("validation error: {0}")]
    Validation(String),

    /// ReBAC graph ceiling hit; check fails closed
    #[error("graph limit exceeded: {limit_type} (limit {limit_value}, actual {actual_value})")]
    LimitExceeded {
        /// Which ceiling was hit
        limit_type: LimitType,
        /// The configured ceiling
        limit_value: u64,
        /// The observed value
        actual_value: u64,
        /// Path under evaluation, if any
        path: Option<String>,
    },

    /// ReBAC returned no definite answer; never cached
    #[error("indeterminate permission result: {0}")]
    Indeterminate(String),

    /// Storage / IO / JSON / lock-file failure, tagged with the backend
    #[error("backend error ({backend}): {message}")]
    Backend {
        /// Name of the backend that raised the error
        backend: String,
        /// Failure description
        message: String,
    },

    /// Stored bytes no longer hash to their key
    #[error("content corruption: {0}")]
    Corruption(String),

    /// Optimistic-lock transition presented a stale generation
    #[error("stale generation: expected {expected}, actual {actual}")]
    StaleGeneration {
        /// Generation the caller presented
        expected: u64,
        /// Generation currently stored
        actual: u64,
    },

    /// Pagination cursor failed to decode or its filters mismatch
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// Consistency token failed MAC verification or decoding
    #[error("invalid consistency token: {0}")]
    InvalidToken(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for NexusError {
    fn from(e: serde_json::Error) -> Self {
        NexusError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for NexusError {
    fn from(e: bincode::Error) -> Self {
        NexusError::Serialization(e.to_string())
    }
}

impl NexusError {
    /// Convenience constructor for backend errors
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        NexusError::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for permission denials
    pub fn denied(reason: DenialReason, message: impl Into<String>) -> Self {
        NexusError::PermissionDenied {
            reason,
            message: message.into(),
        }
    }

    /// Check if this error represents a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(self, NexusError::NotFound(_))
    }

    /// Check if this error is worth retrying at the storage layer
    ///
    /// Backend errors may be transient (concurrent writer races on CAS
    /// metadata); everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NexusError::Backend { .. } | NexusError::Io(_))
    }

    /// HTTP status a server façade should translate this error to
    ///
    /// Graph-limit timeouts map to 503, other limits to 429, matching the
    /// enforcement contract.
    pub fn http_status(&self) -> u16 {
        match self {
            NexusError::NotFound(_) => 404,
            NexusError::Conflict(_) | NexusError::StaleGeneration { .. } => 409,
            NexusError::PermissionDenied { .. } => 403,
            NexusError::Validation(_)
            | NexusError::InvalidCursor(_)
            | NexusError::InvalidToken(_) => 400,
            NexusError::LimitExceeded { limit_type, .. } => match limit_type {
                LimitType::ExecutionTime => 503,
                _ => 429,
            },
            NexusError::Indeterminate(_) => 503,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = NexusError::NotFound("/workspace/missing.txt".to_string());
        assert!(err.to_string().contains("not found"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_display_permission_denied() {
        let err = NexusError::denied(DenialReason::NoGrant, "read /secret/x");
        let msg = err.to_string();
        assert!(msg.contains("permission denied"));
        assert!(msg.contains("no_grant"));
    }

    #[test]
    fn test_error_display_limit_exceeded() {
        let err = NexusError::LimitExceeded {
            limit_type: LimitType::Depth,
            limit_value: 50,
            actual_value: 51,
            path: Some("/a/b".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("depth"));
        assert!(msg.contains("50"));
        assert!(msg.contains("51"));
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(NexusError::NotFound("x".into()).http_status(), 404);
        assert_eq!(NexusError::Conflict("x".into()).http_status(), 409);
        assert_eq!(
            NexusError::denied(DenialReason::WrongZone, "x").http_status(),
            403
        );
        assert_eq!(NexusError::Validation("x".into()).http_status(), 400);
    }

    #[test]
    fn test_http_status_limit_timeout_is_503() {
        let err = NexusError::LimitExceeded {
            limit_type: LimitType::ExecutionTime,
            limit_value: 5000,
            actual_value: 6000,
            path: None,
        };
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn test_http_status_limit_depth_is_429() {
        let err = NexusError::LimitExceeded {
            limit_type: LimitType::Depth,
            limit_value: 50,
            actual_value: 100,
            path: None,
        };
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn test_stale_generation_is_conflict_status() {
        let err = NexusError::StaleGeneration {
            expected: 3,
            actual: 5,
        };
        assert_eq!(err.http_status(), 409);
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn test_backend_error_is_retryable() {
        let err = NexusError::backend("local", "transient meta race");
        assert!(err.is_retryable());
        assert!(!NexusError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn test_limit_type_display() {
        assert_eq!(LimitType::Depth.to_string(), "depth");
        assert_eq!(LimitType::ExecutionTime.to_string(), "execution_time");
        assert_eq!(LimitType::TupleQueries.to_string(), "tuple_queries");
    }

    #[test]
    fn test_denial_reason_display() {
        assert_eq!(DenialReason::NoGrant.to_string(), "no_grant");
        assert_eq!(
            DenialReason::SystemBypassNotAllowed.to_string(),
            "system_bypass_not_allowed"
        );
    }
}
