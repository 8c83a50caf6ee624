//! Core types for the Nexus filesystem
//!
//! This module defines the foundational types:
//! - ZoneId: tenancy boundary identifier
//! - VirtualPath: validated absolute path in the virtual namespace
//! - Subject / ObjectRef: the two ends of a ReBAC tuple
//! - Permission: the permission vocabulary the enforcer speaks

use crate::error::{NexusError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenancy boundary identifier
///
/// A zone is the unit of isolation: each zone has its own revision counter
/// and its own slice of the virtual namespace. Zone ids are plain strings
/// ("default", "zone-a", ...) rather than UUIDs so operators can name them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(String);

impl ZoneId {
    /// Create a zone id from a string
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The default zone used when a caller does not specify one
    pub fn default_zone() -> Self {
        Self("default".to_string())
    }

    /// String view of the id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Validated absolute path in the virtual namespace
///
/// Invariants enforced at construction:
/// - starts with `/`
/// - contains no null bytes
/// - contains no empty segments (`//`) except the root itself
/// - no `.` / `..` segments
///
/// Paths may be arbitrarily deep (500 segments is fine); only structure is
/// validated, not length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualPath(String);

impl VirtualPath {
    /// Parse and validate a virtual path
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(NexusError::Validation(format!(
                "path must be absolute: {path:?}"
            )));
        }
        if path.contains('\0') {
            return Err(NexusError::Validation(
                "path contains a null byte".to_string(),
            ));
        }
        if path.len() > 1 {
            for segment in path[1..].split('/') {
                if segment.is_empty() {
                    return Err(NexusError::Validation(format!(
                        "path contains an empty segment: {path:?}"
                    )));
                }
                if segment == "." || segment == ".." {
                    return Err(NexusError::Validation(format!(
                        "path contains a relative segment: {path:?}"
                    )));
                }
            }
        }
        Ok(Self(path))
    }

    /// The root path `/`
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// String view of the path
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent path, or None for the root
    ///
    /// `/a/b/c` -> `/a/b`; `/a` -> `/`.
    pub fn parent(&self) -> Option<Self> {
        if self.0 == "/" {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self("/".to_string())),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Iterator over path segments (excluding the root)
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Whether this path lies under (or equals) the given prefix path
    ///
    /// Prefix matching is segment-aware: `/ab` is NOT under `/a`.
    pub fn is_under(&self, prefix: &str) -> bool {
        if prefix == "/" {
            return true;
        }
        let prefix = prefix.trim_end_matches('/');
        self.0 == prefix || self.0.starts_with(&format!("{prefix}/"))
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VirtualPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One end of a ReBAC tuple: who is asking
///
/// The wildcard subject `("*", "*")` denotes public access and grants its
/// relation to every subject across every tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    /// Subject type ("user", "agent", "group", or "*")
    pub subject_type: String,
    /// Subject identifier (or "*")
    pub subject_id: String,
    /// Optional relation for userset subjects (e.g. group#member)
    pub subject_relation: Option<String>,
}

impl Subject {
    /// Create a concrete subject
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            subject_relation: None,
        }
    }

    /// Create a user subject
    pub fn user(id: impl Into<String>) -> Self {
        Self::new("user", id)
    }

    /// Create an agent subject
    pub fn agent(id: impl Into<String>) -> Self {
        Self::new("agent", id)
    }

    /// The public wildcard subject `("*", "*")`
    pub fn wildcard() -> Self {
        Self::new("*", "*")
    }

    /// Whether this is the public wildcard
    pub fn is_wildcard(&self) -> bool {
        self.subject_type == "*" && self.subject_id == "*"
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject_relation {
            Some(rel) => write!(f, "{}:{}#{}", self.subject_type, self.subject_id, rel),
            None => write!(f, "{}:{}", self.subject_type, self.subject_id),
        }
    }
}

/// The other end of a ReBAC tuple: what is being accessed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object type ("file", "memory", "folder", ...)
    pub object_type: String,
    /// Object identifier (a virtual path for files)
    pub object_id: String,
}

impl ObjectRef {
    /// Create an object reference
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    /// Create a file object reference
    pub fn file(path: impl Into<String>) -> Self {
        Self::new("file", path)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// Permission vocabulary understood by the enforcer
///
/// `Traverse` is implied by either `Read` or `Write`; the namespace rewrite
/// encodes that implication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read file content and metadata
    Read,
    /// Create or modify content
    Write,
    /// Execute (run as skill / program)
    Execute,
    /// Grant access to others
    Share,
    /// Pass through a directory on the way to a deeper path
    Traverse,
}

impl Permission {
    /// Relation name used in namespace rewrites
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Execute => "execute",
            Permission::Share => "share",
            Permission::Traverse => "traverse",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a file-content version came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// First write or plain overwrite
    Original,
    /// Explicit update of an existing resource
    Update,
    /// Forked from another lineage
    Fork,
    /// Merge of two lineages
    Merge,
    /// Produced by memory consolidation
    Consolidated,
    /// Restored from an earlier version
    Rollback,
}

impl SourceType {
    /// Stable string form stored in the version-history table
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Original => "original",
            SourceType::Update => "update",
            SourceType::Fork => "fork",
            SourceType::Merge => "merge",
            SourceType::Consolidated => "consolidated",
            SourceType::Rollback => "rollback",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "original" => Some(SourceType::Original),
            "update" => Some(SourceType::Update),
            "fork" => Some(SourceType::Fork),
            "merge" => Some(SourceType::Merge),
            "consolidated" => Some(SourceType::Consolidated),
            "rollback" => Some(SourceType::Rollback),
            _ => None,
        }
    }
}
