//! Configuration knobs for each component
//!
//! Plain structs with `Default` impls matching the documented defaults.
//! All are serde-derived so callers can load them from TOML/JSON config
//! files; nothing here reads the environment.

use crate::limits::GraphLimits;
use serde::{Deserialize, Serialize};

/// Content store (CAS) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasConfig {
    /// Maximum bytes held by the in-front content cache
    pub cache_maxsize: u64,
    /// Worker pool size for batch reads
    pub batch_read_workers: usize,
    /// Default chunk size for streaming reads, in bytes
    pub chunk_size: usize,
}

impl Default for CasConfig {
    fn default() -> Self {
        CasConfig {
            cache_maxsize: 64 * 1024 * 1024,
            batch_read_workers: 8,
            chunk_size: 8 * 1024,
        }
    }
}

/// ReBAC engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebacConfig {
    /// TTL for L1 decision-cache entries, in seconds
    pub cache_ttl_seconds: u64,
    /// Maximum L1 cache entries
    pub cache_maxsize: u64,
    /// Whether the in-process L1 cache is consulted at all
    pub enable_l1_cache: bool,
    /// Traversal ceilings
    pub limits: GraphLimits,
    /// Revision window used to bucket cache keys
    pub revision_window: u64,
}

impl Default for RebacConfig {
    fn default() -> Self {
        RebacConfig {
            cache_ttl_seconds: 300,
            cache_maxsize: 100_000,
            enable_l1_cache: true,
            limits: GraphLimits::default(),
            revision_window: 1,
        }
    }
}

/// Namespace / mount resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Maximum mount-table cache entries
    pub cache_maxsize: u64,
    /// TTL for cached mount tables, in seconds
    pub cache_ttl: u64,
    /// TTL for positive (visible) dcache entries, in seconds
    pub dcache_positive_ttl: u64,
    /// TTL for negative (invisible) dcache entries, in seconds
    pub dcache_negative_ttl: u64,
    /// Maximum dcache entries per polarity
    pub dcache_maxsize: u64,
    /// Revisions folded into one cache-key bucket
    pub revision_window: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            cache_maxsize: 10_000,
            cache_ttl: 300,
            dcache_positive_ttl: 300,
            dcache_negative_ttl: 60,
            dcache_maxsize: 100_000,
            revision_window: 1,
        }
    }
}

/// Search daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum records-store connections held open
    pub db_pool_min_size: usize,
    /// Maximum records-store connections
    pub db_pool_max_size: usize,
    /// HNSW ef_search parameter forwarded to the vector backend
    pub vector_ef_search: usize,
    /// Seconds the refresh loop sleeps between flushes of pending changes
    pub refresh_debounce_seconds: f64,
    /// Per-query timeout in seconds
    pub query_timeout_seconds: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            db_pool_min_size: 2,
            db_pool_max_size: 10,
            vector_ef_search: 64,
            refresh_debounce_seconds: 5.0,
            query_timeout_seconds: 30,
        }
    }
}

/// Permission enforcer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcerConfig {
    /// Master switch for admin bypass
    pub allow_admin_bypass: bool,
    /// Path prefixes where admin bypass applies; empty means everywhere
    pub admin_bypass_paths: Vec<String>,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        EnforcerConfig {
            allow_admin_bypass: true,
            admin_bypass_paths: Vec::new(),
        }
    }
}

/// Lock service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Default lock TTL in seconds
    pub default_ttl_secs: u64,
    /// Heartbeat buffer capacity before a forced flush
    pub max_buffer_size: usize,
    /// Heartbeat flush interval in seconds
    pub flush_interval_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            default_ttl_secs: 30,
            max_buffer_size: 1_000,
            flush_interval_secs: 5,
        }
    }
}
