//! Port traits implemented by storage adapters
//!
//! The core exposes plain typed interfaces; connectors (Gmail, Slack,
//! remotes) are thin adapters over `ContentBackend`. Compile-time absence
//! of an adapter is a missing implementation, not a runtime stub.

use crate::error::Result;
use crate::response::Response;

/// Static capability flags a backend advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Backend can rename without copy+delete
    pub supports_rename: bool,
    /// Backend maintains its own virtual directory tree
    pub has_virtual_filesystem: bool,
    /// Backend is rooted at a filesystem path
    pub has_root_path: bool,
    /// Operations are scoped per user identity
    pub user_scoped: bool,
    /// Safe to call from multiple threads without external locking
    pub thread_safe: bool,
    /// Backend stores no content itself, only forwards
    pub is_passthrough: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        BackendCapabilities {
            supports_rename: false,
            has_virtual_filesystem: false,
            has_root_path: false,
            user_scoped: false,
            thread_safe: true,
            is_passthrough: false,
        }
    }
}

/// File info returned by delta-sync capable backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFileInfo {
    /// Size in bytes
    pub size: u64,
    /// Modification time, seconds since epoch
    pub mtime: i64,
    /// Backend-native version marker, if any
    pub backend_version: Option<String>,
    /// Content hash, if the backend tracks one
    pub content_hash: Option<String>,
}

/// Content storage port
///
/// Every storage adapter implements this contract. Content operations are
/// keyed by hex content hash; directory operations work on virtual paths.
/// Streaming and delta-sync methods have default implementations that
/// adapters may override with something more efficient.
pub trait ContentBackend: Send + Sync {
    /// Short backend name used in responses and error tags
    fn name(&self) -> &str;

    /// Capability flags
    fn capabilities(&self) -> BackendCapabilities;

    // ========== Content operations ==========

    /// Write bytes, returning the content hash
    fn write_content(&self, content: &[u8]) -> Response<String>;

    /// Read exact bytes for a hash
    fn read_content(&self, content_hash: &str) -> Response<Vec<u8>>;

    /// Decrement the reference count, removing the blob at zero
    fn delete_content(&self, content_hash: &str) -> Response<()>;

    /// Whether a blob exists
    fn content_exists(&self, content_hash: &str) -> Response<bool>;

    /// Size of a blob in bytes
    fn get_content_size(&self, content_hash: &str) -> Response<u64>;

    /// Current reference count of a blob
    fn get_ref_count(&self, content_hash: &str) -> Response<u64>;

    // ========== Directory operations ==========

    /// Create a directory
    fn mkdir(&self, path: &str, parents: bool, exist_ok: bool) -> Response<()>;

    /// Remove a directory
    fn rmdir(&self, path: &str, recursive: bool) -> Response<()>;

    /// Whether a path is a directory
    fn is_directory(&self, path: &str) -> Response<bool>;

    /// List directory entries, sorted
    fn list_dir(&self, path: &str) -> Response<Vec<String>>;

    // ========== Optional streaming ==========

    /// Read a blob as a sequence of chunks
    ///
    /// Default implementation slices one full read.
    fn stream_content(&self, content_hash: &str, chunk_size: usize) -> Result<Vec<Vec<u8>>> {
        let bytes = self.read_content(content_hash).into_result()?;
        Ok(bytes.chunks(chunk_size.max(1)).map(|c| c.to_vec()).collect())
    }

    /// Read an inclusive byte range of a blob
    ///
    /// Default implementation slices one full read; efficient backends seek.
    fn stream_range(&self, content_hash: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        let bytes = self.read_content(content_hash).into_result()?;
        let len = bytes.len() as u64;
        if start >= len {
            return Ok(Vec::new());
        }
        let end = end.min(len.saturating_sub(1));
        Ok(bytes[start as usize..=end as usize].to_vec())
    }

    /// Optional delta-sync probe; None when unsupported
    fn get_file_info(&self, _path: &str) -> Result<Option<BackendFileInfo>> {
        Ok(None)
    }
}
