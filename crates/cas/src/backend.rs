//! `ContentBackend` adapter over the local store
//!
//! Wraps [`ContentStore`] + [`DirTree`] in the backend response envelope so
//! external adapters (connectors, remotes) and the local store share one
//! contract. Timing is measured per call.

use crate::dirs::DirTree;
use crate::store::{ContentStore, BACKEND_NAME};
use nexus_core::{
    BackendCapabilities, CasConfig, ContentBackend, NexusError, Response, Result,
};
use std::path::PathBuf;
use std::time::Instant;

/// Local filesystem backend: CAS blobs plus a virtual directory tree
pub struct LocalBackend {
    store: ContentStore,
    dirs: DirTree,
}

impl LocalBackend {
    /// Open a local backend rooted at `root`
    pub fn open(root: impl Into<PathBuf>, config: CasConfig) -> Result<Self> {
        let root = root.into();
        let store = ContentStore::open(&root, config)?;
        let dirs = DirTree::new(store.dirs_root());
        Ok(LocalBackend { store, dirs })
    }

    /// The underlying content store
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// The underlying directory tree
    pub fn dirs(&self) -> &DirTree {
        &self.dirs
    }

    fn wrap<T>(result: Result<T>, started: Instant, path: &str) -> Response<T> {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(data) => Response::ok(data, elapsed_ms, BACKEND_NAME, path),
            Err(e) if e.is_not_found() => {
                Response::not_found(e.to_string(), elapsed_ms, BACKEND_NAME, path)
            }
            Err(e) => Response::error(e.to_string(), elapsed_ms, BACKEND_NAME, path),
        }
    }
}

impl ContentBackend for LocalBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_rename: true,
            has_virtual_filesystem: true,
            has_root_path: true,
            user_scoped: false,
            thread_safe: true,
            is_passthrough: false,
        }
    }

    fn write_content(&self, content: &[u8]) -> Response<String> {
        let started = Instant::now();
        let result = self.store.write(content);
        let path = result.as_deref().unwrap_or("").to_string();
        Self::wrap(result, started, &path)
    }

    fn read_content(&self, content_hash: &str) -> Response<Vec<u8>> {
        let started = Instant::now();
        Self::wrap(self.store.read(content_hash), started, content_hash)
    }

    fn delete_content(&self, content_hash: &str) -> Response<()> {
        let started = Instant::now();
        Self::wrap(
            self.store.delete(content_hash).map(|_| ()),
            started,
            content_hash,
        )
    }

    fn content_exists(&self, content_hash: &str) -> Response<bool> {
        let started = Instant::now();
        Self::wrap(self.store.exists(content_hash), started, content_hash)
    }

    fn get_content_size(&self, content_hash: &str) -> Response<u64> {
        let started = Instant::now();
        Self::wrap(self.store.size(content_hash), started, content_hash)
    }

    fn get_ref_count(&self, content_hash: &str) -> Response<u64> {
        let started = Instant::now();
        Self::wrap(self.store.ref_count(content_hash), started, content_hash)
    }

    fn mkdir(&self, path: &str, parents: bool, exist_ok: bool) -> Response<()> {
        let started = Instant::now();
        Self::wrap(self.dirs.mkdir(path, parents, exist_ok), started, path)
    }

    fn rmdir(&self, path: &str, recursive: bool) -> Response<()> {
        let started = Instant::now();
        Self::wrap(self.dirs.rmdir(path, recursive), started, path)
    }

    fn is_directory(&self, path: &str) -> Response<bool> {
        let started = Instant::now();
        Self::wrap(self.dirs.is_directory(path), started, path)
    }

    fn list_dir(&self, path: &str) -> Response<Vec<String>> {
        let started = Instant::now();
        Self::wrap(self.dirs.list_dir(path), started, path)
    }

    fn stream_content(&self, content_hash: &str, chunk_size: usize) -> Result<Vec<Vec<u8>>> {
        self.store
            .stream(content_hash, chunk_size)?
            .collect::<Result<Vec<_>>>()
    }

    fn stream_range(&self, content_hash: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        let chunks = self
            .store
            .stream_range(content_hash, start, end)?
            .collect::<Result<Vec<_>>>()?;
        Ok(chunks.concat())
    }

    fn get_file_info(&self, path: &str) -> Result<Option<nexus_core::BackendFileInfo>> {
        // Only content hashes resolve; directory paths have no file info
        match self.store.size(path) {
            Ok(size) => Ok(Some(nexus_core::BackendFileInfo {
                size,
                mtime: 0,
                backend_version: None,
                content_hash: Some(path.to_string()),
            })),
            Err(NexusError::NotFound(_)) | Err(NexusError::Validation(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
