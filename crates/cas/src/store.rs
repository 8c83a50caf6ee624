//! Content-addressable store
//!
//! Blobs are keyed by the SHA-256 hex digest of their bytes and stored
//! under a two-level fanout directory derived from the first four hex
//! characters:
//!
//! ```text
//! <root>/cas/ab/cd/abcd1234...ef56          exact bytes
//! <root>/cas/ab/cd/abcd1234...ef56.meta     { "ref_count": N, "size": B }
//! <root>/cas/ab/cd/abcd1234...ef56.lock     advisory lock file
//! ```
//!
//! Every mutation of a given content holds an advisory file lock on the
//! `.lock` sibling, serializing write-vs-delete and concurrent writes of
//! the same bytes. Publication is atomic: write a temp file in the final
//! directory, fsync, rename. Duplicate writes increment the reference
//! count instead of re-publishing.
//!
//! ## Thread Safety
//!
//! `ContentStore` is `Send + Sync`. Cross-process safety comes from the
//! per-hash file locks; in-process the store holds no mutable state beyond
//! the moka content cache.

use crate::meta::{read_meta, write_meta, BlobMeta};
use fs2::FileExt;
use nexus_core::{CasConfig, NexusError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name tag used in backend errors raised by this store
pub const BACKEND_NAME: &str = "local";

/// Compute the canonical content hash (SHA-256, lowercase hex)
pub fn hash_content(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    to_hex(&digest)
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn validate_hash(content_hash: &str) -> Result<()> {
    if content_hash.len() < 4 || !content_hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(NexusError::Validation(format!(
            "invalid content hash: {content_hash:?}"
        )));
    }
    Ok(())
}

/// Advisory per-hash lock guard
///
/// Holds an exclusive flock on the `.lock` sibling for the duration of a
/// mutation. Dropping the guard releases the lock; the lock file itself is
/// only unlinked when the last referent is deleted.
struct HashLock {
    file: File,
}

impl HashLock {
    fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(HashLock { file })
    }
}

impl Drop for HashLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Lazy chunked reader over one blob
///
/// Produced by [`ContentStore::stream`]; yields chunks until EOF. The
/// caller may stop early; nothing is buffered beyond one chunk.
pub struct ContentStream {
    file: File,
    chunk_size: usize,
    remaining: Option<u64>,
    done: bool,
}

impl Iterator for ContentStream {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let want = match self.remaining {
            Some(0) => {
                self.done = true;
                return None;
            }
            Some(rem) => (rem as usize).min(self.chunk_size),
            None => self.chunk_size,
        };
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        if filled == 0 {
            self.done = true;
            return None;
        }
        buf.truncate(filled);
        if let Some(rem) = self.remaining.as_mut() {
            *rem -= filled as u64;
        }
        Some(Ok(buf))
    }
}

/// Content-addressable blob store with reference-counted deduplication
pub struct ContentStore {
    root: PathBuf,
    config: CasConfig,
    cache: Option<moka::sync::Cache<String, Arc<Vec<u8>>>>,
}

impl ContentStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>, config: CasConfig) -> Result<Self> {
        let root = root.into();
        if root.exists() && !root.is_dir() {
            return Err(NexusError::backend(
                BACKEND_NAME,
                format!("root path is a file, not a directory: {}", root.display()),
            ));
        }
        fs::create_dir_all(root.join("cas"))?;
        fs::create_dir_all(root.join("dirs"))?;

        let cache = if config.cache_maxsize > 0 {
            Some(
                moka::sync::Cache::builder()
                    .max_capacity(config.cache_maxsize)
                    .weigher(|_k: &String, v: &Arc<Vec<u8>>| {
                        u32::try_from(v.len()).unwrap_or(u32::MAX)
                    })
                    .build(),
            )
        } else {
            None
        };

        Ok(ContentStore {
            root,
            config,
            cache,
        })
    }

    /// Open with default configuration
    pub fn open_default(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open(root, CasConfig::default())
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// CAS subtree root
    pub fn cas_root(&self) -> PathBuf {
        self.root.join("cas")
    }

    /// Virtual directory subtree root
    pub fn dirs_root(&self) -> PathBuf {
        self.root.join("dirs")
    }

    // ========================================================================
    // Path derivation
    // ========================================================================

    /// Filesystem path of a content file: `cas/<h0h1>/<h2h3>/<hash>`
    pub fn hash_to_path(&self, content_hash: &str) -> Result<PathBuf> {
        validate_hash(content_hash)?;
        Ok(self
            .cas_root()
            .join(&content_hash[..2])
            .join(&content_hash[2..4])
            .join(content_hash))
    }

    fn meta_path(&self, content_hash: &str) -> Result<PathBuf> {
        Ok(self
            .hash_to_path(content_hash)?
            .with_extension("meta"))
    }

    fn lock_path(&self, content_hash: &str) -> Result<PathBuf> {
        Ok(self
            .hash_to_path(content_hash)?
            .with_extension("lock"))
    }

    // ========================================================================
    // Write
    // ========================================================================

    /// Write bytes, returning the content hash
    ///
    /// If the blob is absent it is published atomically with `ref_count = 1`;
    /// if present, the reference count is incremented. Either way the same
    /// hash is returned for the same bytes.
    pub fn write(&self, content: &[u8]) -> Result<String> {
        let content_hash = hash_content(content);
        let content_path = self.hash_to_path(&content_hash)?;
        let meta_path = self.meta_path(&content_hash)?;

        let _lock = HashLock::acquire(&self.lock_path(&content_hash)?)?;

        if content_path.exists() {
            let mut meta = read_meta(&meta_path, BACKEND_NAME)?;
            if meta.ref_count == 0 {
                meta.size = content.len() as u64;
            }
            meta.ref_count += 1;
            write_meta(&meta_path, &meta, BACKEND_NAME)?;
        } else {
            self.publish_atomic(&content_path, content)?;
            write_meta(&meta_path, &BlobMeta::new(content.len() as u64), BACKEND_NAME)?;
        }

        if let Some(cache) = &self.cache {
            cache.insert(content_hash.clone(), Arc::new(content.to_vec()));
        }
        Ok(content_hash)
    }

    /// Write a lazy stream of chunks as one blob
    ///
    /// The hash is computed incrementally while the chunks spool to a temp
    /// file; publication is a single atomic rename under the per-hash lock.
    pub fn write_stream<I>(&self, chunks: I) -> Result<String>
    where
        I: IntoIterator<Item = Result<Vec<u8>>>,
    {
        static STREAM_SEQ: AtomicUsize = AtomicUsize::new(0);
        let staging_dir = self.cas_root().join("tmp");
        fs::create_dir_all(&staging_dir)?;
        let tmp_path = staging_dir.join(format!(
            ".stream-{}-{}.tmp",
            std::process::id(),
            STREAM_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let spool = (|| -> Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            for chunk in chunks {
                let chunk = chunk?;
                hasher.update(&chunk);
                tmp.write_all(&chunk)?;
                size += chunk.len() as u64;
            }
            tmp.flush()?;
            tmp.sync_all()?;
            Ok(())
        })();
        if let Err(e) = spool {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        let content_hash = to_hex(&hasher.finalize());
        let content_path = self.hash_to_path(&content_hash)?;
        let meta_path = self.meta_path(&content_hash)?;

        let _lock = HashLock::acquire(&self.lock_path(&content_hash)?)?;

        if content_path.exists() {
            // Duplicate: discard the spool, bump the count
            let _ = fs::remove_file(&tmp_path);
            let mut meta = read_meta(&meta_path, BACKEND_NAME)?;
            meta.ref_count += 1;
            write_meta(&meta_path, &meta, BACKEND_NAME)?;
        } else {
            if let Some(parent) = content_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&tmp_path, &content_path)?;
            write_meta(&meta_path, &BlobMeta::new(size), BACKEND_NAME)?;
        }
        Ok(content_hash)
    }

    /// Temp-file publish: write in the final directory, fsync, rename
    fn publish_atomic(&self, content_path: &Path, content: &[u8]) -> Result<()> {
        let parent = content_path
            .parent()
            .ok_or_else(|| NexusError::backend(BACKEND_NAME, "content path has no parent"))?;
        fs::create_dir_all(parent)?;
        let tmp_path = parent.join(format!(
            ".{}.tmp",
            content_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("blob")
        ));
        let result = (|| -> Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(content)?;
            tmp.flush()?;
            tmp.sync_all()?;
            drop(tmp);
            fs::rename(&tmp_path, content_path)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Read the exact bytes for a hash
    ///
    /// The returned bytes are verified: their hash must recompute to the
    /// key. A mismatch is a corruption error, never silently returned.
    pub fn read(&self, content_hash: &str) -> Result<Vec<u8>> {
        validate_hash(content_hash)?;
        if let Some(cache) = &self.cache {
            if let Some(bytes) = cache.get(content_hash) {
                return Ok(bytes.as_ref().clone());
            }
        }

        let content_path = self.hash_to_path(content_hash)?;
        let bytes = match fs::read(&content_path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(NexusError::NotFound(format!("content {content_hash}")));
            }
            Err(e) => return Err(e.into()),
        };

        let actual = hash_content(&bytes);
        if actual != content_hash {
            return Err(NexusError::Corruption(format!(
                "content {content_hash} read back as {actual}"
            )));
        }

        if let Some(cache) = &self.cache {
            cache.insert(content_hash.to_string(), Arc::new(bytes.clone()));
        }
        Ok(bytes)
    }

    /// Whether a blob exists
    pub fn exists(&self, content_hash: &str) -> Result<bool> {
        Ok(self.hash_to_path(content_hash)?.exists())
    }

    /// Size of a blob in bytes
    pub fn size(&self, content_hash: &str) -> Result<u64> {
        let path = self.hash_to_path(content_hash)?;
        match fs::metadata(&path) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(NexusError::NotFound(format!("content {content_hash}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Current reference count of a blob
    ///
    /// Metadata without a content file is an inconsistency: logged, and
    /// reported as not-found.
    pub fn ref_count(&self, content_hash: &str) -> Result<u64> {
        let content_path = self.hash_to_path(content_hash)?;
        let meta_path = self.meta_path(content_hash)?;
        if !content_path.exists() {
            if meta_path.exists() {
                warn!(hash = content_hash, "orphan metadata without content file");
            }
            return Err(NexusError::NotFound(format!("content {content_hash}")));
        }
        Ok(read_meta(&meta_path, BACKEND_NAME)?.ref_count)
    }

    /// Lazy chunked read; the caller may stop early
    pub fn stream(&self, content_hash: &str, chunk_size: usize) -> Result<ContentStream> {
        let path = self.hash_to_path(content_hash)?;
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(NexusError::NotFound(format!("content {content_hash}")));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(ContentStream {
            file,
            chunk_size: chunk_size.max(1),
            remaining: None,
            done: false,
        })
    }

    /// Stream an inclusive byte range `[start, end]`
    pub fn stream_range(
        &self,
        content_hash: &str,
        start: u64,
        end: u64,
    ) -> Result<ContentStream> {
        if end < start {
            return Err(NexusError::Validation(format!(
                "invalid range: start {start} > end {end}"
            )));
        }
        let path = self.hash_to_path(content_hash)?;
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(NexusError::NotFound(format!("content {content_hash}")));
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        let start = start.min(len);
        let end = end.min(len.saturating_sub(1));
        file.seek(SeekFrom::Start(start))?;
        let remaining = if start > end { 0 } else { end - start + 1 };
        Ok(ContentStream {
            file,
            chunk_size: self.config.chunk_size,
            remaining: Some(remaining),
            done: false,
        })
    }

    /// Bounded-concurrency batch read
    ///
    /// Fans the hashes out over up to `batch_read_workers` threads. Each
    /// entry maps to `Some(bytes)` on success or `None` when the blob is
    /// missing; other errors surface per-hash as `None` with a warn log so
    /// one bad blob does not sink the batch.
    pub fn batch_read(&self, hashes: &[String]) -> HashMap<String, Option<Vec<u8>>> {
        let workers = self.config.batch_read_workers.max(1).min(hashes.len().max(1));
        let next = AtomicUsize::new(0);
        let results = parking_lot::Mutex::new(HashMap::with_capacity(hashes.len()));

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    if idx >= hashes.len() {
                        break;
                    }
                    let hash = &hashes[idx];
                    let value = match self.read(hash) {
                        Ok(bytes) => Some(bytes),
                        Err(e) => {
                            if !e.is_not_found() {
                                warn!(hash = hash.as_str(), error = %e, "batch read failure");
                            }
                            None
                        }
                    };
                    results.lock().insert(hash.clone(), value);
                });
            }
        });

        results.into_inner()
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Decrement the reference count; remove the blob at zero
    ///
    /// Returns the reference count remaining after the decrement. At zero
    /// the content file, its metadata, and the lock file are unlinked and
    /// empty fanout directories are reaped.
    pub fn delete(&self, content_hash: &str) -> Result<u64> {
        let content_path = self.hash_to_path(content_hash)?;
        let meta_path = self.meta_path(content_hash)?;
        let lock_path = self.lock_path(content_hash)?;

        let lock = HashLock::acquire(&lock_path)?;

        if !content_path.exists() {
            return Err(NexusError::NotFound(format!("content {content_hash}")));
        }

        let mut meta = read_meta(&meta_path, BACKEND_NAME)?;
        meta.ref_count = meta.ref_count.saturating_sub(1);

        if meta.ref_count > 0 {
            write_meta(&meta_path, &meta, BACKEND_NAME)?;
            return Ok(meta.ref_count);
        }

        if let Some(until) = meta.protected_until {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            if now < until {
                // Grace period: record the zero count, keep the bytes
                write_meta(&meta_path, &meta, BACKEND_NAME)?;
                debug!(hash = content_hash, "blob at zero refs held by grace period");
                return Ok(0);
            }
        }

        fs::remove_file(&content_path)?;
        let _ = fs::remove_file(&meta_path);
        drop(lock);
        let _ = fs::remove_file(&lock_path);
        self.reap_empty_dirs(content_path.parent());
        if let Some(cache) = &self.cache {
            cache.invalidate(content_hash);
        }
        Ok(0)
    }

    /// Remove now-empty fanout directories up to (not including) `cas/`
    fn reap_empty_dirs(&self, mut dir: Option<&Path>) {
        let cas_root = self.cas_root();
        while let Some(d) = dir {
            if d == cas_root || !d.starts_with(&cas_root) {
                break;
            }
            match fs::read_dir(d) {
                Ok(mut entries) => {
                    if entries.next().is_some() {
                        break;
                    }
                }
                Err(_) => break,
            }
            if fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}
