//! Blob metadata sidecar files
//!
//! Every content file has a `.meta` sibling holding `{ "ref_count": N,
//! "size": B }` as JSON. Metadata writes are atomic (temp file in the same
//! directory, fsync, rename). Reads use bounded retry with exponential
//! backoff and jitter to tolerate concurrent-writer races: a reader can
//! observe a truncated or mid-rename file for a moment.

use nexus_core::{NexusError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Maximum read attempts before surfacing a backend error
const MAX_RETRIES: u32 = 10;
/// Base retry delay; attempt n sleeps `base * 2^n + jitter`
const BASE_DELAY: Duration = Duration::from_millis(1);

/// Sidecar metadata for one content blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    /// Number of file-path rows referencing this blob
    pub ref_count: u64,
    /// Blob size in bytes
    pub size: u64,
    /// Epoch seconds before which the blob must not be garbage-collected,
    /// even at zero references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_until: Option<i64>,
}

impl BlobMeta {
    /// Metadata for a freshly published blob
    pub fn new(size: u64) -> Self {
        BlobMeta {
            ref_count: 1,
            size,
            protected_until: None,
        }
    }
}

/// Read a `.meta` sidecar with bounded retry
///
/// A missing file yields `ref_count: 0, size: 0` (the blob was never
/// published or is mid-delete); parse and transient IO failures retry with
/// jittered exponential backoff before surfacing a typed backend error.
pub fn read_meta(meta_path: &Path, backend: &str) -> Result<BlobMeta> {
    if !meta_path.exists() {
        return Ok(BlobMeta {
            ref_count: 0,
            size: 0,
            protected_until: None,
        });
    }

    let mut last_err = String::new();
    for attempt in 0..MAX_RETRIES {
        match fs::read_to_string(meta_path) {
            Ok(content) => match serde_json::from_str::<BlobMeta>(&content) {
                Ok(meta) => return Ok(meta),
                Err(e) => last_err = format!("parse: {e}"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between the exists check and the read
                return Ok(BlobMeta {
                    ref_count: 0,
                    size: 0,
                    protected_until: None,
                });
            }
            Err(e) => last_err = format!("io: {e}"),
        }
        if attempt + 1 < MAX_RETRIES {
            let jitter = rand::thread_rng().gen_range(0.0..1.0);
            let delay = BASE_DELAY.as_secs_f64() * (1u64 << attempt) as f64
                + BASE_DELAY.as_secs_f64() * jitter;
            std::thread::sleep(Duration::from_secs_f64(delay));
        }
    }

    Err(NexusError::backend(
        backend,
        format!(
            "failed to read metadata after {MAX_RETRIES} retries ({last_err}): {}",
            meta_path.display()
        ),
    ))
}

/// Atomically write a `.meta` sidecar
///
/// Writes to a temp file in the same directory, fsyncs, then renames into
/// place so readers never observe a partial file.
pub fn write_meta(meta_path: &Path, meta: &BlobMeta, backend: &str) -> Result<()> {
    let parent = meta_path
        .parent()
        .ok_or_else(|| NexusError::backend(backend, "meta path has no parent"))?;
    fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(
        ".{}.tmp",
        meta_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("meta")
    ));

    let result = (|| -> Result<()> {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(serde_json::to_string(meta)?.as_bytes())?;
        tmp.flush()?;
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&tmp_path, meta_path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result.map_err(|e| NexusError::backend(backend, format!("failed to write metadata: {e}")))
}
