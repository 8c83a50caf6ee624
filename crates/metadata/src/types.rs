//! Value types crossing the façade boundary

use nexus_core::{NexusError, Result};
use nexus_records::FileRecord;
use serde::{Deserialize, Serialize};

/// MIME type recorded for explicit directories
pub const DIR_FILE_TYPE: &str = "application/x-directory";

/// File metadata as callers see it
///
/// `version`, `created_at`, and `modified_at` are server-assigned on put;
/// caller-supplied values are accepted for imports but normally left None.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Virtual path
    pub path: String,
    /// Zone the path lives in
    pub zone_id: String,
    /// Content size in bytes
    pub size: u64,
    /// Content hash (etag); None for metadata-only entries
    pub etag: Option<String>,
    /// MIME type
    pub mime_type: Option<String>,
    /// Whether this entry is an explicit directory
    pub is_directory: bool,
    /// Backend that stores the content
    pub backend_name: Option<String>,
    /// Backend-native path
    pub physical_path: Option<String>,
    /// Owning identity
    pub owner_id: Option<String>,
    /// Identity that wrote this version
    pub created_by: Option<String>,
    /// Creation instant, epoch milliseconds (server-assigned)
    pub created_at: Option<i64>,
    /// Last-modified instant, epoch milliseconds (server-assigned)
    pub modified_at: Option<i64>,
    /// Current version (server-assigned, starts at 1)
    pub version: u64,
}

impl FileMetadata {
    /// Minimal metadata for a content write
    pub fn new(path: impl Into<String>, zone_id: impl Into<String>) -> Self {
        FileMetadata {
            path: path.into(),
            zone_id: zone_id.into(),
            size: 0,
            etag: None,
            mime_type: None,
            is_directory: false,
            backend_name: None,
            physical_path: None,
            owner_id: None,
            created_by: None,
            created_at: None,
            modified_at: None,
            version: 0,
        }
    }

    /// Builder: content hash and size
    pub fn with_content(mut self, etag: impl Into<String>, size: u64) -> Self {
        self.etag = Some(etag.into());
        self.size = size;
        self
    }

    /// Builder: MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Builder: owner identity
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Check invariants before the façade forwards a put
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(NexusError::Validation(format!(
                "path must be absolute: {:?}",
                self.path
            )));
        }
        if self.path.contains('\0') {
            return Err(NexusError::Validation(
                "path contains a null byte".to_string(),
            ));
        }
        if self.zone_id.is_empty() {
            return Err(NexusError::Validation("zone_id is empty".to_string()));
        }
        Ok(())
    }

    pub(crate) fn from_record(record: FileRecord) -> Self {
        let is_directory = record.file_type.as_deref() == Some(DIR_FILE_TYPE);
        FileMetadata {
            path: record.virtual_path,
            zone_id: record.zone_id,
            size: record.size_bytes,
            etag: record.content_hash,
            mime_type: if is_directory { None } else { record.file_type },
            is_directory,
            backend_name: Some(record.backend_id),
            physical_path: Some(record.physical_path),
            owner_id: record.owner_id,
            created_by: None,
            created_at: Some(record.created_at),
            modified_at: Some(record.updated_at),
            version: record.current_version,
        }
    }
}

/// Snapshot returned by a successful delete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedFile {
    pub path: String,
    pub size: u64,
    pub etag: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let meta = FileMetadata::new("/a.txt", "default")
            .with_content("h1", 11)
            .with_mime_type("text/plain")
            .with_owner("alice");
        assert_eq!(meta.etag.as_deref(), Some("h1"));
        assert_eq!(meta.size, 11);
        assert_eq!(meta.owner_id.as_deref(), Some("alice"));
        assert!(meta.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_paths() {
        assert!(FileMetadata::new("rel.txt", "default").validate().is_err());
        assert!(FileMetadata::new("/a\0b", "default").validate().is_err());
        assert!(FileMetadata::new("/ok", "").validate().is_err());
    }
}
