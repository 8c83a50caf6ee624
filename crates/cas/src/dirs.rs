//! Virtual directory tree
//!
//! Explicit directories live as real directories under `<root>/dirs/`,
//! mirroring the virtual namespace. Files themselves live in the CAS; this
//! tree only records directory structure so `mkdir`/`rmdir`/`list_dir`
//! behave like a filesystem.

use nexus_core::{NexusError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory operations over the `dirs/` subtree
pub struct DirTree {
    dirs_root: PathBuf,
}

impl DirTree {
    /// Create a tree rooted at the given `dirs/` directory
    pub fn new(dirs_root: impl Into<PathBuf>) -> Self {
        DirTree {
            dirs_root: dirs_root.into(),
        }
    }

    /// Map a virtual path to its on-disk location under `dirs/`
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.contains('\0') {
            return Err(NexusError::Validation(
                "path contains a null byte".to_string(),
            ));
        }
        let rel = path.trim_start_matches('/');
        let mut out = self.dirs_root.clone();
        for segment in rel.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(NexusError::Validation(format!(
                    "path contains a relative segment: {path:?}"
                )));
            }
            out.push(segment);
        }
        Ok(out)
    }

    /// Create a directory
    ///
    /// `parents` creates missing ancestors; `exist_ok` tolerates an
    /// existing directory. An existing directory without `exist_ok` is a
    /// conflict.
    pub fn mkdir(&self, path: &str, parents: bool, exist_ok: bool) -> Result<()> {
        let target = self.resolve(path)?;
        if target.exists() {
            if target.is_dir() && exist_ok {
                return Ok(());
            }
            return Err(NexusError::Conflict(format!(
                "directory already exists: {path}"
            )));
        }
        let result = if parents {
            fs::create_dir_all(&target)
        } else {
            fs::create_dir(&target)
        };
        result.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                NexusError::NotFound(format!("parent of {path} does not exist"))
            }
            _ => e.into(),
        })
    }

    /// Remove a directory
    ///
    /// Without `recursive`, a non-empty directory is a conflict.
    pub fn rmdir(&self, path: &str, recursive: bool) -> Result<()> {
        let target = self.resolve(path)?;
        if !target.is_dir() {
            return Err(NexusError::NotFound(format!("directory {path}")));
        }
        if recursive {
            fs::remove_dir_all(&target)?;
        } else {
            if fs::read_dir(&target)?.next().is_some() {
                return Err(NexusError::Conflict(format!("directory not empty: {path}")));
            }
            fs::remove_dir(&target)?;
        }
        Ok(())
    }

    /// Whether a virtual path is an explicit directory
    pub fn is_directory(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.is_dir())
    }

    /// Sorted entries of a directory
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let target = self.resolve(path)?;
        if !target.is_dir() {
            return Err(NexusError::NotFound(format!("directory {path}")));
        }
        let mut entries: Vec<String> = fs::read_dir(&target)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> (TempDir, DirTree) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("dirs");
        fs::create_dir_all(&root).unwrap();
        (dir, DirTree::new(root))
    }

    #[test]
    fn test_mkdir_and_is_directory() {
        let (_d, tree) = tree();
        tree.mkdir("/workspace", false, false).unwrap();
        assert!(tree.is_directory("/workspace").unwrap());
        assert!(!tree.is_directory("/other").unwrap());
    }

    #[test]
    fn test_mkdir_parents() {
        let (_d, tree) = tree();
        // Without parents: missing ancestor is not-found
        let err = tree.mkdir("/a/b/c", false, false).unwrap_err();
        assert!(err.is_not_found());
        tree.mkdir("/a/b/c", true, false).unwrap();
        assert!(tree.is_directory("/a/b/c").unwrap());
    }

    #[test]
    fn test_mkdir_exist_ok() {
        let (_d, tree) = tree();
        tree.mkdir("/dup", false, false).unwrap();
        let err = tree.mkdir("/dup", false, false).unwrap_err();
        assert!(matches!(err, NexusError::Conflict(_)));
        tree.mkdir("/dup", false, true).unwrap();
    }

    #[test]
    fn test_rmdir_non_empty_requires_recursive() {
        let (_d, tree) = tree();
        tree.mkdir("/a/b", true, false).unwrap();
        let err = tree.rmdir("/a", false).unwrap_err();
        assert!(matches!(err, NexusError::Conflict(_)));
        tree.rmdir("/a", true).unwrap();
        assert!(!tree.is_directory("/a").unwrap());
    }

    #[test]
    fn test_list_dir_sorted() {
        let (_d, tree) = tree();
        tree.mkdir("/p/zeta", true, false).unwrap();
        tree.mkdir("/p/alpha", true, false).unwrap();
        tree.mkdir("/p/mid", true, false).unwrap();
        assert_eq!(tree.list_dir("/p").unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_traversal_rejected() {
        let (_d, tree) = tree();
        assert!(tree.mkdir("/a/../escape", true, false).is_err());
        assert!(tree.is_directory("/a/..").is_err());
    }
}
