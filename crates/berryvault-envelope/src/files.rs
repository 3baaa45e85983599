//! Encrypted file blobs on disk.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use rand::RngCore;

use berryvault_core::UserId;

use crate::error::{EnvelopeError, Result};

/// Default upload limit: 15 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 15 * 1024 * 1024;

/// Size and type limits for uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_file_size: u64,
    pub allowed_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_types: vec!["image/png".into(), "image/jpeg".into()],
        }
    }
}

impl UploadPolicy {
    pub fn validate(&self, size: u64, mime_type: &str) -> Result<()> {
        if size == 0 {
            return Err(EnvelopeError::FileRejected("file is empty".into()));
        }
        if size > self.max_file_size {
            return Err(EnvelopeError::FileRejected(format!(
                "file is {} bytes, limit is {}",
                size, self.max_file_size
            )));
        }
        if !self.allowed_types.iter().any(|t| t == mime_type) {
            return Err(EnvelopeError::FileRejected(format!(
                "file type {} is not allowed",
                mime_type
            )));
        }
        Ok(())
    }
}

/// File extension for a MIME type.
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        _ => "bin",
    }
}

/// Where a blob lives: the stored relative path and the absolute one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    pub relative: String,
    pub absolute: PathBuf,
}

/// Pick a fresh random location for `owner`'s blob under `root`,
/// creating the owner's directory.
pub fn allocate_blob_path(root: &Path, owner: UserId, mime_type: &str) -> Result<BlobLocation> {
    let mut name = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut name);
    let user_dir = format!("user_{}", owner.0);
    let file_name = format!("{}.{}", hex::encode(name), extension_for(mime_type));

    let dir = root.join(&user_dir);
    std::fs::create_dir_all(&dir)?;
    Ok(BlobLocation {
        relative: format!("{}/{}", user_dir, file_name),
        absolute: dir.join(file_name),
    })
}

/// Resolve a stored relative path under `root`, refusing anything that
/// would leave it.
pub fn resolve_blob_path(root: &Path, relative: &str) -> Result<PathBuf> {
    let path = Path::new(relative);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if relative.is_empty() || escapes {
        return Err(EnvelopeError::FileRejected(format!(
            "invalid stored path {:?}",
            relative
        )));
    }
    Ok(root.join(path))
}

/// Overwrite a file with zeros, flush it to disk, then remove it.
///
/// A file that does not exist is already deleted.
pub fn secure_delete_file(path: &Path) -> Result<()> {
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut file = OpenOptions::new().write(true).open(path)?;
    let zeros = [0u8; 8192];
    let mut remaining = size;
    while remaining > 0 {
        let chunk = remaining.min(zeros.len() as u64) as usize;
        file.write_all(&zeros[..chunk])?;
        remaining -= chunk as u64;
    }
    file.sync_all()?;
    drop(file);

    std::fs::remove_file(path)?;
    tracing::debug!(path = %path.display(), size, "securely deleted file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_policy() {
        let policy = UploadPolicy::default();
        assert!(policy.validate(1024, "image/png").is_ok());
        assert!(policy.validate(DEFAULT_MAX_FILE_SIZE, "image/jpeg").is_ok());
        assert!(policy.validate(DEFAULT_MAX_FILE_SIZE + 1, "image/png").is_err());
        assert!(policy.validate(10, "application/pdf").is_err());
        assert!(policy.validate(0, "image/png").is_err());
    }

    #[test]
    fn test_allocate_blob_path() {
        let root = tempfile::tempdir().unwrap();
        let a = allocate_blob_path(root.path(), UserId(4), "image/png").unwrap();
        let b = allocate_blob_path(root.path(), UserId(4), "image/png").unwrap();
        assert_ne!(a.relative, b.relative);
        assert!(a.relative.starts_with("user_4/"));
        assert!(a.relative.ends_with(".png"));
        assert!(root.path().join("user_4").is_dir());
        assert_eq!(resolve_blob_path(root.path(), &a.relative).unwrap(), a.absolute);
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let root = Path::new("/app/uploads");
        assert!(resolve_blob_path(root, "../etc/passwd").is_err());
        assert!(resolve_blob_path(root, "/etc/passwd").is_err());
        assert!(resolve_blob_path(root, "").is_err());
    }

    #[test]
    fn test_secure_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, vec![0xffu8; 20_000]).unwrap();
        secure_delete_file(&path).unwrap();
        assert!(!path.exists());
        // Already gone.
        secure_delete_file(&path).unwrap();
    }
}
