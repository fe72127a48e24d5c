//! Blob storage for uploaded PDF bytes.
//!
//! A thin object store over a local directory. Keys are generated at store
//! time (`<uuid>-<sanitized file name>`) so two uploads with the same file
//! name never collide on disk. Constructed once at bootstrap and injected
//! into the pipeline; nothing here is process-global.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create blob directory: {}", root.display()))?;
        Ok(Self { root })
    }

    /// Store bytes under a fresh key derived from the file name.
    /// Returns the blob reference recorded on the document row.
    pub async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        let key = format!("{}-{}", Uuid::new_v4(), sanitize(file_name));
        let path = self.root.join(&key);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write blob: {}", path.display()))?;
        Ok(key)
    }

    /// Fetch the raw bytes for a previously stored blob.
    pub async fn get(&self, blob_ref: &str) -> Result<Vec<u8>> {
        let path = self.resolve(blob_ref)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read blob: {}", path.display()))
    }

    fn resolve(&self, blob_ref: &str) -> Result<PathBuf> {
        // Keys are single path components; anything else is not ours.
        if blob_ref.is_empty() || blob_ref.contains('/') || blob_ref.contains("..") {
            anyhow::bail!("Invalid blob reference: {}", blob_ref);
        }
        Ok(self.root.join(blob_ref))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn sanitize(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = std::env::temp_dir().join(format!("shikin-blob-{}", Uuid::new_v4()));
        let store = BlobStore::new(&dir).unwrap();
        let blob_ref = store.put("report.pdf", b"hello").await.unwrap();
        assert!(blob_ref.ends_with("-report.pdf"));
        assert_eq!(store.get(&blob_ref).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn same_name_gets_distinct_keys() {
        let dir = std::env::temp_dir().join(format!("shikin-blob-{}", Uuid::new_v4()));
        let store = BlobStore::new(&dir).unwrap();
        let a = store.put("report.pdf", b"a").await.unwrap();
        let b = store.put("report.pdf", b"b").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn rejects_path_traversal_refs() {
        let dir = std::env::temp_dir().join(format!("shikin-blob-{}", Uuid::new_v4()));
        let store = BlobStore::new(&dir).unwrap();
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize("a/b\\c report.pdf"), "a_b_c_report.pdf");
        // Japanese file names pass through untouched.
        assert_eq!(sanitize("令和6年報告.pdf"), "令和6年報告.pdf");
    }
}
