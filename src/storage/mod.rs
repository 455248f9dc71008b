pub mod local;
pub mod s3;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {key}")]
    NotFound { key: String },
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("S3 error: {0}")]
    S3(String),
}

impl StorageError {
    /// Whether a retry might help. Missing objects never come back.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::S3(_))
    }
}

/// Abstract blob store for raw PDF bytes, keyed by opaque handle.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload raw bytes under the given key.
    async fn upload_bytes(
        &self,
        data: &[u8],
        key: &str,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Download blob content.
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete a blob. Returns false if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Return the provider name for logging.
    fn provider_name(&self) -> &str;
}

/// PDF magic-number sniff. Uploads that merely claim a `.pdf` name are
/// rejected if the bytes disagree.
pub fn is_pdf(data: &[u8]) -> bool {
    data.starts_with(b"%PDF")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pdf_magic() {
        assert!(is_pdf(b"%PDF-1.7\n..."));
        assert!(!is_pdf(b"\x89PNG\r\n\x1a\n"));
        assert!(!is_pdf(b""));
        assert!(!is_pdf(b"PDF without percent"));
    }

    #[test]
    fn test_not_found_is_not_transient() {
        assert!(!StorageError::NotFound { key: "k".into() }.is_transient());
        assert!(StorageError::S3("timeout".into()).is_transient());
    }
}
