//! Object storage for derived artifacts.
//!
//! `ObjectStore` is the backend seam; `StorageUploader` sits on top of it and
//! owns strategy selection, resumable transfers, progress and deadlines.

mod checkpoint;
mod local;
mod memory;
mod progress;
mod uploader;

pub use checkpoint::Checkpoint;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use progress::{ProgressReader, ProgressTracker, UploadProgress};
pub use uploader::{
    choose_strategy, upload_deadline, StorageUploader, UploadStrategy, BUFFERED_THRESHOLD,
    HARD_CEILING, PART_ATTEMPTS, PART_SIZE, SAFETY_MARGIN,
};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Result of asking a backend to pull a URL itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFetch {
    /// The object is now stored under the requested key.
    Stored,
    /// The backend cannot fetch this URL server-side.
    Unsupported,
}

/// A bucket that accepts whole objects and multi-part uploads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a complete object.
    async fn put_object(&self, key: &str, data: Bytes, mime: &str) -> Result<()>;

    /// Start a multi-part upload; returns the upload id.
    async fn begin_resumable(&self, key: &str, size: u64, mime: &str) -> Result<String>;

    /// Store one part at `offset` of the final object.
    async fn upload_part(&self, upload_id: &str, index: u32, offset: u64, data: Bytes) -> Result<()>;

    /// Assemble the uploaded parts into `key`.
    async fn complete_resumable(&self, upload_id: &str, key: &str, parts: u32) -> Result<()>;

    /// Discard a multi-part upload.
    async fn abort_resumable(&self, upload_id: &str) -> Result<()>;

    /// Pull `url` into `key` without routing the bytes through this process.
    async fn fetch_remote(&self, key: &str, url: &str) -> Result<RemoteFetch>;

    /// Read back a stored object.
    async fn get_object(&self, key: &str) -> Result<Bytes>;

    /// Public URL of `key`.
    fn public_url(&self, key: &str) -> String;

    /// The key behind a URL this store handed out, if it is one.
    fn key_for_url(&self, url: &str) -> Option<String>;
}

/// Reject keys that could escape the bucket.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "..")
    {
        return Err(crate::error::TransvoxError::Store(format!(
            "Invalid object key: {:?}",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("tts/u1/abcd1234-1700000000.mp3").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("thumbs/../../x").is_err());
        assert!(validate_key("a//b").is_err());
    }
}
