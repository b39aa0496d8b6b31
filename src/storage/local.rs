//! Directory-backed object store served under a public base URL.

use super::{validate_key, ObjectStore, RemoteFetch};
use crate::error::{Result, TransvoxError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument};

const STAGING_DIR: &str = ".uploads";

/// Object store rooted at a local directory.
pub struct LocalObjectStore {
    root: PathBuf,
    public_base: String,
    http: reqwest::Client,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base: &str) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self {
            root,
            public_base: public_base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn staging_path(&self, upload_id: &str) -> Result<PathBuf> {
        if upload_id.is_empty() || !upload_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(TransvoxError::Store(format!("Invalid upload id: {}", upload_id)));
        }
        Ok(self.root.join(STAGING_DIR).join(format!("{}.part", upload_id)))
    }

    /// Move a finished staging file into place under `key`.
    async fn publish(&self, staging: &Path, key: &str) -> Result<()> {
        let dest = self.object_path(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(staging, &dest).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    #[instrument(skip(self, data), fields(len = data.len()))]
    async fn put_object(&self, key: &str, data: Bytes, _mime: &str) -> Result<()> {
        validate_key(key)?;
        let staging = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.put", uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, &data).await?;
        if let Err(e) = self.publish(&staging, key).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }
        Ok(())
    }

    async fn begin_resumable(&self, key: &str, size: u64, _mime: &str) -> Result<String> {
        validate_key(key)?;
        let upload_id = uuid::Uuid::new_v4().to_string();
        let file = tokio::fs::File::create(self.staging_path(&upload_id)?).await?;
        file.set_len(size).await?;
        debug!(%upload_id, size, "Started resumable upload");
        Ok(upload_id)
    }

    async fn upload_part(&self, upload_id: &str, index: u32, offset: u64, data: Bytes) -> Result<()> {
        let path = self.staging_path(upload_id)?;
        let mut file = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        debug!(%upload_id, index, len = data.len(), "Stored part");
        Ok(())
    }

    async fn complete_resumable(&self, upload_id: &str, key: &str, _parts: u32) -> Result<()> {
        let staging = self.staging_path(upload_id)?;
        self.publish(&staging, key).await
    }

    async fn abort_resumable(&self, upload_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.staging_path(upload_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn fetch_remote(&self, key: &str, url: &str) -> Result<RemoteFetch> {
        validate_key(key)?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Ok(RemoteFetch::Unsupported);
        }

        let response = self.http.get(url).send().await?.error_for_status()?;
        let staging = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.fetch", uuid::Uuid::new_v4()));

        let result: Result<()> = async {
            let mut file = tokio::fs::File::create(&staging).await?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            self.publish(&staging, key).await
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&staging).await;
        }
        result.map(|_| RemoteFetch::Stored)
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let data = tokio::fs::read(self.object_path(key)?).await?;
        Ok(Bytes::from(data))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        let key = url.strip_prefix(&self.public_base)?.strip_prefix('/')?;
        validate_key(key).ok()?;
        Some(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "/static/").unwrap();

        store
            .put_object("thumbs/youtube/abc.jpg", Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();

        let url = store.public_url("thumbs/youtube/abc.jpg");
        assert_eq!(url, "/static/thumbs/youtube/abc.jpg");
        assert_eq!(store.key_for_url(&url).as_deref(), Some("thumbs/youtube/abc.jpg"));
        assert_eq!(store.get_object("thumbs/youtube/abc.jpg").await.unwrap(), "jpeg");
        assert!(store.key_for_url("https://i.ytimg.com/abc.jpg").is_none());
    }

    #[tokio::test]
    async fn test_parts_assemble_in_offset_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "/static").unwrap();

        let id = store.begin_resumable("audio/x.bin", 6, "application/octet-stream").await.unwrap();
        store.upload_part(&id, 1, 3, Bytes::from_static(b"def")).await.unwrap();
        store.upload_part(&id, 0, 0, Bytes::from_static(b"abc")).await.unwrap();
        store.complete_resumable(&id, "audio/x.bin", 2).await.unwrap();

        assert_eq!(store.get_object("audio/x.bin").await.unwrap(), "abcdef");
    }

    #[tokio::test]
    async fn test_non_http_fetch_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "/static").unwrap();
        let outcome = store.fetch_remote("audio/x.mp3", "file:///etc/hosts").await.unwrap();
        assert_eq!(outcome, RemoteFetch::Unsupported);
    }
}
