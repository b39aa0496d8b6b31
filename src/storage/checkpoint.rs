//! Recovery checkpoints for resumable uploads.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted state of one multi-part upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub key: String,
    pub upload_id: String,
    pub size: u64,
    pub part_size: u64,
    /// Hex SHA-256 of the payload; resuming requires the same bytes.
    #[serde(default)]
    pub digest: String,
    pub completed: BTreeSet<u32>,
    #[serde(skip)]
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(
        dir: &Path,
        key: &str,
        upload_id: String,
        size: u64,
        part_size: u64,
        digest: &str,
    ) -> Self {
        Self {
            key: key.to_string(),
            upload_id,
            size,
            part_size,
            digest: digest.to_string(),
            completed: BTreeSet::new(),
            path: Self::path_for(dir, key),
        }
    }

    /// Checkpoint file location for `key`.
    pub fn path_for(dir: &Path, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        dir.join(format!("{:x}.json", digest))
    }

    /// Load the checkpoint stored for `key`, whatever transfer it describes.
    ///
    /// Unreadable checkpoints are discarded.
    pub async fn load(dir: &Path, key: &str) -> Result<Option<Self>> {
        let path = Self::path_for(dir, key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(mut checkpoint) if checkpoint.key == key => {
                checkpoint.path = path;
                debug!(
                    upload_id = %checkpoint.upload_id,
                    completed = checkpoint.completed.len(),
                    "Found upload checkpoint"
                );
                Ok(Some(checkpoint))
            }
            Ok(_) => {
                let _ = tokio::fs::remove_file(&path).await;
                Ok(None)
            }
            Err(e) => {
                warn!("Discarding unreadable checkpoint {:?}: {}", path, e);
                let _ = tokio::fs::remove_file(&path).await;
                Ok(None)
            }
        }
    }

    /// Whether this checkpoint describes a transfer of exactly these bytes.
    pub fn matches(&self, size: u64, part_size: u64, digest: &str) -> bool {
        self.size == size
            && self.part_size == part_size
            && !self.digest.is_empty()
            && self.digest == digest
    }

    pub fn is_done(&self, index: u32) -> bool {
        self.completed.contains(&index)
    }

    /// Mark `index` done and write the checkpoint.
    pub async fn mark_done(&mut self, index: u32) -> Result<()> {
        self.completed.insert(index);
        self.save().await
    }

    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, serde_json::to_vec(self)?).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }

    /// Delete the checkpoint file after the upload completed.
    pub async fn remove(self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
