//! In-memory object store.
//!
//! Useful for testing: failures and server-side fetch support can be scripted.

use super::{validate_key, ObjectStore, RemoteFetch};
use crate::error::{Result, TransvoxError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

struct PendingUpload {
    size: u64,
    parts: BTreeMap<u32, (u64, Bytes)>,
}

/// Object store held in process memory.
pub struct MemoryObjectStore {
    base: String,
    objects: Mutex<HashMap<String, Bytes>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    remote: Mutex<HashMap<String, Bytes>>,
    fetch_supported: bool,
    put_failures: AtomicUsize,
    part_failures: Mutex<HashMap<u32, usize>>,
    put_calls: AtomicUsize,
    part_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            base: "https://bucket.test".to_string(),
            objects: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            remote: Mutex::new(HashMap::new()),
            fetch_supported: true,
            put_failures: AtomicUsize::new(0),
            part_failures: Mutex::new(HashMap::new()),
            put_calls: AtomicUsize::new(0),
            part_calls: AtomicUsize::new(0),
        }
    }

    /// Refuse every server-side fetch.
    pub fn without_remote_fetch(mut self) -> Self {
        self.fetch_supported = false;
        self
    }

    /// Fail the next `n` whole-object puts.
    pub fn failing_puts(self, n: usize) -> Self {
        self.put_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the next `times` uploads of part `index`.
    pub fn failing_part(self, index: u32, times: usize) -> Self {
        self.part_failures.lock().unwrap().insert(index, times);
        self
    }

    /// Make `url` reachable by server-side fetch.
    pub fn serve_remote(&self, url: &str, data: impl Into<Bytes>) {
        self.remote.lock().unwrap().insert(url.to_string(), data.into());
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn part_calls(&self) -> usize {
        self.part_calls.load(Ordering::SeqCst)
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    /// Drop every in-progress resumable upload, as an expiring backend would.
    pub fn forget_uploads(&self) {
        self.uploads.lock().unwrap().clear();
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, key: &str, data: Bytes, _mime: &str) -> Result<()> {
        validate_key(key)?;
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.put_failures) {
            return Err(TransvoxError::Store("injected put failure".into()));
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn begin_resumable(&self, key: &str, size: u64, _mime: &str) -> Result<String> {
        validate_key(key)?;
        let id = uuid::Uuid::new_v4().to_string();
        self.uploads.lock().unwrap().insert(
            id.clone(),
            PendingUpload {
                size,
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn upload_part(&self, upload_id: &str, index: u32, offset: u64, data: Bytes) -> Result<()> {
        self.part_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(left) = self.part_failures.lock().unwrap().get_mut(&index) {
            if *left > 0 {
                *left -= 1;
                return Err(TransvoxError::Store(format!("injected failure of part {}", index)));
            }
        }
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| TransvoxError::Store(format!("Unknown upload: {}", upload_id)))?;
        upload.parts.insert(index, (offset, data));
        Ok(())
    }

    async fn complete_resumable(&self, upload_id: &str, key: &str, parts: u32) -> Result<()> {
        let upload = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| TransvoxError::Store(format!("Unknown upload: {}", upload_id)))?;

        if upload.parts.len() != parts as usize {
            return Err(TransvoxError::Store(format!(
                "Expected {} parts, got {}",
                parts,
                upload.parts.len()
            )));
        }

        let mut assembled = BytesMut::with_capacity(upload.size as usize);
        for (offset, data) in upload.parts.values() {
            if *offset != assembled.len() as u64 {
                return Err(TransvoxError::Store("Parts are not contiguous".into()));
            }
            assembled.extend_from_slice(data);
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), assembled.freeze());
        Ok(())
    }

    async fn abort_resumable(&self, upload_id: &str) -> Result<()> {
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }

    async fn fetch_remote(&self, key: &str, url: &str) -> Result<RemoteFetch> {
        validate_key(key)?;
        if !self.fetch_supported {
            return Ok(RemoteFetch::Unsupported);
        }
        let data = self
            .remote
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| TransvoxError::Store(format!("Remote not reachable: {}", url)))?;
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(RemoteFetch::Stored)
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        self.object(key)
            .ok_or_else(|| TransvoxError::Store(format!("No such object: {}", key)))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base, key)
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        let key = url.strip_prefix(&self.base)?.strip_prefix('/')?;
        validate_key(key).ok()?;
        Some(key.to_string())
    }
}
