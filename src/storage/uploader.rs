//! Adaptive uploads into an [`ObjectStore`].

use super::{Checkpoint, ObjectStore, ProgressReader, ProgressTracker, RemoteFetch, UploadProgress};
use crate::context::CallContext;
use crate::effects::BestEffort;
use crate::error::{Result, TransvoxError};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Payloads up to and including this size are sent in one request.
pub const BUFFERED_THRESHOLD: u64 = 8 * 1024 * 1024;
/// Part size of resumable transfers.
pub const PART_SIZE: u64 = 4 * 1024 * 1024;
/// Attempts per part before the transfer fails.
pub const PART_ATTEMPTS: u32 = 3;
/// Ambient budgets shorter than this get the hard ceiling applied.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(3 * 60);
/// Longest an upload may run when the caller gives no usable deadline.
pub const HARD_CEILING: Duration = Duration::from_secs(5 * 60);

const PART_RETRY_DELAY: Duration = Duration::from_millis(250);

/// How a payload of known size is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    Buffered,
    Resumable,
}

pub fn choose_strategy(size: u64) -> UploadStrategy {
    if size <= BUFFERED_THRESHOLD {
        UploadStrategy::Buffered
    } else {
        UploadStrategy::Resumable
    }
}

/// The deadline an upload runs under.
///
/// A caller deadline at least [`SAFETY_MARGIN`] away is honored as is;
/// otherwise the upload is held to `min(deadline, now + HARD_CEILING)`.
pub fn upload_deadline(ctx: &CallContext) -> Instant {
    let now = Instant::now();
    let ceiling = now + HARD_CEILING;
    match ctx.deadline() {
        Some(deadline) if deadline.saturating_duration_since(now) >= SAFETY_MARGIN => deadline,
        Some(deadline) => deadline.min(ceiling),
        None => ceiling,
    }
}

/// Uploads byte streams and remote URLs, returning public URLs.
pub struct StorageUploader {
    store: Arc<dyn ObjectStore>,
    checkpoint_dir: PathBuf,
    temp_dir: PathBuf,
    http: reqwest::Client,
    progress: Option<mpsc::Sender<UploadProgress>>,
}

impl StorageUploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        checkpoint_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            checkpoint_dir: checkpoint_dir.into(),
            temp_dir: temp_dir.into(),
            http: reqwest::Client::new(),
            progress: None,
        }
    }

    /// Send progress events to `sender` in addition to the log.
    pub fn with_progress(mut self, sender: mpsc::Sender<UploadProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn public_url(&self, key: &str) -> String {
        self.store.public_url(key)
    }

    /// Whether `url` points into the managed store.
    pub fn is_managed(&self, url: &str) -> bool {
        self.store.key_for_url(url).is_some()
    }

    /// Bytes behind a managed URL; `None` for foreign URLs.
    pub async fn read_managed(&self, url: &str) -> Result<Option<Bytes>> {
        match self.store.key_for_url(url) {
            Some(key) => Ok(Some(self.store.get_object(&key).await?)),
            None => Ok(None),
        }
    }

    /// Upload `source` under `key`.
    ///
    /// With `size = None` the stream is buffered completely before a strategy
    /// is chosen.
    #[instrument(skip(self, ctx, source))]
    pub async fn put<R>(
        &self,
        ctx: &CallContext,
        key: &str,
        source: R,
        size: Option<u64>,
        mime: &str,
    ) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.bounded(ctx, key, self.put_any(key, source, size, mime))
            .await
    }

    pub async fn put_bytes(&self, ctx: &CallContext, key: &str, data: Bytes, mime: &str) -> Result<String> {
        let size = data.len() as u64;
        self.put(ctx, key, &data[..], Some(size), mime).await
    }

    pub async fn put_file(&self, ctx: &CallContext, key: &str, path: &Path, mime: &str) -> Result<String> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| upload_failure(key, e.into()))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| upload_failure(key, e.into()))?
            .len();
        self.put(ctx, key, file, Some(size), mime).await
    }

    /// Store the content of `url` under `key`, server-side when the backend
    /// can, otherwise by downloading it here and uploading the bytes.
    #[instrument(skip(self, ctx))]
    pub async fn fetch_remote(&self, ctx: &CallContext, key: &str, url: &str) -> Result<String> {
        self.bounded(ctx, key, self.fetch_via_store(key, url)).await
    }

    async fn bounded<F>(&self, ctx: &CallContext, key: &str, transfer: F) -> Result<String>
    where
        F: Future<Output = Result<String>>,
    {
        match tokio::time::timeout_at(upload_deadline(ctx), transfer).await {
            Ok(Ok(url)) => Ok(url),
            Ok(Err(e)) => Err(upload_failure(key, e)),
            Err(_) => Err(TransvoxError::UploadFailed(format!("{}: deadline exceeded", key))),
        }
    }

    async fn put_any<R>(&self, key: &str, mut source: R, size: Option<u64>, mime: &str) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        match size {
            Some(size) => self.put_sized(key, source, size, mime).await,
            None => {
                let mut buffer = Vec::new();
                source.read_to_end(&mut buffer).await?;
                let size = buffer.len() as u64;
                self.put_sized(key, &buffer[..], size, mime).await
            }
        }
    }

    async fn fetch_via_store(&self, key: &str, url: &str) -> Result<String> {
        match self.store.fetch_remote(key, url).await {
            Ok(RemoteFetch::Stored) => {
                debug!("Stored via server-side fetch");
                return Ok(self.store.public_url(key));
            }
            Ok(RemoteFetch::Unsupported) => {
                debug!("Store cannot fetch this source, proxying bytes");
            }
            Err(e) => {
                warn!(error = %e, "Server-side fetch failed, proxying bytes");
            }
        }

        let response = self.http.get(url).send().await?.error_for_status()?;
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = response.bytes().await?;
        let size = data.len() as u64;
        self.put_sized(key, &data[..], size, &mime).await
    }

    async fn put_sized<R>(&self, key: &str, source: R, size: u64, mime: &str) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut tracker = ProgressTracker::new(key, Some(size), self.progress.clone());

        match choose_strategy(size) {
            UploadStrategy::Buffered => {
                let mut buffer = Vec::with_capacity(size as usize);
                ProgressReader::new(source.take(size), &mut tracker)
                    .read_to_end(&mut buffer)
                    .await?;
                if buffer.len() as u64 != size {
                    return Err(short_source(size, buffer.len() as u64));
                }
                self.store.put_object(key, Bytes::from(buffer), mime).await?;
            }
            UploadStrategy::Resumable => {
                // Removed on drop, whichever way this arm exits
                let (spool, digest) = self.spill(source, size).await?;
                self.put_resumable(key, spool.path(), size, &digest, mime, &mut tracker)
                    .await?;
            }
        }

        tracker.finish();
        info!(key, size, "Upload complete");
        Ok(self.store.public_url(key))
    }

    /// Copy `size` bytes of `source` to a temp file, returning it with the
    /// hex SHA-256 of its content.
    async fn spill<R>(&self, source: R, size: u64) -> Result<(NamedTempFile, String)>
    where
        R: AsyncRead + Unpin + Send,
    {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let spool = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&self.temp_dir)?;

        let mut file = tokio::fs::File::from_std(spool.reopen()?);
        let mut source = source.take(size);
        let mut hasher = Sha256::new();
        let mut chunk = vec![0u8; 64 * 1024];
        let mut written = 0u64;
        loop {
            let n = source.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
            file.write_all(&chunk[..n]).await?;
            written += n as u64;
        }
        file.flush().await?;

        if written != size {
            return Err(short_source(size, written));
        }
        Ok((spool, format!("{:x}", hasher.finalize())))
    }

    async fn put_resumable(
        &self,
        key: &str,
        path: &Path,
        size: u64,
        digest: &str,
        mime: &str,
        tracker: &mut ProgressTracker,
    ) -> Result<()> {
        if let Some(mut checkpoint) = self.resume(key, size, digest).await? {
            let resumed = match self.send_parts(key, path, size, &mut checkpoint, tracker).await {
                Ok(()) => self.complete(key, size, checkpoint).await,
                Err(e) => {
                    self.discard(checkpoint).await;
                    Err(e)
                }
            };
            match resumed {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "Resumed upload failed, starting over");
                    tracker.rewind();
                }
            }
        }

        let upload_id = self.store.begin_resumable(key, size, mime).await?;
        let mut checkpoint =
            Checkpoint::new(&self.checkpoint_dir, key, upload_id, size, PART_SIZE, digest);
        checkpoint.save().await?;

        // A part failure keeps the checkpoint so the next attempt resumes
        self.send_parts(key, path, size, &mut checkpoint, tracker)
            .await?;
        self.complete(key, size, checkpoint).await
    }

    /// The checkpoint of an earlier attempt at these exact bytes, if any.
    async fn resume(&self, key: &str, size: u64, digest: &str) -> Result<Option<Checkpoint>> {
        match Checkpoint::load(&self.checkpoint_dir, key).await? {
            Some(checkpoint) if checkpoint.matches(size, PART_SIZE, digest) => Ok(Some(checkpoint)),
            Some(stale) => {
                debug!(upload_id = %stale.upload_id, "Checkpoint is for other content");
                self.discard(stale).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Abort the checkpoint's upload and forget it.
    async fn discard(&self, checkpoint: Checkpoint) {
        self.store
            .abort_resumable(&checkpoint.upload_id)
            .await
            .best_effort("abort_resumable");
        checkpoint.remove().await.best_effort("remove_checkpoint");
    }

    async fn send_parts(
        &self,
        key: &str,
        path: &Path,
        size: u64,
        checkpoint: &mut Checkpoint,
        tracker: &mut ProgressTracker,
    ) -> Result<()> {
        let parts = size.div_ceil(PART_SIZE) as u32;
        let mut file = tokio::fs::File::open(path).await?;

        for index in 0..parts {
            let offset = index as u64 * PART_SIZE;
            let len = PART_SIZE.min(size - offset);

            if checkpoint.is_done(index) {
                debug!(index, "Part already uploaded");
                tracker.advance(len);
                continue;
            }

            file.seek(SeekFrom::Start(offset)).await?;
            let mut buffer = Vec::with_capacity(len as usize);
            ProgressReader::new((&mut file).take(len), &mut *tracker)
                .read_to_end(&mut buffer)
                .await?;
            let data = Bytes::from(buffer);

            let mut attempt = 1;
            loop {
                match self
                    .store
                    .upload_part(&checkpoint.upload_id, index, offset, data.clone())
                    .await
                {
                    Ok(()) => break,
                    Err(e) if attempt < PART_ATTEMPTS => {
                        warn!(index, attempt, error = %e, "Part upload failed, retrying");
                        tokio::time::sleep(PART_RETRY_DELAY * attempt).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        return Err(TransvoxError::UploadFailed(format!(
                            "{}: part {} failed after {} attempts: {}",
                            key, index, attempt, e
                        )));
                    }
                }
            }

            checkpoint.mark_done(index).await?;
        }

        Ok(())
    }

    async fn complete(&self, key: &str, size: u64, checkpoint: Checkpoint) -> Result<()> {
        let parts = size.div_ceil(PART_SIZE) as u32;
        if let Err(e) = self.store.complete_resumable(&checkpoint.upload_id, key, parts).await {
            self.discard(checkpoint).await;
            return Err(e);
        }

        checkpoint.remove().await.best_effort("remove_checkpoint");
        Ok(())
    }
}

fn upload_failure(key: &str, e: TransvoxError) -> TransvoxError {
    match e {
        TransvoxError::UploadFailed(_) => e,
        other => TransvoxError::UploadFailed(format!("{}: {}", key, other)),
    }
}

fn short_source(expected: u64, got: u64) -> TransvoxError {
    TransvoxError::UploadFailed(format!(
        "source ended after {} of {} declared bytes",
        got, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<MemoryObjectStore>,
        uploader: StorageUploader,
        checkpoints: TempDir,
        temp: TempDir,
    }

    fn fixture(store: MemoryObjectStore) -> Fixture {
        let store = Arc::new(store);
        let checkpoints = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let uploader = StorageUploader::new(store.clone(), checkpoints.path(), temp.path());
        Fixture {
            store,
            uploader,
            checkpoints,
            temp,
        }
    }

    fn payload(len: u64) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_strategy_boundary() {
        assert_eq!(choose_strategy(0), UploadStrategy::Buffered);
        assert_eq!(choose_strategy(BUFFERED_THRESHOLD), UploadStrategy::Buffered);
        assert_eq!(choose_strategy(BUFFERED_THRESHOLD + 1), UploadStrategy::Resumable);
    }

    #[tokio::test]
    async fn test_deadline_ceiling() {
        let now = Instant::now();

        let open = upload_deadline(&CallContext::background());
        assert!(open <= Instant::now() + HARD_CEILING);
        assert!(open >= now + HARD_CEILING);

        let generous = CallContext::with_timeout(Duration::from_secs(3600));
        assert_eq!(upload_deadline(&generous), generous.deadline().unwrap());

        let tight = CallContext::with_timeout(Duration::from_secs(60));
        assert_eq!(upload_deadline(&tight), tight.deadline().unwrap());
    }

    #[tokio::test]
    async fn test_exactly_threshold_is_single_put() {
        let f = fixture(MemoryObjectStore::new());
        let data = payload(BUFFERED_THRESHOLD);

        let url = f
            .uploader
            .put(&CallContext::background(), "audio/a.bin", &data[..], Some(BUFFERED_THRESHOLD), "audio/mpeg")
            .await
            .unwrap();

        assert_eq!(url, "https://bucket.test/audio/a.bin");
        assert_eq!(f.store.put_calls(), 1);
        assert_eq!(f.store.part_calls(), 0);
    }

    #[tokio::test]
    async fn test_one_past_threshold_is_resumable_and_cleans_up() {
        let f = fixture(MemoryObjectStore::new());
        let size = BUFFERED_THRESHOLD + 1;
        let data = payload(size);

        f.uploader
            .put(&CallContext::background(), "audio/b.bin", &data[..], Some(size), "audio/mpeg")
            .await
            .unwrap();

        assert_eq!(f.store.put_calls(), 0);
        assert_eq!(f.store.part_calls(), 3);
        assert_eq!(f.store.object("audio/b.bin").unwrap(), data);
        assert!(is_empty(f.temp.path()));
        assert!(is_empty(f.checkpoints.path()));
    }

    #[tokio::test]
    async fn test_unknown_size_is_buffered_before_choosing() {
        let f = fixture(MemoryObjectStore::new());
        let data = payload(BUFFERED_THRESHOLD + 10);

        f.uploader
            .put(&CallContext::background(), "audio/c.bin", &data[..], None, "audio/mpeg")
            .await
            .unwrap();
        assert_eq!(f.store.part_calls(), 3);

        let small = payload(100);
        f.uploader
            .put(&CallContext::background(), "audio/d.bin", &small[..], None, "audio/mpeg")
            .await
            .unwrap();
        assert_eq!(f.store.put_calls(), 1);
    }

    #[tokio::test]
    async fn test_part_retries_then_resumes_from_checkpoint() {
        let f = fixture(MemoryObjectStore::new().failing_part(1, PART_ATTEMPTS as usize));
        let size = BUFFERED_THRESHOLD + 1;
        let data = payload(size);
        let ctx = CallContext::background();

        let err = f
            .uploader
            .put(&ctx, "audio/e.bin", &data[..], Some(size), "audio/mpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, TransvoxError::UploadFailed(_)));
        assert!(f.store.object("audio/e.bin").is_none());
        assert!(is_empty(f.temp.path()));
        assert!(Checkpoint::path_for(f.checkpoints.path(), "audio/e.bin").exists());

        f.uploader
            .put(&ctx, "audio/e.bin", &data[..], Some(size), "audio/mpeg")
            .await
            .unwrap();

        // part 0 once, part 1 three failures plus one success, part 2 once
        assert_eq!(f.store.part_calls(), 6);
        assert_eq!(f.store.object("audio/e.bin").unwrap(), data);
        assert!(is_empty(f.checkpoints.path()));
    }

    #[tokio::test]
    async fn test_changed_payload_does_not_resume() {
        let f = fixture(MemoryObjectStore::new().failing_part(1, PART_ATTEMPTS as usize));
        let size = BUFFERED_THRESHOLD + 1;
        let first = vec![b'A'; size as usize];
        let second = vec![b'B'; size as usize];
        let ctx = CallContext::background();

        f.uploader
            .put(&ctx, "audio/f.bin", &first[..], Some(size), "audio/mpeg")
            .await
            .unwrap_err();
        assert!(Checkpoint::path_for(f.checkpoints.path(), "audio/f.bin").exists());

        // Same key and size, different bytes: part 0 of the first payload must not be reused
        f.uploader
            .put(&ctx, "audio/f.bin", &second[..], Some(size), "audio/mpeg")
            .await
            .unwrap();

        assert_eq!(f.store.object("audio/f.bin").unwrap(), second);
        assert_eq!(f.store.pending_uploads(), 0);
        assert!(is_empty(f.checkpoints.path()));
    }

    #[tokio::test]
    async fn test_lost_upload_restarts_from_scratch() {
        let f = fixture(MemoryObjectStore::new().failing_part(1, PART_ATTEMPTS as usize));
        let size = BUFFERED_THRESHOLD + 1;
        let data = payload(size);
        let ctx = CallContext::background();

        f.uploader
            .put(&ctx, "audio/g.bin", &data[..], Some(size), "audio/mpeg")
            .await
            .unwrap_err();

        // The backend expired the upload the checkpoint still names
        f.store.forget_uploads();

        f.uploader
            .put(&ctx, "audio/g.bin", &data[..], Some(size), "audio/mpeg")
            .await
            .unwrap();

        assert_eq!(f.store.object("audio/g.bin").unwrap(), data);
        assert_eq!(f.store.pending_uploads(), 0);
        assert!(is_empty(f.checkpoints.path()));

        // The key stays uploadable afterwards
        f.uploader
            .put(&ctx, "audio/g.bin", &data[..], Some(size), "audio/mpeg")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_buffered_failure_is_not_retried() {
        let f = fixture(MemoryObjectStore::new().failing_puts(1));
        let err = f
            .uploader
            .put_bytes(&CallContext::background(), "tts/u1/a.mp3", Bytes::from_static(b"id3"), "audio/mpeg")
            .await
            .unwrap_err();

        assert!(matches!(err, TransvoxError::UploadFailed(_)));
        assert_eq!(f.store.put_calls(), 1);
    }

    #[tokio::test]
    async fn test_declared_size_mismatch_fails() {
        let f = fixture(MemoryObjectStore::new());
        let err = f
            .uploader
            .put(&CallContext::background(), "a/b", &b"abc"[..], Some(10), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, TransvoxError::UploadFailed(_)));
        assert_eq!(f.store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_remote_server_side() {
        let store = MemoryObjectStore::new();
        store.serve_remote("https://upstream.test/a.mp3", Bytes::from_static(b"mp3"));
        let f = fixture(store);

        let url = f
            .uploader
            .fetch_remote(&CallContext::background(), "audio/youtube/a.mp3", "https://upstream.test/a.mp3")
            .await
            .unwrap();

        assert_eq!(url, "https://bucket.test/audio/youtube/a.mp3");
        assert!(f.uploader.is_managed(&url));
        assert_eq!(f.uploader.read_managed(&url).await.unwrap().unwrap(), "mp3");
    }

    #[tokio::test]
    async fn test_fetch_remote_fallback_failure_returns_no_url() {
        let f = fixture(MemoryObjectStore::new().without_remote_fetch());
        let err = f
            .uploader
            .fetch_remote(&CallContext::background(), "audio/x.mp3", "http://127.0.0.1:9/x.mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, TransvoxError::UploadFailed(_)));
        assert_eq!(f.store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_events_reach_channel() {
        let (tx, mut rx) = mpsc::channel(64);
        let store = Arc::new(MemoryObjectStore::new());
        let checkpoints = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let uploader = StorageUploader::new(store, checkpoints.path(), temp.path()).with_progress(tx);

        let size = BUFFERED_THRESHOLD + 1;
        let data = payload(size);
        uploader
            .put(&CallContext::background(), "audio/p.bin", &data[..], Some(size), "audio/mpeg")
            .await
            .unwrap();
        drop(uploader);

        let mut last = None;
        while let Some(event) = rx.recv().await {
            assert_eq!(event.total, Some(size));
            last = Some(event.transferred);
        }
        assert_eq!(last, Some(size));
    }
}
