//! Upload progress instrumentation.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;

/// Emit after this many bytes since the last event...
pub const BYTE_INTERVAL: u64 = 2 * 1024 * 1024;
/// ...or after this much time, whichever comes first.
pub const TIME_INTERVAL: Duration = Duration::from_secs(2);

/// One progress observation.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub key: String,
    pub transferred: u64,
    pub total: Option<u64>,
    pub elapsed: Duration,
}

/// Rate-limited progress counter for one transfer.
pub struct ProgressTracker {
    key: String,
    total: Option<u64>,
    transferred: u64,
    reported: u64,
    started: Instant,
    last_report: Instant,
    sender: Option<mpsc::Sender<UploadProgress>>,
}

impl ProgressTracker {
    pub fn new(
        key: impl Into<String>,
        total: Option<u64>,
        sender: Option<mpsc::Sender<UploadProgress>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            total,
            transferred: 0,
            reported: 0,
            started: now,
            last_report: now,
            sender,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn set_total(&mut self, total: u64) {
        self.total = Some(total);
    }

    /// Count from zero again for a transfer that starts over.
    pub fn rewind(&mut self) {
        self.transferred = 0;
        self.reported = 0;
    }

    /// Count `n` more bytes, reporting if an interval has passed.
    pub fn advance(&mut self, n: u64) {
        if n == 0 {
            return;
        }
        self.transferred += n;
        if self.transferred - self.reported >= BYTE_INTERVAL
            || self.last_report.elapsed() >= TIME_INTERVAL
        {
            self.report();
        }
    }

    /// Report whatever has not been reported yet.
    pub fn finish(&mut self) {
        if self.transferred != self.reported {
            self.report();
        }
    }

    fn report(&mut self) {
        self.reported = self.transferred;
        self.last_report = Instant::now();

        let event = UploadProgress {
            key: self.key.clone(),
            transferred: self.transferred,
            total: self.total,
            elapsed: self.started.elapsed(),
        };

        info!(
            key = %event.key,
            transferred = event.transferred,
            total = ?event.total,
            elapsed_ms = event.elapsed.as_millis() as u64,
            "upload progress"
        );

        if let Some(sender) = &self.sender {
            // A full channel drops the event; the next one supersedes it
            let _ = sender.try_send(event);
        }
    }
}

/// Counts bytes read through it into a [`ProgressTracker`].
pub struct ProgressReader<'a, R> {
    inner: R,
    tracker: &'a mut ProgressTracker,
}

impl<'a, R> ProgressReader<'a, R> {
    pub fn new(inner: R, tracker: &'a mut ProgressTracker) -> Self {
        Self { inner, tracker }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = buf.filled().len() - before;
            this.tracker.advance(read as u64);
        }
        poll
    }
}
