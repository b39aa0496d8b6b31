//! Per-request deadline handling.
//!
//! A request carries at most one ambient deadline. Every external call is
//! bounded by the earlier of that deadline and its own stage cap. Dropping the
//! request future cancels whatever call is in flight.

use crate::error::{Result, TransvoxError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Cancellation and deadline context of one inbound request.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context without an ambient deadline.
    pub fn background() -> Self {
        Self { deadline: None }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the ambient deadline, if any.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The deadline for a call capped at `cap` from now.
    pub fn capped(&self, cap: Duration) -> Instant {
        let ceiling = Instant::now() + cap;
        match self.deadline {
            Some(d) if d < ceiling => d,
            _ => ceiling,
        }
    }

    /// Derive a child context whose deadline is capped at `cap` from now.
    pub fn child(&self, cap: Duration) -> Self {
        Self {
            deadline: Some(self.capped(cap)),
        }
    }

    /// Run `fut` under `min(ambient deadline, now + cap)`.
    pub async fn bound<T, F>(&self, stage: &str, cap: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout_at(self.capped(cap), fut).await {
            Ok(result) => result,
            Err(_) => Err(TransvoxError::Timeout(stage.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capped_prefers_earlier_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_secs(10));
        let capped = ctx.capped(Duration::from_secs(600));
        assert!(capped <= Instant::now() + Duration::from_secs(10));

        let open = CallContext::background();
        let capped = open.capped(Duration::from_secs(5));
        assert!(capped <= Instant::now() + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_times_out() {
        let ctx = CallContext::background();
        let result: Result<()> = ctx
            .bound("recognize", Duration::from_millis(50), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(TransvoxError::Timeout(stage)) if stage == "recognize"));
    }
}
