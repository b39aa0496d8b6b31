//! Non-critical side effects.
//!
//! History rows, daily usage, metadata backfill and quota deductions are
//! bookkeeping: their failures are logged here and never reach the caller's
//! error path. Critical-path calls use `?` instead.

use tracing::warn;

/// Extension trait for results of auxiliary effects.
pub trait BestEffort<T> {
    /// Log a failure under the effect name and discard it.
    fn best_effort(self, effect: &str) -> Option<T>;
}

impl<T, E: std::fmt::Display> BestEffort<T> for Result<T, E> {
    fn best_effort(self, effect: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(effect, error = %e, "non-critical effect failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_effort_swallows_errors() {
        let failed: Result<u32, String> = Err("db down".into());
        assert_eq!(failed.best_effort("usage_daily"), None);

        let ok: Result<u32, String> = Ok(7);
        assert_eq!(ok.best_effort("usage_daily"), Some(7));
    }
}
