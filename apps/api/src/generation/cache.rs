//! Regeneration policy for derived artifacts.
//!
//! A stored artifact is served as-is unless the caller asks for regeneration.
//! A generated artifact replaces the stored one; the caller persists it.

use std::future::Future;

use tracing::debug;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Reused,
    Generated,
}

/// Decision for a stored value and the caller's `regenerate` flag.
pub fn decide(has_stored: bool, regenerate: bool) -> CacheOutcome {
    if has_stored && !regenerate {
        CacheOutcome::Reused
    } else {
        CacheOutcome::Generated
    }
}

/// Returns `stored` when it exists and `regenerate` is false, otherwise runs
/// `produce`. The producer is never invoked on the reuse path.
pub async fn reuse_or_generate<T, F, Fut>(
    stored: Option<T>,
    regenerate: bool,
    produce: F,
) -> Result<(T, CacheOutcome), AppError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    match (decide(stored.is_some(), regenerate), stored) {
        (CacheOutcome::Reused, Some(value)) => {
            debug!("Serving stored artifact");
            Ok((value, CacheOutcome::Reused))
        }
        _ => Ok((produce().await?, CacheOutcome::Generated)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_decide_table() {
        assert_eq!(decide(true, false), CacheOutcome::Reused);
        assert_eq!(decide(true, true), CacheOutcome::Generated);
        assert_eq!(decide(false, false), CacheOutcome::Generated);
        assert_eq!(decide(false, true), CacheOutcome::Generated);
    }

    #[tokio::test]
    async fn test_stored_value_skips_producer() {
        let calls = AtomicUsize::new(0);
        let (value, outcome) = reuse_or_generate(Some("stored"), false, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("fresh")
        })
        .await
        .unwrap();
        assert_eq!(value, "stored");
        assert_eq!(outcome, CacheOutcome::Reused);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_regenerate_always_produces() {
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let (value, _) = reuse_or_generate(Some("stored"), true, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("fresh")
            })
            .await
            .unwrap();
            assert_eq!(value, "fresh");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_producer_error_propagates() {
        let result: Result<(String, _), _> = reuse_or_generate(None, false, || async {
            Err(AppError::Llm("boom".into()))
        })
        .await;
        assert!(matches!(result, Err(AppError::Llm(_))));
    }
}
