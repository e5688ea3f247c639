//! Fail-open utilities for advisory steps
//!
//! Some steps enrich a result but must never abort it: the task-breakdown
//! lookup inside change impact analysis is the main one. Failures are logged
//! via `tracing::warn!` and collapse to `None`.
//!
//! DO NOT use fail-open for:
//! - Agent routing on the control channel (errors go back to the caller)
//! - Queue transitions (state)

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an advisory operation, turning any error into `None`
///
/// # Usage
///
/// ```no_run
/// use coe_core::fail_open::fail_open;
/// use coe_core::Result;
///
/// async fn fetch_tickets() -> Result<Vec<String>> {
///     Ok(vec![])
/// }
///
/// async fn example() {
///     let tickets = fail_open("task_breakdown", || fetch_tickets()).await;
///     // tickets is None if fetch_tickets() failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoeError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, CoeError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(CoeError::Breakdown("collaborator offline".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }
}
