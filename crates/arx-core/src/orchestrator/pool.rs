//! Bounded worker pool for independent sub-tasks within one phase.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cancel::CancelSignal;
use crate::errors::{ErrorKind, PhaseError};

/// Run `f` over `items` with at most `limit` in flight.
///
/// Every spawned sub-task is awaited before returning, even when some fail,
/// so no work outlives the phase. Results come back in input order.
/// Items not yet started when `cancel` fires, or once a sibling has failed,
/// resolve to `Cancelled` without running.
pub async fn run_bounded<T, R, F, Fut>(
    limit: usize,
    items: Vec<T>,
    cancel: &CancelSignal,
    f: F,
) -> Vec<Result<R, PhaseError>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, PhaseError>> + Send + 'static,
{
    let total = items.len();
    let sem = Arc::new(Semaphore::new(limit.max(1)));
    let mut join_set = JoinSet::new();
    let mut slots: Vec<Option<Result<R, PhaseError>>> = (0..total).map(|_| None).collect();
    let failed = Arc::new(AtomicBool::new(false));

    for (idx, item) in items.into_iter().enumerate() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            p = sem.clone().acquire_owned() => p.ok(),
        };
        let Some(permit) = permit else {
            slots[idx] = Some(Err(PhaseError::cancelled()));
            continue;
        };
        if failed.load(Ordering::SeqCst) {
            slots[idx] = Some(Err(PhaseError::new(
                ErrorKind::Cancelled,
                "not started: a sibling sub-task failed",
            )));
            continue;
        }
        let fut = f(item);
        let failed = failed.clone();
        join_set.spawn(async move {
            let result = fut.await;
            if result.is_err() {
                failed.store(true, Ordering::SeqCst);
            }
            // flag is set before the permit frees the next slot
            drop(permit);
            (idx, result)
        });
    }

    while let Some(res) = join_set.join_next().await {
        match res {
            Ok((idx, result)) => slots[idx] = Some(result),
            Err(e) => tracing::error!(error = %e, "phase sub-task panicked"),
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(PhaseError::internal("phase sub-task panicked"))))
        .collect()
}

/// Collapse pool results, keeping the first failure in input order.
///
/// A cancellation is only reported when no sub-task failed for another reason.
pub fn collect_all<R>(results: Vec<Result<R, PhaseError>>) -> Result<Vec<R>, PhaseError> {
    let mut out = Vec::with_capacity(results.len());
    let mut cancelled = None;
    for result in results {
        match result {
            Ok(r) => out.push(r),
            Err(e) if e.is_cancelled() => {
                cancelled.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }
    match cancelled {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_limit_and_keeps_order() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let results = run_bounded(2, (0..8).collect(), &CancelSignal::never(), |i: u64| {
            let live = live.clone();
            let peak = peak.clone();
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10 * (8 - i))).await;
                live.fetch_sub(1, Ordering::SeqCst);
                Ok(i * 10)
            }
        })
        .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        let values = collect_all(results).unwrap();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[tokio::test]
    async fn failing_sibling_does_not_orphan_slow_sibling() {
        let finished = Arc::new(AtomicBool::new(false));
        let results = run_bounded(4, vec![0u8, 1], &CancelSignal::never(), |i| {
            let finished = finished.clone();
            async move {
                if i == 0 {
                    return Err(PhaseError::new(ErrorKind::BackendProtocol, "bad reply"));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                finished.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(finished.load(Ordering::SeqCst), "slow sibling must complete first");
        let err = collect_all(results).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BackendProtocol);
    }

    #[tokio::test]
    async fn failure_stops_later_items_from_starting() {
        let started = Arc::new(AtomicUsize::new(0));
        let results = run_bounded(1, vec![0u8, 1, 2], &CancelSignal::never(), |i| {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                if i == 0 {
                    return Err(PhaseError::new(ErrorKind::TargetAuth, "401"));
                }
                Ok(())
            }
        })
        .await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(results[1..].iter().all(|r| matches!(r, Err(e) if e.is_cancelled())));
        assert_eq!(collect_all(results).unwrap_err().kind, ErrorKind::TargetAuth);
    }

    #[tokio::test]
    async fn cancelled_before_start_yields_cancelled() {
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let results = run_bounded(1, vec![1, 2, 3], &signal, |i: i32| async move { Ok(i) }).await;
        assert!(results.iter().all(|r| matches!(r, Err(e) if e.is_cancelled())));
    }

    #[test]
    fn real_failure_wins_over_cancellation() {
        let results: Vec<Result<(), PhaseError>> = vec![
            Err(PhaseError::cancelled()),
            Err(PhaseError::new(ErrorKind::TargetAuth, "401")),
        ];
        assert_eq!(collect_all(results).unwrap_err().kind, ErrorKind::TargetAuth);
    }
}
