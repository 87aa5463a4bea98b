use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::warn;

/// Default number of concurrent reasoner calls.
pub const DEFAULT_WORKERS: usize = 4;

/// Fan `f` out over `items` with at most `workers` invocations in flight,
/// returning results aligned to input index: slot i always holds item i's
/// outcome no matter which worker finished first. A panic inside one
/// item's future becomes that slot's `Err` and leaves siblings untouched.
pub async fn run_bounded<I, T, F, Fut>(items: Vec<I>, workers: usize, f: F) -> Vec<Result<T>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(usize, I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));

    let handles: Vec<_> = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let semaphore = Arc::clone(&semaphore);
            let work = f(index, item);
            tokio::spawn(async move {
                // Permit held for the duration of the item's work; the
                // semaphore is never closed while handles are alive.
                let _permit = semaphore.acquire().await.expect("pool semaphore closed");
                work.await
            })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .enumerate()
        .map(|(index, joined)| {
            joined.map_err(|e| {
                warn!(item = index, error = %e, "Worker failed, isolating item");
                anyhow!("item {index} failed: {e}")
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn results_align_to_input_order() {
        // Earlier items sleep longer, so completion order is reversed.
        let results = run_bounded(vec![0u64, 1, 2], 3, |_, n| async move {
            tokio::time::sleep(Duration::from_millis((3 - n) * 30)).await;
            n * 10
        })
        .await;

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 10, 20]);
    }

    #[tokio::test]
    async fn panic_is_isolated_to_its_slot() {
        let results = run_bounded(vec![1u32, 2, 3], 2, |_, n| async move {
            if n == 2 {
                panic!("boom");
            }
            n
        })
        .await;

        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(results[1].is_err(), "panicked item becomes Err");
        assert_eq!(*results[2].as_ref().unwrap(), 3);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_worker_count() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded(vec![(); 8], 2, {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            move |_, _| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }
        })
        .await;

        assert_eq!(results.len(), 8);
        assert!(
            peak.load(Ordering::SeqCst) <= 2,
            "peak concurrency {} exceeded worker bound",
            peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let results = run_bounded(Vec::<u8>::new(), 4, |_, n| async move { n }).await;
        assert!(results.is_empty());
    }
}
