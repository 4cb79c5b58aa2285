//! Bounded-concurrency gates for fetch and index work.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Counting gate over async work.
///
/// A capacity of zero means unlimited. Permits are held across the wrapped
/// future and released on every exit path, including cancellation: dropping
/// the returned future either never takes a permit or releases the one it
/// holds.
#[derive(Clone)]
pub(crate) struct Throttler {
    semaphore: Option<Arc<Semaphore>>,
}

impl Throttler {
    pub(crate) fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent))),
        }
    }

    /// Run `fut` under a permit.
    pub(crate) async fn run<F: Future>(&self, fut: F) -> F::Output {
        match &self.semaphore {
            None => fut.await,
            Some(semaphore) => {
                // The semaphore is never closed, so acquisition only ever
                // waits for a free permit.
                let _permit = semaphore.acquire().await.ok();
                fut.await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    async fn run_jobs(throttler: Throttler, jobs: usize) -> usize {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..jobs {
            let throttler = throttler.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                throttler
                    .run(async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn caps_concurrency() {
        let peak = run_jobs(Throttler::new(2), 8).await;
        assert!(peak <= 2, "peak concurrency {peak} exceeded cap");
    }

    #[tokio::test]
    async fn zero_means_unlimited() {
        let peak = run_jobs(Throttler::new(0), 8).await;
        assert!(peak > 2, "unlimited throttler should overlap jobs, peak {peak}");
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_permits() {
        let throttler = Throttler::new(1);

        let blocker = {
            let throttler = throttler.clone();
            tokio::spawn(async move {
                throttler
                    .run(tokio::time::sleep(Duration::from_millis(50)))
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // This waiter is cancelled while queued on the semaphore.
        let cancelled = {
            let throttler = throttler.clone();
            tokio::spawn(async move {
                throttler.run(std::future::pending::<()>()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancelled.abort();
        let _ = cancelled.await;

        blocker.await.unwrap();

        // The permit must be free again.
        tokio::time::timeout(Duration::from_millis(100), throttler.run(async {}))
            .await
            .expect("permit leaked");
    }
}
