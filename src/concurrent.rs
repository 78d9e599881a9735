use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounded fan-out/fan-in executor. At most `concurrency` tasks are in
/// flight; a task that panics yields `None` without affecting its siblings.
pub struct ConcurrentProbe {
    semaphore: Arc<Semaphore>,
}

impl ConcurrentProbe {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Run `task_fn` over every task. Results come back in input order.
    pub async fn execute<T, F, Fut>(&self, tasks: Vec<T>, task_fn: F) -> Vec<Option<Fut::Output>>
    where
        F: Fn(T) -> Fut + Clone + Send + 'static,
        Fut: std::future::Future + Send + 'static,
        Fut::Output: Send + 'static,
        T: Send + 'static,
    {
        let total = tasks.len();
        let mut futures = FuturesUnordered::new();

        for (idx, task) in tasks.into_iter().enumerate() {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let task_fn = task_fn.clone();

            let handle = tokio::spawn(async move {
                let result = task_fn(task).await;
                drop(permit);
                result
            });
            futures.push(async move { (idx, handle.await) });
        }

        let mut results: Vec<Option<Fut::Output>> = (0..total).map(|_| None).collect();
        while let Some((idx, joined)) = futures.next().await {
            match joined {
                Ok(output) => results[idx] = Some(output),
                Err(e) => tracing::warn!("concurrent task {} failed: {}", idx, e),
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn results_keep_input_order() {
        let exec = ConcurrentProbe::new(2);
        let out = exec
            .execute(vec![30u64, 10, 20], |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ms
            })
            .await;
        assert_eq!(out, vec![Some(30), Some(10), Some(20)]);
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_cap() {
        let exec = ConcurrentProbe::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<usize> = (0..12).collect();
        let (f, p) = (in_flight.clone(), peak.clone());
        exec.execute(tasks, move |_| {
            let (f, p) = (f.clone(), p.clone());
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                f.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn a_panicking_task_does_not_abort_siblings() {
        let exec = ConcurrentProbe::new(4);
        let out = exec
            .execute(vec![1, 2, 3], |n| async move {
                if n == 2 {
                    panic!("boom");
                }
                n * 10
            })
            .await;
        assert_eq!(out, vec![Some(10), None, Some(30)]);
    }
}
