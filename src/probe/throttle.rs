use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Spaces out requests to the same host. One pacer is shared by the tasks of
/// a single probe; different hosts are paced independently.
#[derive(Clone)]
pub struct Pacer {
    delay: Duration,
    next_slot: Arc<DashMap<String, Arc<Mutex<Instant>>>>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Arc::new(DashMap::new()),
        }
    }

    fn slot_for(&self, host: &str) -> Arc<Mutex<Instant>> {
        self.next_slot
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Instant::now())))
            .value()
            .clone()
    }

    /// Wait until `host` may receive another request, then reserve the next slot.
    pub async fn wait(&self, host: &str) {
        if self.delay.is_zero() {
            return;
        }
        let slot = self.slot_for(host);
        let mut next = slot.lock().await;
        let now = Instant::now();
        if *next > now {
            sleep_until(*next).await;
        }
        *next = Instant::now() + self.delay;
    }

    /// Convenience for full URLs; requests with an unparsable host are not paced.
    pub async fn wait_url(&self, url: &str) {
        if let Some(host) = url::Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_string())) {
            self.wait(&host).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_host_requests_are_spaced() {
        let pacer = Pacer::new(Duration::from_millis(40));
        let start = std::time::Instant::now();
        pacer.wait("a.test").await;
        pacer.wait("a.test").await;
        pacer.wait("a.test").await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn different_hosts_do_not_wait_on_each_other() {
        let pacer = Pacer::new(Duration::from_millis(200));
        let start = std::time::Instant::now();
        pacer.wait("a.test").await;
        pacer.wait("b.test").await;
        pacer.wait_url("https://c.test/x").await;
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn zero_delay_never_sleeps() {
        let pacer = Pacer::new(Duration::ZERO);
        let start = std::time::Instant::now();
        for _ in 0..50 {
            pacer.wait("a.test").await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
