use crate::domain::HttpResponse;
use crate::metrics::metrics;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// `(request id, service name)`.
pub type PendingKey = (String, String);

/// How a pending entry was settled.
#[derive(Clone, Debug, PartialEq)]
pub enum PendingOutcome {
    Reply(HttpResponse),
    Expired,
    PublishFailed(String),
}

#[derive(Debug)]
struct PendingEntry {
    channel: String,
    created_at: Instant,
    timeout: Duration,
    settle: oneshot::Sender<PendingOutcome>,
}

impl PendingEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.timeout
    }
}

/// Outstanding pub/sub requests of this process.
///
/// Every settlement path goes through a single `DashMap::remove`, so an entry is settled by
/// exactly one of reply, sweep or publish failure.
#[derive(Debug, Default)]
pub struct PendingRequestTable {
    entries: DashMap<PendingKey, PendingEntry>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `(request_id, service)` and returns the receiver its settlement arrives on.
    pub fn register(
        &self,
        request_id: &str,
        service: &str,
        channel: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<PendingOutcome> {
        let (settle, receiver) = oneshot::channel();
        let entry = PendingEntry {
            channel: channel.to_string(),
            created_at: Instant::now(),
            timeout,
            settle,
        };
        if self
            .entries
            .insert((request_id.to_string(), service.to_string()), entry)
            .is_none()
        {
            metrics().pending_registered();
        }
        receiver
    }

    /// Settles an entry with a reply. Returns `false` when nothing was waiting for it.
    pub fn resolve(&self, request_id: &str, service: &str, response: HttpResponse) -> bool {
        self.settle(
            &(request_id.to_string(), service.to_string()),
            PendingOutcome::Reply(response),
        )
    }

    /// Settles every entry of `request_id` waiting on `channel` after a failed publish.
    pub fn fail_channel(&self, request_id: &str, channel: &str, reason: &str) -> usize {
        let keys: Vec<PendingKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == request_id && entry.value().channel == channel)
            .map(|entry| entry.key().clone())
            .collect();

        keys.iter()
            .filter(|key| self.settle(key, PendingOutcome::PublishFailed(reason.to_string())))
            .count()
    }

    /// Expires every entry older than its timeout and returns the keys it settled.
    pub fn sweep(&self, now: Instant) -> Vec<PendingKey> {
        let candidates: Vec<PendingKey> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = Vec::with_capacity(candidates.len());
        for key in candidates {
            if let Some((key, entry)) = self.entries.remove_if(&key, |_, entry| entry.is_expired(now))
            {
                metrics().pending_settled();
                metrics().pending_expired();
                let _ = entry.settle.send(PendingOutcome::Expired);
                expired.push(key);
            }
        }
        expired
    }

    pub fn contains(&self, request_id: &str, service: &str) -> bool {
        self.entries
            .contains_key(&(request_id.to_string(), service.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn settle(&self, key: &PendingKey, outcome: PendingOutcome) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                metrics().pending_settled();
                let _ = entry.settle.send(outcome);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn reply_settles_once() {
        let table = PendingRequestTable::new();
        let receiver = table.register("req", "users", "input", Duration::from_secs(30));

        assert!(table.resolve("req", "users", HttpResponse::with_status(200, "ok")));
        assert!(!table.resolve("req", "users", HttpResponse::with_status(200, "again")));
        assert!(table.is_empty());

        let outcome = receiver.await.expect("settled");
        assert_eq!(
            outcome,
            PendingOutcome::Reply(HttpResponse::with_status(200, "ok"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_only_expires_stale_entries() {
        let table = PendingRequestTable::new();
        let short = table.register("req", "fast", "input", Duration::from_secs(1));
        let _long = table.register("req", "slow", "input", Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(2)).await;
        let expired = table.sweep(Instant::now());

        assert_eq!(expired, vec![("req".to_string(), "fast".to_string())]);
        assert_eq!(short.await.expect("settled"), PendingOutcome::Expired);
        assert!(table.contains("req", "slow"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_reply_and_sweep_settle_exactly_once() {
        for _ in 0..500 {
            let table = Arc::new(PendingRequestTable::new());
            let receiver = table.register("req", "users", "input", Duration::ZERO);
            let start = Arc::new(Barrier::new(2));

            let replier = {
                let table = Arc::clone(&table);
                let start = Arc::clone(&start);
                tokio::spawn(async move {
                    start.wait().await;
                    table.resolve("req", "users", HttpResponse::with_status(200, "late"))
                })
            };
            let sweeper = {
                let table = Arc::clone(&table);
                let start = Arc::clone(&start);
                tokio::spawn(async move {
                    start.wait().await;
                    table.sweep(Instant::now()).len()
                })
            };

            let replied = replier.await.expect("replier");
            let swept = sweeper.await.expect("sweeper");
            assert_eq!(usize::from(replied) + swept, 1);
            let expected = if replied {
                PendingOutcome::Reply(HttpResponse::with_status(200, "late"))
            } else {
                PendingOutcome::Expired
            };
            assert_eq!(receiver.await.expect("settled"), expected);
            assert!(table.is_empty());
        }
    }

    #[tokio::test]
    async fn publish_failure_settles_entries_on_that_channel() {
        let table = PendingRequestTable::new();
        let first = table.register("req", "a", "input", Duration::from_secs(30));
        let second = table.register("req", "b", "input", Duration::from_secs(30));
        let _other = table.register("req", "c", "other", Duration::from_secs(30));

        assert_eq!(table.fail_channel("req", "input", "connection refused"), 2);
        assert!(matches!(
            first.await.expect("settled"),
            PendingOutcome::PublishFailed(_)
        ));
        assert!(matches!(
            second.await.expect("settled"),
            PendingOutcome::PublishFailed(_)
        ));
        assert_eq!(table.len(), 1);
    }
}
