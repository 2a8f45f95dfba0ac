use crate::telemetry::{runtime_counters, RuntimeCounters};
use std::sync::OnceLock;
use std::time::Duration;

pub use crate::telemetry::{
    HttpDurationSnapshot, HttpMetricsSnapshot, RuntimeCountersSnapshot, ServiceOutcomeSnapshot,
};

/// Collector that wraps the runtime counter APIs with a single entrypoint.
pub struct MetricsCollector {
    counters: &'static RuntimeCounters,
}

impl MetricsCollector {
    fn new() -> Self {
        Self {
            counters: runtime_counters(),
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.counters.http_metrics_snapshot()
    }

    pub fn record_http_request(&self, route: &str, status: u16, duration: Duration) {
        self.counters.record_http_request(route, status, duration);
    }

    pub fn record_service_outcome(&self, kind: &str, service: &str, status: u16) {
        self.counters.record_service_outcome(kind, service, status);
    }

    pub fn pending_registered(&self) {
        self.counters.inc_pending_requests();
    }

    pub fn pending_settled(&self) {
        self.counters.dec_pending_requests();
    }

    pub fn pending_expired(&self) {
        self.counters.inc_pending_expired();
    }

    pub fn reply_discarded(&self) {
        self.counters.inc_replies_discarded();
    }

    pub fn rollback_issued(&self) {
        self.counters.inc_rollbacks_issued();
    }

    pub fn rollback_failed(&self) {
        self.counters.inc_rollback_failures();
    }

    pub fn websocket_opened(&self) {
        self.counters.inc_websocket_connections();
    }

    pub fn websocket_closed(&self) {
        self.counters.dec_websocket_connections();
    }
}

/// Returns the shared `MetricsCollector` instance.
pub fn metrics() -> &'static MetricsCollector {
    MetricsCollector::global()
}
