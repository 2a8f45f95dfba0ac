use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self as stdfmt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "retransmit";
const DEFAULT_FILTER: &str = "retransmit=info,info";
const HTTP_DURATION_BUCKETS: [f64; 10] = [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Installs the key=value line formatter. `RUST_LOG` wins over `filter`.
///
/// Info and below go to stdout, warnings and errors to stderr.
pub fn init_tracing(filter: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_FILTER)));

    let writer = std::io::stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(std::io::stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .event_format(GatewayLineFormat)
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

/// `ts=.. level=.. service=retransmit target=.. event=.. msg=.. <fields sorted by key>`
struct GatewayLineFormat;

impl<S, N> FormatEvent<S, N> for GatewayLineFormat
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let metadata = event.metadata();
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let mut line = LogLine::default();
        line.push("ts", &Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        line.push("level", metadata.level().as_str());
        line.push("service", SERVICE_NAME);
        line.push("target", metadata.target());
        if let Some(name) = fields.remove("event") {
            line.push("event", &name);
        }
        if let Some(message) = fields.remove("message") {
            line.push("msg", &message);
        }
        for (key, value) in &fields.values {
            line.push(key, value);
        }

        writer.write_str(&line.0)?;
        writer.write_char('\n')
    }
}

#[derive(Default)]
struct EventFields {
    values: BTreeMap<&'static str, String>,
}

impl EventFields {
    fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.values.insert(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.values.insert(field.name(), format!("{value:?}"));
    }
}

/// Space separated `key=value` pairs; values containing separators are quoted and escaped.
#[derive(Default)]
struct LogLine(String);

impl LogLine {
    fn push(&mut self, key: &str, value: &str) {
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        self.0.push_str(key);
        self.0.push('=');

        let quoted = value.is_empty()
            || value
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '='));
        if !quoted {
            self.0.push_str(value);
            return;
        }

        self.0.push('"');
        for ch in value.chars() {
            match ch {
                '"' => self.0.push_str("\\\""),
                '\\' => self.0.push_str("\\\\"),
                '\n' => self.0.push_str("\\n"),
                '\r' => self.0.push_str("\\r"),
                '\t' => self.0.push_str("\\t"),
                _ => self.0.push(ch),
            }
        }
        self.0.push('"');
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct RuntimeCounters {
    pending_requests: AtomicU64,
    pending_expired: AtomicU64,
    replies_discarded: AtomicU64,
    rollbacks_issued: AtomicU64,
    rollback_failures: AtomicU64,
    websocket_connections: AtomicU64,
    service_outcomes: ServiceOutcomeRegistry,
    http_requests: HttpRequestMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeCountersSnapshot {
    pub pending_requests: u64,
    pub pending_expired: u64,
    pub replies_discarded: u64,
    pub rollbacks_issued: u64,
    pub rollback_failures: u64,
    pub websocket_connections: u64,
    pub service_outcomes: Vec<ServiceOutcomeSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceOutcomeSnapshot {
    pub kind: String,
    pub service: String,
    pub success: u64,
    pub failure: u64,
    pub failures_by_status: Vec<(u16, u64)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequestCountSnapshot {
    pub route: String,
    pub status_code: u16,
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpDurationSnapshot {
    pub route: String,
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpMetricsSnapshot {
    pub requests: Vec<HttpRequestCountSnapshot>,
    pub durations: Vec<HttpDurationSnapshot>,
}

#[derive(Default)]
struct HttpRequestMetrics {
    counts: Mutex<HashMap<(String, u16), u64>>,
    durations: Mutex<HashMap<String, HttpDurationBuckets>>,
}

impl HttpRequestMetrics {
    fn record(&self, route: &str, status: u16, duration: Duration) {
        *lock(&self.counts)
            .entry((route.to_string(), status))
            .or_insert(0) += 1;
        lock(&self.durations)
            .entry(route.to_string())
            .or_default()
            .observe(duration.as_secs_f64());
    }

    fn snapshot(&self) -> HttpMetricsSnapshot {
        let requests = lock(&self.counts)
            .iter()
            .map(|((route, status), total)| HttpRequestCountSnapshot {
                route: route.clone(),
                status_code: *status,
                total: *total,
            })
            .collect();

        let durations = lock(&self.durations)
            .iter()
            .map(|(route, buckets)| HttpDurationSnapshot {
                route: route.clone(),
                buckets: buckets.histogram(),
                sum: buckets.sum,
                count: buckets.total,
            })
            .collect();

        HttpMetricsSnapshot {
            requests,
            durations,
        }
    }
}

#[derive(Default)]
struct HttpDurationBuckets {
    counts: [u64; HTTP_DURATION_BUCKETS.len()],
    sum: f64,
    total: u64,
}

impl HttpDurationBuckets {
    fn observe(&mut self, duration_secs: f64) {
        for (idx, boundary) in HTTP_DURATION_BUCKETS.iter().enumerate() {
            if duration_secs <= *boundary {
                self.counts[idx] += 1;
                break;
            }
        }
        self.sum += duration_secs;
        self.total += 1;
    }

    fn histogram(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0;
        HTTP_DURATION_BUCKETS
            .iter()
            .enumerate()
            .map(|(idx, boundary)| {
                cumulative += self.counts[idx];
                (*boundary, cumulative)
            })
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
struct ServiceOutcomeEntry {
    success: u64,
    failure: u64,
    failure_statuses: BTreeMap<u16, u64>,
}

#[derive(Default)]
struct ServiceOutcomeRegistry {
    inner: Mutex<BTreeMap<(String, String), ServiceOutcomeEntry>>,
}

impl ServiceOutcomeRegistry {
    fn record(&self, kind: &str, service: &str, status: u16) {
        let mut guard = lock(&self.inner);
        let entry = guard
            .entry((kind.to_string(), service.to_string()))
            .or_default();
        if status >= 400 {
            entry.failure = entry.failure.saturating_add(1);
            *entry.failure_statuses.entry(status).or_insert(0) += 1;
        } else {
            entry.success = entry.success.saturating_add(1);
        }
    }

    fn snapshot(&self) -> Vec<ServiceOutcomeSnapshot> {
        lock(&self.inner)
            .iter()
            .map(|((kind, service), entry)| ServiceOutcomeSnapshot {
                kind: kind.clone(),
                service: service.clone(),
                success: entry.success,
                failure: entry.failure,
                failures_by_status: entry
                    .failure_statuses
                    .iter()
                    .map(|(status, count)| (*status, *count))
                    .collect(),
            })
            .collect()
    }
}

static RUNTIME_COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();

pub fn runtime_counters() -> &'static RuntimeCounters {
    RUNTIME_COUNTERS.get_or_init(RuntimeCounters::default)
}

fn saturating_dec(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
        Some(value.saturating_sub(1))
    });
}

impl RuntimeCounters {
    pub fn inc_pending_requests(&self) {
        self.pending_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_pending_requests(&self) {
        saturating_dec(&self.pending_requests);
    }

    pub fn inc_pending_expired(&self) {
        self.pending_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replies_discarded(&self) {
        self.replies_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rollbacks_issued(&self) {
        self.rollbacks_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rollback_failures(&self) {
        self.rollback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_websocket_connections(&self) {
        self.websocket_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_websocket_connections(&self) {
        saturating_dec(&self.websocket_connections);
    }

    pub fn record_service_outcome(&self, kind: &str, service: &str, status: u16) {
        self.service_outcomes.record(kind, service, status);
    }

    pub fn record_http_request(&self, route: &str, status: u16, duration: Duration) {
        self.http_requests.record(route, status, duration);
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.http_requests.snapshot()
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        RuntimeCountersSnapshot {
            pending_requests: self.pending_requests.load(Ordering::Relaxed),
            pending_expired: self.pending_expired.load(Ordering::Relaxed),
            replies_discarded: self.replies_discarded.load(Ordering::Relaxed),
            rollbacks_issued: self.rollbacks_issued.load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
            websocket_connections: self.websocket_connections.load(Ordering::Relaxed),
            service_outcomes: self.service_outcomes.snapshot(),
        }
    }
}
