use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;

/// Counters/histograms for every subsystem, mirroring the teacher's
/// `SolverTelemetry`/indexer metrics shape: one struct, one `Meter`, short
/// methods that tag the relevant subscription id.
pub struct MonitorTelemetry {
    events_emitted: Counter<u64>,
    events_dropped: Counter<u64>,
    decode_failures: Counter<u64>,
    persistence_retries: Counter<u64>,
    persistence_failures: Counter<u64>,
    sink_overflows: Counter<u64>,
    webhook_delivered: Counter<u64>,
    webhook_delivery_failures: Counter<u64>,
    rpc_latency_ms: Histogram<u64>,
    tick_latency_ms: Histogram<u64>,
    db_latency_ms: Histogram<u64>,
    http_latency_ms: Histogram<u64>,
    active_monitors: Counter<i64>,
}

impl MonitorTelemetry {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("monitor");
        Self {
            events_emitted: meter.u64_counter("monitor.events.emitted").build(),
            events_dropped: meter.u64_counter("monitor.events.dropped").build(),
            decode_failures: meter.u64_counter("monitor.decode.failures").build(),
            persistence_retries: meter.u64_counter("monitor.persistence.retries").build(),
            persistence_failures: meter.u64_counter("monitor.persistence.failures").build(),
            sink_overflows: meter.u64_counter("monitor.sink.overflows").build(),
            webhook_delivered: meter.u64_counter("monitor.webhook.delivered").build(),
            webhook_delivery_failures: meter.u64_counter("monitor.webhook.delivery_failures").build(),
            rpc_latency_ms: meter.u64_histogram("monitor.rpc.latency_ms").build(),
            tick_latency_ms: meter.u64_histogram("monitor.tick.latency_ms").build(),
            db_latency_ms: meter.u64_histogram("monitor.db.latency_ms").build(),
            http_latency_ms: meter.u64_histogram("monitor.http.latency_ms").build(),
            active_monitors: meter.i64_counter("monitor.active_monitors").build(),
        }
    }

    pub fn event_emitted(&self, subscription_id: &str) {
        self.events_emitted
            .add(1, &[KeyValue::new("subscription_id", subscription_id.to_string())]);
    }

    pub fn event_dropped(&self, subscription_id: &str) {
        self.events_dropped
            .add(1, &[KeyValue::new("subscription_id", subscription_id.to_string())]);
    }

    pub fn decode_failure(&self, reason: &str) {
        self.decode_failures
            .add(1, &[KeyValue::new("reason", reason.to_string())]);
    }

    pub fn persistence_retry(&self, op: &str) {
        self.persistence_retries
            .add(1, &[KeyValue::new("op", op.to_string())]);
    }

    pub fn persistence_failure(&self, op: &str) {
        self.persistence_failures
            .add(1, &[KeyValue::new("op", op.to_string())]);
    }

    pub fn sink_overflow(&self, subscription_id: &str) {
        self.sink_overflows
            .add(1, &[KeyValue::new("subscription_id", subscription_id.to_string())]);
    }

    pub fn webhook_delivered(&self, subscription_id: &str, attempt: u32) {
        self.webhook_delivered.add(
            1,
            &[
                KeyValue::new("subscription_id", subscription_id.to_string()),
                KeyValue::new("attempt", attempt as i64),
            ],
        );
    }

    pub fn delivery_failure(&self, subscription_id: &str) {
        self.webhook_delivery_failures
            .add(1, &[KeyValue::new("subscription_id", subscription_id.to_string())]);
    }

    pub fn rpc_ms(&self, method: &str, ms: u64) {
        self.rpc_latency_ms
            .record(ms, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn tick_ms(&self, ms: u64) {
        self.tick_latency_ms.record(ms, &[]);
    }

    pub fn db_ms(&self, op: &str, ms: u64) {
        self.db_latency_ms
            .record(ms, &[KeyValue::new("op", op.to_string())]);
    }

    pub fn http_ms(&self, ms: u64) {
        self.http_latency_ms.record(ms, &[]);
    }

    pub fn monitor_started(&self) {
        self.active_monitors.add(1, &[]);
    }

    pub fn monitor_stopped(&self) {
        self.active_monitors.add(-1, &[]);
    }
}

impl Default for MonitorTelemetry {
    fn default() -> Self {
        Self::new()
    }
}
