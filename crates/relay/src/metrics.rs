use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

/// In-process counters for the edit relay, rendered as Prometheus text.
pub struct RelayMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    connections_opened_total: AtomicU64,
    connections_closed_total: AtomicU64,
    handshake_rejections_total: Mutex<HashMap<String, u64>>,
    events_published_total: Mutex<HashMap<String, u64>>,
    events_dispatched_total: Mutex<HashMap<String, u64>>,
    event_handler_panics_total: AtomicU64,
    broadcast_deliveries_total: AtomicU64,
    broadcast_failures_total: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

impl Default for RelayMetrics {
    fn default() -> Self {
        Self {
            request_duration_count: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_rate_total: Mutex::new(HashMap::new()),
            connections_opened_total: AtomicU64::new(0),
            connections_closed_total: AtomicU64::new(0),
            handshake_rejections_total: Mutex::new(HashMap::new()),
            events_published_total: Mutex::new(HashMap::new()),
            events_dispatched_total: Mutex::new(HashMap::new()),
            event_handler_panics_total: AtomicU64::new(0),
            broadcast_deliveries_total: AtomicU64::new(0),
            broadcast_failures_total: AtomicU64::new(0),
        }
    }
}

/// Process-wide metrics registry, created on first use.
pub fn install_global_metrics() -> Arc<RelayMetrics> {
    Arc::clone(GLOBAL_METRICS.get_or_init(|| Arc::new(RelayMetrics::default())))
}

fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_http_request(method: &str, path: &str, status_code: u16, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_http_request(method, path, status_code, latency_ms);
    }
}

pub fn record_connection_opened() {
    if let Some(metrics) = global_metrics() {
        metrics.connections_opened_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_connection_closed() {
    if let Some(metrics) = global_metrics() {
        metrics.connections_closed_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_handshake_rejection(reason: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_handshake_rejection(reason);
    }
}

pub fn record_event_published(kind: &str) {
    if let Some(metrics) = global_metrics() {
        increment_label_counter(&metrics.events_published_total, kind, 1);
    }
}

pub fn record_event_dispatched(kind: &str) {
    if let Some(metrics) = global_metrics() {
        increment_label_counter(&metrics.events_dispatched_total, kind, 1);
    }
}

pub fn record_event_handler_panic() {
    if let Some(metrics) = global_metrics() {
        metrics.event_handler_panics_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_broadcast(delivered: u64, failed: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_broadcast(delivered, failed);
    }
}

impl RelayMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_handshake_rejection(&self, reason: &str) {
        increment_label_counter(&self.handshake_rejections_total, reason, 1);
    }

    pub fn record_broadcast(&self, delivered: u64, failed: u64) {
        self.broadcast_deliveries_total.fetch_add(delivered, Ordering::Relaxed);
        self.broadcast_failures_total.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE relay_request_rate_total counter\n");
        append_counter_lines(&mut output, "relay_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP relay_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE relay_request_errors_total counter\n");
        append_counter_lines(&mut output, "relay_request_errors_total", &self.request_errors_total);

        output.push_str("# HELP relay_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP relay_request_duration_ms_count Count of HTTP request latency samples by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_count",
            &self.request_duration_count,
        );

        append_scalar(
            &mut output,
            "edit_connections_opened_total",
            "Total edit channel connections established.",
            &self.connections_opened_total,
        );
        append_scalar(
            &mut output,
            "edit_connections_closed_total",
            "Total edit channel connections closed for any reason.",
            &self.connections_closed_total,
        );

        output.push_str(
            "# HELP edit_handshake_rejections_total Rejected edit channel upgrades by reason.\n",
        );
        output.push_str("# TYPE edit_handshake_rejections_total counter\n");
        append_label_counter_lines(
            &mut output,
            "edit_handshake_rejections_total",
            "reason",
            &self.handshake_rejections_total,
        );

        output.push_str("# HELP edit_events_published_total Events published by request type.\n");
        output.push_str("# TYPE edit_events_published_total counter\n");
        append_label_counter_lines(
            &mut output,
            "edit_events_published_total",
            "type",
            &self.events_published_total,
        );

        output.push_str("# HELP edit_events_dispatched_total Events handled by request type.\n");
        output.push_str("# TYPE edit_events_dispatched_total counter\n");
        append_label_counter_lines(
            &mut output,
            "edit_events_dispatched_total",
            "type",
            &self.events_dispatched_total,
        );

        append_scalar(
            &mut output,
            "edit_event_handler_panics_total",
            "Event handlers that panicked and were isolated.",
            &self.event_handler_panics_total,
        );
        append_scalar(
            &mut output,
            "edit_broadcast_deliveries_total",
            "Frames queued to connections by broadcast or unicast.",
            &self.broadcast_deliveries_total,
        );
        append_scalar(
            &mut output,
            "edit_broadcast_failures_total",
            "Frames that could not be queued because the connection had closed.",
            &self.broadcast_failures_total,
        );

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments = Vec::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        if segment.chars().all(|character| character.is_ascii_digit()) {
            normalized_segments.push("{number}".to_string());
            continue;
        }

        normalized_segments.push(segment.to_string());
    }

    if normalized_segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", normalized_segments.join("/"))
    }
}

fn normalize_label(label: &str) -> String {
    let normalized = label.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn lock_map<K, V>(map: &Mutex<HashMap<K, V>>) -> std::sync::MutexGuard<'_, HashMap<K, V>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = lock_map(map);
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = lock_map(map);
    let value = guard.entry(normalize_label(label)).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_scalar(output: &mut String, metric_name: &str, help: &str, value: &AtomicU64) {
    output.push_str(&format!("# HELP {metric_name} {help}\n"));
    output.push_str(&format!("# TYPE {metric_name} counter\n"));
    output.push_str(&format!("{metric_name} {}\n", value.load(Ordering::Relaxed)));
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = lock_map(map);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = lock_map(map);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{{label_name}=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
