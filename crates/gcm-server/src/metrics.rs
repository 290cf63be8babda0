use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec, IntCounterVec, IntGauge, TextEncoder};
use std::time::Instant;

lazy_static! {
	static ref HTTP_REQUESTS_TOTAL: IntCounterVec =
		register_int_counter_vec!("gcm_http_requests_total", "Total number of HTTP requests", &["method", "route", "status"]).expect("failed to register gcm_http_requests_total");
	static ref HTTP_REQUEST_DURATION: HistogramVec =
		register_histogram_vec!("gcm_http_request_duration_seconds", "HTTP request duration in seconds", &["method", "route"]).expect("failed to register gcm_http_request_duration_seconds");
	static ref ACTIVE_LOCKS: IntGauge = register_int_gauge!("gcm_active_locks", "Currently held locks").expect("failed to register gcm_active_locks");
	static ref DROPPED_EVENTS: IntGauge = register_int_gauge!("gcm_dropped_events", "Event stream messages dropped to a lagging subscriber").expect("failed to register gcm_dropped_events");
}

/// Per-request HTTP metrics, mirroring `file_host::metrics::metrics_middleware`.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
	let method = req.method().to_string();
	let route = normalize_path(req.uri().path());

	let start = Instant::now();
	let response = next.run(req).await;
	let duration = start.elapsed().as_secs_f64();

	let status = response.status().as_u16().to_string();
	HTTP_REQUESTS_TOTAL.with_label_values(&[&method, &route, &status]).inc();
	HTTP_REQUEST_DURATION.with_label_values(&[&method, &route]).observe(duration);

	response
}

fn normalize_path(path: &str) -> String {
	path.trim_end_matches('/').split('?').next().unwrap_or("/").to_string()
}

/// `GET /metrics`: refreshes the GCM-specific gauges from the live lock
/// table, then encodes the full Prometheus registry.
pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
	ACTIVE_LOCKS.set(i64::try_from(state.gcm.snapshot().await.len()).unwrap_or(i64::MAX));
	DROPPED_EVENTS.set(i64::try_from(state.gcm.table().dropped_events().await).unwrap_or(i64::MAX));

	let encoder = TextEncoder::new();
	let metric_families = prometheus::gather();
	let mut buffer = Vec::new();

	if encoder.encode(&metric_families, &mut buffer).is_err() {
		return Err(StatusCode::INTERNAL_SERVER_ERROR);
	}

	String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn healthz() -> &'static str {
	"ok"
}
