use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use gcm_core::monitor::resolve as resolve_deadlock_cycle;
use gcm_core::{parse_time_range, AnalyticsSnapshot, ConflictEvent, ConflictPatternView, DeadlockRecord, LockEvent, LockView, Strategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
	Router::new()
		.route("/locks", get(list_locks))
		.route("/locks/:lock_id", get(get_lock))
		.route("/locks/:lock_id/override", post(override_lock))
		.route("/events/locks", get(lock_events))
		.route("/events/conflicts", get(conflict_events))
		.route("/analytics", get(analytics))
		.route("/analytics/patterns", get(analytics_patterns))
		.route("/deadlocks", get(deadlocks))
		.route("/deadlocks/resolve", post(resolve_deadlock))
}

#[derive(Deserialize)]
struct LimitQuery {
	limit: Option<usize>,
}

const DEFAULT_LOCK_HISTORY_LIMIT: usize = 100;
const DEFAULT_CONFLICT_HISTORY_LIMIT: usize = 50;

async fn list_locks(State(state): State<AppState>) -> Json<Vec<LockView>> {
	Json(state.gcm.snapshot().await)
}

async fn get_lock(State(state): State<AppState>, Path(lock_id): Path<Uuid>) -> ApiResult<Json<LockView>> {
	state.gcm.table().get(lock_id).await.map(Json).ok_or(ApiError::Gcm(gcm_core::GcmError::NotFound { lock_id }))
}

#[derive(Deserialize)]
struct OverrideRequest {
	#[serde(default = "default_override_reason")]
	reason: String,
}

fn default_override_reason() -> String {
	"administrative_override".to_string()
}

#[derive(Serialize)]
struct OverrideResponse {
	success: bool,
}

/// Idempotent: overriding an unknown `lock_id` reports `success: false`
/// rather than an error, per spec.md §7.
async fn override_lock(State(state): State<AppState>, Path(lock_id): Path<Uuid>, Json(body): Json<OverrideRequest>) -> Json<OverrideResponse> {
	let success = state.gcm.table().override_lock(lock_id, body.reason).await;
	Json(OverrideResponse { success })
}

async fn lock_events(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> Json<Vec<LockEvent>> {
	Json(state.gcm.table().lock_history(query.limit.unwrap_or(DEFAULT_LOCK_HISTORY_LIMIT)).await)
}

async fn conflict_events(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> Json<Vec<ConflictEvent>> {
	Json(state.gcm.table().conflict_history(query.limit.unwrap_or(DEFAULT_CONFLICT_HISTORY_LIMIT)).await)
}

#[derive(Deserialize)]
struct AnalyticsQuery {
	time_range: Option<String>,
}

#[derive(Deserialize)]
struct TopNQuery {
	top_n: Option<usize>,
}

const DEFAULT_TOP_N: usize = 10;

async fn analytics(State(state): State<AppState>, Query(query): Query<AnalyticsQuery>) -> Json<AnalyticsSnapshot> {
	let time_range = parse_time_range(query.time_range.as_deref());
	Json(state.gcm.analytics_snapshot(DEFAULT_TOP_N, time_range).await)
}

async fn analytics_patterns(State(state): State<AppState>, Query(query): Query<TopNQuery>) -> Json<Vec<ConflictPatternView>> {
	Json(state.gcm.analytics().conflict_patterns(query.top_n.unwrap_or(DEFAULT_TOP_N)).await)
}

/// Reports the most recent background scan's findings. Deliberately reads
/// `monitor.current_state()` rather than forcing a fresh scan, so a GET
/// never triggers auto-resolution as a side effect.
async fn deadlocks(State(state): State<AppState>) -> Json<Vec<DeadlockRecord>> {
	Json(state.monitor.current_state().active_deadlocks)
}

#[derive(Deserialize)]
struct ResolveRequest {
	cycle: Vec<String>,
	strategy: Option<String>,
	victim_lock_id: Option<Uuid>,
}

async fn resolve_deadlock(State(state): State<AppState>, Json(body): Json<ResolveRequest>) -> ApiResult<Json<ConflictEvent>> {
	let strategy = match body.strategy {
		Some(s) => Strategy::from_str(&s)?,
		None => state.default_strategy,
	};
	let conflict = resolve_deadlock_cycle(state.gcm.table(), &body.cycle, strategy, body.victim_lock_id, false).await?;
	Ok(Json(conflict))
}
