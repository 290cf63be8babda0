use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Advisory per-lock lifecycle stage. Transitions are telemetry only and do
/// not gate release (spec.md §4.A "State machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStage {
	Acquired,
	Executing,
	Releasing,
}

/// A waiter queued behind a held resource.
#[derive(Debug, Clone)]
pub struct PendingRequest {
	pub request_id: Uuid,
	pub actor_id: String,
	pub resource_id: String,
	pub priority: i32,
	pub requested_at: Instant,
	pub requested_at_wall: DateTime<Utc>,
	pub retry_count: u32,
	pub timeout: Duration,
	pub owner_tag: String,
}

/// Exclusive ownership of `(actor_id, resource_id)`.
#[derive(Debug, Clone)]
pub struct Lock {
	pub lock_id: Uuid,
	pub actor_id: String,
	pub resource_id: String,
	pub acquired_at: Instant,
	pub acquired_at_wall: DateTime<Utc>,
	pub acquired_at_monotonic_nanos: u64,
	pub expires_at: Option<Instant>,
	pub priority: i32,
	pub owner_tag: String,
	pub stage: LockStage,
	pub retry_count: u32,
	pub waiter_queue: Vec<PendingRequest>,
}

/// Serializable view of a [`Lock`], used by `snapshot()` and the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockView {
	pub lock_id: Uuid,
	pub actor_id: String,
	pub resource_id: String,
	pub acquired_at: DateTime<Utc>,
	pub acquired_at_monotonic_nanos: u64,
	pub priority: i32,
	pub owner_tag: String,
	pub stage: LockStage,
	pub retry_count: u32,
	pub waiter_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockEventKind {
	Acquired,
	Queued,
	AcquiredFromQueue,
	Released,
	Overridden,
	TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEvent {
	pub event_id: Uuid,
	pub timestamp: DateTime<Utc>,
	pub monotonic_nanos: u64,
	pub kind: LockEventKind,
	pub actor_id: String,
	pub resource_id: String,
	pub lock_id: Uuid,
	pub details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
	Deadlock,
	Timeout,
	ResourceExhaustion,
	PriorityInversion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEvent {
	pub conflict_id: Uuid,
	pub timestamp: DateTime<Utc>,
	pub monotonic_nanos: u64,
	pub kind: ConflictKind,
	pub involved_actors: Vec<String>,
	pub description: String,
	pub resolution: Option<String>,
	pub auto_resolved: bool,
	pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
	Low,
	Medium,
	High,
}

impl Severity {
	/// Cycle-length → severity mapping from spec.md §3 ("Deadlock Record").
	#[must_use]
	pub fn from_cycle_len(len: usize) -> Self {
		match len {
			0..=2 => Self::Low,
			3 => Self::Medium,
			_ => Self::High,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockRecord {
	pub deadlock_id: Uuid,
	/// Ordered cycle of actor ids, first actor repeated last.
	pub cycle: Vec<String>,
	pub detected_at: DateTime<Utc>,
	pub involved_lock_ids: Vec<Uuid>,
	pub severity: Severity,
}

/// Symmetric pair key for conflict pattern tracking; `actor_a <= actor_b`
/// lexicographically so `{A,B}` and `{B,A}` collapse to one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorPair {
	pub actor_a: String,
	pub actor_b: String,
}

impl ActorPair {
	#[must_use]
	pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
		let (a, b) = (a.into(), b.into());
		if a <= b {
			Self { actor_a: a, actor_b: b }
		} else {
			Self { actor_a: b, actor_b: a }
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictPatternView {
	pub actor_a: String,
	pub actor_b: String,
	pub count: u64,
	pub last_timestamp: DateTime<Utc>,
	pub mean_resolution_time_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
	pub total_locks_acquired: u64,
	pub total_locks_released: u64,
	pub conflicts_detected: u64,
	pub deadlocks_resolved: u64,
	pub dropped_events: u64,
	pub mean_lock_duration_ms: Option<f64>,
	pub top_locked_actors: Vec<(String, u64)>,
	pub top_conflict_hotspots: Vec<ConflictPatternView>,
}
