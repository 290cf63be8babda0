use crate::events::StreamItem;
use crate::lock_table::LockTable;
use crate::types::{ActorPair, AnalyticsSnapshot, ConflictEvent, ConflictKind, ConflictPatternView, LockEvent, LockEventKind};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cap on retained resolution-time samples per pair, mirroring the Event
/// Recorder's own drop-oldest ring (spec.md §4.D) so long-running processes
/// don't grow these vectors without bound.
const MAX_SAMPLES: usize = 500;
/// Large enough to cover any configured event ring in practice; used when a
/// caller wants the full retained history rather than a bounded page.
const FULL_HISTORY: usize = usize::MAX;

#[derive(Default)]
struct ConflictStats {
	count: u64,
	last_timestamp: Option<DateTime<Utc>>,
	resolution_times_ms: Vec<f64>,
}

impl ConflictStats {
	fn push_resolution(&mut self, ms: f64) {
		if self.resolution_times_ms.len() >= MAX_SAMPLES {
			self.resolution_times_ms.remove(0);
		}
		self.resolution_times_ms.push(ms);
	}
}

#[derive(Default)]
struct AnalyticsState {
	total_locks_acquired: u64,
	total_locks_released: u64,
	conflicts_detected: u64,
	deadlocks_resolved: u64,
	lock_durations_ms: Vec<f64>,
	conflict_pairs: HashMap<ActorPair, ConflictStats>,
}

impl AnalyticsState {
	fn push_duration(&mut self, ms: f64) {
		if self.lock_durations_ms.len() >= MAX_SAMPLES {
			self.lock_durations_ms.remove(0);
		}
		self.lock_durations_ms.push(ms);
	}
}

fn mean(values: &[f64]) -> Option<f64> {
	if values.is_empty() {
		None
	} else {
		Some(values.iter().sum::<f64>() / values.len() as f64)
	}
}

fn top_n<T, K: Ord>(mut items: Vec<T>, n: usize, key: impl Fn(&T) -> K) -> Vec<T> {
	items.sort_by(|a, b| key(b).cmp(&key(a)));
	items.truncate(n);
	items
}

/// Parses the `time_range` query parameter (`"1h"`, `"24h"`, `"7d"`, `"30m"`)
/// into a lookback window. Absent or `"all"` means unbounded.
#[must_use]
pub fn parse_time_range(raw: Option<&str>) -> Option<Duration> {
	let raw = raw?.trim();
	if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
		return None;
	}
	let (number, unit) = raw.split_at(raw.len().saturating_sub(1));
	let value: u64 = number.parse().ok()?;
	match unit {
		"s" => Some(Duration::from_secs(value)),
		"m" => Some(Duration::from_secs(value * 60)),
		"h" => Some(Duration::from_secs(value * 3600)),
		"d" => Some(Duration::from_secs(value * 86400)),
		_ => None,
	}
}

/// Consumes the live event stream and maintains rolling counters for the
/// `/analytics` surface (spec.md §4.E). Modeled on
/// `task_queue::lib::run_scheduler`'s subscribe-and-loop pattern: a single
/// spawned task owns the subscription and is torn down via
/// `CancellationToken` + `Drop`, matching `ws-events`'s orchestrator.
pub struct AnalyticsTracker {
	state: Arc<Mutex<AnalyticsState>>,
	handle: Option<JoinHandle<()>>,
	cancel: CancellationToken,
}

impl AnalyticsTracker {
	#[must_use]
	pub fn spawn(table: &LockTable) -> Self {
		let state = Arc::new(Mutex::new(AnalyticsState::default()));
		let cancel = CancellationToken::new();

		let task_state = state.clone();
		let task_table = table.clone();
		let task_cancel = cancel.clone();
		let handle = tokio::spawn(async move {
			let mut rx = task_table.subscribe().await;
			loop {
				tokio::select! {
					() = task_cancel.cancelled() => break,
					received = rx.recv() => match received {
						Ok(item) => Self::apply(&task_state, item).await,
						Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
							warn!(dropped = n, "analytics subscriber lagged behind event stream");
							task_table.note_dropped_events(n).await;
						}
						Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
					},
				}
			}
			debug!("analytics tracker loop exiting");
		});

		Self { state, handle: Some(handle), cancel }
	}

	async fn apply(state: &Arc<Mutex<AnalyticsState>>, item: StreamItem) {
		let mut state = state.lock().await;
		match item {
			StreamItem::Lock(event) => match event.kind {
				LockEventKind::Acquired | LockEventKind::AcquiredFromQueue => {
					state.total_locks_acquired += 1;
				}
				LockEventKind::Released | LockEventKind::Overridden => {
					state.total_locks_released += 1;
					if let Some(ms) = event.details.get("duration_ms").and_then(serde_json::Value::as_f64) {
						state.push_duration(ms);
					}
				}
				LockEventKind::Queued | LockEventKind::TimedOut => {}
			},
			StreamItem::Conflict(event) => {
				state.conflicts_detected += 1;
				if event.kind == ConflictKind::Deadlock && event.resolution.is_some() {
					state.deadlocks_resolved += 1;
				}
				if let [a, b] = event.involved_actors.as_slice() {
					let pair = ActorPair::new(a.clone(), b.clone());
					let stats = state.conflict_pairs.entry(pair).or_default();
					stats.count += 1;
					stats.last_timestamp = Some(event.timestamp);
					if let Some(resolved_at) = event.resolved_at {
						let ms = (resolved_at - event.timestamp).num_milliseconds() as f64;
						stats.push_resolution(ms);
					}
				}
			}
		}
	}

	/// Ranks actors by the number of resources they currently hold (spec.md
	/// §4.E: "MUST NOT reach into Lock Table state except to enumerate
	/// currently held locks for the 'most-locked actors' metric"). A live
	/// query of `LockTable::snapshot`, not an acquire-count tally, so it is
	/// identical regardless of `time_range`.
	async fn top_locked_actors(table: &LockTable, top_n_actors: usize) -> Vec<(String, u64)> {
		let mut counts: HashMap<String, u64> = HashMap::new();
		for lock in table.snapshot().await {
			*counts.entry(lock.actor_id).or_insert(0) += 1;
		}
		top_n(counts.into_iter().collect(), top_n_actors, |(_, count)| *count)
	}

	/// Point-in-time snapshot for `GET /analytics`. With `time_range: None`,
	/// reports lifetime cumulative totals (the rolling counters, which
	/// outlive the bounded event rings). With `time_range: Some(window)`,
	/// totals and hotspots are instead recomputed from the retained Lock
	/// Event / Conflict Event history filtered to that window, per spec.md
	/// §6's `time_range` input on the Analytics operation. `top_locked_actors`
	/// always reflects current holders, independent of `time_range`.
	pub async fn snapshot(&self, table: &LockTable, top_n_actors: usize, time_range: Option<Duration>) -> AnalyticsSnapshot {
		match time_range {
			None => self.snapshot_lifetime(table, top_n_actors).await,
			Some(window) => Self::snapshot_windowed(table, top_n_actors, window).await,
		}
	}

	async fn snapshot_lifetime(&self, table: &LockTable, top_n_actors: usize) -> AnalyticsSnapshot {
		let actor_counts = Self::top_locked_actors(table, top_n_actors).await;
		let state = self.state.lock().await;

		let hotspots = self.patterns_locked(&state, top_n_actors);

		AnalyticsSnapshot {
			total_locks_acquired: state.total_locks_acquired,
			total_locks_released: state.total_locks_released,
			conflicts_detected: state.conflicts_detected,
			deadlocks_resolved: state.deadlocks_resolved,
			dropped_events: table.dropped_events().await,
			mean_lock_duration_ms: mean(&state.lock_durations_ms),
			top_locked_actors: actor_counts,
			top_conflict_hotspots: hotspots,
		}
	}

	async fn snapshot_windowed(table: &LockTable, top_n_actors: usize, window: Duration) -> AnalyticsSnapshot {
		let cutoff = Utc::now() - ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero());
		let lock_events: Vec<LockEvent> = table.lock_history(FULL_HISTORY).await.into_iter().filter(|e| e.timestamp >= cutoff).collect();
		let conflict_events: Vec<ConflictEvent> = table.conflict_history(FULL_HISTORY).await.into_iter().filter(|e| e.timestamp >= cutoff).collect();

		let mut acquired = 0u64;
		let mut released = 0u64;
		let mut durations = Vec::new();
		for event in &lock_events {
			match event.kind {
				LockEventKind::Acquired | LockEventKind::AcquiredFromQueue => {
					acquired += 1;
				}
				LockEventKind::Released | LockEventKind::Overridden => {
					released += 1;
					if let Some(ms) = event.details.get("duration_ms").and_then(serde_json::Value::as_f64) {
						durations.push(ms);
					}
				}
				LockEventKind::Queued | LockEventKind::TimedOut => {}
			}
		}

		let mut resolved = 0u64;
		let mut pairs: HashMap<ActorPair, ConflictStats> = HashMap::new();
		for event in &conflict_events {
			if event.kind == ConflictKind::Deadlock && event.resolution.is_some() {
				resolved += 1;
			}
			if let [a, b] = event.involved_actors.as_slice() {
				let pair = ActorPair::new(a.clone(), b.clone());
				let stats = pairs.entry(pair).or_default();
				stats.count += 1;
				stats.last_timestamp = Some(event.timestamp);
				if let Some(resolved_at) = event.resolved_at {
					stats.resolution_times_ms.push((resolved_at - event.timestamp).num_milliseconds() as f64);
				}
			}
		}

		let actor_counts = Self::top_locked_actors(table, top_n_actors).await;
		let hotspots = Self::patterns_from_map(&pairs, top_n_actors);

		AnalyticsSnapshot {
			total_locks_acquired: acquired,
			total_locks_released: released,
			conflicts_detected: conflict_events.len() as u64,
			deadlocks_resolved: resolved,
			dropped_events: table.dropped_events().await,
			mean_lock_duration_ms: mean(&durations),
			top_locked_actors: actor_counts,
			top_conflict_hotspots: hotspots,
		}
	}

	/// Backs `GET /analytics/patterns?top_n=`.
	pub async fn conflict_patterns(&self, top_n_pairs: usize) -> Vec<ConflictPatternView> {
		let state = self.state.lock().await;
		self.patterns_locked(&state, top_n_pairs)
	}

	fn patterns_locked(&self, state: &AnalyticsState, n: usize) -> Vec<ConflictPatternView> {
		Self::patterns_from_map(&state.conflict_pairs, n)
	}

	fn patterns_from_map(pairs: &HashMap<ActorPair, ConflictStats>, n: usize) -> Vec<ConflictPatternView> {
		let views: Vec<ConflictPatternView> = pairs
			.iter()
			.filter_map(|(pair, stats)| {
				stats.last_timestamp.map(|last_timestamp| ConflictPatternView {
					actor_a: pair.actor_a.clone(),
					actor_b: pair.actor_b.clone(),
					count: stats.count,
					last_timestamp,
					mean_resolution_time_ms: mean(&stats.resolution_times_ms),
				})
			})
			.collect();
		top_n(views, n, |v| v.count)
	}

	pub async fn shutdown(mut self) {
		self.cancel.cancel();
		if let Some(handle) = self.handle.take() {
			let _ = handle.await;
		}
	}
}

impl Drop for AnalyticsTracker {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::LockEvent;
	use std::time::Duration as StdDuration;
	use uuid::Uuid;

	fn lock_event(kind: LockEventKind, actor: &str, details: serde_json::Value) -> LockEvent {
		LockEvent {
			event_id: Uuid::new_v4(),
			timestamp: Utc::now(),
			monotonic_nanos: 0,
			kind,
			actor_id: actor.to_string(),
			resource_id: "R".into(),
			lock_id: Uuid::new_v4(),
			details,
		}
	}

	#[tokio::test]
	async fn tracks_acquired_and_released_counts() {
		let table = LockTable::new();
		let tracker = AnalyticsTracker::spawn(&table);

		let lock_id = table.acquire("A", "R", 5, StdDuration::from_secs(1), "tag").await.unwrap();
		table.release(lock_id).await;
		tokio::time::sleep(StdDuration::from_millis(20)).await;

		let snapshot = tracker.snapshot(&table, 5, None).await;
		assert_eq!(snapshot.total_locks_acquired, 1);
		assert_eq!(snapshot.total_locks_released, 1);
		assert!(snapshot.top_locked_actors.is_empty(), "A released its only lock, so it holds nothing now");
	}

	#[tokio::test]
	async fn top_locked_actors_reflects_current_holders_not_acquire_history() {
		let table = LockTable::new();
		let tracker = AnalyticsTracker::spawn(&table);

		let lock_id = table.acquire("A", "R1", 5, StdDuration::from_secs(1), "tag").await.unwrap();
		table.acquire("B", "R2", 5, StdDuration::from_secs(1), "tag").await.unwrap();
		table.release(lock_id).await;
		tokio::time::sleep(StdDuration::from_millis(20)).await;

		let snapshot = tracker.snapshot(&table, 5, None).await;
		assert_eq!(snapshot.top_locked_actors, vec![("B".to_string(), 1)], "A released R1 and holds nothing; B still holds R2");
	}

	#[tokio::test]
	async fn tracks_conflict_hotspots_between_pairs() {
		let table = LockTable::new();
		let tracker = AnalyticsTracker::spawn(&table);

		let now = Utc::now();
		table
			.record_conflict(ConflictEvent {
				conflict_id: Uuid::new_v4(),
				timestamp: now,
				monotonic_nanos: 0,
				kind: ConflictKind::Deadlock,
				involved_actors: vec!["A".into(), "B".into()],
				description: "cycle".into(),
				resolution: Some("priority".into()),
				auto_resolved: true,
				resolved_at: Some(now + chrono::Duration::milliseconds(50)),
			})
			.await;
		tokio::time::sleep(StdDuration::from_millis(20)).await;

		let snapshot = tracker.snapshot(&table, 5, None).await;
		assert_eq!(snapshot.conflicts_detected, 1);
		assert_eq!(snapshot.deadlocks_resolved, 1);
		assert_eq!(snapshot.top_conflict_hotspots.len(), 1);
		assert_eq!(snapshot.top_conflict_hotspots[0].count, 1);
		assert!(snapshot.top_conflict_hotspots[0].mean_resolution_time_ms.is_some());
	}

	#[tokio::test]
	async fn windowed_snapshot_excludes_events_outside_range() {
		let table = LockTable::new();
		let tracker = AnalyticsTracker::spawn(&table);

		let lock_id = table.acquire("A", "R", 5, StdDuration::from_secs(1), "tag").await.unwrap();
		table.release(lock_id).await;
		tokio::time::sleep(StdDuration::from_millis(20)).await;

		let snapshot = tracker.snapshot(&table, 5, Some(StdDuration::from_secs(3600))).await;
		assert_eq!(snapshot.total_locks_acquired, 1);

		let snapshot_future_window = tracker.snapshot(&table, 5, Some(StdDuration::from_nanos(1))).await;
		assert_eq!(snapshot_future_window.total_locks_acquired, 0);
	}

	#[test]
	fn lock_event_helper_is_constructible() {
		let e = lock_event(LockEventKind::Acquired, "A", serde_json::json!({}));
		assert_eq!(e.actor_id, "A");
	}

	#[test]
	fn parses_time_range_suffixes() {
		assert_eq!(parse_time_range(Some("1h")), Some(StdDuration::from_secs(3600)));
		assert_eq!(parse_time_range(Some("30m")), Some(StdDuration::from_secs(1800)));
		assert_eq!(parse_time_range(Some("7d")), Some(StdDuration::from_secs(7 * 86400)));
		assert_eq!(parse_time_range(None), None);
		assert_eq!(parse_time_range(Some("all")), None);
		assert_eq!(parse_time_range(Some("bogus")), None);
	}
}
