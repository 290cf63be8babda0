use crate::error::{GcmError, Result};
use crate::events::EventRecorder;
use crate::types::{Lock, LockEvent, LockEventKind, LockStage, LockView, PendingRequest};
use crate::wait_graph::WaitForGraph;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_RING_CAPACITY: usize = 1000;

/// Resolution delivered to a suspended `acquire` caller.
#[derive(Debug)]
enum WaitOutcome {
	Promoted { lock_id: Uuid },
	Cancelled,
}

struct LockTableInner {
	/// Exclusivity is per-resource (spec.md §3: at most one Lock per
	/// resource at any instant); `resource_id` is therefore sufficient as
	/// the map key, with `actor_id` retained on [`Lock`] for the
	/// reentrancy check and for views.
	locks: HashMap<String, Lock>,
	graph: WaitForGraph,
	recorder: EventRecorder,
	waiter_channels: HashMap<Uuid, oneshot::Sender<WaitOutcome>>,
}

impl LockTableInner {
	fn emit_lock_event(&mut self, kind: LockEventKind, actor_id: &str, resource_id: &str, lock_id: Uuid, details: serde_json::Value) {
		let now_wall = Utc::now();
		self.recorder.record_lock_event(LockEvent {
			event_id: Uuid::new_v4(),
			timestamp: now_wall,
			monotonic_nanos: monotonic_nanos(),
			kind,
			actor_id: actor_id.to_string(),
			resource_id: resource_id.to_string(),
			lock_id,
			details,
		});
	}

	/// Removes `waiter`'s edge to `former_holder` only if `waiter` has no
	/// other pending request queued behind a lock `former_holder` still
	/// holds (a single collapsed edge can represent more than one pending
	/// request, per spec.md §3's "multiset compressed to a set").
	fn recompute_edge(&mut self, waiter: &str, former_holder: &str) {
		let still_waiting = self.locks.values().any(|l| l.actor_id == former_holder && l.waiter_queue.iter().any(|p| p.actor_id == waiter));
		if !still_waiting {
			self.graph.remove_edge(waiter, former_holder);
		}
	}

	/// Rank among currently-queued requests under `(priority asc,
	/// requested_at asc)`; used both to report `queue_position` in the
	/// QUEUED event and, implicitly, as the promotion order.
	fn queue_position(queue: &[PendingRequest], candidate: &PendingRequest) -> usize {
		1 + queue
			.iter()
			.filter(|p| (p.priority, p.requested_at) < (candidate.priority, candidate.requested_at))
			.count()
	}
}

fn monotonic_nanos() -> u64 {
	static EPOCH: once_epoch::Epoch = once_epoch::Epoch::new();
	EPOCH.elapsed_nanos()
}

/// Tiny process-local monotonic epoch, since `Instant` itself cannot be
/// serialized. Durations/ordering always use `Instant` directly; this is
/// only for the externally-visible numeric timestamp (spec.md Design Notes:
/// "retain wall-clock only for external serialization").
mod once_epoch {
	use std::sync::OnceLock;
	use std::time::Instant;

	pub struct Epoch(OnceLock<Instant>);

	impl Epoch {
		pub const fn new() -> Self {
			Self(OnceLock::new())
		}

		pub fn elapsed_nanos(&self) -> u64 {
			let start = self.0.get_or_init(Instant::now);
			u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
		}
	}
}

enum AcquireStart {
	Immediate(Uuid),
	Queued { request_id: Uuid, rx: oneshot::Receiver<WaitOutcome> },
}

/// Authoritative map of held locks and their per-resource waiter queues
/// (spec.md §4.A). One mutual-exclusion region guards the lock map and the
/// Wait-For Graph together (spec.md §5); policy evaluation and event
/// fan-out happen outside it.
#[derive(Clone)]
pub struct LockTable {
	inner: Arc<Mutex<LockTableInner>>,
}

impl LockTable {
	#[must_use]
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_RING_CAPACITY)
	}

	#[must_use]
	pub fn with_capacity(event_capacity: usize) -> Self {
		Self {
			inner: Arc::new(Mutex::new(LockTableInner {
				locks: HashMap::new(),
				graph: WaitForGraph::new(),
				recorder: EventRecorder::new(event_capacity),
				waiter_channels: HashMap::new(),
			})),
		}
	}

	/// Suspends until the request is promoted, times out, or is cancelled
	/// (spec.md §4.A `acquire`).
	pub async fn acquire(&self, actor: impl Into<String>, resource: impl Into<String>, priority: i32, timeout: Duration, owner_tag: impl Into<String>) -> Result<Uuid> {
		let actor = actor.into();
		let resource = resource.into();
		let owner_tag = owner_tag.into();

		let start = self.begin_acquire(&actor, &resource, priority, timeout, &owner_tag).await?;
		let (request_id, rx) = match start {
			AcquireStart::Immediate(lock_id) => return Ok(lock_id),
			AcquireStart::Queued { request_id, rx } => (request_id, rx),
		};

		tokio::select! {
			biased;
			outcome = rx => {
				match outcome {
					Ok(WaitOutcome::Promoted { lock_id }) => Ok(lock_id),
					Ok(WaitOutcome::Cancelled) | Err(_) => {
						self.finish_cancelled(&actor, &resource, request_id).await
					}
				}
			}
			() = sleep(timeout) => {
				self.finish_timeout(&actor, &resource, request_id).await
			}
		}
	}

	async fn begin_acquire(&self, actor: &str, resource: &str, priority: i32, timeout: Duration, owner_tag: &str) -> Result<AcquireStart> {
		let mut inner = self.inner.lock().await;

		if let Some(existing) = inner.locks.get(resource) {
			if existing.actor_id == actor && existing.owner_tag == owner_tag {
				return Err(GcmError::ReentrantDenied {
					actor: actor.to_string(),
					resource: resource.to_string(),
					owner_tag: owner_tag.to_string(),
				});
			}

			let holder_actor = existing.actor_id.clone();
			let lock_id = existing.lock_id;
			let now = Instant::now();
			let request_id = Uuid::new_v4();
			let pending = PendingRequest {
				request_id,
				actor_id: actor.to_string(),
				resource_id: resource.to_string(),
				priority,
				requested_at: now,
				requested_at_wall: Utc::now(),
				retry_count: 0,
				timeout,
				owner_tag: owner_tag.to_string(),
			};

			let lock = inner.locks.get_mut(resource).expect("checked above");
			let position = LockTableInner::queue_position(&lock.waiter_queue, &pending);
			lock.waiter_queue.push(pending);

			inner.graph.add_edge(actor, &holder_actor);

			let (tx, rx) = oneshot::channel();
			inner.waiter_channels.insert(request_id, tx);

			inner.emit_lock_event(LockEventKind::Queued, actor, resource, lock_id, json!({ "queue_position": position }));

			info!(actor, resource, position, "queued for resource");
			Ok(AcquireStart::Queued { request_id, rx })
		} else {
			let lock_id = Uuid::new_v4();
			let now = Instant::now();
			inner.locks.insert(
				resource.to_string(),
				Lock {
					lock_id,
					actor_id: actor.to_string(),
					resource_id: resource.to_string(),
					acquired_at: now,
					acquired_at_wall: Utc::now(),
					acquired_at_monotonic_nanos: monotonic_nanos(),
					expires_at: None,
					priority,
					owner_tag: owner_tag.to_string(),
					stage: LockStage::Acquired,
					retry_count: 0,
					waiter_queue: vec![],
				},
			);
			inner.emit_lock_event(LockEventKind::Acquired, actor, resource, lock_id, json!({}));
			info!(actor, resource, %lock_id, "lock acquired");
			Ok(AcquireStart::Immediate(lock_id))
		}
	}

	async fn finish_timeout(&self, actor: &str, resource: &str, request_id: Uuid) -> Result<Uuid> {
		let mut inner = self.inner.lock().await;

		// Race with a concurrent promotion: if the channel was already
		// taken, the promotion (or deadlock cancellation) already fired
		// and this timeout lost the race; the waiter branch in `acquire`
		// is polled first (`biased`), so reaching here means it hasn't.
		inner.waiter_channels.remove(&request_id);

		let Some(lock) = inner.locks.get_mut(resource) else {
			return Err(GcmError::TimeoutError {
				lock_id: Uuid::nil(),
				actor: actor.to_string(),
				resource: resource.to_string(),
			});
		};
		let lock_id = lock.lock_id;
		let holder_actor = lock.actor_id.clone();

		if let Some(pos) = lock.waiter_queue.iter().position(|p| p.request_id == request_id) {
			lock.waiter_queue.remove(pos);
		}

		inner.recompute_edge(actor, &holder_actor);
		inner.emit_lock_event(LockEventKind::TimedOut, actor, resource, lock_id, json!({ "cause": "timeout" }));
		warn!(actor, resource, "acquire timed out");

		Err(GcmError::TimeoutError {
			lock_id,
			actor: actor.to_string(),
			resource: resource.to_string(),
		})
	}

	async fn finish_cancelled(&self, actor: &str, resource: &str, request_id: Uuid) -> Result<Uuid> {
		let mut inner = self.inner.lock().await;
		inner.waiter_channels.remove(&request_id);

		let lock_id = inner.locks.get(resource).map_or(Uuid::nil(), |l| l.lock_id);
		if let Some(lock) = inner.locks.get_mut(resource) {
			if let Some(pos) = lock.waiter_queue.iter().position(|p| p.request_id == request_id) {
				lock.waiter_queue.remove(pos);
			}
			let holder_actor = lock.actor_id.clone();
			inner.recompute_edge(actor, &holder_actor);
		}

		Err(GcmError::Cancelled {
			lock_id,
			actor: actor.to_string(),
			resource: resource.to_string(),
		})
	}

	/// Releases a held lock, promoting the next waiter in
	/// `(priority asc, requested_at asc)` order if one exists (spec.md
	/// §4.A `release` / §4.A.1 queue inheritance).
	pub async fn release(&self, lock_id: Uuid) -> bool {
		self.release_internal(lock_id, None).await
	}

	/// Administrative release; never waits, emits OVERRIDDEN instead of
	/// RELEASED (spec.md §4.A `override`).
	pub async fn override_lock(&self, lock_id: Uuid, reason: impl Into<String>) -> bool {
		self.release_internal(lock_id, Some(reason.into())).await
	}

	async fn release_internal(&self, lock_id: Uuid, override_reason: Option<String>) -> bool {
		let mut inner = self.inner.lock().await;

		let Some(resource) = inner.locks.iter().find(|(_, l)| l.lock_id == lock_id).map(|(r, _)| r.clone()) else {
			return false;
		};

		let lock = inner.locks.remove(&resource).expect("found above");
		let holder_actor = lock.actor_id.clone();
		let kind = if override_reason.is_some() { LockEventKind::Overridden } else { LockEventKind::Released };
		let mut released_details = json!({ "duration_ms": lock.acquired_at.elapsed().as_millis() });
		if let Some(reason) = &override_reason {
			released_details["reason"] = json!(reason);
		}
		inner.emit_lock_event(kind, &holder_actor, &resource, lock_id, released_details);
		info!(resource = %resource, actor = %holder_actor, overridden = override_reason.is_some(), "lock released");

		if lock.waiter_queue.is_empty() {
			return true;
		}

		let mut queue = lock.waiter_queue;
		queue.sort_by(|a, b| (a.priority, a.requested_at).cmp(&(b.priority, b.requested_at)));
		let promoted = queue.remove(0);

		let new_lock_id = Uuid::new_v4();
		let now = Instant::now();
		let wait_ms = now.duration_since(promoted.requested_at).as_millis();

		for waiter in &queue {
			inner.recompute_edge(&waiter.actor_id, &holder_actor);
			inner.graph.add_edge(&waiter.actor_id, &promoted.actor_id);
		}
		inner.recompute_edge(&promoted.actor_id, &holder_actor);

		let new_lock = Lock {
			lock_id: new_lock_id,
			actor_id: promoted.actor_id.clone(),
			resource_id: resource.clone(),
			acquired_at: now,
			acquired_at_wall: Utc::now(),
			acquired_at_monotonic_nanos: monotonic_nanos(),
			expires_at: None,
			priority: promoted.priority,
			owner_tag: promoted.owner_tag.clone(),
			stage: LockStage::Acquired,
			retry_count: lock.retry_count,
			waiter_queue: queue,
		};
		inner.locks.insert(resource.clone(), new_lock);

		if let Some(tx) = inner.waiter_channels.remove(&promoted.request_id) {
			let _ = tx.send(WaitOutcome::Promoted { lock_id: new_lock_id });
		}

		inner.emit_lock_event(LockEventKind::AcquiredFromQueue, &promoted.actor_id, &resource, new_lock_id, json!({ "wait_ms": wait_ms }));
		debug!(resource = %resource, actor = %promoted.actor_id, wait_ms, "waiter promoted");

		true
	}

	/// Force-cancels every pending request from `waiter` queued behind a
	/// lock currently held by `holder`, delivering [`GcmError::Cancelled`]
	/// to each (spec.md §5: "Deadlock resolution of a waiter ... delivers
	/// Cancelled"). Used by deadlock resolution to fully break a cycle
	/// even when the victim release alone doesn't retract every edge.
	pub(crate) async fn cancel_waiters_between(&self, waiter: &str, holder: &str) {
		let mut inner = self.inner.lock().await;
		let Some(lock) = inner.locks.values_mut().find(|l| l.actor_id == holder) else {
			return;
		};
		let removed: Vec<PendingRequest> = {
			let (kept, removed): (Vec<_>, Vec<_>) = lock.waiter_queue.drain(..).partition(|p| p.actor_id != waiter);
			lock.waiter_queue = kept;
			removed
		};
		let holder_actor = lock.actor_id.clone();

		for pending in removed {
			if let Some(tx) = inner.waiter_channels.remove(&pending.request_id) {
				let _ = tx.send(WaitOutcome::Cancelled);
			}
		}
		inner.recompute_edge(waiter, &holder_actor);
	}

	/// Advisory stage transition; never gates release (spec.md §4.A state
	/// machine).
	pub async fn transition_stage(&self, lock_id: Uuid, stage: LockStage) -> bool {
		let mut inner = self.inner.lock().await;
		if let Some(lock) = inner.locks.values_mut().find(|l| l.lock_id == lock_id) {
			lock.stage = stage;
			true
		} else {
			false
		}
	}

	/// Consistent copy of every currently-held lock (spec.md §4.A
	/// `snapshot`).
	pub async fn snapshot(&self) -> Vec<LockView> {
		let inner = self.inner.lock().await;
		inner.locks.values().map(Self::to_view).collect()
	}

	pub async fn get(&self, lock_id: Uuid) -> Option<LockView> {
		let inner = self.inner.lock().await;
		inner.locks.values().find(|l| l.lock_id == lock_id).map(Self::to_view)
	}

	fn to_view(lock: &Lock) -> LockView {
		LockView {
			lock_id: lock.lock_id,
			actor_id: lock.actor_id.clone(),
			resource_id: lock.resource_id.clone(),
			acquired_at: lock.acquired_at_wall,
			acquired_at_monotonic_nanos: lock.acquired_at_monotonic_nanos,
			priority: lock.priority,
			owner_tag: lock.owner_tag.clone(),
			stage: lock.stage,
			retry_count: lock.retry_count,
			waiter_count: lock.waiter_queue.len(),
		}
	}

	/// Raw `Lock`s currently held by any of `actors`, for the Resolution
	/// Policy Engine (spec.md §4.C).
	pub(crate) async fn locks_held_by(&self, actors: &[String]) -> Vec<Lock> {
		let inner = self.inner.lock().await;
		inner.locks.values().filter(|l| actors.contains(&l.actor_id)).cloned().collect()
	}

	/// Read-only snapshot of the Wait-For Graph, for cycle detection
	/// (spec.md §4.B). Never mutates.
	pub async fn wait_graph_snapshot(&self) -> WaitForGraph {
		let inner = self.inner.lock().await;
		inner.graph.clone()
	}

	pub(crate) async fn record_conflict(&self, event: crate::types::ConflictEvent) {
		let mut inner = self.inner.lock().await;
		inner.recorder.record_conflict_event(event);
	}

	pub async fn lock_history(&self, limit: usize) -> Vec<LockEvent> {
		let inner = self.inner.lock().await;
		inner.recorder.lock_history(limit)
	}

	pub async fn conflict_history(&self, limit: usize) -> Vec<crate::types::ConflictEvent> {
		let inner = self.inner.lock().await;
		inner.recorder.conflict_history(limit)
	}

	pub async fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::events::StreamItem> {
		let inner = self.inner.lock().await;
		inner.recorder.subscribe()
	}

	pub async fn dropped_events(&self) -> u64 {
		let inner = self.inner.lock().await;
		inner.recorder.dropped_events()
	}

	pub async fn note_dropped_events(&self, count: u64) {
		let inner = self.inner.lock().await;
		inner.recorder.note_dropped(count);
	}
}

impl Default for LockTable {
	fn default() -> Self {
		Self::new()
	}
}
