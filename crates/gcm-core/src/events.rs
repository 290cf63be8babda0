use crate::types::{ConflictEvent, LockEvent};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// An item pushed onto the live event stream, as delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stream_item_kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamItem {
	Lock(LockEvent),
	Conflict(ConflictEvent),
}

const DEFAULT_CAPACITY: usize = 1000;
const BROADCAST_CAPACITY: usize = 1024;

/// Bounded, newest-biased ring of Lock Events and Conflict Events plus a
/// fan-out broadcast channel for subscribers (spec.md §4.D).
///
/// Publication appends to the rings while the caller holds the Lock Table's
/// mutual-exclusion region; delivery to subscribers happens over the
/// broadcast channel, which never blocks the publisher. A lagging
/// subscriber drops older messages on its own receiver (tracked via
/// `dropped_events`), never the publisher.
pub struct EventRecorder {
	lock_events: VecDeque<LockEvent>,
	conflict_events: VecDeque<ConflictEvent>,
	capacity: usize,
	sender: broadcast::Sender<StreamItem>,
	dropped_events: AtomicU64,
}

impl EventRecorder {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
		Self {
			lock_events: VecDeque::with_capacity(capacity),
			conflict_events: VecDeque::with_capacity(capacity),
			capacity,
			sender,
			dropped_events: AtomicU64::new(0),
		}
	}

	pub fn record_lock_event(&mut self, event: LockEvent) {
		if self.lock_events.len() >= self.capacity {
			self.lock_events.pop_front();
		}
		self.lock_events.push_back(event.clone());
		if self.sender.send(StreamItem::Lock(event)).is_err() {
			debug!("no subscribers currently listening on GCM event stream");
		}
	}

	pub fn record_conflict_event(&mut self, event: ConflictEvent) {
		if self.conflict_events.len() >= self.capacity {
			self.conflict_events.pop_front();
		}
		self.conflict_events.push_back(event.clone());
		if self.sender.send(StreamItem::Conflict(event)).is_err() {
			debug!("no subscribers currently listening on GCM event stream");
		}
	}

	/// Returns the last `limit` Lock Events in chronological order.
	#[must_use]
	pub fn lock_history(&self, limit: usize) -> Vec<LockEvent> {
		let skip = self.lock_events.len().saturating_sub(limit);
		self.lock_events.iter().skip(skip).cloned().collect()
	}

	/// Returns the last `limit` Conflict Events in chronological order.
	#[must_use]
	pub fn conflict_history(&self, limit: usize) -> Vec<ConflictEvent> {
		let skip = self.conflict_events.len().saturating_sub(limit);
		self.conflict_events.iter().skip(skip).cloned().collect()
	}

	/// Subscribes to the live stream. Best-effort delivery: a subscriber
	/// that falls behind `BROADCAST_CAPACITY` messages observes
	/// `RecvError::Lagged` and should call [`Self::note_dropped`] before
	/// resuming.
	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<StreamItem> {
		self.sender.subscribe()
	}

	/// Records that a subscriber observed a lag (dropped messages), for the
	/// analytics `dropped_events` counter.
	pub fn note_dropped(&self, count: u64) {
		self.dropped_events.fetch_add(count, Ordering::Relaxed);
	}

	#[must_use]
	pub fn dropped_events(&self) -> u64 {
		self.dropped_events.load(Ordering::Relaxed)
	}
}

impl Default for EventRecorder {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{ConflictKind, LockEventKind};
	use uuid::Uuid;

	fn lock_event(kind: LockEventKind) -> LockEvent {
		LockEvent {
			event_id: Uuid::new_v4(),
			timestamp: chrono::Utc::now(),
			monotonic_nanos: 0,
			kind,
			actor_id: "A".into(),
			resource_id: "R".into(),
			lock_id: Uuid::new_v4(),
			details: serde_json::json!({}),
		}
	}

	#[test]
	fn ring_drops_oldest_past_capacity() {
		let mut recorder = EventRecorder::new(2);
		for _ in 0..5 {
			recorder.record_lock_event(lock_event(LockEventKind::Acquired));
		}
		assert_eq!(recorder.lock_history(10).len(), 2);
	}

	#[test]
	fn history_is_chronological() {
		let mut recorder = EventRecorder::new(10);
		let ids: Vec<Uuid> = (0..3)
			.map(|_| {
				let e = lock_event(LockEventKind::Queued);
				let id = e.event_id;
				recorder.record_lock_event(e);
				id
			})
			.collect();
		let history = recorder.lock_history(10);
		let history_ids: Vec<Uuid> = history.iter().map(|e| e.event_id).collect();
		assert_eq!(history_ids, ids);
	}

	#[tokio::test]
	async fn subscriber_receives_published_events() {
		let mut recorder = EventRecorder::new(10);
		let mut rx = recorder.subscribe();
		recorder.record_lock_event(lock_event(LockEventKind::Acquired));
		let item = rx.recv().await.unwrap();
		assert!(matches!(item, StreamItem::Lock(_)));
	}

	#[test]
	fn conflict_history_respects_limit() {
		let mut recorder = EventRecorder::new(10);
		for _ in 0..5 {
			recorder.record_conflict_event(ConflictEvent {
				conflict_id: Uuid::new_v4(),
				timestamp: chrono::Utc::now(),
				monotonic_nanos: 0,
				kind: ConflictKind::Timeout,
				involved_actors: vec!["A".into()],
				description: "timeout".into(),
				resolution: None,
				auto_resolved: false,
				resolved_at: None,
			});
		}
		assert_eq!(recorder.conflict_history(3).len(), 3);
	}
}
