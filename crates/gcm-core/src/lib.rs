//! Global Concurrency Manager core: a centralized lock table, a Wait-For
//! Graph deadlock detector, a pluggable resolution policy engine, and the
//! event stream that ties them together. No networking lives here; see
//! `gcm-server` for the HTTP/WebSocket front end.

pub mod analytics;
pub mod error;
pub mod events;
pub mod lock_table;
pub mod monitor;
pub mod policy;
pub mod types;
pub mod wait_graph;

pub use analytics::parse_time_range;
pub use error::{GcmError, Result};
pub use events::StreamItem;
pub use lock_table::LockTable;
pub use monitor::{BackgroundMonitor, MonitorState};
pub use policy::Strategy;
pub use types::{
	ActorPair, AnalyticsSnapshot, ConflictEvent, ConflictKind, ConflictPatternView, DeadlockRecord, Lock, LockEvent, LockEventKind, LockStage, LockView, PendingRequest, Severity,
};

use analytics::AnalyticsTracker;
use std::time::Duration;
use uuid::Uuid;

/// Single shared entry point combining all six components (spec.md §2).
/// Callers hold this behind an `Arc` (or a process-wide `once_cell`) so
/// every acquire/release/scan shares the same Lock Table instance; init and
/// teardown are controlled by the host, not by this type itself.
#[derive(Clone)]
pub struct GlobalConcurrencyManager {
	table: LockTable,
	analytics: std::sync::Arc<AnalyticsTracker>,
}

impl GlobalConcurrencyManager {
	#[must_use]
	pub fn new(event_ring_capacity: usize) -> Self {
		let table = LockTable::with_capacity(event_ring_capacity);
		let analytics = std::sync::Arc::new(AnalyticsTracker::spawn(&table));
		Self { table, analytics }
	}

	#[must_use]
	pub fn table(&self) -> &LockTable {
		&self.table
	}

	#[must_use]
	pub fn analytics(&self) -> &AnalyticsTracker {
		&self.analytics
	}

	pub fn spawn_monitor(&self, interval: Duration, auto_resolve: bool, strategy: Strategy) -> BackgroundMonitor {
		BackgroundMonitor::spawn(self.table.clone(), interval, auto_resolve, strategy)
	}

	pub async fn acquire(&self, actor: impl Into<String>, resource: impl Into<String>, priority: i32, timeout: Duration, owner_tag: impl Into<String>) -> Result<Uuid> {
		self.table.acquire(actor, resource, priority, timeout, owner_tag).await
	}

	pub async fn release(&self, lock_id: Uuid) -> bool {
		self.table.release(lock_id).await
	}

	pub async fn snapshot(&self) -> Vec<LockView> {
		self.table.snapshot().await
	}

	pub async fn analytics_snapshot(&self, top_n: usize, time_range: Option<Duration>) -> AnalyticsSnapshot {
		self.analytics.snapshot(&self.table, top_n, time_range).await
	}
}

impl Default for GlobalConcurrencyManager {
	fn default() -> Self {
		Self::new(1000)
	}
}
