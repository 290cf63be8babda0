use crate::error::{GcmError, Result};
use crate::lock_table::LockTable;
use crate::policy::{select_victim, Strategy};
use crate::types::{ConflictEvent, ConflictKind, DeadlockRecord, Severity};
use crate::wait_graph::WaitForGraph;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum MonitorCommand {
	SetInterval(Duration),
	SetAutoResolve(bool),
	SetStrategy(Strategy),
	ScanNow(oneshot::Sender<Vec<DeadlockRecord>>),
}

/// Latest scan outcome, broadcast to observers (GET /deadlocks).
#[derive(Debug, Clone, Default)]
pub struct MonitorState {
	pub last_scan_at: Option<chrono::DateTime<Utc>>,
	pub active_deadlocks: Vec<DeadlockRecord>,
	pub total_scans: u64,
	pub total_resolved: u64,
}

/// Periodically scans the Wait-For Graph for cycles and, when configured,
/// resolves them via the Resolution Policy Engine (spec.md §4.F). Pure
/// actor pattern modeled on `StreamOrchestrator`: immutable `&self` command
/// methods backed by an `mpsc` channel into a single spawned tick loop,
/// state distributed via `watch`, teardown via `CancellationToken` + `Drop`.
pub struct BackgroundMonitor {
	command_tx: mpsc::UnboundedSender<MonitorCommand>,
	state_rx: watch::Receiver<MonitorState>,
	task_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
	cancel_token: CancellationToken,
}

impl BackgroundMonitor {
	#[must_use]
	pub fn spawn(table: LockTable, interval: Duration, auto_resolve: bool, strategy: Strategy) -> Self {
		let cancel_token = CancellationToken::new();
		let (command_tx, command_rx) = mpsc::unbounded_channel();
		let (state_tx, state_rx) = watch::channel(MonitorState::default());

		let task_handle = tokio::spawn(run_loop(table, interval, auto_resolve, strategy, command_rx, state_tx, cancel_token.clone()));

		Self {
			command_tx,
			state_rx,
			task_handle: Arc::new(Mutex::new(Some(task_handle))),
			cancel_token,
		}
	}

	#[must_use]
	pub fn with_defaults(table: LockTable) -> Self {
		Self::spawn(table, DEFAULT_SCAN_INTERVAL, true, Strategy::PriorityBased)
	}

	fn send(&self, command: MonitorCommand) {
		if self.command_tx.send(command).is_err() {
			warn!("background monitor loop is no longer running");
		}
	}

	pub fn set_interval(&self, interval: Duration) {
		self.send(MonitorCommand::SetInterval(interval));
	}

	pub fn set_auto_resolve(&self, auto_resolve: bool) {
		self.send(MonitorCommand::SetAutoResolve(auto_resolve));
	}

	pub fn set_strategy(&self, strategy: Strategy) {
		self.send(MonitorCommand::SetStrategy(strategy));
	}

	/// Forces an immediate scan outside the regular tick, awaiting the
	/// resulting deadlock list.
	pub async fn scan_now(&self) -> Vec<DeadlockRecord> {
		let (tx, rx) = oneshot::channel();
		self.send(MonitorCommand::ScanNow(tx));
		rx.await.unwrap_or_default()
	}

	#[must_use]
	pub fn current_state(&self) -> MonitorState {
		self.state_rx.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
		self.state_rx.clone()
	}

	pub async fn shutdown(self) {
		info!("shutting down background monitor");
		self.cancel_token.cancel();
		if let Some(handle) = self.task_handle.lock().await.take() {
			let _ = handle.await;
		}
	}
}

impl Drop for BackgroundMonitor {
	fn drop(&mut self) {
		self.cancel_token.cancel();
	}
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(table: LockTable, mut interval_duration: Duration, mut auto_resolve: bool, mut strategy: Strategy, mut command_rx: mpsc::UnboundedReceiver<MonitorCommand>, state_tx: watch::Sender<MonitorState>, cancel: CancellationToken) {
	let mut ticker = tokio::time::interval(interval_duration);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			() = cancel.cancelled() => break,
			command = command_rx.recv() => match command {
				None => break,
				Some(MonitorCommand::SetInterval(d)) => {
					interval_duration = d;
					ticker = tokio::time::interval(interval_duration);
				}
				Some(MonitorCommand::SetAutoResolve(v)) => auto_resolve = v,
				Some(MonitorCommand::SetStrategy(s)) => strategy = s,
				Some(MonitorCommand::ScanNow(reply)) => {
					let records = scan_once(&table, strategy, auto_resolve, &state_tx).await;
					let _ = reply.send(records);
				}
			},
			_ = ticker.tick() => {
				scan_once(&table, strategy, auto_resolve, &state_tx).await;
			}
		}
	}
}

async fn scan_once(table: &LockTable, strategy: Strategy, auto_resolve: bool, state_tx: &watch::Sender<MonitorState>) -> Vec<DeadlockRecord> {
	let graph = table.wait_graph_snapshot().await;
	let cycles = graph.detect_cycles();
	let mut records = Vec::with_capacity(cycles.len());
	let mut resolved_count = 0u64;

	for cycle in &cycles {
		let actors = distinct_cycle_actors(cycle);
		let record = DeadlockRecord {
			deadlock_id: Uuid::new_v4(),
			cycle: cycle.clone(),
			detected_at: Utc::now(),
			involved_lock_ids: table.locks_held_by(&actors).await.iter().map(|l| l.lock_id).collect(),
			severity: Severity::from_cycle_len(actors.len()),
		};
		records.push(record);

		if auto_resolve {
			match resolve(table, cycle, strategy, None, true).await {
				Ok(_) => resolved_count += 1,
				Err(err) => warn!(?cycle, error = %err, "automatic deadlock resolution failed"),
			}
		} else {
			let _ = record_unresolved_conflict(table, cycle).await;
		}
	}

	state_tx.send_modify(|state| {
		state.last_scan_at = Some(Utc::now());
		state.active_deadlocks = records.clone();
		state.total_scans += 1;
		state.total_resolved += resolved_count;
	});

	records
}

fn distinct_cycle_actors(cycle: &[String]) -> Vec<String> {
	let mut actors = cycle.to_vec();
	actors.pop(); // drop the repeated closing node
	actors.sort();
	actors.dedup();
	actors
}

async fn record_unresolved_conflict(table: &LockTable, cycle: &[String]) {
	table
		.record_conflict(ConflictEvent {
			conflict_id: Uuid::new_v4(),
			timestamp: Utc::now(),
			monotonic_nanos: 0,
			kind: ConflictKind::Deadlock,
			involved_actors: distinct_cycle_actors(cycle),
			description: format!("deadlock detected among {}", cycle.join(" -> ")),
			resolution: None,
			auto_resolved: false,
			resolved_at: None,
		})
		.await;
}

/// Resolves a single detected cycle: selects a victim lock via the policy
/// engine, overrides it, then force-cancels every remaining pending request
/// that still forms an edge in `cycle` so the whole cycle is broken even
/// when the victim's own release doesn't retract every edge (spec.md §5).
/// Used both by the automatic scan loop and by `POST /deadlocks/resolve`.
pub async fn resolve(table: &LockTable, cycle: &[String], strategy: Strategy, manual_victim: Option<Uuid>, auto_resolved: bool) -> Result<ConflictEvent> {
	let actors = distinct_cycle_actors(cycle);
	let holder_locks = table.locks_held_by(&actors).await;
	let victim_lock_id = select_victim(cycle, strategy, &holder_locks, manual_victim)?;

	if !table.override_lock(victim_lock_id, "deadlock_resolution").await {
		return Err(GcmError::NotFound { lock_id: victim_lock_id });
	}

	for pair in cycle.windows(2) {
		let (waiter, holder) = (&pair[0], &pair[1]);
		table.cancel_waiters_between(waiter, holder).await;
	}

	let now = Utc::now();
	let conflict = ConflictEvent {
		conflict_id: Uuid::new_v4(),
		timestamp: now,
		monotonic_nanos: 0,
		kind: ConflictKind::Deadlock,
		involved_actors: actors,
		description: format!("deadlock resolved by overriding {victim_lock_id}"),
		resolution: Some(strategy.to_string()),
		auto_resolved,
		resolved_at: Some(now),
	};
	table.record_conflict(conflict.clone()).await;
	info!(%victim_lock_id, %strategy, "deadlock resolved");
	Ok(conflict)
}
