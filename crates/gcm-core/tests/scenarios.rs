//! End-to-end scenarios and cross-module invariants spanning the Lock
//! Table, Wait-For Graph, Resolution Policy Engine and Background Monitor
//! together, exercised through the public `gcm_core` API.

use gcm_core::monitor::resolve;
use gcm_core::{BackgroundMonitor, GcmError, LockTable, Severity, Strategy};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn s3_two_cycle_priority_based_resolution() {
	let table = LockTable::new();

	table.acquire("A", "R1", 4, Duration::from_secs(30), "a").await.unwrap();
	table.acquire("B", "R2", 8, Duration::from_secs(30), "b").await.unwrap();

	let table_a = table.clone();
	let a_wants_r2 = tokio::spawn(async move { table_a.acquire("A", "R2", 4, Duration::from_secs(30), "a").await });
	tokio::time::sleep(Duration::from_millis(10)).await;

	let table_b = table.clone();
	let b_wants_r1 = tokio::spawn(async move { table_b.acquire("B", "R1", 8, Duration::from_secs(30), "b").await });
	tokio::time::sleep(Duration::from_millis(10)).await;

	let cycle = vec!["A".to_string(), "B".to_string(), "A".to_string()];
	let conflict = resolve(&table, &cycle, Strategy::PriorityBased, None, true).await.unwrap();
	assert_eq!(conflict.resolution.as_deref(), Some("priority"));
	assert!(conflict.auto_resolved);

	let promoted = tokio::time::timeout(Duration::from_secs(1), a_wants_r2).await.expect("A must be promoted onto R2").unwrap();
	assert!(promoted.is_ok());

	let cancelled = tokio::time::timeout(Duration::from_secs(1), b_wants_r1).await.expect("B's wait must resolve, not hang").unwrap();
	assert!(matches!(cancelled, Err(GcmError::Cancelled { .. })));

	let snapshot = table.snapshot().await;
	let r2 = snapshot.iter().find(|l| l.resource_id == "R2").unwrap();
	assert_eq!(r2.actor_id, "A");
}

#[tokio::test]
async fn s5_three_cycle_youngest_first_resolution_severity_medium() {
	let table = Arc::new(LockTable::new());

	table.acquire("A", "R1", 5, Duration::from_secs(30), "a").await.unwrap();
	tokio::time::sleep(Duration::from_millis(10)).await;
	table.acquire("B", "R2", 5, Duration::from_secs(30), "b").await.unwrap();
	tokio::time::sleep(Duration::from_millis(10)).await;
	table.acquire("C", "R3", 5, Duration::from_secs(30), "c").await.unwrap();

	let ta = table.clone();
	let a_wants_r2 = tokio::spawn(async move { ta.acquire("A", "R2", 5, Duration::from_secs(30), "a").await });
	let tb = table.clone();
	let b_wants_r3 = tokio::spawn(async move { tb.acquire("B", "R3", 5, Duration::from_secs(30), "b").await });
	let tc = table.clone();
	let c_wants_r1 = tokio::spawn(async move { tc.acquire("C", "R1", 5, Duration::from_secs(30), "c").await });
	tokio::time::sleep(Duration::from_millis(20)).await;

	let monitor = BackgroundMonitor::spawn(table.as_ref().clone(), Duration::from_secs(60), false, Strategy::YoungestFirst);
	let records = monitor.scan_now().await;
	assert_eq!(records.len(), 1);
	assert_eq!(records[0].severity, Severity::Medium);

	let cycle = &records[0].cycle;
	let conflict = resolve(&table, cycle, Strategy::YoungestFirst, None, true).await.unwrap();
	assert!(conflict.auto_resolved);

	let snapshot = table.snapshot().await;
	assert!(snapshot.iter().all(|l| l.resource_id != "R3" || l.actor_id != "C"), "C's lock on R3 (the youngest) must have been overridden");

	for handle in [a_wants_r2, b_wants_r3, c_wants_r1] {
		let _ = tokio::time::timeout(Duration::from_secs(1), handle).await.expect("every waiter must resolve, not hang");
	}

	monitor.shutdown().await;
}

#[tokio::test]
async fn s6_unread_subscriber_never_blocks_producers() {
	let table = LockTable::new();
	let _unread_subscriber = table.subscribe().await;

	let work = async {
		for i in 0..50 {
			let resource = format!("R{i}");
			let lock_id = table.acquire("actor", &resource, 0, Duration::from_secs(1), "tag").await.unwrap();
			table.release(lock_id).await;
		}
	};

	tokio::time::timeout(Duration::from_secs(2), work).await.expect("producers must make progress regardless of subscriber backpressure");
}

#[tokio::test]
async fn invariant_round_trip_restores_key_set() {
	let table = LockTable::new();
	for i in 0..10 {
		let lock_id = table.acquire(format!("actor-{i}"), format!("resource-{i}"), 0, Duration::from_secs(1), "tag").await.unwrap();
		assert!(table.release(lock_id).await);
	}
	assert!(table.snapshot().await.is_empty());
}

#[tokio::test]
async fn invariant_no_cycles_survive_a_monitor_tick_with_auto_resolution() {
	let table = LockTable::new();
	table.acquire("A", "R1", 5, Duration::from_secs(30), "a").await.unwrap();
	table.acquire("B", "R2", 5, Duration::from_secs(30), "b").await.unwrap();

	let ta = table.clone();
	tokio::spawn(async move { ta.acquire("A", "R2", 5, Duration::from_secs(30), "a").await });
	let tb = table.clone();
	tokio::spawn(async move { tb.acquire("B", "R1", 5, Duration::from_secs(30), "b").await });
	tokio::time::sleep(Duration::from_millis(20)).await;

	let monitor = BackgroundMonitor::spawn(table.clone(), Duration::from_secs(60), true, Strategy::PriorityBased);
	monitor.scan_now().await;

	let graph = table.wait_graph_snapshot().await;
	assert!(graph.detect_cycles().is_empty());

	monitor.shutdown().await;
}
