use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gcm_core::LockTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn bench_single_actor_sequential(c: &mut Criterion) {
	let mut group = c.benchmark_group("single_actor_sequential");

	for resources in [1, 5, 10, 50].iter() {
		group.throughput(Throughput::Elements(*resources as u64));
		group.bench_with_input(BenchmarkId::from_parameter(resources), resources, |b, &num_resources| {
			let rt = Runtime::new().unwrap();
			let table = LockTable::new();

			b.to_async(&rt).iter(|| async {
				let mut lock_ids = Vec::new();
				for i in 0..num_resources {
					let id = table.acquire("actor", format!("resource-{i}"), 0, Duration::from_secs(5), "tag").await.expect("should acquire");
					lock_ids.push(id);
				}
				for id in &lock_ids {
					table.release(*id).await;
				}
				black_box(lock_ids);
			});
		});
	}
	group.finish();
}

fn bench_different_resources_concurrent(c: &mut Criterion) {
	let mut group = c.benchmark_group("different_resources_concurrent");

	for actors in [10, 50, 100, 500].iter() {
		group.throughput(Throughput::Elements(*actors as u64));
		group.bench_with_input(BenchmarkId::from_parameter(actors), actors, |b, &num_actors| {
			let rt = Runtime::new().unwrap();
			let table = Arc::new(LockTable::new());

			b.to_async(&rt).iter(|| {
				let table = table.clone();
				async move {
					let mut handles = Vec::new();
					for i in 0..num_actors {
						let t = table.clone();
						handles.push(tokio::spawn(async move { t.acquire(format!("actor-{i}"), format!("resource-{i}"), 0, Duration::from_secs(5), "tag").await }));
					}
					let results: Vec<_> = futures::future::join_all(handles).await.into_iter().filter_map(|r| r.ok().and_then(Result::ok)).collect();
					black_box(results);
				}
			});
		});
	}
	group.finish();
}

fn bench_same_resource_contention(c: &mut Criterion) {
	let mut group = c.benchmark_group("same_resource_contention");
	group.measurement_time(Duration::from_secs(10));

	for waiters in [5, 10, 20].iter() {
		group.bench_with_input(BenchmarkId::from_parameter(waiters), waiters, |b, &num_waiters| {
			let rt = Runtime::new().unwrap();

			b.to_async(&rt).iter(|| async move {
				let table = Arc::new(LockTable::new());
				let holder = table.acquire("holder", "contended", 0, Duration::from_secs(5), "tag").await.unwrap();

				let mut handles = Vec::new();
				for i in 0..num_waiters {
					let t = table.clone();
					handles.push(tokio::spawn(async move { t.acquire(format!("waiter-{i}"), "contended", 0, Duration::from_millis(500), "tag").await }));
				}

				table.release(holder).await;
				let results = futures::future::join_all(handles).await;
				black_box(results);
			});
		});
	}
	group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
	let mut group = c.benchmark_group("snapshot");

	let rt = Runtime::new().unwrap();
	let table = LockTable::new();
	rt.block_on(async {
		for i in 0..200 {
			let _ = table.acquire(format!("actor-{i}"), format!("resource-{i}"), 0, Duration::from_secs(5), "tag").await;
		}
	});

	group.bench_function("snapshot_200_locks", |b| {
		b.to_async(&rt).iter(|| async { black_box(table.snapshot().await) });
	});

	group.finish();
}

criterion_group!(benches, bench_single_actor_sequential, bench_different_resources_concurrent, bench_same_resource_contention, bench_snapshot,);

criterion_main!(benches);
