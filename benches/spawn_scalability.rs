//! Scalability benchmarks for the botrealm spawn scheduler
//!
//! Exercises the hot paths at the 5000-concurrent-bot target: queue churn,
//! cap reservation and placement tracking.
//!
//! Run with: cargo bench --bench spawn_scalability

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use botrealm_server::spawn::population::PopulationTracker;
use botrealm_server::spawn::queue::SpawnQueue;
use botrealm_server::spawn::request::{PrioritySpawnRequest, SpawnRequest};
use botrealm_server::world::ids::CharacterGuid;

fn bench_queue_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_churn");

    for count in [100u64, 1000, 5000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let queue = SpawnQueue::new();
                for i in 0..count {
                    let request = SpawnRequest::for_zone((i % 32) as u32, 0);
                    queue.enqueue(PrioritySpawnRequest::new(request, "bench"), i);
                }
                while let Some(req) = queue.dequeue(count) {
                    black_box(req.priority);
                }
            });
        });
    }
    group.finish();
}

fn bench_duplicate_index(c: &mut Criterion) {
    c.bench_function("duplicate_index_5000", |b| {
        b.iter(|| {
            let queue = SpawnQueue::new();
            for i in 0..5000u64 {
                let request = SpawnRequest::for_character(CharacterGuid::player(i));
                queue.enqueue(PrioritySpawnRequest::new(request, "bench"), i);
            }
            // Every re-enqueue is a duplicate hit.
            for i in 0..5000u64 {
                let request = SpawnRequest::for_character(CharacterGuid::player(i));
                black_box(queue.enqueue(PrioritySpawnRequest::new(request, "bench"), i));
            }
        });
    });
}

fn bench_cap_reservation(c: &mut Criterion) {
    let mut group = c.benchmark_group("cap_reservation");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("uncontended", |b| {
        let tracker = PopulationTracker::new();
        b.iter(|| {
            for _ in 0..10_000 {
                if black_box(tracker.reserve_slot(5000, true, false)) {
                    tracker.release_slot();
                }
            }
        });
    });

    group.bench_function("contended_8_threads", |b| {
        b.iter(|| {
            let tracker = PopulationTracker::new();
            std::thread::scope(|scope| {
                for _ in 0..8 {
                    scope.spawn(|| {
                        for _ in 0..1250 {
                            if tracker.reserve_slot(5000, true, false) {
                                tracker.release_slot();
                            }
                        }
                    });
                }
            });
        });
    });

    group.finish();
}

fn bench_placement_tracking(c: &mut Criterion) {
    c.bench_function("placement_churn_5000", |b| {
        b.iter(|| {
            let tracker = PopulationTracker::new();
            for i in 0..5000u64 {
                tracker.reserve_slot(10_000, true, false);
                tracker.insert(CharacterGuid::player(i), (i % 64) as u32, (i % 4) as u32);
            }
            for i in 0..5000u64 {
                black_box(tracker.remove(CharacterGuid::player(i)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_queue_churn,
    bench_duplicate_index,
    bench_cap_reservation,
    bench_placement_tracking
);
criterion_main!(benches);
