//! Benchmarks for hot orchestration paths.

use cairn::budget::BudgetTracker;
use cairn::stage::StageId;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn stage_id_ordering(c: &mut Criterion) {
    let ids: Vec<StageId> = (1..=64).map(StageId::integer).collect();
    c.bench_function("stage_id_sort", |b| {
        b.iter(|| {
            let mut shuffled: Vec<StageId> = ids.iter().rev().copied().collect();
            shuffled.sort();
            black_box(shuffled)
        });
    });
}

fn ledger_append(c: &mut Criterion) {
    c.bench_function("ledger_append_1k", |b| {
        b.iter(|| {
            let tracker = BudgetTracker::new(None);
            for _ in 0..1_000 {
                tracker.record_usage("bench", 1, 0.001);
            }
            black_box(tracker.total_spent())
        });
    });
}

criterion_group!(benches, stage_id_ordering, ledger_append);
criterion_main!(benches);
