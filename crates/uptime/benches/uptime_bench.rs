use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use uptime::incident::replay;
use uptime::status::display_status;
use uptime::types::CheckOutcome;

/// Outcomes for one target that flip status every `run` checks
fn history(len: usize, run: usize) -> Vec<CheckOutcome> {
    let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    (0..len)
        .map(|i| {
            let ts = base + chrono::Duration::seconds(i as i64 * 60);
            if (i / run) % 2 == 0 {
                CheckOutcome::up(1, ts, 25.0)
            } else {
                CheckOutcome::down(1, ts, "Connection error")
            }
        })
        .collect()
}

fn replay_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("incident_replay");

    for len in [1_000usize, 10_000, 100_000] {
        let outcomes = history(len, 7);
        group.bench_with_input(BenchmarkId::from_parameter(len), &outcomes, |b, outcomes| {
            b.iter(|| black_box(replay(outcomes)))
        });
    }

    group.finish();
}

fn display_status_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("display_status");

    let steady = history(3, 10);
    let mixed = history(3, 1);

    group.bench_function("unanimous", |b| b.iter(|| black_box(display_status(&steady))));
    group.bench_function("mixed", |b| b.iter(|| black_box(display_status(&mixed))));

    group.finish();
}

criterion_group!(benches, replay_benchmark, display_status_benchmark);
criterion_main!(benches);
