//! End-to-end dual-worker verification benchmarks.

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use upxtest_core::{ConcurrencyHarness, HarnessConfig, Schedule, SeedTables, StorageBank};

fn bench_verify(c: &mut Criterion) {
    let bank = StorageBank::new(SeedTables::standard());
    let mut group = c.benchmark_group("verify");
    group.sample_size(30);

    for schedule in [Schedule::Free, Schedule::Lockstep] {
        let config = HarnessConfig::default()
            .with_schedule(schedule)
            .with_settle(Duration::ZERO);
        group.bench_with_input(
            BenchmarkId::from_parameter(schedule.as_str()),
            &config,
            |b, &config| {
                b.iter(|| {
                    // Gate inactive: agreement does not depend on timing.
                    let result = ConcurrencyHarness::new(&bank)
                        .with_config(config)
                        .verify(black_box(0));
                    black_box(result.map(|v| v.fingerprint))
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_verify);
criterion_main!(benches);
