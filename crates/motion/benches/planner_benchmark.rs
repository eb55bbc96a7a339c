//! Planner hot-path benchmarks: admission + look-ahead over a zig-zag
//! toolpath, and the ramp partition in isolation.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use motion::trapezoid::{meet_velocity, JerkTerms};
use motion::{GcodeState, NullReporter, Planner, Settings, AXES};

fn zigzag_targets(count: usize) -> Vec<[f64; AXES]> {
    let mut targets = Vec::with_capacity(count);
    let mut x = 0.0;
    let mut y = 0.0;
    for i in 0..count {
        if i % 2 == 0 {
            x += 7.5;
        } else {
            y += 4.0;
        }
        let mut t = [0.0; AXES];
        t[0] = x;
        t[1] = y;
        targets.push(t);
    }
    targets
}

fn bench_admission_and_lookahead(c: &mut Criterion) {
    let targets = zigzag_targets(24);
    c.bench_function("aline_24_blocks_with_lookahead", |b| {
        b.iter_batched(
            || Planner::new(Settings::default()),
            |mut planner| {
                let mut reporter = NullReporter;
                for target in &targets {
                    let gm = GcodeState::feed(*target, 1200.0);
                    planner.aline(&gm, &mut reporter).expect("aline");
                    planner
                        .planner_callback(0.0, &mut reporter)
                        .expect("callback");
                }
                // Force the pessimistic tail plan.
                planner
                    .planner_callback(31.0, &mut reporter)
                    .expect("callback");
                planner
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_meet_velocity(c: &mut Criterion) {
    let jt = JerkTerms::new(1e9);
    c.bench_function("meet_velocity", |b| {
        b.iter(|| std::hint::black_box(meet_velocity(200.0, 500.0, 4.0, &jt)))
    });
}

criterion_group!(benches, bench_admission_and_lookahead, bench_meet_velocity);
criterion_main!(benches);
