use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use archsim::{Expression, Factory, NoopObserver, NullStorage, Program, Simulation, ThrottlingSpec};

const REQUESTS: u64 = 10_000;

fn saturated() -> Simulation {
    let program = Program::new(vec![
        Expression::define_service(
            "Frontend",
            vec![
                Expression::settings(Some(8), Some(ThrottlingSpec::tail_drop(64))),
                Expression::define_operation(
                    "Get",
                    vec![Expression::think(2), Expression::invoke("DB", "Select")],
                ),
            ],
        ),
        Expression::define_service(
            "DB",
            vec![
                Expression::settings(Some(4), Some(ThrottlingSpec::tail_drop(32))),
                Expression::define_operation("Select", vec![Expression::think(5)]),
            ],
        ),
    ]);
    let mut sim = Factory::default()
        .build(&program, Box::new(NullStorage))
        .unwrap();
    for i in 0..REQUESTS {
        sim.schedule_request(i / 4, "Frontend", "Get", Box::new(|_| {}), Box::new(|_| {}))
            .unwrap();
    }
    sim
}

fn bench_saturated_service(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation");
    group.throughput(Throughput::Elements(REQUESTS));
    group.bench_function("saturated_frontend_and_db", |b| {
        b.iter_batched(
            saturated,
            |mut sim| black_box(sim.run_until(u64::MAX, &mut NoopObserver).unwrap()),
            criterion::BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_saturated_service);
criterion_main!(benches);
