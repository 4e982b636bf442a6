use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scombat::data_structs::DesignModel;
use scombat::tools::correct::{BatchCorrector, CombatCorrector};
use scombat::tools::simulate::{simulate, SimulationConfig, BATCH, MOUSE};

fn bench_combat(c: &mut Criterion) {
    let dataset =
        simulate(&SimulationConfig::new(60, 200, 2016, 2.0)).unwrap();
    let corrector = CombatCorrector::new();
    let design = DesignModel::preserving([MOUSE]);

    c.bench_function("combat_60x200", |b| {
        b.iter(|| {
            corrector
                .correct(
                    black_box(&dataset.batch_noisy),
                    &dataset.metadata,
                    BATCH,
                    &design,
                )
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_combat);
criterion_main!(benches);
