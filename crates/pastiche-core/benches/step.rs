//! Cost of one optimization step on a reduced VGG.

use candle_core::{Device, Tensor};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pastiche_core::loss::TotalVariationLoss;
use pastiche_core::model::{Backbone, FeatureExtractor, Vgg19, VggConfig};
use pastiche_core::optim::{LossStack, OptimizationDriver, OptimizerConfig, RunSettings};

fn extractor() -> FeatureExtractor {
    let config = VggConfig::from_blocks(&[(2, 16), (2, 32), (2, 64)]);
    let vgg = Vgg19::random(&config, &Device::Cpu).unwrap();
    FeatureExtractor::new(
        Backbone::Vgg(vgg),
        &["conv3_2"],
        &["conv1_1", "conv2_1", "conv3_1"],
        &Device::Cpu,
    )
    .unwrap()
}

fn bench_step(c: &mut Criterion) {
    let extractor = extractor();
    let mut group = c.benchmark_group("driver_step");
    group.sample_size(10);

    for side in [32usize, 64] {
        let content = Tensor::rand(-1.0f32, 1.0, (1, 3, side, side), &Device::Cpu).unwrap();
        let style = Tensor::rand(-1.0f32, 1.0, (1, 3, side, side), &Device::Cpu).unwrap();
        let losses =
            LossStack::capture(&extractor, &content, &style, 0.7, TotalVariationLoss::new(1.0))
                .unwrap();

        for optimizer in [OptimizerConfig::lbfgs(), OptimizerConfig::adam(0.02)] {
            let settings = RunSettings {
                num_steps: usize::MAX,
                optimizer,
                ..Default::default()
            };
            let mut driver =
                OptimizationDriver::new(&extractor, &content, losses.clone(), &settings).unwrap();
            group.bench_with_input(
                BenchmarkId::new(optimizer.name(), side),
                &side,
                |b, _| b.iter(|| driver.step().unwrap()),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_step);
criterion_main!(benches);
