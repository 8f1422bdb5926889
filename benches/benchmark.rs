use criterion::{
    criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion, PlotConfiguration,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

use hybrid_tree::{prelude::*, search::SearchReport};

const QUERIES: usize = 64;

fn random_points(i: usize) -> PointSet {
    let mut rng = StdRng::seed_from_u64(i as u64);
    let points: Vec<[f32; 3]> = (0..i)
        .map(|_| std::array::from_fn(|_| rng.gen_range(0.0..10000.0)))
        .collect();

    PointSet::from_points(format!("random_{i}"), &points)
}

fn random_queries(count: usize) -> Vec<BoundingBox<[f32; 3]>> {
    let mut rng = StdRng::seed_from_u64(0);
    (0..count)
        .map(|_| {
            let min: [f32; 3] = std::array::from_fn(|_| rng.gen_range(0.0..9000.0));
            let max = std::array::from_fn(|d| min[d] + rng.gen_range(100.0..1000.0));
            BoundingBox::new(min, max)
        })
        .collect()
}

fn search<S: LeafScanner<3>>(
    tree: &HybridTree<3>,
    config: &Config,
    scanner: S,
    queries: &[BoundingBox<[f32; 3]>],
) -> SearchReport {
    let mut session = SearchSession::new(tree, config, scanner).unwrap();
    session.search(queries, queries.len()).unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    let config = Config::default();
    let queries = random_queries(QUERIES);

    let mut group = c.benchmark_group("HybridTree");
    group
        .plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic))
        .warm_up_time(std::time::Duration::from_secs(1))
        .sample_size(20);

    #[cfg(feature = "gpu")]
    let device = pollster::block_on(hybrid_tree::gpu::request_device()).ok();

    for i in (10..=18).step_by(2).map(|i| 2_usize.pow(i)) {
        let points = random_points(i);

        group.bench_with_input(BenchmarkId::new("build", i), &points, |b, input| {
            b.iter(|| HybridTree::<3>::build(input, &config).unwrap())
        });

        let tree = HybridTree::<3>::build(&points, &config).unwrap();

        #[cfg(feature = "gpu")]
        if let Some((device, queue)) = &device {
            group.bench_with_input(BenchmarkId::new("gpu::GpuScanner", i), &tree, |b, tree| {
                b.iter(|| {
                    let scanner = GpuScanner::new(device, queue, config.workgroups);
                    search(tree, &config, scanner, &queries)
                })
            });
        }

        #[cfg(feature = "parallel")]
        {
            group.bench_with_input(
                BenchmarkId::new("parallel::ParallelScanner", i),
                &tree,
                |b, tree| {
                    b.iter(|| {
                        let scanner = ParallelScanner::new(config.workgroups);
                        search(tree, &config, scanner, &queries)
                    })
                },
            );

            let brute_force = BruteForce::default();
            group.bench_with_input(BenchmarkId::new("parallel::BruteForce", i), &tree, |b, tree| {
                b.iter(|| {
                    queries
                        .iter()
                        .map(|query| brute_force.compute(tree.leaves(), query).hits)
                        .sum::<u64>()
                })
            });
        }

        {
            group.bench_with_input(
                BenchmarkId::new("sequential::SequentialScanner", i),
                &tree,
                |b, tree| {
                    b.iter(|| {
                        let scanner = SequentialScanner::new(config.workgroups);
                        search(tree, &config, scanner, &queries)
                    })
                },
            );

            group.bench_with_input(BenchmarkId::new("sequential::brute_force", i), &tree, |b, tree| {
                b.iter(|| {
                    queries
                        .iter()
                        .map(|query| brute_force(tree.leaves(), query).hits)
                        .sum::<u64>()
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
