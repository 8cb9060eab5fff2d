use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use toros_pipeline::frames::{combine, flat_correct, CombineMethod, Frame, LowFlatPolicy};

fn synthetic_stack(count: usize, size: usize) -> Vec<Frame> {
    (0..count)
        .map(|i| {
            let pixels = (0..size * size)
                .map(|p| 100.0 + ((p * 31 + i * 17) % 97) as f32)
                .collect();
            Frame::from_pixels(size, size, pixels).unwrap()
        })
        .collect()
}

fn bench_combine(c: &mut Criterion) {
    let mut group = c.benchmark_group("combine");

    for count in [5usize, 15] {
        let stack = synthetic_stack(count, 256);
        group.bench_with_input(BenchmarkId::new("median", count), &stack, |b, stack| {
            b.iter(|| combine(black_box(stack), CombineMethod::Median).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("average", count), &stack, |b, stack| {
            b.iter(|| combine(black_box(stack), CombineMethod::Average).unwrap());
        });
    }

    group.finish();
}

fn bench_flat_correct(c: &mut Criterion) {
    let mut group = c.benchmark_group("calibrate");

    let flat = synthetic_stack(1, 512).remove(0);
    let light = Frame::filled(512, 512, 1000.0);
    group.bench_function("flat_correct_512", |b| {
        b.iter(|| {
            let mut frame = light.clone();
            flat_correct(&mut frame, black_box(&flat), 0.9, LowFlatPolicy::PassThrough).unwrap();
            frame
        });
    });

    group.finish();
}

criterion_group!(benches, bench_combine, bench_flat_correct);
criterion_main!(benches);
