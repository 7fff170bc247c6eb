//! Criterion benchmarks for the core pipeline.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lazyjax::{grad, Array, Shape};

fn bench_fused_pointwise(c: &mut Criterion) {
    let x = Array::from_vec(
        (0..4096).map(|v| v as f32 * 0.01).collect(),
        Shape::new(vec![4096]),
    )
    .unwrap();
    c.bench_function("fused_pointwise_chain", |b| {
        b.iter(|| {
            let y = x
                .sin()
                .unwrap()
                .mul(&x)
                .unwrap()
                .add_scalar(1.0)
                .unwrap();
            black_box(y.data().unwrap())
        })
    });
}

fn bench_matmul(c: &mut Criterion) {
    let a = Array::from_vec(
        (0..64 * 64).map(|v| (v as f32 * 0.1).sin()).collect(),
        Shape::new(vec![64, 64]),
    )
    .unwrap();
    let b = Array::from_vec(
        (0..64 * 64).map(|v| (v as f32 * 0.1).cos()).collect(),
        Shape::new(vec![64, 64]),
    )
    .unwrap();
    c.bench_function("matmul_64", |bch| {
        bch.iter(|| black_box(a.matmul(&b).unwrap().data().unwrap()))
    });
}

fn bench_grad(c: &mut Criterion) {
    let x = Array::from_vec(
        (0..64).map(|v| v as f32 * 0.1).collect(),
        Shape::new(vec![64]),
    )
    .unwrap();
    c.bench_function("grad_sum_squares_64", |b| {
        b.iter(|| {
            let df = grad(|x: &Array| x.mul(x)?.sum_all());
            black_box(df(&x).unwrap().data().unwrap())
        })
    });
}

criterion_group!(benches, bench_fused_pointwise, bench_matmul, bench_grad);
criterion_main!(benches);
