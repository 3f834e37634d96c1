use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gptrank_core::kernels::{self, portable};
use gptrank_core::probability::{self, Normalization};
use gptrank_core::search::find_best;
use gptrank_core::AlignedBuffer;

const VOCAB_SIZES: &[usize] = &[6000, 32000, 50257];

/// Deterministic logits in roughly [-8, 8].
fn logits(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 16_000) as f32 / 1000.0 - 8.0
        })
        .collect()
}

fn bench_reductions(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernels/reduce");
    for &vocab in VOCAB_SIZES {
        let row = logits(vocab, 1);
        let other = logits(vocab, 2);
        group.bench_with_input(BenchmarkId::new("inner_product", vocab), &vocab, |b, _| {
            b.iter(|| kernels::inner_product(black_box(&row), black_box(&other)));
        });
        group.bench_with_input(BenchmarkId::new("inner_product_scalar", vocab), &vocab, |b, _| {
            b.iter(|| portable::inner_product(black_box(&row), black_box(&other)));
        });
        group.bench_with_input(BenchmarkId::new("exp_sum", vocab), &vocab, |b, _| {
            b.iter(|| kernels::exp_sum(black_box(&row)));
        });
        group.bench_with_input(BenchmarkId::new("exp_sum_scalar", vocab), &vocab, |b, _| {
            b.iter(|| portable::exp_sum(black_box(&row)));
        });
    }
    group.finish();
}

fn bench_extractor(c: &mut Criterion) {
    let mut group = c.benchmark_group("probability");
    for &vocab in VOCAB_SIZES {
        let row = logits(vocab, 3);
        let normalizations = [
            ("raw", Normalization::Raw),
            ("max_shifted", Normalization::MaxShifted),
        ];
        for (label, normalization) in normalizations {
            group.bench_with_input(
                BenchmarkId::new(format!("probability_of/{label}"), vocab),
                &vocab,
                |b, _| b.iter(|| normalization.probability_of(black_box(42), black_box(&row))),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("argmax/{label}"), vocab),
                &vocab,
                |b, _| b.iter(|| normalization.argmax_with_probability(black_box(&row))),
            );
        }
        group.bench_with_input(BenchmarkId::new("argmax/linear_scan", vocab), &vocab, |b, _| {
            b.iter(|| {
                let idx = portable::argmax(black_box(&row)).unwrap_or(0);
                probability::probability_of(idx as u32, &row)
            });
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let dim = 768;
    for &rows in &[1024usize, 6000] {
        let table = AlignedBuffer::with_shape(rows, dim, Some(&logits(rows * dim, 4)))
            .expect("bench table");
        let query = logits(dim, 5);
        group.bench_with_input(BenchmarkId::new("find_best", rows), &rows, |b, _| {
            b.iter(|| find_best(black_box(&query), &table));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reductions, bench_extractor, bench_search);
criterion_main!(benches);
