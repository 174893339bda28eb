//! Benchmarks for lispjit compilation and reading.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use lispjit::ast::Expr;
use lispjit::{compiler, reader};

/// Benchmark compile time for varying program sizes, built as a nested
/// chain of `add1` calls so each extra level adds exactly one primitive
/// call to the tree.
fn bench_compile_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_time");

    for &depth in &[1, 8, 16, 32, 64, 128] {
        let program = nested_add1(depth);
        group.throughput(Throughput::Elements(depth as u64));

        group.bench_function(format!("{}_add1", depth), |b| {
            b.iter(|| {
                let result = compiler::compile(black_box(&program), 1 << 16);
                black_box(result)
            })
        });
    }

    group.finish();
}

/// Benchmark reading source text into an [`Expr`] tree.
fn bench_reader(c: &mut Criterion) {
    let source = "(labels ((fact (code (n) (if (zero? n) 1 (+ n (labelcall fact (sub1 n))))))) \
                  (labelcall fact 5))";

    c.bench_function("read_small_program", |b| {
        b.iter(|| {
            let result = reader::read(black_box(source));
            black_box(result)
        })
    });
}

/// Benchmark end-to-end execution (compile + map executable + call).
fn bench_run(c: &mut Criterion) {
    let program = nested_add1(16);

    c.bench_function("run_nested_add1_16", |b| {
        b.iter(|| {
            let result = lispjit::run_expr(black_box(&program), 8);
            black_box(result)
        })
    });
}

fn nested_add1(depth: usize) -> Expr {
    (0..depth).fold(Expr::Fixnum(0), |acc, _| Expr::list(vec![Expr::atom("add1"), acc]))
}

criterion_group!(benches, bench_compile_time, bench_reader, bench_run);
criterion_main!(benches);
