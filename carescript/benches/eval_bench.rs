use criterion::{black_box, criterion_group, criterion_main, Criterion};
use carescript::script::{Interpreter, Value};

const LOOP: &str = r#"@ main [n]
set(i, 0)
set(total, 0)
set(i, $i + 1)
set(total, $total + $i * 2)
if($i less $n)
  goto(3)
endif()
return($total)
"#;

fn bench_expressions(c: &mut Criterion) {
    let mut interp = Interpreter::new();
    let mut g = c.benchmark_group("evaluate");

    g.bench_function("arithmetic", |b| {
        b.iter(|| interp.evaluate(black_box("(1 + 2) * 3 ^ 2 - 10 / 4 % 3")).unwrap())
    });
    g.bench_function("comparison_chain", |b| {
        b.iter(|| interp.evaluate(black_box("1 less 2 and 3 more 2 or not 0")).unwrap())
    });
    g.bench_function("list_literal", |b| {
        b.iter(|| interp.evaluate(black_box("[1, \"two\", [3, 4]] + [5]")).unwrap())
    });

    g.finish();
}

fn bench_labels(c: &mut Criterion) {
    let mut interp = Interpreter::new();
    interp.preprocess(LOOP).unwrap();
    interp.save("loop");

    let mut g = c.benchmark_group("run");
    g.bench_function("loop_100", |b| {
        b.iter(|| interp.run("main", vec![black_box(Value::Number(100.0))]).unwrap())
    });
    g.bench_function("preprocess", |b| {
        b.iter(|| {
            interp.load("loop").unwrap();
            interp.preprocess(black_box(LOOP)).map(|_| ()).unwrap()
        })
    });
    g.finish();
}

criterion_group!(benches, bench_expressions, bench_labels);
criterion_main!(benches);
