//! Boundary crossing benchmarks
//!
//! Measures the cost of a call against the fixture library for the main
//! value shapes:
//! - Scalars, which never touch the heap
//! - Strings under `none` and `full` transfer
//! - Length-parameter arrays of growing size
//! - Object references and host virtual functions
//! - The full conformance matrix

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gimarshal_config::RuntimeConfig;
use gimarshal_runtime::{conformance, host_method, Boundary, HostValue};

fn boundary() -> Boundary {
    let config = RuntimeConfig {
        audit_enabled: false,
        ..RuntimeConfig::default()
    };
    Boundary::with_fixture(config).unwrap()
}

// ============================================================================
// Scalars and strings
// ============================================================================

fn bench_scalar_calls(c: &mut Criterion) {
    let mut b = boundary();
    c.bench_function("int32_in_max", |bench| {
        bench.iter(|| b.invoke("int32_in_max", black_box(&[HostValue::Int(i32::MAX as i64)])))
    });
    c.bench_function("int_three_in_three_out", |bench| {
        let args = [HostValue::Int(1), HostValue::Int(2), HostValue::Int(3)];
        bench.iter(|| b.invoke("int_three_in_three_out", black_box(&args)))
    });
}

fn bench_strings(c: &mut Criterion) {
    let mut b = boundary();
    let mut group = c.benchmark_group("utf8");
    for function in ["utf8_none_return", "utf8_full_return", "utf8_none_out", "utf8_full_out"] {
        group.bench_function(function, |bench| bench.iter(|| b.invoke(black_box(function), &[])));
    }
    group.finish();
}

// ============================================================================
// Containers
// ============================================================================

fn bench_array_in_sum(c: &mut Criterion) {
    let mut b = boundary();
    let mut group = c.benchmark_group("array_in_sum");
    for size in [16i64, 256, 4096] {
        let ints = HostValue::ints(0..size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &ints, |bench, ints| {
            bench.iter(|| b.invoke("array_in_sum", std::slice::from_ref(ints)))
        });
    }
    group.finish();
}

fn bench_string_map(c: &mut Criterion) {
    let mut b = boundary();
    c.bench_function("map_utf8_full_return", |bench| {
        bench.iter(|| b.invoke("map_utf8_full_return", &[]))
    });
}

// ============================================================================
// Objects
// ============================================================================

fn bench_object_refs(c: &mut Criterion) {
    let mut b = boundary();
    let id = b.new_object("Object").unwrap();
    c.bench_function("object_none_in", |bench| {
        bench.iter(|| b.invoke("object_none_in", black_box(&[HostValue::Object(id)])))
    });
    c.bench_function("object_full_return", |bench| {
        bench.iter(|| {
            let output = b.invoke("object_full_return", &[]).unwrap();
            b.release(output.ret()).unwrap();
        })
    });
}

fn bench_host_vfunc(c: &mut Criterion) {
    let mut b = boundary();
    let class = b.subclass("HostObject", "Object", &[])
        .unwrap()
        .vfunc(
            "vfunc_return_value_and_one_out_parameter",
            host_method(|_, _| Ok(vec![HostValue::Int(42), HostValue::Int(43)])),
        )
        .build()
        .unwrap();
    let id = b.instantiate(&class).unwrap();
    c.bench_function("host_vfunc_return_and_out", |bench| {
        bench.iter(|| b.invoke_method(id, "object_vfunc_return_value_and_one_out_parameter", &[]))
    });
}

// ============================================================================
// Conformance matrix
// ============================================================================

fn bench_conformance(c: &mut Criterion) {
    let mut group = c.benchmark_group("conformance");
    group.sample_size(10);
    for parallel in [false, true] {
        let config = RuntimeConfig {
            parallel,
            ..RuntimeConfig::default()
        };
        let label = if parallel { "parallel" } else { "sequential" };
        group.bench_function(label, |bench| bench.iter(|| conformance::run(black_box(&config))));
    }
    group.finish();
}

criterion_group!(scalars, bench_scalar_calls, bench_strings);
criterion_group!(containers, bench_array_in_sum, bench_string_map);
criterion_group!(objects, bench_object_refs, bench_host_vfunc);
criterion_group!(matrix, bench_conformance);
criterion_main!(scalars, containers, objects, matrix);
