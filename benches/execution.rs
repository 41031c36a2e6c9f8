//! Execution benchmarks for the threaded-code engine.
//!
//! These benchmarks measure instruction dispatch under each calling
//! convention, ring layout and fusion setting, plus call overhead.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ringvm::parser::encoding::CodeBuilder;
use ringvm::parser::module::{ExportIndex, FunctionType, Limits, Locals, Module, ValueType};
use ringvm::parser::opcode::Opcode;
use ringvm::runtime::{ConventionKind, EngineConfig, Imports, Instance, Value};
use std::hint::black_box;

use ValueType::*;

/// run(n): sum of 0..n in a counted loop
fn sum_loop() -> Module {
    let mut module = Module::new("sum_loop");
    let code = CodeBuilder::new()
        .loop_(None)
        .local_get(1)
        .local_get(2)
        .op(Opcode::I32Add)
        .local_set(1)
        .local_get(2)
        .i32_const(1)
        .op(Opcode::I32Add)
        .local_tee(2)
        .local_get(0)
        .op(Opcode::I32LtU)
        .br_if(0)
        .end()
        .local_get(1)
        .end()
        .build();
    let f = module.add_function(FunctionType::new(&[I32], &[I32]), Locals::new(vec![(2, I32)]), code);
    module.add_export("run", ExportIndex::Function(f));
    module
}

/// fib(n) by double recursion
fn fib_recursive() -> Module {
    let mut module = Module::new("fib_recursive");
    let code = CodeBuilder::new()
        .local_get(0)
        .i32_const(2)
        .op(Opcode::I32LtU)
        .if_(Some(I32))
        .local_get(0)
        .else_()
        .local_get(0)
        .i32_const(1)
        .op(Opcode::I32Sub)
        .call(0)
        .local_get(0)
        .i32_const(2)
        .op(Opcode::I32Sub)
        .call(0)
        .op(Opcode::I32Add)
        .end()
        .end()
        .build();
    let f = module.add_function(FunctionType::new(&[I32], &[I32]), Locals::empty(), code);
    module.add_export("fib", ExportIndex::Function(f));
    module
}

/// fill(n): store n words then read them back, returning their sum
fn memory_walk() -> Module {
    let mut module = Module::new("memory_walk");
    module.add_memory(Limits { min: 1, max: None });
    let code = CodeBuilder::new()
        .loop_(None)
        .local_get(1)
        .i32_const(2)
        .op(Opcode::I32Shl)
        .local_get(1)
        .mem_natural(Opcode::I32Store, 0)
        .local_get(1)
        .i32_const(1)
        .op(Opcode::I32Add)
        .local_tee(1)
        .local_get(0)
        .op(Opcode::I32LtU)
        .br_if(0)
        .end()
        .loop_(None)
        .local_get(1)
        .i32_const(1)
        .op(Opcode::I32Sub)
        .local_tee(1)
        .i32_const(2)
        .op(Opcode::I32Shl)
        .mem_natural(Opcode::I32Load, 0)
        .local_get(2)
        .op(Opcode::I32Add)
        .local_set(2)
        .local_get(1)
        .br_if(0)
        .end()
        .local_get(2)
        .end()
        .build();
    let f = module.add_function(FunctionType::new(&[I32], &[I32]), Locals::new(vec![(2, I32)]), code);
    module.add_export("fill", ExportIndex::Function(f));
    module
}

fn configs() -> Vec<(String, EngineConfig)> {
    let mut configs = Vec::new();
    for (name, convention) in [("chained", ConventionKind::Chained), ("byref", ConventionKind::ByRef)] {
        for (ring_name, ring) in [("mem", None), ("ring4", Some((0, 4))), ("ring8", Some((0, 8)))] {
            for fusion in [false, true] {
                let mut config = EngineConfig::default().with_convention(convention).with_fusion(fusion);
                if let Some((begin, end)) = ring {
                    config = config.with_ring(begin, end);
                }
                let label = format!("{}/{}{}", name, ring_name, if fusion { "/fused" } else { "" });
                configs.push((label, config));
            }
        }
    }
    configs
}

fn instantiate(module: Module, config: &EngineConfig) -> Instance {
    Instance::new(module, config.clone(), Imports::new()).expect("Failed to instantiate")
}

/// Verify module correctness under every configuration before benchmarking
fn verify_modules() {
    for (label, config) in configs() {
        let mut instance = instantiate(sum_loop(), &config);
        assert_eq!(
            instance.invoke("run", &[Value::I32(1000)]),
            Ok(vec![Value::I32(499_500)]),
            "sum_loop(1000) under {}",
            label
        );

        let mut instance = instantiate(fib_recursive(), &config);
        for (n, expected) in [(0, 0), (1, 1), (10, 55), (20, 6765)] {
            assert_eq!(
                instance.invoke("fib", &[Value::I32(n)]),
                Ok(vec![Value::I32(expected)]),
                "fib({}) under {}",
                n,
                label
            );
        }

        let mut instance = instantiate(memory_walk(), &config);
        assert_eq!(
            instance.invoke("fill", &[Value::I32(100)]),
            Ok(vec![Value::I32(4950)]),
            "fill(100) under {}",
            label
        );
    }
    println!("All module correctness checks passed.");
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    for (label, config) in configs() {
        group.bench_with_input(BenchmarkId::new("sum_loop", &label), &config, |b, config| {
            let mut instance = instantiate(sum_loop(), config);
            b.iter(|| black_box(instance.invoke("run", &[Value::I32(100_000)]).unwrap()));
        });
    }
    group.finish();
}

fn bench_call_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_overhead");
    for (label, config) in configs() {
        group.bench_with_input(BenchmarkId::new("fib_recursive", &label), &config, |b, config| {
            let mut instance = instantiate(fib_recursive(), config);
            b.iter(|| black_box(instance.invoke("fib", &[Value::I32(20)]).unwrap()));
        });
    }
    group.finish();
}

fn bench_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory");
    for (label, config) in configs() {
        group.bench_with_input(BenchmarkId::new("memory_walk", &label), &config, |b, config| {
            let mut instance = instantiate(memory_walk(), config);
            b.iter(|| black_box(instance.invoke("fill", &[Value::I32(4096)]).unwrap()));
        });
    }
    group.finish();
}

// Run verification before benchmarks
fn verify_and_bench(c: &mut Criterion) {
    verify_modules();
    bench_dispatch(c);
    bench_call_overhead(c);
    bench_memory(c);
}

criterion_group!(benches, verify_and_bench);
criterion_main!(benches);
