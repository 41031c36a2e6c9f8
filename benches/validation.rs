use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ringvm::parser::encoding::CodeBuilder;
use ringvm::parser::module::{FunctionType, Locals, Module, ValueType};
use ringvm::parser::opcode::Opcode;
use ringvm::parser::validate_module;
use ringvm::runtime::translate::compile;
use ringvm::runtime::{ConventionKind, EngineConfig};
use std::hint::black_box;

const BINARY: &[Opcode] = &[
    Opcode::I32Add,
    Opcode::I32Sub,
    Opcode::I32Mul,
    Opcode::I32And,
    Opcode::I32Xor,
    Opcode::I32LtS,
];

/// A straight-line body of roughly `size` instructions mixing locals,
/// arithmetic and nested blocks.
fn body(rng: &mut StdRng, size: usize) -> Vec<u8> {
    let mut b = CodeBuilder::new().local_get(0);
    for i in 0..size / 4 {
        b = match rng.gen_range(0..4) {
            0 => b.local_get(rng.gen_range(0..4)).op(BINARY[rng.gen_range(0..BINARY.len())]),
            1 => b.i32_const(rng.gen_range(-1000..1000)).op(BINARY[rng.gen_range(0..BINARY.len())]),
            2 => b.local_tee(rng.gen_range(1..4)),
            _ => b
                .block(Some(ValueType::I32))
                .local_get(rng.gen_range(0..4))
                .local_get(0)
                .br_if(0)
                .end()
                .op(Opcode::I32Add),
        };
        if i % 32 == 31 {
            b = b.local_set(1).loop_(None).local_get(1).local_get(2).op(Opcode::I32Xor).local_set(3).end().local_get(1);
        }
    }
    b.end().build()
}

fn module(functions: usize, size: usize) -> Module {
    let mut rng = StdRng::seed_from_u64(7);
    let mut module = Module::new("validation");
    for _ in 0..functions {
        module.add_function(
            FunctionType::new(&[ValueType::I32], &[ValueType::I32]),
            Locals::new(vec![(3, ValueType::I32)]),
            body(&mut rng, size),
        );
    }
    module
}

fn code_size(module: &Module) -> u64 {
    module.code.iter().map(|body| body.code.len() as u64).sum()
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");
    for size in [100, 1_000, 10_000] {
        let module = module(16, size);
        validate_module(&module).expect("generated module validates");
        group.throughput(Throughput::Bytes(code_size(&module)));
        group.bench_with_input(BenchmarkId::new("module", size), &module, |b, module| {
            b.iter(|| black_box(validate_module(module)))
        });
    }
    group.finish();
}

fn bench_translate(c: &mut Criterion) {
    let module = module(1, 10_000);
    let mut group = c.benchmark_group("translate");
    group.throughput(Throughput::Bytes(code_size(&module)));
    for (name, config) in [
        ("chained", EngineConfig::default()),
        ("chained/ring8/fused", EngineConfig::default().with_ring(0, 8).with_fusion(true)),
        (
            "byref/ring8/fused",
            EngineConfig::default()
                .with_convention(ConventionKind::ByRef)
                .with_ring(0, 8)
                .with_fusion(true),
        ),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &config, |b, config| {
            b.iter(|| black_box(compile(&module, 0, config).expect("translates")))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_validate, bench_translate);
criterion_main!(benches);
