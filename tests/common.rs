//! Common test utilities shared between integration tests

#![allow(dead_code)]

use std::sync::Once;

use ringvm::parser::module::{ExportIndex, FunctionType, Limits, Locals, Module, ValueType};
use ringvm::runtime::{ConventionKind, EngineConfig, SlotRange};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Send library logs to the test writer; `RUST_LOG` picks the filter.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Ring layouts as (begin, end, every type cached); the i32-only layouts
/// leave other types on the memory stack.
const RINGS: [Option<(u8, u8, bool)>; 7] = [
    None,
    Some((0, 2, true)),
    Some((0, 4, true)),
    Some((3, 8, true)),
    Some((0, 2, false)),
    Some((1, 5, false)),
    Some((0, 8, false)),
];

/// Conventions, ring layouts and fusion, in every combination.
pub fn configs() -> Vec<EngineConfig> {
    let mut configs = Vec::new();
    for convention in [ConventionKind::Chained, ConventionKind::ByRef] {
        for ring in RINGS {
            for fusion in [false, true] {
                let mut config = EngineConfig::default()
                    .with_convention(convention)
                    .with_fusion(fusion);
                match ring {
                    Some((begin, end, true)) => config = config.with_ring(begin, end),
                    Some((begin, end, false)) => config.stack_top.i32 = SlotRange::new(begin, end),
                    None => {}
                }
                configs.push(config);
            }
        }
    }
    configs
}

/// A module with one page of memory and a single function exported as `run`.
pub fn single_function(params: &[ValueType], results: &[ValueType], locals: Locals, code: Vec<u8>) -> Module {
    let mut module = Module::new("test");
    module.add_memory(Limits { min: 1, max: None });
    let f = module.add_function(FunctionType::new(params, results), locals, code);
    module.add_export("run", ExportIndex::Function(f));
    module
}
