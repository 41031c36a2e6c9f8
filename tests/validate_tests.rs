mod common;

use ringvm::parser::encoding::CodeBuilder;
use ringvm::parser::module::{ExportIndex, FunctionType, GlobalType, Locals, Module, ValueType};
use ringvm::parser::opcode::Opcode;
use ringvm::parser::{validate_code, validate_module, ValidationErrorKind};
use ringvm::runtime::{EngineConfig, Imports, Instance, InstantiateError};
use rstest::rstest;

use ValueType::*;

fn module(params: &[ValueType], results: &[ValueType], code: Vec<u8>) -> Module {
    let mut module = Module::new("validate");
    module.add_function(FunctionType::new(params, results), Locals::new(vec![(1, I32)]), code);
    module
}

#[rstest]
#[case::underflow(CodeBuilder::new().op(Opcode::I32Add).end(), &[], "operand_stack_underflow", 0)]
#[case::numeric_mismatch(
    CodeBuilder::new().i32_const(1).i64_const(1).op(Opcode::I32Add).end(),
    &[I32],
    "numeric_operand_type_mismatch",
    4
)]
#[case::missing_end(CodeBuilder::new().i32_const(1), &[I32], "missing_end", 2)]
#[case::trailing_code(CodeBuilder::new().end().op(Opcode::Nop), &[], "trailing_code_after_end", 1)]
#[case::if_condition(
    CodeBuilder::new().i64_const(0).if_(None).end().end(),
    &[],
    "if_cond_type_not_i32",
    2
)]
#[case::if_missing_else(
    CodeBuilder::new().i32_const(1).if_(Some(I32)).i32_const(1).end().end(),
    &[I32],
    "if_missing_else",
    6
)]
#[case::label_out_of_range(CodeBuilder::new().br(1).end(), &[], "illegal_label_index", 0)]
#[case::function_result(CodeBuilder::new().end(), &[I32], "end_result_mismatch", 0)]
#[case::local_index(CodeBuilder::new().local_get(3).op(Opcode::Drop).end(), &[], "illegal_local_index", 0)]
#[case::select_operands(
    CodeBuilder::new().i32_const(1).i64_const(2).i32_const(0).op(Opcode::Select).op(Opcode::Drop).end(),
    &[],
    "select_type_mismatch",
    6
)]
#[case::br_value(
    CodeBuilder::new().block(Some(I32)).i64_const(0).br(0).end().end(),
    &[I32],
    "br_value_type_mismatch",
    4
)]
#[case::opbase(CodeBuilder::new().byte(0xff).end(), &[], "illegal_opbase", 0)]
#[case::local_set(CodeBuilder::new().f32_const(1.0).local_set(0).end(), &[], "local_set_type_mismatch", 5)]
fn test_rejected_bodies(
    #[case] code: CodeBuilder,
    #[case] results: &[ValueType],
    #[case] code_name: &str,
    #[case] offset: u32,
) {
    common::init_tracing();
    let module = module(&[], results, code.build());
    let err = validate_code(&module, 0).unwrap_err();
    assert_eq!(err.code(), code_name, "{}", err);
    assert_eq!(err.offset, offset, "{}", err);

    // the same input gives the same record
    assert_eq!(validate_code(&module, 0).unwrap_err(), err);
}

#[rstest]
#[case::unreachable_tail(CodeBuilder::new().op(Opcode::Unreachable).op(Opcode::I32Add).end(), &[I32])]
#[case::operands_after_br_are_unknown(
    CodeBuilder::new().block(Some(I32)).i32_const(1).br(0).op(Opcode::I32Add).end().end(),
    &[I32]
)]
#[case::loop_label_has_no_values(
    CodeBuilder::new().loop_(None).local_get(0).br_if(0).end().end(),
    &[]
)]
#[case::if_else_results(
    CodeBuilder::new().local_get(0).if_(Some(F64)).f64_const(1.0).else_().f64_const(2.0).end().end(),
    &[F64]
)]
#[case::br_table(
    CodeBuilder::new().block(None).block(None).local_get(0).br_table(&[0, 1], 1).end().end().end(),
    &[]
)]
fn test_accepted_bodies(#[case] code: CodeBuilder, #[case] results: &[ValueType]) {
    common::init_tracing();
    let module = module(&[], results, code.build());
    assert_eq!(validate_code(&module, 0), Ok(()));
}

#[test]
fn test_offsets_are_module_relative() {
    let mut module = Module::new("offsets");
    let first = CodeBuilder::new().i32_const(1).op(Opcode::Drop).end().build();
    let first_len = first.len() as u32;
    module.add_function(FunctionType::new(&[], &[]), Locals::empty(), first);
    module.add_function(
        FunctionType::new(&[], &[]),
        Locals::empty(),
        CodeBuilder::new().op(Opcode::Nop).op(Opcode::I64Eqz).end().build(),
    );
    let err = validate_module(&module).unwrap_err();
    assert_eq!(err.offset, first_len + 1);
    assert!(matches!(
        err.kind,
        ValidationErrorKind::OperandStackUnderflow {
            op_code_name: "i64.eqz",
            stack_size_actual: 0,
            stack_size_required: 1
        }
    ));
}

#[test]
fn test_immutable_global_and_serialized_record() {
    let mut module = Module::new("globals");
    let g = module.add_global(
        GlobalType {
            value_type: I32,
            mutable: false,
        },
        ringvm::parser::module::ConstExpr::I32(1),
    );
    module.add_function(
        FunctionType::new(&[], &[]),
        Locals::empty(),
        CodeBuilder::new().i32_const(2).global_set(g).end().build(),
    );
    let err = validate_code(&module, 0).unwrap_err();
    assert_eq!(err.code(), "immutable_global_set");

    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["offset"], 2);
    assert_eq!(json["kind"]["code"], "immutable_global_set");
    assert_eq!(json["kind"]["global_index"], 0);
}

#[test]
fn test_imported_function_is_not_validated() {
    let mut module = Module::new("imports");
    module.add_import_function("env", "f", FunctionType::new(&[], &[]));
    let err = validate_code(&module, 0).unwrap_err();
    assert_eq!(err.code(), "not_local_function");
}

#[test]
fn test_instantiation_reports_invalid_function() {
    common::init_tracing();
    let mut module = module(&[], &[], CodeBuilder::new().end().build());
    let bad = module.add_function(
        FunctionType::new(&[], &[I32]),
        Locals::empty(),
        CodeBuilder::new().f32_const(0.5).end().build(),
    );
    module.add_export("bad", ExportIndex::Function(bad));
    match Instance::new(module, EngineConfig::default(), Imports::new()) {
        Err(InstantiateError::Validation { function_index, error }) => {
            assert_eq!(function_index, bad);
            assert_eq!(error.code(), "end_result_mismatch");
        }
        other => panic!("expected a validation failure, got {:?}", other.err()),
    }
}
