//! Translation of validated function bodies into threaded code.
//!
//! The translator walks a body once, keeping a static model of the operand
//! stack (its value types and which of the top values live in the ring) and
//! of the enclosing labels. Each instruction becomes at most a few records:
//! the operator's handler, specialized on the current ring position when its
//! operands are cached, preceded by a spill when values have to reach the
//! operand stack first.
//!
//! Branches name an entry of the target table. Forward targets are recorded
//! with a pending instruction pointer and patched when their block ends.
//! Code after an unconditional transfer is never executed and is skipped up
//! to the `else` or `end` that makes it reachable again.

use std::marker::PhantomData;

use tracing::debug;

use crate::parser::instruction::{decode, BlockType, Instruction};
use crate::parser::module::{FunctionType, Module, ValueType};
use crate::parser::opcode::Opcode;
use crate::parser::reader::CodeReader;
use crate::parser::validate::BlockKind;
use crate::parser::{ValidationError, ValidationErrorKind};
use crate::runtime::config::{ConfigError, ConventionKind, EngineConfig, StackTop};
use crate::runtime::dispatch::{BranchTarget, ByRef, Chained, CompiledFunction, Convention, Handler, Imm, Instr};
use crate::runtime::fuse::{self, Fused, Item};
use crate::runtime::ops::{self, control, memory, variable, Handlers};
use crate::runtime::ring::{spill, RingLayout, RingState};
use crate::runtime::Value;

/// Counters gathered while translating one function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslateStats {
    /// Operators emitted in their ring form
    pub ring_hits: usize,
    /// Spill records emitted
    pub spills: usize,
    /// Fused patterns emitted
    pub fused: usize,
}

struct Label {
    kind: BlockKind,
    results: Vec<ValueType>,
    /// Static operand stack height at entry
    height: usize,
    /// First record of the label's body; the continuation of a loop
    start: u32,
    /// Targets to patch with the record after `end`
    fixups: Vec<u32>,
    /// Target taken by an `if` whose condition is zero
    else_target: Option<u32>,
    unreachable: bool,
}

struct Translator<'m, C> {
    module: &'m Module,
    stack_top: StackTop,
    ring: RingState,
    code: Vec<Instr>,
    targets: Vec<BranchTarget>,
    fused: Vec<Fused>,
    local_types: Vec<ValueType>,
    types: Vec<ValueType>,
    max_height: usize,
    labels: Vec<Label>,
    // nesting depth of blocks inside skipped code
    skip: usize,
    // offset of the item being translated
    offset: u32,
    stats: TranslateStats,
    convention: PhantomData<C>,
}

/// Translate function `function_index` with the convention `config` selects.
pub fn compile(module: &Module, function_index: u32, config: &EngineConfig) -> Result<CompiledFunction, ValidationError> {
    match config.convention {
        ConventionKind::Chained => translate::<Chained>(module, function_index, config),
        ConventionKind::ByRef => translate::<ByRef>(module, function_index, config),
    }
}

/// Ring handlers exist for slots below `RING_SLOTS` only.
fn check_ring_layout(stack_top: &StackTop) -> Result<(), ValidationError> {
    stack_top.validate().map_err(|err| {
        let (value_type, begin, end) = match err {
            ConfigError::RangeOutOfBounds { value_type, begin, end }
            | ConfigError::RangeMismatch {
                value_type, begin, end, ..
            } => (value_type, begin, end),
            _ => (ValueType::I32, stack_top.i32.begin, stack_top.i32.end),
        };
        ValidationError::new(0, ValidationErrorKind::UnsupportedRingLayout { value_type, begin, end })
    })
}

/// Translate a body that has already passed validation.
pub fn translate<C: Convention>(
    module: &Module,
    function_index: u32,
    config: &EngineConfig,
) -> Result<CompiledFunction, ValidationError> {
    check_ring_layout(&config.stack_top)?;
    let body = module.body(function_index).ok_or_else(|| {
        ValidationError::new(
            0,
            ValidationErrorKind::InvalidFunctionIndex {
                function_index,
                all_function_size: module.all_function_count(),
            },
        )
    })?;
    let function_type = module.function_type(function_index).ok_or_else(|| {
        ValidationError::new(
            body.offset,
            ValidationErrorKind::IllegalTypeIndex {
                type_index: module.function_type_index(function_index).unwrap_or(u32::MAX),
                all_type_count: module.types.len(),
            },
        )
    })?;

    let mut reader = CodeReader::new(&body.code, body.offset);
    let mut decoded = Vec::new();
    while !reader.is_empty() {
        let offset = reader.offset();
        decoded.push((offset, decode(&mut reader)?));
    }
    let items = if config.fusion {
        fuse::fuse(decoded)
    } else {
        fuse::plain(decoded)
    };

    let layout = RingLayout::from_stack_top(&config.stack_top);
    let mut translator = Translator::<C>::new(module, config.stack_top, layout, body.local_types(function_type), function_type);
    for item in items {
        translator.item(item)?;
        if translator.labels.is_empty() {
            break;
        }
    }

    let func = translator.finish(function_index, function_type, layout);
    debug!(
        function_index,
        records = func.code.len(),
        operand_stack_max = func.operand_stack_max,
        ring_hits = func.stats.ring_hits,
        spills = func.stats.spills,
        fused = func.stats.fused,
        "translated function"
    );
    Ok(func)
}

impl<'m, C: Convention> Translator<'m, C> {
    fn new(
        module: &'m Module,
        stack_top: StackTop,
        layout: RingLayout,
        local_types: Vec<ValueType>,
        function_type: &FunctionType,
    ) -> Self {
        let mut translator = Translator {
            module,
            stack_top,
            ring: RingState::new(layout),
            code: vec![],
            targets: vec![],
            fused: vec![],
            local_types,
            types: vec![],
            max_height: 0,
            labels: vec![],
            skip: 0,
            offset: 0,
            stats: TranslateStats::default(),
            convention: PhantomData,
        };
        translator.labels.push(Label {
            kind: BlockKind::Function,
            results: function_type.return_types.clone(),
            height: 0,
            start: 0,
            fixups: vec![],
            else_target: None,
            unreachable: false,
        });
        translator
    }

    fn finish(self, function_index: u32, function_type: &FunctionType, layout: RingLayout) -> CompiledFunction {
        CompiledFunction {
            function_index,
            code: self.code,
            targets: self.targets,
            fused: self.fused,
            local_types: self.local_types,
            param_count: function_type.parameters.len(),
            result_count: function_type.return_types.len(),
            operand_stack_max: self.max_height,
            ring: layout,
            stats: self.stats,
        }
    }

    fn err(&self, kind: ValidationErrorKind) -> ValidationError {
        ValidationError::new(self.offset, kind)
    }

    fn is_unreachable(&self) -> bool {
        self.labels.last().map_or(false, |label| label.unreachable)
    }

    fn item(&mut self, item: Item) -> Result<(), ValidationError> {
        if self.is_unreachable() {
            match &item {
                Item::Plain(_, Instruction::Block(_) | Instruction::Loop(_) | Instruction::If(_)) => {
                    self.skip += 1;
                    return Ok(());
                }
                Item::Plain(_, Instruction::End) if self.skip > 0 => {
                    self.skip -= 1;
                    return Ok(());
                }
                Item::Plain(_, Instruction::Else) if self.skip > 0 => return Ok(()),
                Item::Plain(_, Instruction::Else | Instruction::End) => {}
                _ => return Ok(()),
            }
        }
        match item {
            Item::Plain(offset, instruction) => {
                self.offset = offset;
                self.instruction(instruction)
            }
            Item::Fused { offset, fused, depth } => {
                self.offset = offset;
                self.fused(fused, depth)
            }
        }
    }

    // Records -----------------------------------------------------------------

    fn emit(&mut self, handler: Handler, imm: Imm) {
        self.code.push(Instr { handler, imm });
    }

    fn emit_spill(&mut self, imm: Option<Imm>) {
        if let Some(imm) = imm {
            self.emit(spill::<C>, imm);
            self.stats.spills += 1;
        }
    }

    fn spill_all(&mut self) {
        let imm = self.ring.spill_all();
        self.emit_spill(imm);
    }

    /// Emit an operator, in its ring form when its operands and result can be cached.
    fn op(&mut self, handlers: Handlers, imm: Imm) {
        let cacheable = handlers.push.map_or(true, |t| self.stack_top.caches(t));
        if self.ring.is_enabled() && cacheable && self.ring.cached() >= handlers.pops {
            let pos = if handlers.pops == 0 {
                let (spilled, dest) = self.ring.push_slot();
                self.emit_spill(spilled);
                dest
            } else {
                self.ring.apply(handlers.pops, handlers.push.is_some())
            };
            self.emit(handlers.ring[pos], imm);
            self.stats.ring_hits += 1;
        } else {
            self.spill_all();
            self.emit(handlers.mem, imm);
        }
        self.pop_types(handlers.pops);
        if let Some(t) = handlers.push {
            self.push_type(t);
        }
    }

    /// Emit a conditional branch; only the condition may stay cached.
    fn conditional(&mut self, handlers: Handlers, imm: Imm) {
        if self.ring.cached() >= 1 {
            let spilled = self.ring.spill_below(1);
            self.emit_spill(spilled);
            let pos = self.ring.apply(1, false);
            self.emit(handlers.ring[pos], imm);
            self.stats.ring_hits += 1;
        } else {
            self.emit(handlers.mem, imm);
        }
        self.pop_types(1);
    }

    // Static stack ------------------------------------------------------------

    fn push_type(&mut self, t: ValueType) {
        self.types.push(t);
        self.max_height = self.max_height.max(self.types.len());
    }

    fn pop_types(&mut self, n: usize) {
        let len = self.types.len().saturating_sub(n);
        self.types.truncate(len);
    }

    fn peek_type(&self, depth: usize, op_code_name: &'static str) -> Result<ValueType, ValidationError> {
        let len = self.types.len();
        if depth >= len {
            return Err(self.err(ValidationErrorKind::OperandStackUnderflow {
                op_code_name,
                stack_size_actual: len,
                stack_size_required: depth + 1,
            }));
        }
        Ok(self.types[len - 1 - depth])
    }

    // Labels ------------------------------------------------------------------

    fn enter(&mut self, kind: BlockKind, block_type: BlockType, else_target: Option<u32>) {
        self.labels.push(Label {
            kind,
            results: block_type.result().into_iter().collect(),
            height: self.types.len(),
            start: self.code.len() as u32,
            fixups: vec![],
            else_target,
            unreachable: false,
        });
    }

    /// Target table entry for a branch to the label `depth` levels out.
    fn branch_target(&mut self, depth: u32) -> Result<u32, ValidationError> {
        let count = self.labels.len();
        if depth as usize >= count {
            return Err(self.err(ValidationErrorKind::IllegalLabelIndex {
                label_index: depth,
                all_label_count: count,
            }));
        }
        let id = self.targets.len() as u32;
        let label = &mut self.labels[count - 1 - depth as usize];
        let target = if label.kind == BlockKind::Loop {
            BranchTarget {
                ip: label.start,
                arity: 0,
                height: label.height as u32,
            }
        } else {
            label.fixups.push(id);
            BranchTarget {
                ip: u32::MAX,
                arity: label.results.len() as u32,
                height: label.height as u32,
            }
        };
        self.targets.push(target);
        Ok(id)
    }

    /// Nothing after this point in the current label runs.
    fn set_unreachable(&mut self) {
        if let Some(label) = self.labels.last_mut() {
            label.unreachable = true;
            let height = label.height;
            self.types.truncate(height);
        }
        self.ring.reset();
    }

    fn block_start(&mut self, kind: BlockKind, block_type: BlockType) {
        self.spill_all();
        self.enter(kind, block_type, None);
    }

    fn if_start(&mut self, block_type: BlockType) {
        let else_target = self.targets.len() as u32;
        self.targets.push(BranchTarget {
            ip: u32::MAX,
            arity: 0,
            height: self.types.len().saturating_sub(1) as u32,
        });
        self.conditional(control::inverted_conditional::<C>(), Imm::new(else_target, 0));
        self.enter(BlockKind::If, block_type, Some(else_target));
    }

    fn else_start(&mut self) -> Result<(), ValidationError> {
        let reachable = !self.is_unreachable();
        if reachable {
            self.spill_all();
            let id = self.branch_target(0)?;
            self.emit(control::br::<C>, Imm::new(id, 0));
        }
        let ip = self.code.len() as u32;
        let label = self
            .labels
            .last_mut()
            .ok_or_else(|| ValidationError::new(self.offset, ValidationErrorKind::IllegalElse))?;
        if let Some(else_target) = label.else_target.take() {
            self.targets[else_target as usize].ip = ip;
        }
        label.unreachable = false;
        let height = label.height;
        self.types.truncate(height);
        self.ring.reset();
        Ok(())
    }

    fn end(&mut self) -> Result<(), ValidationError> {
        if !self.is_unreachable() {
            self.spill_all();
        }
        let label = self
            .labels
            .pop()
            .ok_or_else(|| self.err(ValidationErrorKind::TrailingCodeAfterEnd))?;
        let ip = self.code.len() as u32;
        for id in label.else_target.iter().chain(label.fixups.iter()) {
            self.targets[*id as usize].ip = ip;
        }
        self.types.truncate(label.height);
        for t in label.results {
            self.push_type(t);
        }
        self.ring.reset();
        if self.labels.is_empty() {
            self.emit(control::ret, Imm::default());
        }
        Ok(())
    }

    // Instructions ------------------------------------------------------------

    fn local_type(&self, local_index: u32) -> Result<ValueType, ValidationError> {
        self.local_types.get(local_index as usize).copied().ok_or_else(|| {
            self.err(ValidationErrorKind::IllegalLocalIndex {
                local_index,
                all_local_count: self.local_types.len(),
            })
        })
    }

    fn global_type(&self, global_index: u32) -> Result<ValueType, ValidationError> {
        self.module
            .global_type(global_index)
            .map(|global_type| global_type.value_type)
            .ok_or_else(|| {
                self.err(ValidationErrorKind::IllegalGlobalIndex {
                    global_index,
                    all_global_count: self.module.all_global_count(),
                })
            })
    }

    fn call_effect(&mut self, parameters: usize, results: &[ValueType]) {
        self.pop_types(parameters);
        for t in results {
            self.push_type(*t);
        }
    }

    fn instruction(&mut self, instruction: Instruction) -> Result<(), ValidationError> {
        use Instruction::*;

        let op_code_name = instruction.opcode().name();
        let illegal = |op: Opcode| ValidationErrorKind::IllegalOpbase { opbase: op as u8 };

        match instruction {
            Unreachable => {
                self.spill_all();
                self.emit(control::unreachable, Imm::default());
                self.set_unreachable();
            }
            Nop => {}
            Block(block_type) => self.block_start(BlockKind::Block, block_type),
            Loop(block_type) => self.block_start(BlockKind::Loop, block_type),
            If(block_type) => self.if_start(block_type),
            Else => self.else_start()?,
            End => self.end()?,
            Br(depth) => {
                self.spill_all();
                let id = self.branch_target(depth)?;
                self.emit(control::br::<C>, Imm::new(id, 0));
                self.set_unreachable();
            }
            BrIf(depth) => {
                let id = self.branch_target(depth)?;
                self.conditional(control::conditional::<C>(), Imm::new(id, 0));
            }
            BrTable { targets, default } => {
                self.spill_all();
                let first = self.targets.len() as u32;
                for depth in targets.iter().chain(std::iter::once(&default)) {
                    self.branch_target(*depth)?;
                }
                self.emit(control::br_table::<C>, Imm::new(first, targets.len() as u32));
                self.set_unreachable();
            }
            Return => {
                self.spill_all();
                self.emit(control::ret, Imm::default());
                self.set_unreachable();
            }
            Call(function_index) => {
                self.spill_all();
                let function_type = self.module.function_type(function_index).ok_or_else(|| {
                    self.err(ValidationErrorKind::InvalidFunctionIndex {
                        function_index,
                        all_function_size: self.module.all_function_count(),
                    })
                })?;
                let (parameters, results) = (function_type.parameters.len(), function_type.return_types.clone());
                self.emit(control::call::<C>, Imm::new(function_index, 0));
                self.call_effect(parameters, &results);
            }
            CallIndirect { type_index, .. } => {
                self.spill_all();
                let function_type = self.module.types.get(type_index as usize).ok_or_else(|| {
                    self.err(ValidationErrorKind::IllegalTypeIndex {
                        type_index,
                        all_type_count: self.module.types.len(),
                    })
                })?;
                let (parameters, results) = (function_type.parameters.len(), function_type.return_types.clone());
                self.emit(control::call_indirect::<C>, Imm::new(type_index, 0));
                // the element index sits above the arguments
                self.call_effect(parameters + 1, &results);
            }

            Drop => {
                if self.ring.cached() >= 1 {
                    self.ring.apply(1, false);
                } else {
                    self.emit(variable::drop_value::<C>, Imm::default());
                }
                self.pop_types(1);
            }
            Select => {
                let value_type = self.peek_type(1, op_code_name)?;
                self.op(variable::choose::<C>(value_type), Imm::default());
            }

            LocalGet(index) => {
                let t = self.local_type(index)?;
                self.op(variable::get_local::<C>(t), Imm::new(index, 0));
            }
            LocalSet(index) => {
                self.local_type(index)?;
                self.op(variable::set_local::<C>(), Imm::new(index, 0));
            }
            LocalTee(index) => {
                let t = self.local_type(index)?;
                self.op(variable::tee_local::<C>(t), Imm::new(index, 0));
            }
            GlobalGet(index) => {
                let t = self.global_type(index)?;
                self.op(variable::get_global::<C>(t), Imm::new(index, 0));
            }
            GlobalSet(index) => {
                self.global_type(index)?;
                self.op(variable::set_global::<C>(), Imm::new(index, 0));
            }

            Load(op, memarg) => {
                let handlers = memory::load::<C>(op).ok_or_else(|| self.err(illegal(op)))?;
                self.op(handlers, Imm::new(memarg.offset, 0));
            }
            Store(op, memarg) => {
                let handlers = memory::store::<C>(op).ok_or_else(|| self.err(illegal(op)))?;
                self.op(handlers, Imm::new(memarg.offset, 0));
            }
            MemorySize(_) => self.op(memory::size::<C>(), Imm::default()),
            MemoryGrow(_) => self.op(memory::grow::<C>(), Imm::default()),

            I32Const(v) => self.op(variable::constant::<C>(ValueType::I32), Imm::value(Value::I32(v))),
            I64Const(v) => self.op(variable::constant::<C>(ValueType::I64), Imm::value(Value::I64(v))),
            F32Const(bits) => self.op(
                variable::constant::<C>(ValueType::F32),
                Imm::value(Value::F32(f32::from_bits(bits))),
            ),
            F64Const(bits) => self.op(
                variable::constant::<C>(ValueType::F64),
                Imm::value(Value::F64(f64::from_bits(bits))),
            ),
            Numeric(op) => {
                let handlers = ops::numeric::<C>(op).ok_or_else(|| self.err(illegal(op)))?;
                self.op(handlers, Imm::default());
            }
        }
        Ok(())
    }

    fn fused(&mut self, mut fused: Fused, depth: Option<u32>) -> Result<(), ValidationError> {
        let handler: Handler = match fused {
            Fused::IncCmpBrIf { .. } => fuse::inc_cmp_br_if::<C>,
            Fused::PtrIncNeBrIf { .. } => fuse::ptr_inc_ne_br_if::<C>,
            Fused::F64SqrtLoopCmp { .. } => fuse::f64_sqrt_loop_cmp::<C>,
            Fused::MulAddSet { .. } => fuse::mul_add_set::<C>,
        };
        if let Some(depth) = depth {
            self.spill_all();
            let id = self.branch_target(depth)?;
            match &mut fused {
                Fused::IncCmpBrIf { target, .. }
                | Fused::PtrIncNeBrIf { target, .. }
                | Fused::F64SqrtLoopCmp { target, .. } => *target = id,
                Fused::MulAddSet { .. } => {}
            }
        }
        let index = self.fused.len() as u32;
        self.fused.push(fused);
        self.emit(handler, Imm::new(index, 0));
        self.stats.fused += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::encoding::CodeBuilder;
    use crate::parser::module::Locals;
    use crate::parser::validate_code;
    use crate::runtime::dispatch::tests::NoCalls;
    use crate::runtime::dispatch::{run, Activation};
    use crate::runtime::RuntimeError;
    use std::sync::Arc;

    use ValueType::*;

    struct Compiled {
        func: Arc<CompiledFunction>,
    }

    fn compile_body(
        config: &EngineConfig,
        params: &[ValueType],
        results: &[ValueType],
        locals: Locals,
        code: Vec<u8>,
    ) -> Compiled {
        let mut module = Module::new("translate");
        let index = module.add_function(FunctionType::new(params, results), locals, code);
        validate_code(&module, index).unwrap();
        Compiled {
            func: Arc::new(compile(&module, index, config).unwrap()),
        }
    }

    impl Compiled {
        fn call(&self, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
            let mut locals = args.to_vec();
            for t in &self.func.local_types[args.len()..] {
                locals.push(Value::zero(*t));
            }
            let mut ctx = NoCalls;
            let mut act = Activation::new(Arc::clone(&self.func), &mut ctx, locals, None, 0);
            run(&mut act)?;
            Ok(act.stack.drain())
        }
    }

    fn configs() -> Vec<EngineConfig> {
        let mut configs = vec![];
        for convention in [ConventionKind::Chained, ConventionKind::ByRef] {
            let base = EngineConfig::default().with_convention(convention);
            configs.push(base.clone());
            configs.push(base.clone().with_ring(0, 4));
            configs.push(base.clone().with_ring(3, 5));
            configs.push(base.with_ring(0, 8).with_fusion(true));
        }
        configs
    }

    /// (a + b) * (a - b)
    fn arithmetic() -> Vec<u8> {
        CodeBuilder::new()
            .local_get(0)
            .local_get(1)
            .op(Opcode::I32Add)
            .local_get(0)
            .local_get(1)
            .op(Opcode::I32Sub)
            .op(Opcode::I32Mul)
            .end()
            .build()
    }

    #[test]
    fn test_arithmetic_in_every_config() {
        for config in configs() {
            let compiled = compile_body(&config, &[I32, I32], &[I32], Locals::empty(), arithmetic());
            assert_eq!(compiled.call(&[Value::I32(7), Value::I32(3)]), Ok(vec![Value::I32(40)]));
        }
    }

    #[test]
    fn test_rejects_ring_beyond_the_slots() {
        let mut module = Module::new("translate");
        let index = module.add_function(FunctionType::new(&[I32, I32], &[I32]), Locals::empty(), arithmetic());
        for config in [
            EngineConfig::default().with_ring(3, 9),
            EngineConfig::default().with_convention(ConventionKind::ByRef).with_ring(0, 12),
        ] {
            let err = compile(&module, index, &config).unwrap_err();
            assert_eq!(err.code(), "unsupported_ring_layout");
        }

        let mut mixed = EngineConfig::default().with_ring(0, 4);
        mixed.stack_top.f64 = crate::runtime::config::SlotRange::new(2, 6);
        assert!(matches!(
            compile(&module, index, &mixed).unwrap_err().kind,
            ValidationErrorKind::UnsupportedRingLayout { value_type: F64, begin: 2, end: 6 }
        ));
    }

    #[test]
    fn test_ring_stats() {
        let plain = compile_body(&EngineConfig::default(), &[I32, I32], &[I32], Locals::empty(), arithmetic());
        assert_eq!(plain.func.stats, TranslateStats::default());
        assert_eq!(plain.func.operand_stack_max, 3);

        let cached = compile_body(
            &EngineConfig::default().with_ring(0, 4),
            &[I32, I32],
            &[I32],
            Locals::empty(),
            arithmetic(),
        );
        assert_eq!(cached.func.stats.ring_hits, 7);
        // the result reaches the stack before the final return
        assert_eq!(cached.func.stats.spills, 1);

        // two slots cannot hold three live values
        let narrow = compile_body(
            &EngineConfig::default().with_ring(0, 2),
            &[I32, I32],
            &[I32],
            Locals::empty(),
            arithmetic(),
        );
        assert_eq!(narrow.func.stats.spills, 2);
        assert_eq!(narrow.call(&[Value::I32(7), Value::I32(3)]), Ok(vec![Value::I32(40)]));
    }

    #[test]
    fn test_uncached_types_go_through_the_stack() {
        let mut config = EngineConfig::default();
        config.stack_top.i32 = crate::runtime::config::SlotRange::new(0, 4);
        // f64 -> i32 comparison mixes a cached result with uncached operands
        let code = CodeBuilder::new()
            .local_get(0)
            .f64_const(2.5)
            .op(Opcode::F64Lt)
            .i32_const(10)
            .op(Opcode::I32Add)
            .end()
            .build();
        let compiled = compile_body(&config, &[F64], &[I32], Locals::empty(), code);
        assert_eq!(compiled.call(&[Value::F64(1.0)]), Ok(vec![Value::I32(11)]));
        assert_eq!(compiled.call(&[Value::F64(3.0)]), Ok(vec![Value::I32(10)]));
    }

    #[test]
    fn test_if_else() {
        // if (x) { 1 } else { 2 } + 100
        let code = CodeBuilder::new()
            .local_get(0)
            .if_(Some(I32))
            .i32_const(1)
            .else_()
            .i32_const(2)
            .end()
            .i32_const(100)
            .op(Opcode::I32Add)
            .end()
            .build();
        for config in configs() {
            let compiled = compile_body(&config, &[I32], &[I32], Locals::empty(), code.clone());
            assert_eq!(compiled.call(&[Value::I32(5)]), Ok(vec![Value::I32(101)]));
            assert_eq!(compiled.call(&[Value::I32(0)]), Ok(vec![Value::I32(102)]));
        }
    }

    #[test]
    fn test_if_without_else() {
        let code = CodeBuilder::new()
            .i32_const(1)
            .local_set(1)
            .local_get(0)
            .if_(None)
            .i32_const(7)
            .local_set(1)
            .end()
            .local_get(1)
            .end()
            .build();
        for config in configs() {
            let compiled = compile_body(&config, &[I32], &[I32], Locals::new(vec![(1, I32)]), code.clone());
            assert_eq!(compiled.call(&[Value::I32(1)]), Ok(vec![Value::I32(7)]));
            assert_eq!(compiled.call(&[Value::I32(0)]), Ok(vec![Value::I32(1)]));
        }
    }

    #[test]
    fn test_counted_loop() {
        // i = 0; sum = 0; loop { sum = sum * 1 + i; i += 1; br_if i < n }
        let code = CodeBuilder::new()
            .loop_(None)
            .local_get(2)
            .i32_const(1)
            .op(Opcode::I32Mul)
            .local_get(1)
            .op(Opcode::I32Add)
            .local_set(2)
            .local_get(1)
            .i32_const(1)
            .op(Opcode::I32Add)
            .local_tee(1)
            .local_get(0)
            .op(Opcode::I32LtU)
            .br_if(0)
            .end()
            .local_get(2)
            .end()
            .build();
        for config in configs() {
            let compiled = compile_body(&config, &[I32], &[I32], Locals::new(vec![(2, I32)]), code.clone());
            assert_eq!(compiled.call(&[Value::I32(100)]), Ok(vec![Value::I32(4950)]));
            if config.fusion {
                assert_eq!(compiled.func.stats.fused, 1);
            }
        }
    }

    #[test]
    fn test_pointer_walk_loop() {
        // p = 0; sum = 0; loop { sum += p; p += 4; br_if p != end }
        let code = CodeBuilder::new()
            .loop_(None)
            .local_get(2)
            .local_get(1)
            .op(Opcode::I32Add)
            .local_set(2)
            .local_get(1)
            .i32_const(4)
            .op(Opcode::I32Add)
            .local_set(1)
            .local_get(1)
            .local_get(0)
            .op(Opcode::I32Ne)
            .br_if(0)
            .end()
            .local_get(2)
            .end()
            .build();
        for config in configs() {
            let compiled = compile_body(&config, &[I32], &[I32], Locals::new(vec![(2, I32)]), code.clone());
            assert_eq!(compiled.call(&[Value::I32(40)]), Ok(vec![Value::I32(180)]));
            assert_eq!(compiled.func.stats.fused, if config.fusion { 1 } else { 0 });
        }
    }

    #[test]
    fn test_branch_carries_value_out_of_block() {
        // block (result i32) { 1, 2, 3, br_if 0 (cond=x) ... }
        let code = CodeBuilder::new()
            .block(Some(I32))
            .i32_const(5)
            .i32_const(6)
            .i32_const(10)
            .local_get(0)
            .br_if(0)
            .op(Opcode::Drop)
            .op(Opcode::Drop)
            .i32_const(20)
            .op(Opcode::I32Add)
            .end()
            .end()
            .build();
        for config in configs() {
            let compiled = compile_body(&config, &[I32], &[I32], Locals::empty(), code.clone());
            assert_eq!(compiled.call(&[Value::I32(1)]), Ok(vec![Value::I32(10)]));
            assert_eq!(compiled.call(&[Value::I32(0)]), Ok(vec![Value::I32(25)]));
        }
    }

    #[test]
    fn test_br_table_selects_label() {
        let code = CodeBuilder::new()
            .block(None)
            .block(None)
            .block(None)
            .local_get(0)
            .br_table(&[0, 1], 2)
            .end()
            .i32_const(10)
            .op(Opcode::Return)
            .end()
            .i32_const(11)
            .op(Opcode::Return)
            .end()
            .i32_const(12)
            .end()
            .build();
        for config in configs() {
            let compiled = compile_body(&config, &[I32], &[I32], Locals::empty(), code.clone());
            for (arg, expected) in [(0, 10), (1, 11), (2, 12), (-1, 12)] {
                assert_eq!(compiled.call(&[Value::I32(arg)]), Ok(vec![Value::I32(expected)]));
            }
        }
    }

    #[test]
    fn test_dead_code_is_skipped() {
        let code = CodeBuilder::new()
            .block(Some(I32))
            .i32_const(1)
            .br(0)
            .block(None)
            .op(Opcode::Unreachable)
            .end()
            .i32_const(2)
            .op(Opcode::I32Add)
            .end()
            .end()
            .build();
        for config in configs() {
            let compiled = compile_body(&config, &[], &[I32], Locals::empty(), code.clone());
            assert_eq!(compiled.call(&[]), Ok(vec![Value::I32(1)]));
            assert!(compiled.func.code.len() <= 5);
        }
    }

    #[test]
    fn test_select_and_drop() {
        let code = CodeBuilder::new()
            .i64_const(3)
            .i64_const(4)
            .local_get(0)
            .op(Opcode::Select)
            .i32_const(99)
            .op(Opcode::Drop)
            .end()
            .build();
        for config in configs() {
            let compiled = compile_body(&config, &[I32], &[I64], Locals::empty(), code.clone());
            assert_eq!(compiled.call(&[Value::I32(1)]), Ok(vec![Value::I64(3)]));
            assert_eq!(compiled.call(&[Value::I32(0)]), Ok(vec![Value::I64(4)]));
        }
    }

    #[test]
    fn test_trap_surfaces() {
        let code = CodeBuilder::new()
            .local_get(0)
            .i32_const(0)
            .op(Opcode::I32DivS)
            .end()
            .build();
        for config in configs() {
            let compiled = compile_body(&config, &[I32], &[I32], Locals::empty(), code.clone());
            assert_eq!(compiled.call(&[Value::I32(1)]), Err(RuntimeError::DivisionByZero));
        }
    }

    #[test]
    fn test_invalid_function_index() {
        let module = Module::new("empty");
        let err = compile(&module, 3, &EngineConfig::default()).unwrap_err();
        assert_eq!(err.code(), "invalid_function_index");
    }
}
