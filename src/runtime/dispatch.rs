//! Threaded code and the dispatch core.
//!
//! A translated function is a vector of [`Instr`] records, each pairing a
//! handler with its immediates. The instruction pointer is an index into that
//! vector. A handler performs its effect and hands control to the handler of
//! the next record through its [`Convention`]:
//!
//! - [`Chained`] calls the next handler directly, so a run of instructions
//!   executes as a chain of calls with no central loop. Rust does not
//!   guarantee tail calls, so a chain is cut after [`CHAIN_DEPTH`] links and
//!   resumed by the trampoline; host stack use stays bounded however long
//!   the function runs.
//! - [`ByRef`] returns the next instruction pointer after every instruction
//!   and the trampoline re-dispatches.
//!
//! Both conventions run the same handler bodies, so they are observably
//! identical; only the cost of moving between records differs.
//!
//! Calls between compiled functions never nest on the host stack. A call
//! handler hands the callee back to the trampoline, which suspends the
//! caller on the activation's frame stack and resumes it when the callee
//! returns. The frame stack is what `max_depth` bounds.

use super::fuse::Fused;
use super::ring::RingLayout;
use super::stack::Stack;
use super::translate::TranslateStats;
use super::{RuntimeError, SharedMemory, Value};
use crate::parser::module::ValueType;
use std::fmt;
use std::sync::Arc;

/// Number of physical slots in the register-cache ring
pub const RING_SLOTS: usize = 8;

/// Links a chained run may grow before returning to the trampoline
pub const CHAIN_DEPTH: u32 = 16;

/// What the trampoline does after a handler returns.
#[derive(Debug, Clone)]
pub enum Flow {
    Continue(usize),
    /// Enter `callee`, continuing at `resume` once it returns
    Call {
        callee: Arc<CompiledFunction>,
        resume: usize,
    },
    Return,
}

/// How a call was resolved by the [`CallContext`].
#[derive(Debug, Clone)]
pub enum Call {
    /// The context ran the callee itself; its results are on the stack.
    Returned,
    /// Compiled code for the dispatch core to enter.
    Enter(Arc<CompiledFunction>),
}

pub type Handler = fn(&mut Activation<'_>, usize) -> Result<Flow, RuntimeError>;

/// Immediates of one record. Each handler gives the fields its own meaning:
/// `a` is usually an index (local, global, function, branch target, fused
/// pattern), `b` a second index or offset, `value` a constant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Imm {
    pub value: Value,
    pub a: u32,
    pub b: u32,
}

impl Imm {
    pub fn new(a: u32, b: u32) -> Self {
        Imm {
            value: Value::default(),
            a,
            b,
        }
    }

    pub fn value(value: Value) -> Self {
        Imm { value, a: 0, b: 0 }
    }
}

#[derive(Clone, Copy)]
pub struct Instr {
    pub handler: Handler,
    pub imm: Imm,
}

impl fmt::Debug for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instr({:p}, {:?})", self.handler as *const (), self.imm)
    }
}

/// A resolved branch label: where to continue, and how to reshape the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BranchTarget {
    pub ip: u32,
    pub arity: u32,
    pub height: u32,
}

/// Output of translating one function body.
#[derive(Debug)]
pub struct CompiledFunction {
    pub function_index: u32,
    pub code: Vec<Instr>,
    pub targets: Vec<BranchTarget>,
    pub fused: Vec<Fused>,
    /// Parameters first, then declared locals
    pub local_types: Vec<ValueType>,
    pub param_count: usize,
    pub result_count: usize,
    /// Highest static operand stack height
    pub operand_stack_max: usize,
    pub ring: RingLayout,
    pub stats: TranslateStats,
}

/// Resolves calls and global accesses on behalf of the dispatch core.
pub trait CallContext {
    /// Resolve a call to `function_index`. Host functions run in place,
    /// popping their arguments from and pushing their results onto `stack`;
    /// compiled functions are handed back for the trampoline to enter.
    fn call(&mut self, module_id: u32, function_index: u32, stack: &mut Stack) -> Result<Call, RuntimeError>;

    /// Resolve a call through table element `element_index`, which must have signature `type_index`.
    fn call_indirect(
        &mut self,
        module_id: u32,
        type_index: u32,
        element_index: u32,
        stack: &mut Stack,
    ) -> Result<Call, RuntimeError>;

    fn global_get(&self, global_index: u32) -> Result<Value, RuntimeError>;

    fn global_set(&mut self, global_index: u32, value: Value) -> Result<(), RuntimeError>;
}

/// A caller waiting for its callee to return.
#[derive(Debug)]
struct Suspended {
    func: Arc<CompiledFunction>,
    stack: Stack,
    locals: Vec<Value>,
    resume: usize,
}

/// State of the running function, and of the callers suspended beneath it.
pub struct Activation<'a> {
    pub stack: Stack,
    pub locals: Vec<Value>,
    pub ring: [Value; RING_SLOTS],
    pub ring_begin: usize,
    pub ring_end: usize,
    pub func: Arc<CompiledFunction>,
    pub ctx: &'a mut dyn CallContext,
    pub memory: Option<SharedMemory>,
    pub module_id: u32,
    chain_budget: u32,
    frames: Vec<Suspended>,
    max_depth: usize,
}

impl<'a> Activation<'a> {
    pub fn new(
        func: Arc<CompiledFunction>,
        ctx: &'a mut dyn CallContext,
        locals: Vec<Value>,
        memory: Option<SharedMemory>,
        module_id: u32,
    ) -> Self {
        Activation {
            stack: Stack::with_capacity(func.operand_stack_max),
            locals,
            ring: [Value::default(); RING_SLOTS],
            ring_begin: func.ring.begin,
            ring_end: func.ring.end,
            func,
            ctx,
            memory,
            module_id,
            chain_budget: CHAIN_DEPTH,
            frames: Vec::new(),
            max_depth: usize::MAX,
        }
    }

    /// Limit the number of functions active at once, the entry function included.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Functions currently active, the entry function included
    pub fn depth(&self) -> usize {
        self.frames.len() + 1
    }

    /// Indices of the active functions, innermost first
    pub fn backtrace(&self) -> Vec<u32> {
        std::iter::once(self.func.function_index)
            .chain(self.frames.iter().rev().map(|frame| frame.func.function_index))
            .collect()
    }

    /// Suspend the running function and start `callee` with its arguments
    /// taken from the top of the operand stack.
    fn enter(&mut self, callee: Arc<CompiledFunction>, resume: usize) -> Result<(), RuntimeError> {
        if self.depth() >= self.max_depth {
            return Err(RuntimeError::CallStackExhausted);
        }
        let mut locals = self.stack.pop_n(callee.param_count)?;
        locals.extend(callee.local_types[callee.param_count..].iter().map(|t| Value::zero(*t)));
        self.ring_begin = callee.ring.begin;
        self.ring_end = callee.ring.end;
        let stack = Stack::with_capacity(callee.operand_stack_max);
        let caller = Suspended {
            func: std::mem::replace(&mut self.func, callee),
            stack: std::mem::replace(&mut self.stack, stack),
            locals: std::mem::replace(&mut self.locals, locals),
            resume,
        };
        self.frames.push(caller);
        Ok(())
    }

    /// Resume the innermost suspended caller with the callee's results, or
    /// `None` when the entry function itself returned.
    fn leave(&mut self) -> Option<usize> {
        let caller = self.frames.pop()?;
        let mut results = std::mem::replace(&mut self.stack, caller.stack);
        self.stack.push_all(results.drain());
        self.locals = caller.locals;
        self.ring_begin = caller.func.ring.begin;
        self.ring_end = caller.func.ring.end;
        self.func = caller.func;
        Some(caller.resume)
    }

    #[inline(always)]
    pub fn handler_at(&self, ip: usize) -> Result<Handler, RuntimeError> {
        self.func
            .code
            .get(ip)
            .map(|instr| instr.handler)
            .ok_or(RuntimeError::InvalidInstructionPointer(ip))
    }

    #[inline(always)]
    pub fn imm(&self, ip: usize) -> Result<Imm, RuntimeError> {
        self.func
            .code
            .get(ip)
            .map(|instr| instr.imm)
            .ok_or(RuntimeError::InvalidInstructionPointer(ip))
    }

    #[inline(always)]
    pub fn target(&self, index: u32) -> Result<BranchTarget, RuntimeError> {
        self.func
            .targets
            .get(index as usize)
            .copied()
            .ok_or(RuntimeError::InvalidInstructionPointer(index as usize))
    }

    /// The ring position one deeper than `pos`
    #[inline(always)]
    pub fn ring_next(&self, pos: usize) -> usize {
        if pos + 1 >= self.ring_end {
            self.ring_begin
        } else {
            pos + 1
        }
    }

    /// The ring position one shallower than `pos`
    #[inline(always)]
    pub fn ring_prev(&self, pos: usize) -> usize {
        if pos <= self.ring_begin {
            self.ring_end - 1
        } else {
            pos - 1
        }
    }

    #[inline(always)]
    pub fn local(&self, index: u32) -> Result<Value, RuntimeError> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or(RuntimeError::LocalIndexOutOfBounds(index))
    }

    #[inline(always)]
    pub fn set_local(&mut self, index: u32, value: Value) -> Result<(), RuntimeError> {
        let slot = self
            .locals
            .get_mut(index as usize)
            .ok_or(RuntimeError::LocalIndexOutOfBounds(index))?;
        *slot = value;
        Ok(())
    }

    /// Take a branch: reshape the operand stack and continue at the target.
    #[inline(always)]
    pub fn branch(&mut self, target: BranchTarget) -> Result<usize, RuntimeError> {
        self.stack.unwind(target.height as usize, target.arity as usize)?;
        Ok(target.ip as usize)
    }
}

/// How a handler transfers control to the record at `ip`.
pub trait Convention: 'static {
    fn next(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError>;
}

pub struct Chained;

pub struct ByRef;

impl Convention for Chained {
    #[inline(always)]
    fn next(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
        if act.chain_budget == 0 {
            return Ok(Flow::Continue(ip));
        }
        act.chain_budget -= 1;
        let handler = act.handler_at(ip)?;
        handler(act, ip)
    }
}

impl Convention for ByRef {
    #[inline(always)]
    fn next(_act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
        Ok(Flow::Continue(ip))
    }
}

/// Run an activation from its first record until its entry function
/// returns. On a trap the faulting function stays current, so
/// [`Activation::backtrace`] still describes where it happened.
pub fn run(act: &mut Activation<'_>) -> Result<(), RuntimeError> {
    let mut ip = 0;
    loop {
        act.chain_budget = CHAIN_DEPTH;
        let handler = act.handler_at(ip)?;
        match handler(act, ip)? {
            Flow::Continue(next) => ip = next,
            Flow::Call { callee, resume } => {
                act.enter(callee, resume)?;
                ip = 0;
            }
            Flow::Return => match act.leave() {
                Some(resume) => ip = resume,
                None => return Ok(()),
            },
        }
    }
}
