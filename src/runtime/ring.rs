//! Register-cache ring.
//!
//! The top few operand stack values of an activation can live in a small
//! array of slots instead of the operand stack. Slots `begin..end` form a
//! ring; the value on top of the stack sits at the translator's current
//! position and each deeper cached value one step further along the ring.
//!
//! Handlers that work on cached values are specialized by slot position
//! through a const parameter. The translator tracks how many values are
//! cached and where the top is, and picks the specialization for the current
//! position from a per-operator table once, at translation time.
//!
//! Whenever a value has to be on the operand stack proper (block boundaries,
//! calls, branches, operators without a ring form) the translator emits a
//! [`spill`] that moves cached values onto the stack, deepest first.

use super::config::StackTop;
use super::dispatch::{Activation, Convention, Flow, Imm};
use super::RuntimeError;
use crate::parser::module::ValueType;

/// Build the `[Handler; RING_SLOTS]` selection table of a position-specialized handler.
macro_rules! ring_table {
    ($handler:ident :: < $($g:ty),* >) => {
        [
            $handler::<$($g,)* 0> as $crate::runtime::dispatch::Handler,
            $handler::<$($g,)* 1> as $crate::runtime::dispatch::Handler,
            $handler::<$($g,)* 2> as $crate::runtime::dispatch::Handler,
            $handler::<$($g,)* 3> as $crate::runtime::dispatch::Handler,
            $handler::<$($g,)* 4> as $crate::runtime::dispatch::Handler,
            $handler::<$($g,)* 5> as $crate::runtime::dispatch::Handler,
            $handler::<$($g,)* 6> as $crate::runtime::dispatch::Handler,
            $handler::<$($g,)* 7> as $crate::runtime::dispatch::Handler,
        ]
    };
}

pub(crate) use ring_table;

/// The configured slot range; empty when caching is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingLayout {
    pub begin: usize,
    pub end: usize,
}

impl RingLayout {
    pub fn new(begin: usize, end: usize) -> Self {
        RingLayout { begin, end }
    }

    pub fn disabled() -> Self {
        RingLayout::default()
    }

    /// All cached types share the i32 range once the configuration is validated.
    pub fn from_stack_top(stack_top: &StackTop) -> Self {
        let range = stack_top.range(ValueType::I32);
        if range.is_empty() {
            RingLayout::disabled()
        } else {
            RingLayout::new(range.begin as usize, range.end as usize)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.end > self.begin
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next(&self, pos: usize) -> usize {
        if pos + 1 >= self.end {
            self.begin
        } else {
            pos + 1
        }
    }

    pub fn prev(&self, pos: usize) -> usize {
        if pos <= self.begin {
            self.end - 1
        } else {
            pos - 1
        }
    }
}

/// Move `imm.b` cached values onto the operand stack, starting with the
/// deepest at position `imm.a` and walking toward the top.
pub fn spill<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let imm = act.imm(ip)?;
    let mut pos = imm.a as usize;
    for _ in 0..imm.b {
        act.stack.push(act.ring[pos]);
        pos = act.ring_prev(pos);
    }
    C::next(act, ip + 1)
}

/// Translation-time view of the ring: how many values are cached and where the top is.
#[derive(Debug, Clone)]
pub struct RingState {
    layout: RingLayout,
    cached: usize,
    top: usize,
}

impl RingState {
    pub fn new(layout: RingLayout) -> Self {
        RingState {
            layout,
            cached: 0,
            top: layout.begin,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.layout.is_enabled()
    }

    pub fn cached(&self) -> usize {
        self.cached
    }

    pub fn top(&self) -> usize {
        self.top
    }

    /// Forget cached values; used where code is unreachable.
    pub fn reset(&mut self) {
        self.cached = 0;
        self.top = self.layout.begin;
    }

    fn advance(&self, pos: usize, steps: usize) -> usize {
        (0..steps).fold(pos, |p, _| self.layout.next(p))
    }

    fn bottom(&self) -> usize {
        self.advance(self.top, self.cached.saturating_sub(1))
    }

    /// Spill everything; the immediate of the spill record, if one is needed.
    pub fn spill_all(&mut self) -> Option<Imm> {
        self.spill_below(0)
    }

    /// Spill all but the top `keep` cached values.
    pub fn spill_below(&mut self, keep: usize) -> Option<Imm> {
        if self.cached <= keep {
            return None;
        }
        let imm = Imm::new(self.bottom() as u32, (self.cached - keep) as u32);
        self.cached = keep;
        if keep == 0 {
            self.top = self.layout.begin;
        }
        Some(imm)
    }

    /// Claim a slot for a pushed value: the spill needed to make room, and the slot.
    pub fn push_slot(&mut self) -> (Option<Imm>, usize) {
        let mut spilled = None;
        if self.cached == self.layout.len() {
            spilled = Some(Imm::new(self.bottom() as u32, 1));
            self.cached -= 1;
        }
        let dest = if self.cached == 0 {
            self.layout.begin
        } else {
            self.layout.prev(self.top)
        };
        self.top = dest;
        self.cached += 1;
        (spilled, dest)
    }

    /// Consume the top `pops` cached values, optionally leaving one result in
    /// the deepest consumed slot. Returns the position the handler is specialized on.
    pub fn apply(&mut self, pops: usize, push: bool) -> usize {
        let pos = self.top;
        let deepest = self.advance(self.top, pops.saturating_sub(1));
        self.cached -= pops;
        if push {
            self.top = deepest;
            self.cached += 1;
        } else if self.cached == 0 {
            self.top = self.layout.begin;
        } else {
            self.top = self.layout.next(deepest);
        }
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::config::SlotRange;

    #[test]
    fn test_layout() {
        assert!(!RingLayout::from_stack_top(&StackTop::default()).is_enabled());
        let layout = RingLayout::from_stack_top(&StackTop::uniform(SlotRange::new(1, 4)));
        assert_eq!(layout, RingLayout::new(1, 4));
        assert_eq!(layout.len(), 3);
        assert_eq!(layout.next(3), 1);
        assert_eq!(layout.prev(1), 3);
    }

    #[test]
    fn test_push_and_binary() {
        let mut ring = RingState::new(RingLayout::new(0, 4));
        assert_eq!(ring.push_slot(), (None, 0));
        assert_eq!(ring.push_slot(), (None, 3));
        // rhs on top at 3, lhs one deeper at 0, result lands at 0
        assert_eq!(ring.apply(2, true), 3);
        assert_eq!(ring.cached(), 1);
        assert_eq!(ring.top(), 0);
    }

    #[test]
    fn test_full_ring_spills_bottom() {
        let mut ring = RingState::new(RingLayout::new(2, 4));
        assert_eq!(ring.push_slot(), (None, 2));
        assert_eq!(ring.push_slot(), (None, 3));
        let (spill, dest) = ring.push_slot();
        assert_eq!(spill, Some(Imm::new(2, 1)));
        assert_eq!(dest, 2);
        assert_eq!(ring.cached(), 2);
    }

    #[test]
    fn test_spill_below() {
        let mut ring = RingState::new(RingLayout::new(0, 8));
        for _ in 0..3 {
            ring.push_slot();
        }
        // slots 0 (deepest), 7, 6 (top)
        assert_eq!(ring.spill_below(1), Some(Imm::new(0, 2)));
        assert_eq!(ring.cached(), 1);
        assert_eq!(ring.top(), 6);
        assert_eq!(ring.spill_below(1), None);
        assert_eq!(ring.spill_all(), Some(Imm::new(6, 1)));
        assert_eq!(ring.cached(), 0);
    }

    #[test]
    fn test_consume_without_result() {
        let mut ring = RingState::new(RingLayout::new(0, 8));
        for _ in 0..3 {
            ring.push_slot();
        }
        // a store consumes value and address, leaving the deepest value on top
        assert_eq!(ring.apply(2, false), 6);
        assert_eq!(ring.cached(), 1);
        assert_eq!(ring.top(), 0);
    }
}
