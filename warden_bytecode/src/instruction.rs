//! The closed stack-machine instruction enum.
//!
//! Every instruction has a statically known stack effect, pool-dependent
//! where the operand names a field or method. Widths are carried inline
//! (on the instruction or resolved from the pool) so the instrumentation
//! engine can reason about single- vs double-slot operands exactly.

use crate::constant_pool::{ConstIndex, Constant, ConstantPool};
use crate::stream::Handle;
use crate::types::SlotWidth;

/// How a method is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    /// Dynamic dispatch on the receiver.
    Virtual,
    /// No receiver.
    Static,
    /// Constructor invocation on a fresh or delegated receiver. Pops the
    /// receiver and arguments, pushes the initialized reference back.
    Ctor,
}

/// Branch flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// Unconditional jump.
    Always,
    /// Pop one slot, jump when it is zero.
    IfZero,
}

/// Values pushed and popped by one instruction, in slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    /// Slots consumed from the stack.
    pub pops: u16,
    /// Slots pushed onto the stack.
    pub pushes: u16,
}

impl StackEffect {
    /// Net change in stack depth.
    #[inline]
    pub fn net(self) -> i32 {
        self.pushes as i32 - self.pops as i32
    }
}

/// One stack-machine instruction.
///
/// The enum is deliberately closed: classifier and synthesizer dispatch
/// with exhaustive matches, so a new instruction shape is a compile-time
/// visible change everywhere it matters.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Push a single-slot constant (`Int`, `Float`, `Str`, `GuardRef`).
    Const(ConstIndex),
    /// Push a double-slot constant (`Long`, `Double`).
    ConstWide(ConstIndex),
    /// Push the class object of a `Class` constant.
    ClassRef(ConstIndex),
    /// Push a local variable.
    LoadLocal { slot: u16, width: SlotWidth },
    /// Pop into a local variable.
    StoreLocal { slot: u16, width: SlotWidth },
    /// Pop an object reference, push the named field's value.
    GetField(ConstIndex),
    /// Pop a value and an object reference, store into the named field.
    PutField(ConstIndex),
    /// Push the named static field's value.
    GetStatic(ConstIndex),
    /// Pop a value, store into the named static field.
    PutStatic(ConstIndex),
    /// Pop index and array reference, push the element.
    ArrayLoad(SlotWidth),
    /// Pop value, index, and array reference, store the element.
    ArrayStore(SlotWidth),
    /// Allocate an instance of a `Class` constant, push the reference.
    New(ConstIndex),
    /// Pop a length, push a new array of the named element class.
    NewArray(ConstIndex),
    /// Invoke the method named by a `MethodRef` constant.
    Invoke { kind: InvokeKind, target: ConstIndex },
    /// Duplicate the top slot.
    Dup,
    /// Duplicate the top slot beneath the next one.
    DupX1,
    /// Duplicate the top slot beneath the next two.
    DupX2,
    /// Duplicate the top two slots.
    Dup2,
    /// Duplicate the top two slots beneath the next one.
    Dup2X1,
    /// Duplicate the top two slots beneath the next two.
    Dup2X2,
    /// Discard the top slot.
    Pop,
    /// Discard the top two slots.
    Pop2,
    /// Exchange the top two slots.
    Swap,
    /// Jump to another instruction in the same stream.
    Branch { kind: BranchKind, target: Handle },
    /// Return, popping the result if the method produces one.
    Return { width: Option<SlotWidth> },
}

impl Instruction {
    /// Stack effect in slots.
    ///
    /// Returns `None` when a constant operand is missing from the pool or
    /// names the wrong kind of entry; callers treat that as a structural
    /// error for the whole unit.
    pub fn stack_effect(&self, pool: &ConstantPool) -> Option<StackEffect> {
        use Instruction::*;
        let eff = |pops, pushes| Some(StackEffect { pops, pushes });
        match self {
            Const(idx) => match pool.get(*idx)? {
                Constant::Int(_)
                | Constant::Float(_)
                | Constant::Str(_)
                | Constant::GuardRef { .. } => eff(0, 1),
                _ => None,
            },
            ConstWide(idx) => match pool.get(*idx)? {
                Constant::Long(_) | Constant::Double(_) => eff(0, 2),
                _ => None,
            },
            ClassRef(idx) => match pool.get(*idx)? {
                Constant::Class { .. } => eff(0, 1),
                _ => None,
            },
            LoadLocal { width, .. } => eff(0, width.slots()),
            StoreLocal { width, .. } => eff(width.slots(), 0),
            GetField(idx) => {
                let (_, _, ty) = pool.field_ref(*idx)?;
                eff(1, ty.width().slots())
            }
            PutField(idx) => {
                let (_, _, ty) = pool.field_ref(*idx)?;
                eff(1 + ty.width().slots(), 0)
            }
            GetStatic(idx) => {
                let (_, _, ty) = pool.field_ref(*idx)?;
                eff(0, ty.width().slots())
            }
            PutStatic(idx) => {
                let (_, _, ty) = pool.field_ref(*idx)?;
                eff(ty.width().slots(), 0)
            }
            ArrayLoad(w) => eff(2, w.slots()),
            ArrayStore(w) => eff(2 + w.slots(), 0),
            New(idx) | NewArray(idx) => match pool.get(*idx)? {
                Constant::Class { .. } => match self {
                    New(_) => eff(0, 1),
                    _ => eff(1, 1),
                },
                _ => None,
            },
            Invoke { kind, target } => {
                let (_, _, sig) = pool.method_ref(*target)?;
                match kind {
                    InvokeKind::Static => eff(sig.param_slots(), sig.ret_slots()),
                    InvokeKind::Virtual => eff(1 + sig.param_slots(), sig.ret_slots()),
                    // A constructor initializes its receiver in place and
                    // leaves the reference on the stack, so `New; args;
                    // Invoke` ends with the finished object on top.
                    InvokeKind::Ctor => eff(1 + sig.param_slots(), 1),
                }
            }
            Dup => eff(1, 2),
            DupX1 => eff(2, 3),
            DupX2 => eff(3, 4),
            Dup2 => eff(2, 4),
            Dup2X1 => eff(3, 5),
            Dup2X2 => eff(4, 6),
            Pop => eff(1, 0),
            Pop2 => eff(2, 0),
            Swap => eff(2, 2),
            Branch { kind, .. } => match kind {
                BranchKind::Always => eff(0, 0),
                BranchKind::IfZero => eff(1, 0),
            },
            Return { width } => eff(width.map_or(0, SlotWidth::slots), 0),
        }
    }

    /// True when control never falls through to the next instruction.
    #[inline]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Return { .. }
                | Instruction::Branch {
                    kind: BranchKind::Always,
                    ..
                }
        )
    }
}
