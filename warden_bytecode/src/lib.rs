//! Compiled-unit model for the Warden instrumentation toolchain.
//!
//! This crate defines the binary-compiled program unit that Warden rewrites:
//!
//! - [`CompiledUnit`] - a class-like unit with a shared constant pool,
//!   field metadata, and method bodies
//! - [`Instruction`] - the closed stack-machine instruction enum, with
//!   per-instruction stack effects and operand widths
//! - [`InstructionStream`] - a mutably-insertable instruction sequence
//!   addressed by stable [`Handle`]s
//! - [`codec`] - the binary encode/decode boundary used by the driver
//! - [`verify`] - structural verification (stack-depth simulation)
//!
//! The instrumentation engine itself lives in `warden_instrument`; this
//! crate knows nothing about checks or guards beyond the [`Constant::GuardRef`]
//! pool entry that carries a resolved guard descriptor.

pub mod codec;
pub mod constant_pool;
pub mod disasm;
pub mod instruction;
pub mod stream;
pub mod types;
pub mod unit;
pub mod verify;

pub use codec::{decode_unit, encode_unit, DecodeError, EncodeError, UNIT_MAGIC};
pub use constant_pool::{ConstIndex, Constant, ConstantPool, GuardPlacement};
pub use disasm::disassemble;
pub use instruction::{BranchKind, Instruction, InvokeKind, StackEffect};
pub use stream::{Handle, InstructionStream};
pub use types::{MethodSig, SlotWidth, ValueType};
pub use unit::{
    CompiledUnit, FieldDef, FieldFlags, MethodDef, MethodFlags, UnitFlags, OUTER_REF_FIELD,
};
pub use verify::{compute_max_stack, verify_method, VerifyError};
