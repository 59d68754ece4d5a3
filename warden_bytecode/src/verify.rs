//! Structural verification of method bodies.
//!
//! [`compute_max_stack`] runs a worklist stack-depth simulation over the
//! control-flow graph: every instruction must see the same depth on every
//! path reaching it, no instruction may pop below zero, and control may
//! not fall off the end of the stream. This is both the post-rewrite
//! verification step and the source of the recomputed `max_stack` value.

use crate::constant_pool::ConstantPool;
use crate::instruction::{BranchKind, Instruction};
use crate::stream::{Handle, InstructionStream};
use crate::unit::MethodDef;
use rustc_hash::FxHashMap;
use std::fmt;

/// A structural defect found in a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// A method that should carry code has none.
    MissingCode { method: String },
    /// An instruction pops more slots than the stack holds.
    StackUnderflow { at: u32 },
    /// Two paths reach the same instruction at different depths.
    InconsistentDepth { at: u32, first: u16, second: u16 },
    /// A constant operand is missing or names the wrong entry kind.
    BadConstant { at: u32 },
    /// Control can fall off the end of the stream.
    MissingTerminator,
    /// The declared maximum stack is smaller than the simulated one.
    MaxStackTooSmall { declared: u16, computed: u16 },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::MissingCode { method } => {
                write!(f, "method {} has no instruction stream", method)
            }
            VerifyError::StackUnderflow { at } => {
                write!(f, "stack underflow at instruction {}", at)
            }
            VerifyError::InconsistentDepth { at, first, second } => write!(
                f,
                "instruction {} reached at depths {} and {}",
                at, first, second
            ),
            VerifyError::BadConstant { at } => {
                write!(f, "bad constant operand at instruction {}", at)
            }
            VerifyError::MissingTerminator => {
                write!(f, "control falls off the end of the method")
            }
            VerifyError::MaxStackTooSmall { declared, computed } => write!(
                f,
                "declared max stack {} is below the computed depth {}",
                declared, computed
            ),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Simulate stack depths over the CFG and return the maximum, in slots.
///
/// An empty stream computes to zero; the caller decides whether that is
/// acceptable for the method at hand.
pub fn compute_max_stack(
    stream: &InstructionStream,
    pool: &ConstantPool,
) -> Result<u16, VerifyError> {
    let first = match stream.first() {
        Some(h) => h,
        None => return Ok(0),
    };

    // Ordinals are only for error messages.
    let ordinals: FxHashMap<Handle, u32> = stream
        .iter()
        .enumerate()
        .map(|(i, (h, _))| (h, i as u32))
        .collect();
    let at = |h: Handle| ordinals[&h];

    let mut seen: FxHashMap<Handle, u16> = FxHashMap::default();
    let mut work: Vec<(Handle, u16)> = vec![(first, 0)];
    let mut max = 0u16;

    while let Some((h, depth)) = work.pop() {
        match seen.get(&h) {
            Some(&prev) if prev == depth => continue,
            Some(&prev) => {
                return Err(VerifyError::InconsistentDepth {
                    at: at(h),
                    first: prev,
                    second: depth,
                })
            }
            None => {
                seen.insert(h, depth);
            }
        }
        max = max.max(depth);

        let inst = stream.get(h);
        let eff = inst
            .stack_effect(pool)
            .ok_or(VerifyError::BadConstant { at: at(h) })?;
        if depth < eff.pops {
            return Err(VerifyError::StackUnderflow { at: at(h) });
        }
        let after = depth - eff.pops + eff.pushes;
        max = max.max(after);

        match inst {
            Instruction::Return { .. } => {}
            Instruction::Branch { kind, target } => {
                work.push((*target, after));
                if *kind == BranchKind::IfZero {
                    match stream.next(h) {
                        Some(n) => work.push((n, after)),
                        None => return Err(VerifyError::MissingTerminator),
                    }
                }
            }
            _ => match stream.next(h) {
                Some(n) => work.push((n, after)),
                None => return Err(VerifyError::MissingTerminator),
            },
        }
    }

    Ok(max)
}

/// Verify one method: code presence, stack consistency, and that the
/// declared `max_stack` covers the simulated depth.
pub fn verify_method(method: &MethodDef, pool: &ConstantPool) -> Result<(), VerifyError> {
    if method.is_bodyless() {
        return Ok(());
    }
    let code = method.code.as_ref().ok_or_else(|| VerifyError::MissingCode {
        method: method.name.to_string(),
    })?;
    if code.is_empty() {
        return Err(VerifyError::MissingTerminator);
    }
    let computed = compute_max_stack(code, pool)?;
    if method.max_stack < computed {
        return Err(VerifyError::MaxStackTooSmall {
            declared: method.max_stack,
            computed,
        });
    }
    Ok(())
}
