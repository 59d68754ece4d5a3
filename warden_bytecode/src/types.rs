//! Value types, operand widths, and method signatures.

use std::fmt;
use std::sync::Arc;

/// Number of operand-stack slots a value occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotWidth {
    /// One stack slot (references, `Int`, `Float`).
    Single,
    /// Two stack slots (`Long`, `Double`).
    Double,
}

impl SlotWidth {
    /// Slot count as an integer.
    #[inline]
    pub const fn slots(self) -> u16 {
        match self {
            SlotWidth::Single => 1,
            SlotWidth::Double => 2,
        }
    }
}

/// Static type of a field, array element, or method operand.
///
/// Only reference-typed locations are protected by the checker, but the
/// instrumentation engine must know every operand's width to keep the
/// stack shape intact around an injected call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Reference to an instance of the named unit.
    Ref(Arc<str>),
    /// 32-bit integer, one slot.
    Int,
    /// 64-bit integer, two slots.
    Long,
    /// 32-bit float, one slot.
    Float,
    /// 64-bit float, two slots.
    Double,
}

impl ValueType {
    /// Operand-stack width of this type.
    #[inline]
    pub fn width(&self) -> SlotWidth {
        match self {
            ValueType::Ref(_) | ValueType::Int | ValueType::Float => SlotWidth::Single,
            ValueType::Long | ValueType::Double => SlotWidth::Double,
        }
    }

    /// True for reference types.
    #[inline]
    pub fn is_ref(&self) -> bool {
        matches!(self, ValueType::Ref(_))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Ref(name) => write!(f, "ref {}", name),
            ValueType::Int => write!(f, "int"),
            ValueType::Long => write!(f, "long"),
            ValueType::Float => write!(f, "float"),
            ValueType::Double => write!(f, "double"),
        }
    }
}

/// A method signature: parameter types and an optional return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MethodSig {
    /// Parameter types in declaration order (receiver excluded).
    pub params: Vec<ValueType>,
    /// Return type; `None` for void.
    pub ret: Option<ValueType>,
}

impl MethodSig {
    /// Signature with no parameters and no return value.
    pub fn void() -> Self {
        MethodSig::default()
    }

    /// Total stack slots consumed by the parameters.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(|t| t.width().slots()).sum()
    }

    /// Stack slots produced by the return value.
    pub fn ret_slots(&self) -> u16 {
        self.ret.as_ref().map_or(0, |t| t.width().slots())
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ")")?;
        match &self.ret {
            Some(t) => write!(f, " -> {}", t),
            None => Ok(()),
        }
    }
}
