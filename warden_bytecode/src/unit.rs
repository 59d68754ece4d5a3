//! Compiled units: fields, methods, and their flags.
//!
//! A [`CompiledUnit`] is the unit of rewriting. It is immutable on read;
//! the instrumentation driver clones a unit, mutates the clone, and either
//! returns it whole or discards it, so a unit is never partially rewritten.

use crate::constant_pool::ConstantPool;
use crate::stream::InstructionStream;
use crate::types::{MethodSig, ValueType};
use std::sync::Arc;

/// Name of the compiler-generated outer-instance backreference held by
/// nested units. Writes to it are initialization plumbing, not shared
/// mutation, and are never instrumented.
pub const OUTER_REF_FIELD: &str = "$outer";

/// Unit-level flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitFlags(u8);

impl UnitFlags {
    /// No flags.
    pub const NONE: UnitFlags = UnitFlags(0);
    /// The unit declares an interface; it carries no instrumentable code.
    pub const INTERFACE: UnitFlags = UnitFlags(1 << 0);

    /// Check if a flag is set.
    #[inline]
    pub const fn contains(self, other: UnitFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Combine flags.
    #[inline]
    pub const fn union(self, other: UnitFlags) -> UnitFlags {
        UnitFlags(self.0 | other.0)
    }

    /// Raw value.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Rebuild from a raw value.
    #[inline]
    pub const fn from_bits(bits: u8) -> UnitFlags {
        UnitFlags(bits)
    }
}

/// Field-level flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldFlags(u8);

impl FieldFlags {
    /// No flags.
    pub const NONE: FieldFlags = FieldFlags(0);
    /// The field belongs to the unit, not to instances.
    pub const STATIC: FieldFlags = FieldFlags(1 << 0);
    /// Compiler-generated field.
    pub const SYNTHETIC: FieldFlags = FieldFlags(1 << 1);

    /// Check if a flag is set.
    #[inline]
    pub const fn contains(self, other: FieldFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Combine flags.
    #[inline]
    pub const fn union(self, other: FieldFlags) -> FieldFlags {
        FieldFlags(self.0 | other.0)
    }

    /// Raw value.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Rebuild from a raw value.
    #[inline]
    pub const fn from_bits(bits: u8) -> FieldFlags {
        FieldFlags(bits)
    }
}

/// Method-level flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodFlags(u8);

impl MethodFlags {
    /// No flags.
    pub const NONE: MethodFlags = MethodFlags(0);
    /// Declared without a body.
    pub const ABSTRACT: MethodFlags = MethodFlags(1 << 0);
    /// Implemented outside the compiled format; no stream to rewrite.
    pub const EXTERNAL: MethodFlags = MethodFlags(1 << 1);
    /// Instance constructor.
    pub const CTOR: MethodFlags = MethodFlags(1 << 2);

    /// Check if a flag is set.
    #[inline]
    pub const fn contains(self, other: MethodFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Combine flags.
    #[inline]
    pub const fn union(self, other: MethodFlags) -> MethodFlags {
        MethodFlags(self.0 | other.0)
    }

    /// Raw value.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Rebuild from a raw value.
    #[inline]
    pub const fn from_bits(bits: u8) -> MethodFlags {
        MethodFlags(bits)
    }
}

/// A declared field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name.
    pub name: Arc<str>,
    /// Declared type.
    pub ty: ValueType,
    /// Flags.
    pub flags: FieldFlags,
    /// Optional guard tag: `"this"`, or `<fully.qualified.Type>.<field>`.
    ///
    /// Means "this location may only be mutated while holding the lock
    /// named here". Resolved once at rewrite time, never at run time.
    pub guard: Option<Arc<str>>,
}

impl FieldDef {
    /// True for static fields.
    #[inline]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }
}

/// A declared method.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Method name.
    pub name: Arc<str>,
    /// Signature (receiver excluded).
    pub sig: MethodSig,
    /// Flags.
    pub flags: MethodFlags,
    /// Maximum operand-stack depth in slots. Recomputed after rewriting.
    pub max_stack: u16,
    /// Instruction stream; `None` for abstract and external methods.
    pub code: Option<InstructionStream>,
}

impl MethodDef {
    /// True when the method has no rewritable body.
    #[inline]
    pub fn is_bodyless(&self) -> bool {
        self.flags.contains(MethodFlags::ABSTRACT) || self.flags.contains(MethodFlags::EXTERNAL)
    }

    /// True for instance constructors.
    #[inline]
    pub fn is_ctor(&self) -> bool {
        self.flags.contains(MethodFlags::CTOR)
    }
}

/// A binary-compiled class description.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    /// Fully qualified unit name.
    pub name: Arc<str>,
    /// Superclass name, if any.
    pub superclass: Option<Arc<str>>,
    /// Unit flags.
    pub flags: UnitFlags,
    /// Shared constant table.
    pub pool: ConstantPool,
    /// Declared fields.
    pub fields: Vec<FieldDef>,
    /// Declared methods.
    pub methods: Vec<MethodDef>,
}

impl CompiledUnit {
    /// Create an empty, non-interface unit.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        CompiledUnit {
            name: name.into(),
            superclass: None,
            flags: UnitFlags::NONE,
            pool: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// True for interface units.
    #[inline]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(UnitFlags::INTERFACE)
    }

    /// Find a declared field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    /// Find a declared method by name.
    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| &*m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let f = FieldFlags::STATIC.union(FieldFlags::SYNTHETIC);
        assert!(f.contains(FieldFlags::STATIC));
        assert!(f.contains(FieldFlags::SYNTHETIC));
        assert!(!FieldFlags::STATIC.contains(FieldFlags::SYNTHETIC));
        assert_eq!(FieldFlags::from_bits(f.bits()), f);
    }

    #[test]
    fn test_field_lookup() {
        let mut unit = CompiledUnit::new("demo.Account");
        unit.fields.push(FieldDef {
            name: "balance".into(),
            ty: ValueType::Long,
            flags: FieldFlags::NONE,
            guard: Some("this".into()),
        });
        assert!(unit.field("balance").is_some());
        assert!(unit.field("missing").is_none());
        assert_eq!(unit.field("balance").unwrap().guard.as_deref(), Some("this"));
    }

    #[test]
    fn test_bodyless() {
        let m = MethodDef {
            name: "run".into(),
            sig: MethodSig::void(),
            flags: MethodFlags::ABSTRACT,
            max_stack: 0,
            code: None,
        };
        assert!(m.is_bodyless());
        assert!(!m.is_ctor());
    }
}
