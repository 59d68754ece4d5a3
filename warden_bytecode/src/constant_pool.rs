//! Shared constant pool with interning.
//!
//! Every compiled unit owns one pool. Constants are deduplicated on
//! insertion so repeated interning of the same entry yields the same
//! [`ConstIndex`] (floats are keyed by bit pattern for exact comparison).

use crate::types::{MethodSig, ValueType};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Index into a unit's constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstIndex(pub u16);

impl fmt::Display for ConstIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a resolved guard lock lives on the type or on the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardPlacement {
    /// The lock is a static field of the named unit.
    Static,
    /// The lock is an instance field reachable from the checked object.
    Instance,
}

/// A constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// 32-bit integer, loadable with `Const`.
    Int(i32),
    /// 64-bit integer, loadable with `ConstWide`.
    Long(i64),
    /// 32-bit float, loadable with `Const`.
    Float(f32),
    /// 64-bit float, loadable with `ConstWide`.
    Double(f64),
    /// String literal, loadable with `Const`.
    Str(Arc<str>),
    /// Reference to a unit, loadable as a class object with `ClassRef`.
    Class { name: Arc<str> },
    /// Reference to a declared field.
    FieldRef {
        class: Arc<str>,
        name: Arc<str>,
        ty: ValueType,
    },
    /// Reference to a method.
    MethodRef {
        class: Arc<str>,
        name: Arc<str>,
        sig: MethodSig,
    },
    /// A guard descriptor resolved at rewrite time.
    ///
    /// Carries everything the runtime needs to locate the lock without a
    /// name lookup: the declaring unit, the field, and whether the field
    /// is static or reachable from the checked instance.
    GuardRef {
        class: Arc<str>,
        field: Arc<str>,
        placement: GuardPlacement,
    },
}

/// Key type for constant deduplication (floats by bit pattern).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Str(Arc<str>),
    Class(Arc<str>),
    FieldRef(Arc<str>, Arc<str>, ValueType),
    MethodRef(Arc<str>, Arc<str>, MethodSig),
    GuardRef(Arc<str>, Arc<str>, GuardPlacement),
}

impl ConstantKey {
    fn from_constant(c: &Constant) -> Self {
        match c {
            Constant::Int(v) => ConstantKey::Int(*v),
            Constant::Long(v) => ConstantKey::Long(*v),
            Constant::Float(v) => ConstantKey::Float(v.to_bits()),
            Constant::Double(v) => ConstantKey::Double(v.to_bits()),
            Constant::Str(s) => ConstantKey::Str(s.clone()),
            Constant::Class { name } => ConstantKey::Class(name.clone()),
            Constant::FieldRef { class, name, ty } => {
                ConstantKey::FieldRef(class.clone(), name.clone(), ty.clone())
            }
            Constant::MethodRef { class, name, sig } => {
                ConstantKey::MethodRef(class.clone(), name.clone(), sig.clone())
            }
            Constant::GuardRef {
                class,
                field,
                placement,
            } => ConstantKey::GuardRef(class.clone(), field.clone(), *placement),
        }
    }
}

/// A unit's shared constant table.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    dedup: FxHashMap<ConstantKey, ConstIndex>,
}

impl ConstantPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        ConstantPool::default()
    }

    /// Rebuild a pool from decoded entries, restoring the dedup map.
    pub fn from_entries(entries: Vec<Constant>) -> Self {
        let mut dedup = FxHashMap::default();
        for (i, c) in entries.iter().enumerate() {
            dedup
                .entry(ConstantKey::from_constant(c))
                .or_insert(ConstIndex(i as u16));
        }
        ConstantPool { entries, dedup }
    }

    /// Intern a constant, returning the index of an existing identical
    /// entry when there is one.
    ///
    /// Panics when the pool is full: indices and the encoded entry count
    /// are 16-bit, and a wrapped index would alias an unrelated entry.
    pub fn intern(&mut self, c: Constant) -> ConstIndex {
        let key = ConstantKey::from_constant(&c);
        if let Some(&idx) = self.dedup.get(&key) {
            return idx;
        }
        assert!(
            self.entries.len() < u16::MAX as usize,
            "constant pool is full"
        );
        let idx = ConstIndex(self.entries.len() as u16);
        self.entries.push(c);
        self.dedup.insert(key, idx);
        idx
    }

    /// Look up an entry.
    #[inline]
    pub fn get(&self, idx: ConstIndex) -> Option<&Constant> {
        self.entries.get(idx.0 as usize)
    }

    /// Look up a field reference, or `None` if the index does not name one.
    pub fn field_ref(&self, idx: ConstIndex) -> Option<(&Arc<str>, &Arc<str>, &ValueType)> {
        match self.get(idx)? {
            Constant::FieldRef { class, name, ty } => Some((class, name, ty)),
            _ => None,
        }
    }

    /// Look up a method reference, or `None` if the index does not name one.
    pub fn method_ref(&self, idx: ConstIndex) -> Option<(&Arc<str>, &Arc<str>, &MethodSig)> {
        match self.get(idx)? {
            Constant::MethodRef { class, name, sig } => Some((class, name, sig)),
            _ => None,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the pool holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.entries.iter()
    }
}
