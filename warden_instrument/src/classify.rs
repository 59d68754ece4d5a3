//! Injection-site classification and guard resolution.
//!
//! One instruction at a time, [`classify`] decides whether a check must be
//! injected and which check it is. Guard tags on field metadata are
//! resolved here, once, into [`Constant::GuardRef`] pool entries; nothing
//! is looked up by name after rewriting.

use crate::error::InstrumentError;
use crate::repository::UnitRepository;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use warden_bytecode::{
    ConstIndex, Constant, ConstantPool, FieldDef, FieldFlags, GuardPlacement, Handle, Instruction,
    InstructionStream, InvokeKind, SlotWidth, OUTER_REF_FIELD,
};

/// What kind of mutation a site protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    /// `PutField` on an instance field.
    InstanceFieldWrite { width: SlotWidth },
    /// `PutStatic`.
    StaticFieldWrite,
    /// `GetField` on a this-guarded field; reads of unguarded fields are
    /// not sites.
    InstanceFieldRead,
    /// `ArrayStore`.
    ArrayElementStore { width: SlotWidth },
    /// A constructor invocation completing a fresh allocation.
    ConstructionComplete,
}

/// Which wire check the site expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Ownership check (`check`).
    Strict,
    /// The object's own monitor must be held (`guard_by_this`).
    ThisGuard,
    /// A named lock must be held; the index is an interned `GuardRef`.
    FieldGuard(ConstIndex),
}

/// One place in a method where a check will be injected.
#[derive(Debug, Clone, Copy)]
pub struct InjectionSite {
    /// The instruction the check protects.
    pub at: Handle,
    /// Mutation kind, fixing the shuffle recipe.
    pub kind: SiteKind,
    /// Check kind, fixing the call the recipe expands to.
    pub check: Check,
}

/// Lookup scope for guard resolution.
///
/// Borrows the rewritten unit's own name and fields separately from its
/// pool so the classifier can intern `GuardRef` entries while reading
/// field metadata. The unit's fields are indexed by name up front; every
/// site resolution hits the map.
pub struct ClassifyContext<'a> {
    unit_name: &'a Arc<str>,
    unit_fields: FxHashMap<&'a str, &'a FieldDef>,
    repo: &'a UnitRepository,
}

impl<'a> ClassifyContext<'a> {
    /// Build the lookup scope for one unit.
    pub fn new(unit_name: &'a Arc<str>, fields: &'a [FieldDef], repo: &'a UnitRepository) -> Self {
        ClassifyContext {
            unit_name,
            unit_fields: fields.iter().map(|f| (&*f.name, f)).collect(),
            repo,
        }
    }

    /// Field metadata for `class.field`, looking at the rewritten unit
    /// first and the repository second. `None` when the declaring type is
    /// not loaded or does not declare the field.
    fn field_def(&self, class: &str, field: &str) -> Option<FieldDef> {
        if class == &**self.unit_name {
            return self.unit_fields.get(field).map(|f| (*f).clone());
        }
        let unit = self.repo.get(class)?;
        unit.field(field).cloned()
    }
}

/// Decide whether the instruction at `at` is an injection site.
///
/// `Ok(None)` means no check is needed there. Errors are configuration
/// or structural failures and abort the whole unit.
pub fn classify(
    ctx: &ClassifyContext<'_>,
    in_ctor: bool,
    pool: &mut ConstantPool,
    stream: &InstructionStream,
    at: Handle,
) -> Result<Option<InjectionSite>, InstrumentError> {
    match *stream.get(at) {
        Instruction::PutField(idx) => {
            let (class, name, ty) = match pool.field_ref(idx) {
                Some((c, n, t)) => (c.clone(), n.clone(), t.clone()),
                None => return Ok(None),
            };
            // Initialization plumbing of nested units, never shared state.
            if &*name == OUTER_REF_FIELD {
                return Ok(None);
            }
            let check = match resolve_check(ctx, pool, &class, &name)? {
                // A this-guarded field is still private to its
                // constructor; no thread can hold the monitor of an
                // object that does not exist yet.
                Check::ThisGuard if in_ctor && class == *ctx.unit_name => return Ok(None),
                check => check,
            };
            Ok(Some(InjectionSite {
                at,
                kind: SiteKind::InstanceFieldWrite {
                    width: ty.width(),
                },
                check,
            }))
        }
        Instruction::GetField(idx) => {
            let (class, name) = match pool.field_ref(idx) {
                Some((c, n, _)) => (c.clone(), n.clone()),
                None => return Ok(None),
            };
            if &*name == OUTER_REF_FIELD {
                return Ok(None);
            }
            // Reads are only sites under a this-guard; strict ownership
            // and named locks protect writes.
            match resolve_check(ctx, pool, &class, &name)? {
                Check::ThisGuard => {
                    if in_ctor && class == *ctx.unit_name {
                        return Ok(None);
                    }
                    Ok(Some(InjectionSite {
                        at,
                        kind: SiteKind::InstanceFieldRead,
                        check: Check::ThisGuard,
                    }))
                }
                _ => Ok(None),
            }
        }
        Instruction::PutStatic(idx) => {
            let (class, name) = match pool.field_ref(idx) {
                Some((c, n, _)) => (c.clone(), n.clone()),
                None => return Ok(None),
            };
            let check = resolve_check(ctx, pool, &class, &name)?;
            Ok(Some(InjectionSite {
                at,
                kind: SiteKind::StaticFieldWrite,
                check,
            }))
        }
        Instruction::ArrayStore(width) => Ok(Some(InjectionSite {
            at,
            kind: SiteKind::ArrayElementStore { width },
            check: Check::Strict,
        })),
        Instruction::Invoke {
            kind: InvokeKind::Ctor,
            target,
        } => classify_construction(pool, stream, at, target),
        _ => Ok(None),
    }
}

/// Resolve a field's guard tag into a check kind.
///
/// An unresolvable *declaring type* fails closed to `Strict`: a write is
/// never left unchecked because metadata is missing. A tag that parses
/// but names something unusable is a configuration error.
fn resolve_check(
    ctx: &ClassifyContext<'_>,
    pool: &mut ConstantPool,
    class: &Arc<str>,
    field: &Arc<str>,
) -> Result<Check, InstrumentError> {
    let def = match ctx.field_def(class, field) {
        Some(def) => def,
        None => return Ok(Check::Strict),
    };
    let tag = match &def.guard {
        Some(tag) => tag.clone(),
        None => return Ok(Check::Strict),
    };
    if &*tag == "this" {
        if def.is_static() {
            return Err(InstrumentError::BadGuardTag {
                unit: class.clone(),
                field: field.clone(),
                tag,
            });
        }
        return Ok(Check::ThisGuard);
    }

    let (guard_ty, guard_field) = match tag.rsplit_once('.') {
        Some((ty, f)) if !ty.is_empty() && !f.is_empty() => (ty, f),
        _ => {
            return Err(InstrumentError::BadGuardTag {
                unit: class.clone(),
                field: field.clone(),
                tag,
            })
        }
    };
    let guard_def = match ctx.field_def(guard_ty, guard_field) {
        Some(def) => def,
        None => {
            // Distinguish an unknown type from an unknown field on a
            // known type for the diagnostic.
            let known = guard_ty == &**ctx.unit_name || ctx.repo.get(guard_ty).is_some();
            let ty: Arc<str> = guard_ty.into();
            let field: Arc<str> = guard_field.into();
            return Err(if known {
                InstrumentError::UnresolvedGuardField { tag, ty, field }
            } else {
                InstrumentError::UnresolvedGuardType { tag, ty }
            });
        }
    };
    let placement = if guard_def.flags.contains(FieldFlags::STATIC) {
        GuardPlacement::Static
    } else {
        // An instance lock is only reachable from the checked object when
        // it lives on the guarded field's own type.
        if guard_ty != &**class {
            let ty: Arc<str> = guard_ty.into();
            let field: Arc<str> = guard_field.into();
            return Err(InstrumentError::UnresolvedGuardField { tag, ty, field });
        }
        GuardPlacement::Instance
    };
    let idx = pool.intern(Constant::GuardRef {
        class: guard_ty.into(),
        field: guard_field.into(),
        placement,
    });
    Ok(Check::FieldGuard(idx))
}

/// Trace a constructor invocation's receiver back to its producer.
///
/// Walks the stream backwards keeping the receiver's depth below the
/// scan point's stack top. A receiver produced by `New` completes a
/// fresh allocation; anything else (typically loading `self` for
/// superclass delegation) is not a site.
fn classify_construction(
    pool: &ConstantPool,
    stream: &InstructionStream,
    at: Handle,
    target: ConstIndex,
) -> Result<Option<InjectionSite>, InstrumentError> {
    let dangling = || InstrumentError::DanglingConstruction {
        method: describe_invoke(pool, target),
    };

    let sig = match pool.method_ref(target) {
        Some((_, _, sig)) => sig,
        None => return Err(dangling()),
    };
    // Slots sitting above the receiver just before the invoke.
    let mut above = sig.param_slots() as i64;

    let mut cursor = stream.prev(at);
    while let Some(h) = cursor {
        let inst = stream.get(h);
        let eff = inst.stack_effect(pool).ok_or_else(dangling)?;
        if (eff.pushes as i64) > above {
            // This instruction pushed the receiver slot.
            return if matches!(inst, Instruction::New(_)) {
                Ok(Some(InjectionSite {
                    at,
                    kind: SiteKind::ConstructionComplete,
                    check: Check::Strict,
                }))
            } else {
                Ok(None)
            };
        }
        above = above - eff.pushes as i64 + eff.pops as i64;
        cursor = stream.prev(h);
    }
    // Ran off the front of the method: the receiver came from nowhere we
    // can see, which a well-formed stream never does.
    Err(dangling())
}

fn describe_invoke(pool: &ConstantPool, target: ConstIndex) -> Arc<str> {
    match pool.method_ref(target) {
        Some((class, name, _)) => format!("{}.{}", class, name).into(),
        None => "<unknown>".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_bytecode::{CompiledUnit, MethodSig, ValueType};

    fn account_unit() -> CompiledUnit {
        let mut unit = CompiledUnit::new("demo.Account");
        unit.fields.push(FieldDef {
            name: "balance".into(),
            ty: ValueType::Long,
            flags: FieldFlags::NONE,
            guard: None,
        });
        unit.fields.push(FieldDef {
            name: "journal".into(),
            ty: ValueType::Ref("demo.Journal".into()),
            flags: FieldFlags::NONE,
            guard: Some("this".into()),
        });
        unit
    }

    fn classify_single(
        unit: &CompiledUnit,
        repo: &UnitRepository,
        in_ctor: bool,
        pool: &mut ConstantPool,
        stream: &InstructionStream,
        at: Handle,
    ) -> Result<Option<InjectionSite>, InstrumentError> {
        let ctx = ClassifyContext::new(&unit.name, &unit.fields, repo);
        classify(&ctx, in_ctor, pool, stream, at)
    }

    #[test]
    fn test_put_field_is_strict_site() {
        let unit = account_unit();
        let repo = UnitRepository::new();
        let mut pool = ConstantPool::new();
        let idx = pool.intern(Constant::FieldRef {
            class: "demo.Account".into(),
            name: "balance".into(),
            ty: ValueType::Long,
        });
        let mut s = InstructionStream::new();
        let at = s.push_back(Instruction::PutField(idx));

        let site = classify_single(&unit, &repo, false, &mut pool, &s, at)
            .unwrap()
            .unwrap();
        assert_eq!(
            site.kind,
            SiteKind::InstanceFieldWrite {
                width: SlotWidth::Double
            }
        );
        assert_eq!(site.check, Check::Strict);
    }

    #[test]
    fn test_outer_ref_write_is_skipped() {
        let unit = account_unit();
        let repo = UnitRepository::new();
        let mut pool = ConstantPool::new();
        let idx = pool.intern(Constant::FieldRef {
            class: "demo.Account".into(),
            name: OUTER_REF_FIELD.into(),
            ty: ValueType::Ref("demo.Bank".into()),
        });
        let mut s = InstructionStream::new();
        let at = s.push_back(Instruction::PutField(idx));

        let site = classify_single(&unit, &repo, false, &mut pool, &s, at).unwrap();
        assert!(site.is_none());
    }

    #[test]
    fn test_this_guard_read_and_ctor_suppression() {
        let unit = account_unit();
        let repo = UnitRepository::new();
        let mut pool = ConstantPool::new();
        let idx = pool.intern(Constant::FieldRef {
            class: "demo.Account".into(),
            name: "journal".into(),
            ty: ValueType::Ref("demo.Journal".into()),
        });
        let mut s = InstructionStream::new();
        let at = s.push_back(Instruction::GetField(idx));

        let site = classify_single(&unit, &repo, false, &mut pool, &s, at)
            .unwrap()
            .unwrap();
        assert_eq!(site.kind, SiteKind::InstanceFieldRead);
        assert_eq!(site.check, Check::ThisGuard);

        // The same read inside the declaring type's constructor: no site.
        let site = classify_single(&unit, &repo, true, &mut pool, &s, at).unwrap();
        assert!(site.is_none());
    }

    #[test]
    fn test_unguarded_read_is_not_a_site() {
        let unit = account_unit();
        let repo = UnitRepository::new();
        let mut pool = ConstantPool::new();
        let idx = pool.intern(Constant::FieldRef {
            class: "demo.Account".into(),
            name: "balance".into(),
            ty: ValueType::Long,
        });
        let mut s = InstructionStream::new();
        let at = s.push_back(Instruction::GetField(idx));

        let site = classify_single(&unit, &repo, false, &mut pool, &s, at).unwrap();
        assert!(site.is_none());
    }

    #[test]
    fn test_unknown_declaring_type_fails_closed() {
        let unit = account_unit();
        let repo = UnitRepository::new();
        let mut pool = ConstantPool::new();
        let idx = pool.intern(Constant::FieldRef {
            class: "demo.NotLoaded".into(),
            name: "counter".into(),
            ty: ValueType::Int,
        });
        let mut s = InstructionStream::new();
        let at = s.push_back(Instruction::PutField(idx));

        let site = classify_single(&unit, &repo, false, &mut pool, &s, at)
            .unwrap()
            .unwrap();
        assert_eq!(site.check, Check::Strict);
    }

    #[test]
    fn test_field_guard_resolution() {
        let mut unit = account_unit();
        unit.fields.push(FieldDef {
            name: "lock".into(),
            ty: ValueType::Ref("warden.runtime.GuardLock".into()),
            flags: FieldFlags::STATIC,
            guard: None,
        });
        unit.fields.push(FieldDef {
            name: "total".into(),
            ty: ValueType::Int,
            flags: FieldFlags::STATIC,
            guard: Some("demo.Account.lock".into()),
        });
        let repo = UnitRepository::new();
        let mut pool = ConstantPool::new();
        let idx = pool.intern(Constant::FieldRef {
            class: "demo.Account".into(),
            name: "total".into(),
            ty: ValueType::Int,
        });
        let mut s = InstructionStream::new();
        let at = s.push_back(Instruction::PutStatic(idx));

        let site = classify_single(&unit, &repo, false, &mut pool, &s, at)
            .unwrap()
            .unwrap();
        assert_eq!(site.kind, SiteKind::StaticFieldWrite);
        let Check::FieldGuard(guard_idx) = site.check else {
            panic!("expected a field guard");
        };
        match pool.get(guard_idx).unwrap() {
            Constant::GuardRef {
                class,
                field,
                placement,
            } => {
                assert_eq!(&**class, "demo.Account");
                assert_eq!(&**field, "lock");
                assert_eq!(*placement, GuardPlacement::Static);
            }
            other => panic!("expected GuardRef, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_guard_tags() {
        let mut unit = account_unit();
        unit.fields.push(FieldDef {
            name: "total".into(),
            ty: ValueType::Int,
            flags: FieldFlags::NONE,
            guard: Some("nodots".into()),
        });
        let repo = UnitRepository::new();
        let mut pool = ConstantPool::new();
        let idx = pool.intern(Constant::FieldRef {
            class: "demo.Account".into(),
            name: "total".into(),
            ty: ValueType::Int,
        });
        let mut s = InstructionStream::new();
        let at = s.push_back(Instruction::PutField(idx));

        let err = classify_single(&unit, &repo, false, &mut pool, &s, at).unwrap_err();
        assert!(matches!(err, InstrumentError::BadGuardTag { .. }));
    }

    #[test]
    fn test_unresolved_guard_type() {
        let mut unit = account_unit();
        unit.fields.push(FieldDef {
            name: "total".into(),
            ty: ValueType::Int,
            flags: FieldFlags::NONE,
            guard: Some("demo.Missing.lock".into()),
        });
        let repo = UnitRepository::new();
        let mut pool = ConstantPool::new();
        let idx = pool.intern(Constant::FieldRef {
            class: "demo.Account".into(),
            name: "total".into(),
            ty: ValueType::Int,
        });
        let mut s = InstructionStream::new();
        let at = s.push_back(Instruction::PutField(idx));

        let err = classify_single(&unit, &repo, false, &mut pool, &s, at).unwrap_err();
        assert!(matches!(err, InstrumentError::UnresolvedGuardType { .. }));
    }

    #[test]
    fn test_unresolved_guard_field_names_both_halves() {
        let mut unit = account_unit();
        unit.fields.push(FieldDef {
            name: "total".into(),
            ty: ValueType::Int,
            flags: FieldFlags::NONE,
            guard: Some("demo.Account.missing".into()),
        });
        let repo = UnitRepository::new();
        let mut pool = ConstantPool::new();
        let idx = pool.intern(Constant::FieldRef {
            class: "demo.Account".into(),
            name: "total".into(),
            ty: ValueType::Int,
        });
        let mut s = InstructionStream::new();
        let at = s.push_back(Instruction::PutField(idx));

        let err = classify_single(&unit, &repo, false, &mut pool, &s, at).unwrap_err();
        match err {
            InstrumentError::UnresolvedGuardField { tag, ty, field } => {
                assert_eq!(&*tag, "demo.Account.missing");
                assert_eq!(&*ty, "demo.Account");
                assert_eq!(&*field, "missing");
            }
            other => panic!("expected UnresolvedGuardField, got {:?}", other),
        }
    }

    #[test]
    fn test_instance_guard_on_foreign_type_is_rejected() {
        let mut other = CompiledUnit::new("demo.Vault");
        other.fields.push(FieldDef {
            name: "lock".into(),
            ty: ValueType::Ref("warden.runtime.GuardLock".into()),
            flags: FieldFlags::NONE,
            guard: None,
        });
        let repo = UnitRepository::new();
        repo.insert(Arc::new(other));

        let mut unit = account_unit();
        unit.fields.push(FieldDef {
            name: "total".into(),
            ty: ValueType::Int,
            flags: FieldFlags::NONE,
            guard: Some("demo.Vault.lock".into()),
        });
        let mut pool = ConstantPool::new();
        let idx = pool.intern(Constant::FieldRef {
            class: "demo.Account".into(),
            name: "total".into(),
            ty: ValueType::Int,
        });
        let mut s = InstructionStream::new();
        let at = s.push_back(Instruction::PutField(idx));

        let err = classify_single(&unit, &repo, false, &mut pool, &s, at).unwrap_err();
        match err {
            InstrumentError::UnresolvedGuardField { tag, ty, field } => {
                assert_eq!(&*tag, "demo.Vault.lock");
                assert_eq!(&*ty, "demo.Vault");
                assert_eq!(&*field, "lock");
            }
            other => panic!("expected UnresolvedGuardField, got {:?}", other),
        }
    }

    #[test]
    fn test_construction_walk_finds_allocation() {
        let unit = account_unit();
        let repo = UnitRepository::new();
        let mut pool = ConstantPool::new();
        let class = pool.intern(Constant::Class {
            name: "demo.Journal".into(),
        });
        let ctor = pool.intern(Constant::MethodRef {
            class: "demo.Journal".into(),
            name: "<init>".into(),
            sig: MethodSig {
                params: vec![ValueType::Int, ValueType::Long],
                ret: None,
            },
        });
        let mut s = InstructionStream::new();
        s.push_back(Instruction::New(class));
        s.push_back(Instruction::Const(pool.intern(Constant::Int(1))));
        s.push_back(Instruction::ConstWide(pool.intern(Constant::Long(2))));
        let at = s.push_back(Instruction::Invoke {
            kind: InvokeKind::Ctor,
            target: ctor,
        });
        s.push_back(Instruction::Return { width: None });

        let site = classify_single(&unit, &repo, false, &mut pool, &s, at)
            .unwrap()
            .unwrap();
        assert_eq!(site.kind, SiteKind::ConstructionComplete);
        assert_eq!(site.check, Check::Strict);
    }

    #[test]
    fn test_superclass_delegation_is_not_a_site() {
        let unit = account_unit();
        let repo = UnitRepository::new();
        let mut pool = ConstantPool::new();
        let ctor = pool.intern(Constant::MethodRef {
            class: "demo.Base".into(),
            name: "<init>".into(),
            sig: MethodSig::void(),
        });
        let mut s = InstructionStream::new();
        // `self` loaded from slot 0, not a fresh allocation.
        s.push_back(Instruction::LoadLocal {
            slot: 0,
            width: SlotWidth::Single,
        });
        let at = s.push_back(Instruction::Invoke {
            kind: InvokeKind::Ctor,
            target: ctor,
        });
        s.push_back(Instruction::Return { width: None });

        let site = classify_single(&unit, &repo, false, &mut pool, &s, at).unwrap();
        assert!(site.is_none());
    }
}
