//! End-to-end rewrites of hand-built units.

use std::sync::Arc;
use warden_bytecode::{
    verify_method, CompiledUnit, Constant, FieldDef, FieldFlags, Instruction, InstructionStream,
    InvokeKind, MethodDef, MethodFlags, MethodSig, SlotWidth, ValueType,
};
use warden_instrument::{
    InstrumentOptions, Instrumenter, UnitRepository, CHECK_SYMBOL, GUARD_BY_FIELD_SYMBOL,
    GUARD_BY_THIS_SYMBOL, RUNTIME_UNIT,
};

/// A bank account unit exercising every site kind:
/// a strict field, a this-guarded field, a lock-guarded static,
/// an array store, and a constructor that allocates a journal.
fn account_unit() -> CompiledUnit {
    let mut unit = CompiledUnit::new("demo.Account");
    unit.fields.push(FieldDef {
        name: "balance".into(),
        ty: ValueType::Long,
        flags: FieldFlags::NONE,
        guard: None,
    });
    unit.fields.push(FieldDef {
        name: "label".into(),
        ty: ValueType::Ref("demo.Label".into()),
        flags: FieldFlags::NONE,
        guard: Some("this".into()),
    });
    unit.fields.push(FieldDef {
        name: "lock".into(),
        ty: ValueType::Ref("warden.runtime.GuardLock".into()),
        flags: FieldFlags::STATIC,
        guard: None,
    });
    unit.fields.push(FieldDef {
        name: "open_count".into(),
        ty: ValueType::Int,
        flags: FieldFlags::STATIC,
        guard: Some("demo.Account.lock".into()),
    });

    // set_balance(v: long)
    let balance = unit.pool.intern(Constant::FieldRef {
        class: "demo.Account".into(),
        name: "balance".into(),
        ty: ValueType::Long,
    });
    let mut code = InstructionStream::new();
    code.push_back(Instruction::LoadLocal {
        slot: 0,
        width: SlotWidth::Single,
    });
    code.push_back(Instruction::LoadLocal {
        slot: 1,
        width: SlotWidth::Double,
    });
    code.push_back(Instruction::PutField(balance));
    code.push_back(Instruction::Return { width: None });
    unit.methods.push(MethodDef {
        name: "set_balance".into(),
        sig: MethodSig {
            params: vec![ValueType::Long],
            ret: None,
        },
        flags: MethodFlags::NONE,
        max_stack: 3,
        code: Some(code),
    });

    // get_label() -> ref, reads the this-guarded field
    let label = unit.pool.intern(Constant::FieldRef {
        class: "demo.Account".into(),
        name: "label".into(),
        ty: ValueType::Ref("demo.Label".into()),
    });
    let mut code = InstructionStream::new();
    code.push_back(Instruction::LoadLocal {
        slot: 0,
        width: SlotWidth::Single,
    });
    code.push_back(Instruction::GetField(label));
    code.push_back(Instruction::Return {
        width: Some(SlotWidth::Single),
    });
    unit.methods.push(MethodDef {
        name: "get_label".into(),
        sig: MethodSig {
            params: vec![],
            ret: Some(ValueType::Ref("demo.Label".into())),
        },
        flags: MethodFlags::NONE,
        max_stack: 1,
        code: Some(code),
    });

    // bump_open_count(), writes the lock-guarded static
    let open_count = unit.pool.intern(Constant::FieldRef {
        class: "demo.Account".into(),
        name: "open_count".into(),
        ty: ValueType::Int,
    });
    let one = unit.pool.intern(Constant::Int(1));
    let mut code = InstructionStream::new();
    code.push_back(Instruction::Const(one));
    code.push_back(Instruction::PutStatic(open_count));
    code.push_back(Instruction::Return { width: None });
    unit.methods.push(MethodDef {
        name: "bump_open_count".into(),
        sig: MethodSig::void(),
        flags: MethodFlags::NONE,
        max_stack: 1,
        code: Some(code),
    });

    // store(values: ref, i: int, v: long), array element write
    let mut code = InstructionStream::new();
    code.push_back(Instruction::LoadLocal {
        slot: 1,
        width: SlotWidth::Single,
    });
    code.push_back(Instruction::LoadLocal {
        slot: 2,
        width: SlotWidth::Single,
    });
    code.push_back(Instruction::LoadLocal {
        slot: 3,
        width: SlotWidth::Double,
    });
    code.push_back(Instruction::ArrayStore(SlotWidth::Double));
    code.push_back(Instruction::Return { width: None });
    unit.methods.push(MethodDef {
        name: "store".into(),
        sig: MethodSig {
            params: vec![
                ValueType::Ref("long[]".into()),
                ValueType::Int,
                ValueType::Long,
            ],
            ret: None,
        },
        flags: MethodFlags::NONE,
        max_stack: 4,
        code: Some(code),
    });

    // open_journal() -> ref, allocates and constructs a journal
    let journal_class = unit.pool.intern(Constant::Class {
        name: "demo.Journal".into(),
    });
    let journal_ctor = unit.pool.intern(Constant::MethodRef {
        class: "demo.Journal".into(),
        name: "<init>".into(),
        sig: MethodSig::void(),
    });
    let mut code = InstructionStream::new();
    code.push_back(Instruction::New(journal_class));
    code.push_back(Instruction::Invoke {
        kind: InvokeKind::Ctor,
        target: journal_ctor,
    });
    code.push_back(Instruction::Return {
        width: Some(SlotWidth::Single),
    });
    unit.methods.push(MethodDef {
        name: "open_journal".into(),
        sig: MethodSig {
            params: vec![],
            ret: Some(ValueType::Ref("demo.Journal".into())),
        },
        flags: MethodFlags::NONE,
        max_stack: 1,
        code: Some(code),
    });

    unit
}

fn injected_symbols(unit: &CompiledUnit, method: &str) -> Vec<Arc<str>> {
    let code = unit.method(method).unwrap().code.as_ref().unwrap();
    code.iter()
        .filter_map(|(_, inst)| match inst {
            Instruction::Invoke { target, .. } => {
                let (class, name, _) = unit.pool.method_ref(*target)?;
                (&**class == RUNTIME_UNIT).then(|| name.clone())
            }
            _ => None,
        })
        .collect()
}

#[test]
fn every_site_kind_gets_its_check() {
    let repo = UnitRepository::new();
    let unit = account_unit();
    repo.insert(Arc::new(unit.clone()));

    let out = Instrumenter::new(&repo, InstrumentOptions { verify: true })
        .instrument_unit(&unit)
        .unwrap();
    assert!(out.changed());

    assert_eq!(injected_symbols(&out.unit, "set_balance"), vec![Arc::<str>::from(CHECK_SYMBOL)]);
    assert_eq!(
        injected_symbols(&out.unit, "get_label"),
        vec![Arc::<str>::from(GUARD_BY_THIS_SYMBOL)]
    );
    assert_eq!(
        injected_symbols(&out.unit, "bump_open_count"),
        vec![Arc::<str>::from(GUARD_BY_FIELD_SYMBOL)]
    );
    assert_eq!(injected_symbols(&out.unit, "store"), vec![Arc::<str>::from(CHECK_SYMBOL)]);
    assert_eq!(
        injected_symbols(&out.unit, "open_journal"),
        vec![Arc::<str>::from(CHECK_SYMBOL)]
    );

    for method in &out.unit.methods {
        verify_method(method, &out.unit.pool).unwrap();
    }
}

#[test]
fn construction_check_lands_after_the_invoke() {
    let repo = UnitRepository::new();
    let unit = account_unit();
    let out = Instrumenter::new(&repo, InstrumentOptions { verify: true })
        .instrument_unit(&unit)
        .unwrap();

    let code = out.unit.method("open_journal").unwrap().code.as_ref().unwrap();
    let insts: Vec<&Instruction> = code.iter().map(|(_, i)| i).collect();
    assert!(matches!(insts[0], Instruction::New(_)));
    assert!(matches!(
        insts[1],
        Instruction::Invoke {
            kind: InvokeKind::Ctor,
            ..
        }
    ));
    assert_eq!(*insts[2], Instruction::Dup);
    assert!(matches!(
        insts[3],
        Instruction::Invoke {
            kind: InvokeKind::Static,
            ..
        }
    ));
    assert!(matches!(insts[4], Instruction::Return { .. }));
}

#[test]
fn rewriting_twice_stays_structurally_valid() {
    let repo = UnitRepository::new();
    let unit = account_unit();
    let driver = Instrumenter::new(&repo, InstrumentOptions { verify: true });

    let once = driver.instrument_unit(&unit).unwrap();
    let twice = driver.instrument_unit(&once.unit).unwrap();

    // The second pass duplicates checks but must keep every method
    // verifiable and every recipe stack-neutral.
    for method in &twice.unit.methods {
        verify_method(method, &twice.unit.pool).unwrap();
    }
    assert_eq!(
        injected_symbols(&twice.unit, "set_balance").len(),
        2 * injected_symbols(&once.unit, "set_balance").len()
    );
}

#[test]
fn ctor_suppresses_this_guard_but_not_strict() {
    let mut unit = account_unit();
    // A constructor initializing both fields.
    let balance = unit.pool.intern(Constant::FieldRef {
        class: "demo.Account".into(),
        name: "balance".into(),
        ty: ValueType::Long,
    });
    let label = unit.pool.intern(Constant::FieldRef {
        class: "demo.Account".into(),
        name: "label".into(),
        ty: ValueType::Ref("demo.Label".into()),
    });
    let zero = unit.pool.intern(Constant::Long(0));
    let mut code = InstructionStream::new();
    code.push_back(Instruction::LoadLocal {
        slot: 0,
        width: SlotWidth::Single,
    });
    code.push_back(Instruction::ConstWide(zero));
    code.push_back(Instruction::PutField(balance));
    code.push_back(Instruction::LoadLocal {
        slot: 0,
        width: SlotWidth::Single,
    });
    code.push_back(Instruction::LoadLocal {
        slot: 1,
        width: SlotWidth::Single,
    });
    code.push_back(Instruction::PutField(label));
    code.push_back(Instruction::Return { width: None });
    unit.methods.push(MethodDef {
        name: "<init>".into(),
        sig: MethodSig {
            params: vec![ValueType::Ref("demo.Label".into())],
            ret: None,
        },
        flags: MethodFlags::CTOR,
        max_stack: 3,
        code: Some(code),
    });

    let repo = UnitRepository::new();
    let out = Instrumenter::new(&repo, InstrumentOptions { verify: true })
        .instrument_unit(&unit)
        .unwrap();

    // The strict balance write is still checked; the this-guarded label
    // write is not, because no thread can hold a monitor that does not
    // exist yet.
    assert_eq!(injected_symbols(&out.unit, "<init>"), vec![Arc::<str>::from(CHECK_SYMBOL)]);
}

#[test]
fn instrumented_units_survive_the_codec() {
    let repo = UnitRepository::new();
    let unit = account_unit();
    let out = Instrumenter::new(&repo, InstrumentOptions { verify: true })
        .instrument_unit(&unit)
        .unwrap();

    let bytes = warden_bytecode::encode_unit(&out.unit).unwrap();
    let back = warden_bytecode::decode_unit(&bytes).unwrap();
    for method in &back.methods {
        verify_method(method, &back.pool).unwrap();
    }
    assert_eq!(
        injected_symbols(&back, "bump_open_count"),
        vec![Arc::<str>::from(GUARD_BY_FIELD_SYMBOL)]
    );
}
