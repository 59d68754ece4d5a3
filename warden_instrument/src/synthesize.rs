//! Stack-safe check synthesis.
//!
//! For every injection site a fixed recipe shuffles a copy of the checked
//! object reference to the stack top, invokes the runtime checker, and
//! restores the exact operand layout the protected instruction expects.
//! Every recipe has zero net stack effect.

use crate::classify::{Check, InjectionSite, SiteKind};
use crate::error::InstrumentError;
use smallvec::SmallVec;
use std::sync::Arc;
use warden_bytecode::{
    Constant, ConstantPool, Instruction, InstructionStream, InvokeKind, MethodSig, SlotWidth,
    ValueType,
};

/// Unit name the injected invokes resolve to at run time.
pub const RUNTIME_UNIT: &str = "warden.runtime.Checker";
/// Wire symbol for the strict ownership check.
pub const CHECK_SYMBOL: &str = "check";
/// Wire symbol for the own-monitor check.
pub const GUARD_BY_THIS_SYMBOL: &str = "guard_by_this";
/// Wire symbol for the named-lock check.
pub const GUARD_BY_FIELD_SYMBOL: &str = "guard_by_field";

// Injected signatures are descriptive; only their slot counts matter to
// the stream. The checked object is an opaque single-slot reference.
const ANY_REF: &str = "object";
const GUARD_REF: &str = "guard";

type Seq = SmallVec<[Instruction; 8]>;

fn object_param() -> ValueType {
    ValueType::Ref(Arc::from(ANY_REF))
}

/// Intern the checker invoke for `check`, appending the call steps.
fn push_call(check: Check, pool: &mut ConstantPool, seq: &mut Seq) {
    let (symbol, params) = match check {
        Check::Strict => (CHECK_SYMBOL, vec![object_param()]),
        Check::ThisGuard => (GUARD_BY_THIS_SYMBOL, vec![object_param()]),
        Check::FieldGuard(guard_idx) => {
            // The resolved guard descriptor rides along as a constant.
            seq.push(Instruction::Const(guard_idx));
            (
                GUARD_BY_FIELD_SYMBOL,
                vec![object_param(), ValueType::Ref(Arc::from(GUARD_REF))],
            )
        }
    };
    let target = pool.intern(Constant::MethodRef {
        class: Arc::from(RUNTIME_UNIT),
        name: Arc::from(symbol),
        sig: MethodSig { params, ret: None },
    });
    seq.push(Instruction::Invoke {
        kind: InvokeKind::Static,
        target,
    });
}

/// Build the full instruction sequence for one site.
fn recipe(
    site: &InjectionSite,
    pool: &mut ConstantPool,
    stream: &InstructionStream,
) -> Result<Seq, InstrumentError> {
    use Instruction::*;
    let mut seq = Seq::new();
    match site.kind {
        SiteKind::InstanceFieldWrite {
            width: SlotWidth::Single,
        } => {
            // [obj, v] -> [v, obj, obj] -> call -> [v, obj] -> [obj, v]
            seq.push(Swap);
            seq.push(Dup);
            push_call(site.check, pool, &mut seq);
            seq.push(Swap);
        }
        SiteKind::InstanceFieldWrite {
            width: SlotWidth::Double,
        } => {
            // [obj, v, v] -> [v, v, obj] -> [obj, v, v, obj] -> call
            seq.push(Dup2X1);
            seq.push(Pop2);
            seq.push(DupX2);
            push_call(site.check, pool, &mut seq);
        }
        SiteKind::InstanceFieldRead => {
            seq.push(Dup);
            push_call(site.check, pool, &mut seq);
        }
        SiteKind::StaticFieldWrite => {
            // The checked identity is the owning class object, pushed as
            // a fresh constant resolved from the field reference.
            let owner = match *stream.get(site.at) {
                Instruction::PutStatic(idx) => pool
                    .field_ref(idx)
                    .map(|(class, _, _)| class.clone()),
                _ => None,
            };
            let owner = owner.ok_or_else(|| InstrumentError::DanglingConstruction {
                method: Arc::from("<static write>"),
            })?;
            let class = pool.intern(Constant::Class { name: owner });
            seq.push(ClassRef(class));
            push_call(site.check, pool, &mut seq);
        }
        SiteKind::ArrayElementStore {
            width: SlotWidth::Single,
        } => {
            // [arr, i, v] -> [i, v, arr] -> [arr, i, v, arr] -> call
            seq.push(Dup2X1);
            seq.push(Pop2);
            seq.push(DupX2);
            push_call(site.check, pool, &mut seq);
        }
        SiteKind::ArrayElementStore {
            width: SlotWidth::Double,
        } => {
            // [arr, i, v, v]: park the value, expose the array for the
            // call, then restore the original order.
            seq.push(Dup2X2);
            seq.push(Pop2);
            seq.push(Dup2);
            seq.push(Pop);
            push_call(site.check, pool, &mut seq);
            seq.push(Dup2X2);
            seq.push(Pop2);
        }
        SiteKind::ConstructionComplete => {
            // The fresh reference is on top after the completing invoke.
            seq.push(Dup);
            push_call(site.check, pool, &mut seq);
        }
    }
    Ok(seq)
}

/// Expand a site into the stream.
///
/// Sequences go before the protected instruction, except construction
/// completion, which goes between the completing invoke and the
/// instruction after it. A completing invoke with nothing after it is
/// structurally broken and fails the unit.
pub fn synthesize(
    site: &InjectionSite,
    pool: &mut ConstantPool,
    stream: &mut InstructionStream,
) -> Result<(), InstrumentError> {
    let seq = recipe(site, pool, stream)?;
    match site.kind {
        SiteKind::ConstructionComplete => {
            if stream.next(site.at).is_none() {
                return Err(InstrumentError::DanglingConstruction {
                    method: Arc::from("<method end>"),
                });
            }
            let mut anchor = site.at;
            for inst in seq {
                anchor = stream.insert_after(anchor, inst);
            }
        }
        _ => {
            // A branch that targets the protected instruction still lands
            // on it directly, so only the fall-through path runs the
            // check.
            for inst in seq {
                stream.insert_before(site.at, inst);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Check;
    use warden_bytecode::{ConstIndex, Handle};

    // Simulate one recipe over an explicit slot stack and assert it
    // restores the exact layout the protected instruction expects.
    fn simulate(seq: &[Instruction], pool: &ConstantPool, stack: &mut Vec<&'static str>) {
        for inst in seq {
            match inst {
                Instruction::Swap => {
                    let n = stack.len();
                    stack.swap(n - 1, n - 2);
                }
                Instruction::Dup => stack.push(stack[stack.len() - 1]),
                Instruction::DupX2 => {
                    let top = stack[stack.len() - 1];
                    stack.insert(stack.len() - 3, top);
                }
                Instruction::Dup2 => {
                    let n = stack.len();
                    stack.push(stack[n - 2]);
                    stack.push(stack[n - 1]);
                }
                Instruction::Dup2X1 => {
                    let n = stack.len();
                    let (a, b) = (stack[n - 2], stack[n - 1]);
                    stack.insert(n - 3, a);
                    stack.insert(n - 2, b);
                }
                Instruction::Dup2X2 => {
                    let n = stack.len();
                    let (a, b) = (stack[n - 2], stack[n - 1]);
                    stack.insert(n - 4, a);
                    stack.insert(n - 3, b);
                }
                Instruction::Pop => {
                    stack.pop();
                }
                Instruction::Pop2 => {
                    stack.pop();
                    stack.pop();
                }
                Instruction::Const(_) => stack.push("guard"),
                Instruction::ClassRef(_) => stack.push("class"),
                Instruction::Invoke { target, .. } => {
                    let (_, _, sig) = pool.method_ref(*target).unwrap();
                    for _ in 0..sig.param_slots() {
                        stack.pop();
                    }
                }
                other => panic!("unexpected instruction in recipe: {:?}", other),
            }
        }
    }

    fn site(kind: SiteKind, check: Check) -> InjectionSite {
        InjectionSite {
            at: Handle::default(),
            kind,
            check,
        }
    }

    fn recipe_for(kind: SiteKind, check: Check) -> (Seq, ConstantPool) {
        let mut pool = ConstantPool::new();
        let mut stream = InstructionStream::new();
        // Recipes never look at the stream except for static writes,
        // which are covered separately.
        let at = stream.push_back(Instruction::Return { width: None });
        let mut s = site(kind, check);
        s.at = at;
        let seq = recipe(&s, &mut pool, &stream).unwrap();
        (seq, pool)
    }

    #[test]
    fn test_every_recipe_is_stack_neutral() {
        let cases: &[(SiteKind, Vec<&'static str>)] = &[
            (
                SiteKind::InstanceFieldWrite {
                    width: SlotWidth::Single,
                },
                vec!["obj", "v"],
            ),
            (
                SiteKind::InstanceFieldWrite {
                    width: SlotWidth::Double,
                },
                vec!["obj", "v1", "v2"],
            ),
            (SiteKind::InstanceFieldRead, vec!["obj"]),
            (
                SiteKind::ArrayElementStore {
                    width: SlotWidth::Single,
                },
                vec!["arr", "i", "v"],
            ),
            (
                SiteKind::ArrayElementStore {
                    width: SlotWidth::Double,
                },
                vec!["arr", "i", "v1", "v2"],
            ),
            (SiteKind::ConstructionComplete, vec!["obj"]),
        ];
        for check in [Check::Strict, Check::ThisGuard, Check::FieldGuard(ConstIndex(0))] {
            for (kind, layout) in cases {
                let (seq, pool) = recipe_for(*kind, check);
                let mut stack = layout.clone();
                simulate(&seq, &pool, &mut stack);
                assert_eq!(&stack, layout, "{:?} with {:?}", kind, check);
            }
        }
    }

    #[test]
    fn test_static_write_recipe_pushes_owner_class() {
        let mut pool = ConstantPool::new();
        let field = pool.intern(Constant::FieldRef {
            class: "demo.Ledger".into(),
            name: "total".into(),
            ty: ValueType::Int,
        });
        let mut stream = InstructionStream::new();
        let at = stream.push_back(Instruction::PutStatic(field));
        let s = site(SiteKind::StaticFieldWrite, Check::Strict);
        let s = InjectionSite { at, ..s };
        let seq = recipe(&s, &mut pool, &stream).unwrap();

        let Instruction::ClassRef(class_idx) = seq[0] else {
            panic!("expected a class push, got {:?}", seq[0]);
        };
        match pool.get(class_idx).unwrap() {
            Constant::Class { name } => assert_eq!(&**name, "demo.Ledger"),
            other => panic!("expected Class, got {:?}", other),
        }

        let mut stack = vec!["v"];
        simulate(&seq, &pool, &mut stack);
        assert_eq!(stack, vec!["v"]);
    }

    #[test]
    fn test_construction_requires_following_instruction() {
        let mut pool = ConstantPool::new();
        let mut stream = InstructionStream::new();
        let class = pool.intern(Constant::Class {
            name: "demo.Journal".into(),
        });
        let ctor = pool.intern(Constant::MethodRef {
            class: "demo.Journal".into(),
            name: "<init>".into(),
            sig: MethodSig::void(),
        });
        stream.push_back(Instruction::New(class));
        let at = stream.push_back(Instruction::Invoke {
            kind: InvokeKind::Ctor,
            target: ctor,
        });
        let s = InjectionSite {
            at,
            kind: SiteKind::ConstructionComplete,
            check: Check::Strict,
        };
        let err = synthesize(&s, &mut pool, &mut stream).unwrap_err();
        assert!(matches!(err, InstrumentError::DanglingConstruction { .. }));
    }

    #[test]
    fn test_synthesis_inserts_before_the_site() {
        let mut pool = ConstantPool::new();
        let field = pool.intern(Constant::FieldRef {
            class: "demo.Account".into(),
            name: "balance".into(),
            ty: ValueType::Int,
        });
        let mut stream = InstructionStream::new();
        let load_obj = stream.push_back(Instruction::LoadLocal {
            slot: 0,
            width: SlotWidth::Single,
        });
        let load_v = stream.push_back(Instruction::LoadLocal {
            slot: 1,
            width: SlotWidth::Single,
        });
        let put = stream.push_back(Instruction::PutField(field));
        stream.push_back(Instruction::Return { width: None });

        let s = InjectionSite {
            at: put,
            kind: SiteKind::InstanceFieldWrite {
                width: SlotWidth::Single,
            },
            check: Check::Strict,
        };
        synthesize(&s, &mut pool, &mut stream).unwrap();

        let order: Vec<Instruction> = stream.iter().map(|(_, i)| i.clone()).collect();
        assert_eq!(order[0], *stream.get(load_obj));
        assert_eq!(order[1], *stream.get(load_v));
        assert_eq!(order[2], Instruction::Swap);
        assert_eq!(order[3], Instruction::Dup);
        assert!(matches!(order[4], Instruction::Invoke { .. }));
        assert_eq!(order[5], Instruction::Swap);
        assert_eq!(order[6], Instruction::PutField(field));
    }
}
