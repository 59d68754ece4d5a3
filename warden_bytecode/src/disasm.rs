//! Disassembly of method bodies for diagnostics.

use crate::constant_pool::{Constant, ConstantPool};
use crate::instruction::{BranchKind, Instruction, InvokeKind};
use crate::stream::Handle;
use crate::unit::{CompiledUnit, MethodDef};
use rustc_hash::FxHashMap;
use std::fmt::Write;

fn render_constant(pool: &ConstantPool, idx: crate::constant_pool::ConstIndex) -> String {
    match pool.get(idx) {
        Some(Constant::Int(v)) => format!("int {}", v),
        Some(Constant::Long(v)) => format!("long {}", v),
        Some(Constant::Float(v)) => format!("float {}", v),
        Some(Constant::Double(v)) => format!("double {}", v),
        Some(Constant::Str(s)) => format!("{:?}", s),
        Some(Constant::Class { name }) => format!("class {}", name),
        Some(Constant::FieldRef { class, name, .. }) => format!("{}.{}", class, name),
        Some(Constant::MethodRef { class, name, sig }) => format!("{}.{}{}", class, name, sig),
        Some(Constant::GuardRef { class, field, .. }) => format!("guard {}.{}", class, field),
        None => format!("<bad {}>", idx),
    }
}

fn render_instruction(
    inst: &Instruction,
    pool: &ConstantPool,
    ordinals: &FxHashMap<Handle, u32>,
) -> String {
    use Instruction::*;
    match inst {
        Const(i) => format!("const        {}", render_constant(pool, *i)),
        ConstWide(i) => format!("const.w      {}", render_constant(pool, *i)),
        ClassRef(i) => format!("classref     {}", render_constant(pool, *i)),
        LoadLocal { slot, width } => format!("load         {} ({:?})", slot, width),
        StoreLocal { slot, width } => format!("store        {} ({:?})", slot, width),
        GetField(i) => format!("getfield     {}", render_constant(pool, *i)),
        PutField(i) => format!("putfield     {}", render_constant(pool, *i)),
        GetStatic(i) => format!("getstatic    {}", render_constant(pool, *i)),
        PutStatic(i) => format!("putstatic    {}", render_constant(pool, *i)),
        ArrayLoad(w) => format!("aload        ({:?})", w),
        ArrayStore(w) => format!("astore       ({:?})", w),
        New(i) => format!("new          {}", render_constant(pool, *i)),
        NewArray(i) => format!("newarray     {}", render_constant(pool, *i)),
        Invoke { kind, target } => {
            let k = match kind {
                InvokeKind::Virtual => "virtual",
                InvokeKind::Static => "static",
                InvokeKind::Ctor => "ctor",
            };
            format!("invoke.{:<7} {}", k, render_constant(pool, *target))
        }
        Dup => "dup".to_string(),
        DupX1 => "dup_x1".to_string(),
        DupX2 => "dup_x2".to_string(),
        Dup2 => "dup2".to_string(),
        Dup2X1 => "dup2_x1".to_string(),
        Dup2X2 => "dup2_x2".to_string(),
        Pop => "pop".to_string(),
        Pop2 => "pop2".to_string(),
        Swap => "swap".to_string(),
        Branch { kind, target } => {
            let k = match kind {
                BranchKind::Always => "always",
                BranchKind::IfZero => "ifzero",
            };
            format!("branch.{}  -> {}", k, ordinals.get(target).copied().unwrap_or(0))
        }
        Return { width: None } => "return".to_string(),
        Return { width: Some(w) } => format!("return       ({:?})", w),
    }
}

/// Render one method of a unit to a string.
pub fn disassemble(unit: &CompiledUnit, method: &MethodDef) -> String {
    let mut out = String::new();
    writeln!(out, "{}.{}{}", unit.name, method.name, method.sig).unwrap();
    writeln!(out, "  max_stack: {}", method.max_stack).unwrap();
    let code = match &method.code {
        Some(code) => code,
        None => {
            writeln!(out, "  <no code>").unwrap();
            return out;
        }
    };
    let ordinals: FxHashMap<Handle, u32> = code
        .iter()
        .enumerate()
        .map(|(i, (h, _))| (h, i as u32))
        .collect();
    for (i, (_, inst)) in code.iter().enumerate() {
        writeln!(
            out,
            "  {:4}: {}",
            i,
            render_instruction(inst, &unit.pool, &ordinals)
        )
        .unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant_pool::Constant;
    use crate::stream::InstructionStream;
    use crate::types::{MethodSig, ValueType};
    use crate::unit::MethodFlags;

    #[test]
    fn test_disassemble_renders_field_names() {
        let mut unit = CompiledUnit::new("demo.Box");
        let field = unit.pool.intern(Constant::FieldRef {
            class: "demo.Box".into(),
            name: "value".into(),
            ty: ValueType::Int,
        });
        let mut code = InstructionStream::new();
        code.push_back(Instruction::GetField(field));
        code.push_back(Instruction::Return {
            width: Some(crate::types::SlotWidth::Single),
        });
        let method = MethodDef {
            name: "value".into(),
            sig: MethodSig {
                params: vec![],
                ret: Some(ValueType::Int),
            },
            flags: MethodFlags::NONE,
            max_stack: 1,
            code: Some(code),
        };
        let text = disassemble(&unit, &method);
        assert!(text.contains("demo.Box.value"));
        assert!(text.contains("getfield"));
        assert!(text.contains("demo.Box.value"));
    }
}
