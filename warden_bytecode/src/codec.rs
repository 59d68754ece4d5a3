//! Binary encoding of compiled units.
//!
//! Little-endian, length-prefixed, tagged. Branch targets travel as
//! instruction ordinals and are rebound to stream handles on decode.
//! Any malformed input fails the whole unit with a [`DecodeError`];
//! there is no partial decode.

use crate::constant_pool::{ConstIndex, Constant, ConstantPool, GuardPlacement};
use crate::instruction::{BranchKind, Instruction, InvokeKind};
use crate::stream::{Handle, InstructionStream};
use crate::types::{MethodSig, SlotWidth, ValueType};
use crate::unit::{CompiledUnit, FieldDef, FieldFlags, MethodDef, MethodFlags, UnitFlags};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Magic prefix of an encoded unit.
pub const UNIT_MAGIC: &[u8; 4] = b"WBC1";

/// A unit that does not fit the wire format's fixed-width counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeError {
    /// Which count overflowed.
    pub what: &'static str,
    /// The actual count.
    pub count: usize,
    /// The largest encodable count.
    pub max: usize,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unit has too many {} ({}, limit {})",
            self.what, self.count, self.max
        )
    }
}

impl std::error::Error for EncodeError {}

/// A malformed unit buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer ends mid-value.
    UnexpectedEof,
    /// The buffer does not start with [`UNIT_MAGIC`].
    BadMagic,
    /// An unknown tag byte.
    BadTag { what: &'static str, tag: u8 },
    /// A string is not valid UTF-8.
    BadUtf8,
    /// A branch ordinal points outside the method.
    BadBranchTarget { ordinal: u32 },
    /// Trailing bytes after the unit.
    TrailingBytes,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of unit buffer"),
            DecodeError::BadMagic => write!(f, "not a compiled unit (bad magic)"),
            DecodeError::BadTag { what, tag } => write!(f, "unknown {} tag {:#04x}", what, tag),
            DecodeError::BadUtf8 => write!(f, "malformed string in unit buffer"),
            DecodeError::BadBranchTarget { ordinal } => {
                write!(f, "branch target {} is out of range", ordinal)
            }
            DecodeError::TrailingBytes => write!(f, "trailing bytes after unit"),
        }
    }
}

impl std::error::Error for DecodeError {}

// =============================================================================
// Writer
// =============================================================================

struct Writer {
    buf: Vec<u8>,
    /// First count that overflowed its wire width, if any. The buffer is
    /// discarded by [`Writer::finish`] once this is set.
    oversize: Option<EncodeError>,
}

impl Writer {
    fn new() -> Self {
        Writer {
            buf: Vec::new(),
            oversize: None,
        }
    }

    /// Record an overflow of `what` and keep the first one.
    fn check(&mut self, what: &'static str, count: usize, max: usize) {
        if count > max && self.oversize.is_none() {
            self.oversize = Some(EncodeError { what, count, max });
        }
    }

    fn finish(self) -> Result<Vec<u8>, EncodeError> {
        match self.oversize {
            Some(err) => Err(err),
            None => Ok(self.buf),
        }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn str(&mut self, s: &str) {
        self.check("string bytes", s.len(), u16::MAX as usize);
        self.u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.u8(1);
                self.str(s);
            }
            None => self.u8(0),
        }
    }

    fn width(&mut self, w: SlotWidth) {
        self.u8(match w {
            SlotWidth::Single => 0,
            SlotWidth::Double => 1,
        });
    }

    fn value_type(&mut self, ty: &ValueType) {
        match ty {
            ValueType::Int => self.u8(0),
            ValueType::Long => self.u8(1),
            ValueType::Float => self.u8(2),
            ValueType::Double => self.u8(3),
            ValueType::Ref(name) => {
                self.u8(4);
                self.str(name);
            }
        }
    }

    fn sig(&mut self, sig: &MethodSig) {
        self.check("signature parameters", sig.params.len(), u8::MAX as usize);
        self.u8(sig.params.len() as u8);
        for p in &sig.params {
            self.value_type(p);
        }
        match &sig.ret {
            Some(t) => {
                self.u8(1);
                self.value_type(t);
            }
            None => self.u8(0),
        }
    }
}

// =============================================================================
// Reader
// =============================================================================

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn str(&mut self) -> Result<Arc<str>, DecodeError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(Arc::from)
            .map_err(|_| DecodeError::BadUtf8)
    }

    fn opt_str(&mut self) -> Result<Option<Arc<str>>, DecodeError> {
        match self.u8()? {
            0 => Ok(None),
            _ => Ok(Some(self.str()?)),
        }
    }

    fn width(&mut self) -> Result<SlotWidth, DecodeError> {
        match self.u8()? {
            0 => Ok(SlotWidth::Single),
            1 => Ok(SlotWidth::Double),
            tag => Err(DecodeError::BadTag { what: "width", tag }),
        }
    }

    fn value_type(&mut self) -> Result<ValueType, DecodeError> {
        match self.u8()? {
            0 => Ok(ValueType::Int),
            1 => Ok(ValueType::Long),
            2 => Ok(ValueType::Float),
            3 => Ok(ValueType::Double),
            4 => Ok(ValueType::Ref(self.str()?)),
            tag => Err(DecodeError::BadTag { what: "type", tag }),
        }
    }

    fn sig(&mut self) -> Result<MethodSig, DecodeError> {
        let n = self.u8()? as usize;
        let mut params = Vec::with_capacity(n);
        for _ in 0..n {
            params.push(self.value_type()?);
        }
        let ret = match self.u8()? {
            0 => None,
            _ => Some(self.value_type()?),
        };
        Ok(MethodSig { params, ret })
    }
}

// =============================================================================
// Constants
// =============================================================================

fn encode_constant(w: &mut Writer, c: &Constant) {
    match c {
        Constant::Int(v) => {
            w.u8(1);
            w.u32(*v as u32);
        }
        Constant::Long(v) => {
            w.u8(2);
            w.u64(*v as u64);
        }
        Constant::Float(v) => {
            w.u8(3);
            w.u32(v.to_bits());
        }
        Constant::Double(v) => {
            w.u8(4);
            w.u64(v.to_bits());
        }
        Constant::Str(s) => {
            w.u8(5);
            w.str(s);
        }
        Constant::Class { name } => {
            w.u8(6);
            w.str(name);
        }
        Constant::FieldRef { class, name, ty } => {
            w.u8(7);
            w.str(class);
            w.str(name);
            w.value_type(ty);
        }
        Constant::MethodRef { class, name, sig } => {
            w.u8(8);
            w.str(class);
            w.str(name);
            w.sig(sig);
        }
        Constant::GuardRef {
            class,
            field,
            placement,
        } => {
            w.u8(9);
            w.str(class);
            w.str(field);
            w.u8(match placement {
                GuardPlacement::Static => 0,
                GuardPlacement::Instance => 1,
            });
        }
    }
}

fn decode_constant(r: &mut Reader<'_>) -> Result<Constant, DecodeError> {
    match r.u8()? {
        1 => Ok(Constant::Int(r.u32()? as i32)),
        2 => Ok(Constant::Long(r.u64()? as i64)),
        3 => Ok(Constant::Float(f32::from_bits(r.u32()?))),
        4 => Ok(Constant::Double(f64::from_bits(r.u64()?))),
        5 => Ok(Constant::Str(r.str()?)),
        6 => Ok(Constant::Class { name: r.str()? }),
        7 => Ok(Constant::FieldRef {
            class: r.str()?,
            name: r.str()?,
            ty: r.value_type()?,
        }),
        8 => Ok(Constant::MethodRef {
            class: r.str()?,
            name: r.str()?,
            sig: r.sig()?,
        }),
        9 => Ok(Constant::GuardRef {
            class: r.str()?,
            field: r.str()?,
            placement: match r.u8()? {
                0 => GuardPlacement::Static,
                1 => GuardPlacement::Instance,
                tag => return Err(DecodeError::BadTag { what: "guard", tag }),
            },
        }),
        tag => Err(DecodeError::BadTag {
            what: "constant",
            tag,
        }),
    }
}

// =============================================================================
// Instructions
// =============================================================================

fn encode_instruction(w: &mut Writer, inst: &Instruction, ordinals: &FxHashMap<Handle, u32>) {
    use Instruction::*;
    match inst {
        Const(i) => {
            w.u8(0);
            w.u16(i.0);
        }
        ConstWide(i) => {
            w.u8(1);
            w.u16(i.0);
        }
        ClassRef(i) => {
            w.u8(2);
            w.u16(i.0);
        }
        LoadLocal { slot, width } => {
            w.u8(3);
            w.u16(*slot);
            w.width(*width);
        }
        StoreLocal { slot, width } => {
            w.u8(4);
            w.u16(*slot);
            w.width(*width);
        }
        GetField(i) => {
            w.u8(5);
            w.u16(i.0);
        }
        PutField(i) => {
            w.u8(6);
            w.u16(i.0);
        }
        GetStatic(i) => {
            w.u8(7);
            w.u16(i.0);
        }
        PutStatic(i) => {
            w.u8(8);
            w.u16(i.0);
        }
        ArrayLoad(width) => {
            w.u8(9);
            w.width(*width);
        }
        ArrayStore(width) => {
            w.u8(10);
            w.width(*width);
        }
        New(i) => {
            w.u8(11);
            w.u16(i.0);
        }
        NewArray(i) => {
            w.u8(12);
            w.u16(i.0);
        }
        Invoke { kind, target } => {
            w.u8(13);
            w.u8(match kind {
                InvokeKind::Virtual => 0,
                InvokeKind::Static => 1,
                InvokeKind::Ctor => 2,
            });
            w.u16(target.0);
        }
        Dup => w.u8(14),
        DupX1 => w.u8(15),
        DupX2 => w.u8(16),
        Dup2 => w.u8(17),
        Dup2X1 => w.u8(18),
        Dup2X2 => w.u8(19),
        Pop => w.u8(20),
        Pop2 => w.u8(21),
        Swap => w.u8(22),
        Branch { kind, target } => {
            w.u8(23);
            w.u8(match kind {
                BranchKind::Always => 0,
                BranchKind::IfZero => 1,
            });
            w.u32(ordinals[target]);
        }
        Return { width } => {
            w.u8(24);
            match width {
                Some(wd) => {
                    w.u8(1);
                    w.width(*wd);
                }
                None => w.u8(0),
            }
        }
    }
}

/// Branch ordinal pending rebinding once all handles exist.
struct PendingBranch {
    handle: Handle,
    ordinal: u32,
}

fn decode_instruction(
    r: &mut Reader<'_>,
) -> Result<(Instruction, Option<u32>), DecodeError> {
    use Instruction::*;
    let idx = |r: &mut Reader<'_>| -> Result<ConstIndex, DecodeError> { Ok(ConstIndex(r.u16()?)) };
    let inst = match r.u8()? {
        0 => Const(idx(r)?),
        1 => ConstWide(idx(r)?),
        2 => ClassRef(idx(r)?),
        3 => LoadLocal {
            slot: r.u16()?,
            width: r.width()?,
        },
        4 => StoreLocal {
            slot: r.u16()?,
            width: r.width()?,
        },
        5 => GetField(idx(r)?),
        6 => PutField(idx(r)?),
        7 => GetStatic(idx(r)?),
        8 => PutStatic(idx(r)?),
        9 => ArrayLoad(r.width()?),
        10 => ArrayStore(r.width()?),
        11 => New(idx(r)?),
        12 => NewArray(idx(r)?),
        13 => {
            let kind = match r.u8()? {
                0 => InvokeKind::Virtual,
                1 => InvokeKind::Static,
                2 => InvokeKind::Ctor,
                tag => {
                    return Err(DecodeError::BadTag {
                        what: "invoke kind",
                        tag,
                    })
                }
            };
            Invoke {
                kind,
                target: idx(r)?,
            }
        }
        14 => Dup,
        15 => DupX1,
        16 => DupX2,
        17 => Dup2,
        18 => Dup2X1,
        19 => Dup2X2,
        20 => Pop,
        21 => Pop2,
        22 => Swap,
        23 => {
            let kind = match r.u8()? {
                0 => BranchKind::Always,
                1 => BranchKind::IfZero,
                tag => {
                    return Err(DecodeError::BadTag {
                        what: "branch kind",
                        tag,
                    })
                }
            };
            let ordinal = r.u32()?;
            // Target is rebound by the caller; park a self-branch for now.
            return Ok((
                Branch {
                    kind,
                    target: Handle::default(),
                },
                Some(ordinal),
            ));
        }
        24 => Return {
            width: match r.u8()? {
                0 => None,
                _ => Some(r.width()?),
            },
        },
        tag => {
            return Err(DecodeError::BadTag {
                what: "instruction",
                tag,
            })
        }
    };
    Ok((inst, None))
}

fn encode_stream(w: &mut Writer, stream: &InstructionStream) {
    let ordinals: FxHashMap<Handle, u32> = stream
        .iter()
        .enumerate()
        .map(|(i, (h, _))| (h, i as u32))
        .collect();
    w.check("instructions", stream.len(), u32::MAX as usize);
    w.u32(stream.len() as u32);
    for (_, inst) in stream.iter() {
        encode_instruction(w, inst, &ordinals);
    }
}

fn decode_stream(r: &mut Reader<'_>) -> Result<InstructionStream, DecodeError> {
    let count = r.u32()? as usize;
    let mut stream = InstructionStream::new();
    let mut handles = Vec::with_capacity(count);
    let mut pending = Vec::new();
    for _ in 0..count {
        let (inst, branch_ordinal) = decode_instruction(r)?;
        let h = stream.push_back(inst);
        if let Some(ordinal) = branch_ordinal {
            pending.push(PendingBranch { handle: h, ordinal });
        }
        handles.push(h);
    }
    for p in pending {
        let target = *handles
            .get(p.ordinal as usize)
            .ok_or(DecodeError::BadBranchTarget { ordinal: p.ordinal })?;
        if let Instruction::Branch { target: t, .. } = stream.get_mut(p.handle) {
            *t = target;
        }
    }
    Ok(stream)
}

// =============================================================================
// Units
// =============================================================================

/// Encode a unit into a fresh buffer.
///
/// Rejects units whose counts do not fit the format's fixed widths
/// instead of truncating them.
pub fn encode_unit(unit: &CompiledUnit) -> Result<Vec<u8>, EncodeError> {
    let mut w = Writer::new();
    w.buf.extend_from_slice(UNIT_MAGIC);
    w.str(&unit.name);
    w.opt_str(unit.superclass.as_deref());
    w.u8(unit.flags.bits());

    w.check("constants", unit.pool.len(), u16::MAX as usize);
    w.u16(unit.pool.len() as u16);
    for c in unit.pool.iter() {
        encode_constant(&mut w, c);
    }

    w.check("fields", unit.fields.len(), u16::MAX as usize);
    w.u16(unit.fields.len() as u16);
    for f in &unit.fields {
        w.str(&f.name);
        w.value_type(&f.ty);
        w.u8(f.flags.bits());
        w.opt_str(f.guard.as_deref());
    }

    w.check("methods", unit.methods.len(), u16::MAX as usize);
    w.u16(unit.methods.len() as u16);
    for m in &unit.methods {
        w.str(&m.name);
        w.sig(&m.sig);
        w.u8(m.flags.bits());
        w.u16(m.max_stack);
        match &m.code {
            Some(code) => {
                w.u8(1);
                encode_stream(&mut w, code);
            }
            None => w.u8(0),
        }
    }

    w.finish()
}

/// Decode a unit from a buffer, failing on any malformation.
pub fn decode_unit(buf: &[u8]) -> Result<CompiledUnit, DecodeError> {
    let mut r = Reader::new(buf);
    if r.take(4)? != UNIT_MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let name = r.str()?;
    let superclass = r.opt_str()?;
    let flags = UnitFlags::from_bits(r.u8()?);

    let pool_len = r.u16()? as usize;
    let mut entries = Vec::with_capacity(pool_len);
    for _ in 0..pool_len {
        entries.push(decode_constant(&mut r)?);
    }
    let pool = ConstantPool::from_entries(entries);

    let field_len = r.u16()? as usize;
    let mut fields = Vec::with_capacity(field_len);
    for _ in 0..field_len {
        fields.push(FieldDef {
            name: r.str()?,
            ty: r.value_type()?,
            flags: FieldFlags::from_bits(r.u8()?),
            guard: r.opt_str()?,
        });
    }

    let method_len = r.u16()? as usize;
    let mut methods = Vec::with_capacity(method_len);
    for _ in 0..method_len {
        let name = r.str()?;
        let sig = r.sig()?;
        let flags = MethodFlags::from_bits(r.u8()?);
        let max_stack = r.u16()?;
        let code = match r.u8()? {
            0 => None,
            _ => Some(decode_stream(&mut r)?),
        };
        methods.push(MethodDef {
            name,
            sig,
            flags,
            max_stack,
            code,
        });
    }

    if r.pos != buf.len() {
        return Err(DecodeError::TrailingBytes);
    }

    Ok(CompiledUnit {
        name,
        superclass,
        flags,
        pool,
        fields,
        methods,
    })
}
