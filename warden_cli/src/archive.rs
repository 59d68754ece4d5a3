//! Unit archives: a length-prefixed bundle of encoded units.
//!
//! Layout, little-endian: magic `WBA1`, `u32` unit count, then per unit
//! a `u32` payload length and the unit's own encoded form (which carries
//! its name).

use warden_bytecode::{decode_unit, encode_unit, CompiledUnit, DecodeError, EncodeError};

/// Magic prefix of a unit archive.
pub const ARCHIVE_MAGIC: &[u8; 4] = b"WBA1";

/// Encode units into one archive buffer.
pub fn encode_archive(units: &[CompiledUnit]) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(ARCHIVE_MAGIC);
    buf.extend_from_slice(&(units.len() as u32).to_le_bytes());
    for unit in units {
        let payload = encode_unit(unit)?;
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
    }
    Ok(buf)
}

/// Decode an archive, failing on the first malformed unit.
pub fn decode_archive(buf: &[u8]) -> Result<Vec<CompiledUnit>, DecodeError> {
    let rest = buf
        .strip_prefix(ARCHIVE_MAGIC.as_slice())
        .ok_or(DecodeError::BadMagic)?;
    let (count, mut rest) = read_u32(rest)?;
    let mut units = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (len, tail) = read_u32(rest)?;
        let len = len as usize;
        if tail.len() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        units.push(decode_unit(&tail[..len])?);
        rest = &tail[len..];
    }
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(units)
}

fn read_u32(buf: &[u8]) -> Result<(u32, &[u8]), DecodeError> {
    let bytes: [u8; 4] = buf
        .get(..4)
        .ok_or(DecodeError::UnexpectedEof)?
        .try_into()
        .unwrap();
    Ok((u32::from_le_bytes(bytes), &buf[4..]))
}
