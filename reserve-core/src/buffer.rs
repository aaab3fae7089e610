//! Offset-addressed reads and writes into the decompressed payload.

use crate::{ReserveError, Result};

pub(crate) fn check_range(buf: &[u8], offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= buf.len() => Ok(()),
        _ => Err(ReserveError::OutOfBounds {
            offset,
            len,
            buffer_len: buf.len(),
        }),
    }
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    check_range(buf, offset, 4)?;
    Ok(u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
    check_range(buf, offset, 4)?;
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

pub(crate) fn write_f32(buf: &mut [u8], offset: usize, value: f32) -> Result<()> {
    check_range(buf, offset, 4)?;
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

pub(crate) fn write_u8(buf: &mut [u8], offset: usize, value: u8) -> Result<()> {
    check_range(buf, offset, 1)?;
    buf[offset] = value;
    Ok(())
}

/// Inserts `bytes` at `offset`, shifting everything after it right.
pub(crate) fn insert_bytes(buf: &mut Vec<u8>, offset: usize, bytes: &[u8]) -> Result<()> {
    check_range(buf, offset, 0)?;
    buf.splice(offset..offset, bytes.iter().copied());
    Ok(())
}

/// Removes `len` bytes starting at `offset`.
pub(crate) fn remove_bytes(buf: &mut Vec<u8>, offset: usize, len: usize) -> Result<()> {
    check_range(buf, offset, len)?;
    buf.drain(offset..offset + len);
    Ok(())
}

/// Applies a signed delta to an offset, clamping into the `u32` range.
pub(crate) fn shift_offset(offset: u32, delta: i64) -> u32 {
    (i64::from(offset) + delta).clamp(0, i64::from(u32::MAX)) as u32
}
