//! Little-endian fixed-width field reading.
//!
//! All precomputed binary formats (manifests, fragments, shard indexes) are
//! little-endian. Each reader takes the buffer and a cursor offset which is
//! advanced past the field on success and left untouched on failure.

use crate::error::{DecodeError, DecodeResult};

fn take<'a, const N: usize>(
    data: &'a [u8],
    offset: &mut usize,
    context: &'static str,
) -> DecodeResult<&'a [u8; N]> {
    let end = offset
        .checked_add(N)
        .ok_or(DecodeError::Truncated { context })?;
    let bytes = data
        .get(*offset..end)
        .ok_or(DecodeError::Truncated { context })?;
    *offset = end;
    bytes
        .try_into()
        .map_err(|_| DecodeError::Truncated { context })
}

/// Read a `u32` at `offset`.
pub fn read_u32(data: &[u8], offset: &mut usize, context: &'static str) -> DecodeResult<u32> {
    take::<4>(data, offset, context).map(|b| u32::from_le_bytes(*b))
}

/// Read a `u64` at `offset`.
pub fn read_u64(data: &[u8], offset: &mut usize, context: &'static str) -> DecodeResult<u64> {
    take::<8>(data, offset, context).map(|b| u64::from_le_bytes(*b))
}

/// Read an `f32` at `offset`.
pub fn read_f32(data: &[u8], offset: &mut usize, context: &'static str) -> DecodeResult<f32> {
    take::<4>(data, offset, context).map(|b| f32::from_le_bytes(*b))
}

/// Read `count` consecutive `u32` values.
pub fn read_u32_array(
    data: &[u8],
    offset: &mut usize,
    count: usize,
    context: &'static str,
) -> DecodeResult<Vec<u32>> {
    ensure_remaining(data, *offset, count, 4, context)?;
    (0..count).map(|_| read_u32(data, offset, context)).collect()
}

/// Read `count` consecutive `f32` values.
pub fn read_f32_array(
    data: &[u8],
    offset: &mut usize,
    count: usize,
    context: &'static str,
) -> DecodeResult<Vec<f32>> {
    ensure_remaining(data, *offset, count, 4, context)?;
    (0..count).map(|_| read_f32(data, offset, context)).collect()
}

/// Read `count` consecutive `u64` values.
pub fn read_u64_array(
    data: &[u8],
    offset: &mut usize,
    count: usize,
    context: &'static str,
) -> DecodeResult<Vec<u64>> {
    ensure_remaining(data, *offset, count, 8, context)?;
    (0..count).map(|_| read_u64(data, offset, context)).collect()
}

/// Reject counts that cannot fit in the rest of the buffer before allocating.
fn ensure_remaining(
    data: &[u8],
    offset: usize,
    count: usize,
    width: usize,
    context: &'static str,
) -> DecodeResult<()> {
    let remaining = data.len().saturating_sub(offset);
    match count.checked_mul(width) {
        Some(needed) if needed <= remaining => Ok(()),
        _ => Err(DecodeError::Truncated { context }),
    }
}
