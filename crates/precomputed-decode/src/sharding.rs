//! Sharded key layout (`neuroglancer_uint64_sharded_v1`).
//!
//! A sharded store groups the chunks of many segments into a small number of
//! shard files. Each shard begins with a fixed-size *shard index* holding one
//! `[start, end)` byte range per minishard; each range points at a
//! *minishard index* listing `(key, offset, size)` triples for the chunks in
//! that minishard. All offsets are relative to the end of the shard index.

use std::ops::Range;

use crate::bytes::{read_u64, read_u64_array};
use crate::error::{DecodeError, DecodeResult};
use crate::hash::murmurhash3_key;

/// Size in bytes of one shard index entry.
pub const SHARD_INDEX_ENTRY_SIZE: u64 = 16;

/// Hash function applied to (pre-shifted) keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashFunction {
    /// The key is used as-is.
    Identity,
    /// `MurmurHash3_x86_128`, low 64 bits.
    MurmurHash3X86_128,
}

impl HashFunction {
    /// Parse the hash name used in sharding specs.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "identity" => Some(Self::Identity),
            "murmurhash3_x86_128" => Some(Self::MurmurHash3X86_128),
            _ => None,
        }
    }

    /// Apply the hash to a key.
    #[must_use]
    pub fn apply(self, key: u64) -> u64 {
        match self {
            Self::Identity => key,
            Self::MurmurHash3X86_128 => murmurhash3_key(key),
        }
    }
}

/// Parameters that place keys into shards and minishards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardLayout {
    pub preshift_bits: u32,
    pub hash: HashFunction,
    pub minishard_bits: u32,
    pub shard_bits: u32,
}

/// Where a key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardLocation {
    pub shard: u64,
    pub minishard: u64,
}

fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

impl ShardLayout {
    /// Compute the shard and minishard holding `key`.
    #[must_use]
    pub fn locate(&self, key: u64) -> ShardLocation {
        let shifted = key.checked_shr(self.preshift_bits).unwrap_or(0);
        let hashed = self.hash.apply(shifted);
        let minishard = hashed & low_mask(self.minishard_bits);
        let shard = hashed.checked_shr(self.minishard_bits).unwrap_or(0) & low_mask(self.shard_bits);
        ShardLocation { shard, minishard }
    }

    /// File name of a shard, e.g. `"0a3.shard"`.
    ///
    /// The shard number is written in lowercase hex, zero-padded to
    /// `ceil(shard_bits / 4)` digits.
    #[must_use]
    pub fn shard_file_name(&self, shard: u64) -> String {
        let width = self.shard_bits.div_ceil(4) as usize;
        format!("{shard:0width$x}.shard")
    }

    /// Total size in bytes of the shard index at the start of every shard.
    #[must_use]
    pub fn shard_index_size(&self) -> u64 {
        SHARD_INDEX_ENTRY_SIZE << self.minishard_bits
    }

    /// Byte range of the shard index entry for `minishard`.
    #[must_use]
    pub fn shard_index_entry_range(&self, minishard: u64) -> Range<u64> {
        let start = minishard * SHARD_INDEX_ENTRY_SIZE;
        start..start + SHARD_INDEX_ENTRY_SIZE
    }
}

/// Decode one 16-byte shard index entry into an absolute byte range.
///
/// `shard_index_size` is added so the returned range can be requested from
/// the shard file directly. An empty range means the minishard has no keys.
///
/// # Errors
///
/// Returns an error if the entry is not 16 bytes, ends before it starts, or
/// overflows once shifted past the shard index.
pub fn decode_shard_index_entry(entry: &[u8], shard_index_size: u64) -> DecodeResult<Range<u64>> {
    if entry.len() != 16 {
        return Err(DecodeError::WrongLength {
            context: "shard index entry",
            expected: 16,
            actual: entry.len(),
        });
    }

    let mut offset = 0;
    let start = read_u64(entry, &mut offset, "shard index entry")?;
    let end = read_u64(entry, &mut offset, "shard index entry")?;

    if end < start {
        return Err(DecodeError::Malformed {
            context: "shard index entry",
            detail: format!("end {end} precedes start {start}"),
        });
    }

    let shift = |value: u64| {
        value
            .checked_add(shard_index_size)
            .ok_or_else(|| DecodeError::Malformed {
                context: "shard index entry",
                detail: format!("offset {value} overflows past the shard index"),
            })
    };
    Ok(shift(start)?..shift(end)?)
}

/// One chunk listed in a minishard index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinishardEntry {
    pub key: u64,
    /// Offset relative to the end of the shard index.
    pub offset: u64,
    pub size: u64,
}

impl MinishardEntry {
    /// Absolute byte range of the chunk within the shard file.
    ///
    /// # Errors
    ///
    /// Returns an error if the range does not fit in a `u64`.
    pub fn byte_range(&self, shard_index_size: u64) -> DecodeResult<Range<u64>> {
        self.offset
            .checked_add(shard_index_size)
            .and_then(|start| Some(start..start.checked_add(self.size)?))
            .ok_or_else(|| DecodeError::Malformed {
                context: "minishard entry",
                detail: format!(
                    "chunk {} at offset {} with size {} overflows",
                    self.key, self.offset, self.size
                ),
            })
    }
}

/// Decode an uncompressed minishard index.
///
/// The index is three `u64` arrays of equal length: delta-coded keys,
/// delta-coded offsets (each delta is relative to the end of the previous
/// chunk), and chunk sizes.
pub fn decode_minishard_index(data: &[u8]) -> DecodeResult<Vec<MinishardEntry>> {
    if data.len() % 24 != 0 {
        return Err(DecodeError::Malformed {
            context: "minishard index",
            detail: format!("length {} is not a multiple of 24", data.len()),
        });
    }

    let count = data.len() / 24;
    let mut offset = 0;
    let key_deltas = read_u64_array(data, &mut offset, count, "minishard keys")?;
    let offset_deltas = read_u64_array(data, &mut offset, count, "minishard offsets")?;
    let sizes = read_u64_array(data, &mut offset, count, "minishard sizes")?;

    let mut entries = Vec::with_capacity(count);
    let mut key = 0u64;
    let mut next_offset = 0u64;
    for i in 0..count {
        key = key.wrapping_add(key_deltas[i]);
        let chunk_offset = next_offset.wrapping_add(offset_deltas[i]);
        next_offset = chunk_offset.wrapping_add(sizes[i]);
        entries.push(MinishardEntry {
            key,
            offset: chunk_offset,
            size: sizes[i],
        });
    }

    Ok(entries)
}

/// Find the entry for `key`, if present.
#[must_use]
pub fn find_chunk(entries: &[MinishardEntry], key: u64) -> Option<MinishardEntry> {
    entries.iter().find(|e| e.key == key).copied()
}
