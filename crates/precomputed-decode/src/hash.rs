//! `MurmurHash3_x86_128`, as used by the sharded key layout.

const C1: u32 = 0x239b_961b;
const C2: u32 = 0xab0e_9789;
const C3: u32 = 0x38b3_4ae5;
const C4: u32 = 0xa1e3_8b93;

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

fn mix_k1(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

fn mix_k2(k: u32) -> u32 {
    k.wrapping_mul(C2).rotate_left(16).wrapping_mul(C3)
}

fn mix_k3(k: u32) -> u32 {
    k.wrapping_mul(C3).rotate_left(17).wrapping_mul(C4)
}

fn mix_k4(k: u32) -> u32 {
    k.wrapping_mul(C4).rotate_left(18).wrapping_mul(C1)
}

fn word(chunk: &[u8]) -> u32 {
    // Missing high bytes are zero, which matches the reference tail handling.
    chunk
        .iter()
        .enumerate()
        .fold(0, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)))
}

/// Compute the 128-bit `MurmurHash3_x86_128` of `data`.
///
/// The result is returned as the four 32-bit state words `[h1, h2, h3, h4]`,
/// which is the order the reference implementation writes them out.
#[must_use]
pub fn murmurhash3_x86_128(data: &[u8], seed: u32) -> [u32; 4] {
    let mut h1 = seed;
    let mut h2 = seed;
    let mut h3 = seed;
    let mut h4 = seed;

    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
        h1 ^= mix_k1(word(&block[0..4]));
        h1 = h1
            .rotate_left(19)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x561c_cd1b);

        h2 ^= mix_k2(word(&block[4..8]));
        h2 = h2
            .rotate_left(17)
            .wrapping_add(h3)
            .wrapping_mul(5)
            .wrapping_add(0x0bca_a747);

        h3 ^= mix_k3(word(&block[8..12]));
        h3 = h3
            .rotate_left(15)
            .wrapping_add(h4)
            .wrapping_mul(5)
            .wrapping_add(0x96cd_1c35);

        h4 ^= mix_k4(word(&block[12..16]));
        h4 = h4
            .rotate_left(13)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x32ac_3b17);
    }

    let tail = blocks.remainder();
    if tail.len() > 12 {
        h4 ^= mix_k4(word(&tail[12..]));
    }
    if tail.len() > 8 {
        h3 ^= mix_k3(word(&tail[8..tail.len().min(12)]));
    }
    if tail.len() > 4 {
        h2 ^= mix_k2(word(&tail[4..tail.len().min(8)]));
    }
    if !tail.is_empty() {
        h1 ^= mix_k1(word(&tail[..tail.len().min(4)]));
    }

    // The reference implementation folds the length in as a 32-bit value.
    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;
    h1 ^= len;
    h2 ^= len;
    h3 ^= len;
    h4 ^= len;

    h1 = h1.wrapping_add(h2).wrapping_add(h3).wrapping_add(h4);
    h2 = h2.wrapping_add(h1);
    h3 = h3.wrapping_add(h1);
    h4 = h4.wrapping_add(h1);

    h1 = fmix32(h1);
    h2 = fmix32(h2);
    h3 = fmix32(h3);
    h4 = fmix32(h4);

    h1 = h1.wrapping_add(h2).wrapping_add(h3).wrapping_add(h4);
    h2 = h2.wrapping_add(h1);
    h3 = h3.wrapping_add(h1);
    h4 = h4.wrapping_add(h1);

    [h1, h2, h3, h4]
}

/// Hash a segment key the way the sharded format does.
///
/// The key is hashed as 8 little-endian bytes with seed 0, and the low 64
/// bits of the 128-bit digest are kept.
#[must_use]
pub fn murmurhash3_key(key: u64) -> u64 {
    let [h1, h2, _, _] = murmurhash3_x86_128(&key.to_le_bytes(), 0);
    u64::from(h1) | (u64::from(h2) << 32)
}
