//! FIPS 180-4 SHA-256 with a resumable midstate, plus double-SHA256.
//!
//! The standard `sha2` crate does not expose a stable way to resume hashing
//! from an arbitrary compression-function state on a non-64-byte boundary of
//! already-consumed input, which is exactly what the normalizer needs
//! (header bytes 0..64 precomputed once, nonce search only touches the
//! remaining 16 bytes + padding). Hand-rolling the compression function is
//! the only way to expose that seam, so we do it here; `sha2` is still used
//! (as a dev-dependency) to cross-check this implementation in tests.

const H0: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

const K: [u32; 64] = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2,
];

/// Compress exactly one 512-bit (64-byte) block into `state`.
fn compress(state: &mut [u32; 8], block: &[u8; 64]) {
    let mut w = [0u32; 64];
    for i in 0..16 {
        w[i] = u32::from_be_bytes([
            block[i * 4],
            block[i * 4 + 1],
            block[i * 4 + 2],
            block[i * 4 + 3],
        ]);
    }
    for i in 16..64 {
        let s0 = w[i - 15].rotate_right(7) ^ w[i - 15].rotate_right(18) ^ (w[i - 15] >> 3);
        let s1 = w[i - 2].rotate_right(17) ^ w[i - 2].rotate_right(19) ^ (w[i - 2] >> 10);
        w[i] = w[i - 16]
            .wrapping_add(s0)
            .wrapping_add(w[i - 7])
            .wrapping_add(s1);
    }

    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *state;

    for i in 0..64 {
        let s1 = e.rotate_right(6) ^ e.rotate_right(11) ^ e.rotate_right(25);
        let ch = (e & f) ^ ((!e) & g);
        let temp1 = h
            .wrapping_add(s1)
            .wrapping_add(ch)
            .wrapping_add(K[i])
            .wrapping_add(w[i]);
        let s0 = a.rotate_right(2) ^ a.rotate_right(13) ^ a.rotate_right(22);
        let maj = (a & b) ^ (a & c) ^ (b & c);
        let temp2 = s0.wrapping_add(maj);

        h = g;
        g = f;
        f = e;
        e = d.wrapping_add(temp1);
        d = c;
        c = b;
        b = a;
        a = temp1.wrapping_add(temp2);
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
    state[4] = state[4].wrapping_add(e);
    state[5] = state[5].wrapping_add(f);
    state[6] = state[6].wrapping_add(g);
    state[7] = state[7].wrapping_add(h);
}

/// Pad and finish a SHA-256 message whose preimage is `total_len_bytes` long,
/// given `tail` as whatever bytes remain after the last full 64-byte block
/// already folded into `state`.
fn finish_from_state(mut state: [u32; 8], tail: &[u8], total_len_bytes: u64) -> [u8; 32] {
    let bit_len = total_len_bytes.wrapping_mul(8);

    let mut buf = tail.to_vec();
    buf.push(0x80);
    while buf.len() % 64 != 56 {
        buf.push(0);
    }
    buf.extend_from_slice(&bit_len.to_be_bytes());

    for chunk in buf.chunks_exact(64) {
        let block: &[u8; 64] = chunk.try_into().expect("chunk is exactly 64 bytes");
        compress(&mut state, block);
    }

    let mut out = [0u8; 32];
    for (i, word) in state.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// Full SHA-256 over an arbitrary-length message.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut state = H0;
    let mut chunks = data.chunks_exact(64);
    for block in &mut chunks {
        let block: &[u8; 64] = block.try_into().expect("chunk is exactly 64 bytes");
        compress(&mut state, block);
    }
    finish_from_state(state, chunks.remainder(), data.len() as u64)
}

/// `sha256(sha256(x))`.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// The SHA-256 working state after consuming exactly one 512-bit block.
///
/// The returned state has "seen" 64 bytes; a later call to
/// [`finish_midstate`] with the remaining tail and the true total message
/// length continues the hash correctly, matching
/// `original_source/src/normalize/midstate.h`'s contract.
pub fn midstate_after_64(first64: &[u8; 64]) -> [u32; 8] {
    let mut state = H0;
    compress(&mut state, first64);
    state
}

/// Finish a hash that was started with [`midstate_after_64`].
///
/// `tail` is everything after the first 64 bytes; `total_len_bytes` is the
/// length of the *whole* original message (e.g. 80 for a block header).
pub fn finish_midstate(midstate: [u32; 8], tail: &[u8], total_len_bytes: u64) -> [u8; 32] {
    finish_from_state(midstate, tail, total_len_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_of_empty_matches_known_vector() {
        let expected =
            hex::decode("5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456")
                .unwrap();
        assert_eq!(sha256d(&[]).to_vec(), expected);
    }

    #[test]
    fn matches_reference_sha256_crate() {
        use sha2::{Digest, Sha256};
        for len in [0usize, 1, 63, 64, 65, 127, 128, 200, 1000] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut hasher = Sha256::new();
            hasher.update(&data);
            let expected: [u8; 32] = hasher.finalize().into();
            assert_eq!(sha256(&data), expected, "len={len}");
        }
    }

    #[test]
    fn midstate_finish_matches_direct_hash_for_any_80_byte_header() {
        for seed in 0u8..8 {
            let mut header = [0u8; 80];
            for (i, b) in header.iter_mut().enumerate() {
                *b = seed.wrapping_add(i as u8);
            }
            let first64: [u8; 64] = header[0..64].try_into().unwrap();
            let midstate = midstate_after_64(&first64);
            let via_midstate = finish_midstate(midstate, &header[64..80], 80);
            let direct = sha256(&header);
            assert_eq!(via_midstate, direct);

            let via_midstate_d = sha256(&via_midstate);
            assert_eq!(via_midstate_d, sha256d(&header));
        }
    }
}
