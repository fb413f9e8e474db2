//! Deterministic pseudo-random key/value generation for stress and
//! rotation tests. Not exposed outside `#[cfg(test)]`.

use bytes::Bytes;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A deterministic key for index `i`, stable across runs.
#[must_use]
pub(crate) fn random_key(i: usize) -> Bytes {
    Bytes::from(format!("bitterroot-key-{i}"))
}

/// A deterministic pseudo-random value of length `n`, seeded from `i` so
/// repeated calls with the same arguments are reproducible without
/// depending on a system RNG.
#[must_use]
pub(crate) fn random_value(i: usize, n: usize) -> Bytes {
    let mut state = (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
    let mut buf = Vec::with_capacity(n + 16);
    buf.extend_from_slice(b"bitterroot-value-");
    for _ in 0..n {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        buf.push(ALPHABET[(state as usize) % ALPHABET.len()]);
    }
    Bytes::from(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_value_is_deterministic() {
        assert_eq!(random_value(7, 32), random_value(7, 32));
        assert_ne!(random_value(7, 32), random_value(8, 32));
    }
}
