//! CSRNG helpers.
//!
//! All randomness comes from the operating system (`OsRng`); safe to call
//! from any thread.

use rand::{rngs::OsRng, Rng, RngCore};

use crate::identity::MAX_REGISTRATION_ID;

/// `n` fresh random bytes.
pub fn rand_bytes(n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    OsRng.fill_bytes(&mut out);
    out
}

/// A fresh random fixed-size array.
pub fn rand_array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// A registration id uniform in `1..=16380` (14-bit space, 0 reserved).
pub fn rand_registration_id() -> u16 {
    OsRng.gen_range(1..=MAX_REGISTRATION_ID)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_id_in_range() {
        for _ in 0..200 {
            let id = rand_registration_id();
            assert!((1..=MAX_REGISTRATION_ID).contains(&id));
        }
    }

    #[test]
    fn rand_bytes_length_and_variety() {
        let a = rand_bytes(32);
        let b = rand_bytes(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
