//! OS CSPRNG draws for key material and nonces.

use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::aead::{KEY_SIZE, NONCE_SIZE};

/// A fresh AES-256 key.
pub(crate) fn key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut *key);
    key
}

/// `len` bytes of secret material.
pub(crate) fn bytes(len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut out);
    out
}

pub(crate) fn nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_material_lengths() {
        assert_eq!(key().len(), KEY_SIZE);
        for len in [0, 16, 32, 64] {
            assert_eq!(bytes(len).len(), len);
        }
    }

    #[test]
    fn test_nonces_do_not_repeat() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(nonce()), "duplicate nonce generated");
        }
    }
}
