//! Two-tier envelope encryption.
//!
//! Each call generates a fresh 256-bit data-encryption key (DEK), encrypts
//! the payload under it, then wraps the DEK under the caller's
//! key-encryption key (KEK). The DEK lives only for the duration of the
//! call and is zeroized on drop.

use zeroize::Zeroizing;

use crate::aead;
use crate::error::CryptoError;
use crate::aead::KEY_SIZE;
use crate::random;

/// Output of [`encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Payload encrypted under the DEK (`nonce || ciphertext || tag`).
    pub ciphertext: Vec<u8>,
    /// DEK encrypted under the KEK (`nonce || ciphertext || tag`).
    pub encrypted_dek: Vec<u8>,
}

/// Encrypts `plaintext` under a fresh DEK and wraps the DEK under `kek`.
///
/// `associated_data`, when given, is authenticated on both layers.
pub fn encrypt(
    plaintext: &[u8],
    kek: &[u8],
    associated_data: Option<&[u8]>,
) -> Result<Envelope, CryptoError> {
    let dek = random::key();

    let ciphertext = aead::encrypt(&*dek, plaintext, associated_data)?;
    let encrypted_dek = aead::encrypt(kek, &*dek, associated_data)?;

    Ok(Envelope {
        ciphertext,
        encrypted_dek,
    })
}

/// Unwraps the DEK with `kek` and decrypts the payload with it.
///
/// Any integrity failure, at either layer, is reported as the same
/// [`CryptoError::AuthenticationFailed`].
pub fn decrypt(
    ciphertext: &[u8],
    encrypted_dek: &[u8],
    kek: &[u8],
    associated_data: Option<&[u8]>,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let dek = aead::decrypt(kek, encrypted_dek, associated_data).map_err(uniform)?;
    if dek.len() != KEY_SIZE {
        return Err(CryptoError::AuthenticationFailed);
    }

    aead::decrypt(&dek, ciphertext, associated_data).map_err(uniform)
}

fn uniform(e: CryptoError) -> CryptoError {
    match e {
        CryptoError::InvalidKey(_) => e,
        _ => CryptoError::AuthenticationFailed,
    }
}
