//! AES-GCM authenticated encryption.
//!
//! Every call draws a fresh 96-bit nonce from the OS CSPRNG, so a nonce is
//! never reused under the same key. The cipher is selected by key length:
//! 32-byte keys use AES-256-GCM, 16-byte keys use AES-128-GCM.
//!
//! Blob format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`

use aes_gcm::{
    aead::{consts::U12, Aead, KeyInit, Payload},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::random;

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of an AES-128 key in bytes.
pub const KEY_SIZE_128: usize = 16;

/// Size of a GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

fn check_key(key: &[u8]) -> Result<(), CryptoError> {
    match key.len() {
        KEY_SIZE | KEY_SIZE_128 => Ok(()),
        n => Err(CryptoError::InvalidKey(format!(
            "expected {KEY_SIZE} or {KEY_SIZE_128} bytes, got {n}"
        ))),
    }
}

/// Encrypts plaintext using AES-GCM.
///
/// The nonce is generated per call and prepended to the ciphertext.
///
/// # Arguments
///
/// * `key` - 32-byte (or 16-byte) encryption key
/// * `plaintext` - Data to encrypt
/// * `associated_data` - Optional additional data to authenticate (not encrypted)
pub fn encrypt(
    key: &[u8],
    plaintext: &[u8],
    associated_data: Option<&[u8]>,
) -> Result<Vec<u8>, CryptoError> {
    check_key(key)?;

    let nonce_bytes = random::nonce();
    let nonce = Nonce::<U12>::from_slice(&nonce_bytes);
    let payload = Payload {
        msg: plaintext,
        aad: associated_data.unwrap_or_default(),
    };

    let ciphertext = if key.len() == KEY_SIZE {
        Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
            .encrypt(nonce, payload)
    } else {
        Aes128Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
            .encrypt(nonce, payload)
    }
    .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts a blob produced by [`encrypt`].
///
/// Tampered data, a wrong key, mismatched associated data and truncated
/// blobs all fail with [`CryptoError::AuthenticationFailed`].
///
/// # Returns
///
/// Decrypted plaintext wrapped in `Zeroizing` for automatic memory cleanup.
pub fn decrypt(
    key: &[u8],
    blob: &[u8],
    associated_data: Option<&[u8]>,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    check_key(key)?;

    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::AuthenticationFailed);
    }

    let (nonce_bytes, encrypted) = blob.split_at(NONCE_SIZE);
    let nonce = Nonce::<U12>::from_slice(nonce_bytes);
    let payload = Payload {
        msg: encrypted,
        aad: associated_data.unwrap_or_default(),
    };

    let plaintext = if key.len() == KEY_SIZE {
        Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
            .decrypt(nonce, payload)
    } else {
        Aes128Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
            .decrypt(nonce, payload)
    }
    .map_err(|_| CryptoError::AuthenticationFailed)?;

    Ok(Zeroizing::new(plaintext))
}
