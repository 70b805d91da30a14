//! Key material generation.
//!
//! Symmetric keys are raw random bytes. Asymmetric keys are freshly
//! generated private keys serialized as unencrypted PKCS#8 DER.

use std::str::FromStr;

use p256::pkcs8::EncodePrivateKey as _;
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePrivateKey as _;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::random;

/// Allowed AES key sizes, in bits.
pub const AES_KEY_SIZES: [u32; 2] = [128, 256];

/// RSA modulus size, in bits.
pub const RSA_KEY_BITS: u32 = 2048;

/// ECC key size (NIST P-256), in bits.
pub const ECC_KEY_BITS: u32 = 256;

/// Supported key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    /// Symmetric AES key (128 or 256 bits).
    Aes,
    /// RSA private key (2048 bits).
    Rsa,
    /// Elliptic-curve private key on P-256.
    Ecc,
}

impl KeyType {
    /// Returns the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes => "AES",
            Self::Rsa => "RSA",
            Self::Ecc => "ECC",
        }
    }

    /// Whether material of this type is a symmetric key.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::Aes)
    }

    /// Resolves the size class for this key type.
    ///
    /// AES requires an explicit size of 128 or 256 bits. The size is
    /// ignored for asymmetric types, which have a fixed size class.
    pub fn resolve_size(&self, size: Option<u32>) -> Result<u32, CryptoError> {
        match self {
            Self::Aes => match size {
                Some(bits) if AES_KEY_SIZES.contains(&bits) => Ok(bits),
                Some(bits) => Err(CryptoError::InvalidSize(format!(
                    "AES key size must be 128 or 256 bits, got {bits}"
                ))),
                None => Err(CryptoError::InvalidSize(
                    "AES key size is required".into(),
                )),
            },
            Self::Rsa => Ok(RSA_KEY_BITS),
            Self::Ecc => Ok(ECC_KEY_BITS),
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES" => Ok(Self::Aes),
            "RSA" => Ok(Self::Rsa),
            "ECC" => Ok(Self::Ecc),
            _ => Err(CryptoError::UnsupportedKeyType(s.to_string())),
        }
    }
}

/// Generates fresh key material.
///
/// For `AES`, returns `size / 8` random bytes. For `RSA` and `ECC`, returns
/// a new private key as PKCS#8 DER.
///
/// RSA generation is CPU heavy; callers must not hold locks across it.
pub fn generate_key_material(
    key_type: KeyType,
    size: Option<u32>,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let bits = key_type.resolve_size(size)?;

    match key_type {
        KeyType::Aes => Ok(random::bytes(bits as usize / 8)),
        KeyType::Rsa => {
            let key = RsaPrivateKey::new(&mut OsRng, bits as usize)
                .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
            let der = key
                .to_pkcs8_der()
                .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
            Ok(Zeroizing::new(der.as_bytes().to_vec()))
        }
        KeyType::Ecc => {
            let key = p256::SecretKey::random(&mut OsRng);
            let der = key
                .to_pkcs8_der()
                .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
            Ok(Zeroizing::new(der.as_bytes().to_vec()))
        }
    }
}
