//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM. Key size: 32 bytes. IV: 12 bytes (supplied by the key
//! schedule, never random). Tag: 16 bytes, appended to the ciphertext.
//!
//! `open` fails closed: no plaintext byte is released before the tag has
//! been verified.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Encrypt `plaintext`, returning `ciphertext ‖ tag16`.
pub fn seal(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptFailure)?;
    cipher
        .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptFailure)
}

/// Decrypt `ciphertext ‖ tag16`. Tag mismatch is `AuthFailure`.
pub fn open(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::AuthFailure);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AuthFailure)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AuthFailure)?;
    Ok(Zeroizing::new(plaintext))
}
