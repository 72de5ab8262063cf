//! Standalone media encryption.
//!
//! Large blobs never flow through the ratchet: each file gets a fresh
//! 64-byte media key, expanded into IV + cipher key + MAC key. The media key
//! itself rides encrypted inside a ratcheted message; the blob can then be
//! hosted anywhere.
//!
//! Blob wire format: `iv (16) ‖ AES-GCM ciphertext+tag ‖ mac10`, where
//! `mac10 = HMAC-SHA256(mac_key, iv ‖ ct)[0..10]` and the AEAD consumes only
//! the first 12 IV bytes. The recipient additionally checks a SHA-256 digest
//! of the whole blob, carried in the message payload. The truncated HMAC is
//! redundant next to GCM's own tag but is part of the deployed wire format.

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::{aead, ct, error::CryptoError, kdf, rng};

pub const MEDIA_KEY_LEN: usize = 64;
pub const MEDIA_IV_LEN: usize = 16;
pub const MEDIA_MAC_LEN: usize = 10;
pub const DIGEST_LEN: usize = 32;

/// An encrypted blob plus the out-of-band material the recipient needs.
pub struct EncryptedMedia {
    /// `iv ‖ ciphertext+tag ‖ mac10`, ready for upload.
    pub blob: Vec<u8>,
    /// Never transmitted in clear; goes inside a ratcheted message.
    pub media_key: [u8; MEDIA_KEY_LEN],
    /// SHA-256 over the full blob.
    pub digest: [u8; DIGEST_LEN],
}

impl Drop for EncryptedMedia {
    fn drop(&mut self) {
        self.media_key.zeroize();
    }
}

/// Encrypt a file under a fresh media key.
pub fn encrypt_media(plaintext: &[u8]) -> Result<EncryptedMedia, CryptoError> {
    let media_key: [u8; MEDIA_KEY_LEN] = rng::rand_array();
    let keys = kdf::kdf_media(&media_key)?;

    let iv12: [u8; aead::IV_LEN] = keys.iv[..aead::IV_LEN]
        .try_into()
        .expect("16-byte IV always has a 12-byte prefix");
    let ciphertext = aead::seal(&keys.cipher_key, &iv12, plaintext, &[])?;

    let mut macced = Vec::with_capacity(MEDIA_IV_LEN + ciphertext.len());
    macced.extend_from_slice(&keys.iv);
    macced.extend_from_slice(&ciphertext);
    let mac = kdf::hmac_sha256(&keys.mac_key, &macced)?;

    let mut blob = macced;
    blob.extend_from_slice(&mac[..MEDIA_MAC_LEN]);
    let digest: [u8; DIGEST_LEN] = Sha256::digest(&blob).into();

    Ok(EncryptedMedia {
        blob,
        media_key,
        digest,
    })
}

/// Decrypt a blob: digest check, then truncated MAC, then AES-GCM. Both
/// comparisons are constant-time; every mismatch is `MediaIntegrity`.
pub fn decrypt_media(
    blob: &[u8],
    media_key: &[u8; MEDIA_KEY_LEN],
    digest: &[u8; DIGEST_LEN],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let computed: [u8; DIGEST_LEN] = Sha256::digest(blob).into();
    if !ct::ct_eq(&computed, digest) {
        return Err(CryptoError::MediaIntegrity);
    }

    if blob.len() < MEDIA_IV_LEN + aead::TAG_LEN + MEDIA_MAC_LEN {
        return Err(CryptoError::MediaIntegrity);
    }
    let (body, mac) = blob.split_at(blob.len() - MEDIA_MAC_LEN);
    let (iv, ciphertext) = body.split_at(MEDIA_IV_LEN);

    let keys = kdf::kdf_media(media_key)?;
    let expected = kdf::hmac_sha256(&keys.mac_key, body)?;
    if !ct::ct_eq(&expected[..MEDIA_MAC_LEN], mac) {
        return Err(CryptoError::MediaIntegrity);
    }

    let iv12: [u8; aead::IV_LEN] = iv[..aead::IV_LEN]
        .try_into()
        .expect("16-byte IV always has a 12-byte prefix");
    aead::open(&keys.cipher_key, &iv12, ciphertext, &[])
        .map_err(|_| CryptoError::MediaIntegrity)
}
