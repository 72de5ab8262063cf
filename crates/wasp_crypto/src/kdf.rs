//! Key schedule: HKDF-SHA256 / HMAC-SHA256 with the fixed wire labels.
//!
//! Every `info` string, concatenation order, and split offset here is
//! wire-visible: two implementations agree on message bytes only if these
//! are bit-exact. Do not change them.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Root-key ratchet label.
pub const ROOT_INFO: &[u8] = b"WASP_ROOT_KEY";
/// Message-key expansion label.
pub const MESSAGE_INFO: &[u8] = b"WASP_MESSAGE_KEY";
/// X3DH master-secret label.
pub const X3DH_INFO: &[u8] = b"WASP_X3DH_MASTER_SECRET_v1";
/// Media-key expansion label.
pub const MEDIA_INFO: &[u8] = b"WASP_MEDIA_KEY_v1";

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
///
/// `salt` may be `None` (HKDF then uses a zeroed salt).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// KDF_RK: mix a DH output into the root key.
/// Returns `(new_root_key, chain_key)`.
pub fn kdf_root(
    rk: &[u8; 32],
    dh_output: &[u8; 32],
) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let mut okm = [0u8; 64];
    hkdf_expand(dh_output, Some(rk), ROOT_INFO, &mut okm)?;
    let mut new_rk = [0u8; 32];
    let mut ck = [0u8; 32];
    new_rk.copy_from_slice(&okm[..32]);
    ck.copy_from_slice(&okm[32..]);
    okm.zeroize();
    Ok((new_rk, ck))
}

/// KDF_CK: one symmetric ratchet step.
/// Returns `(message_key, next_chain_key)`.
pub fn kdf_chain(ck: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let mk = hmac_sha256(ck, &[0x01])?;
    let next_ck = hmac_sha256(ck, &[0x02])?;
    Ok((mk, next_ck))
}

/// Per-message cipher material expanded from a message key.
/// The GCM path only uses `cipher_key` and `iv`; `mac_key` exists for wire
/// compatibility with the 80-byte expansion and is otherwise unused.
#[derive(ZeroizeOnDrop)]
pub struct MessageKeys {
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
    pub iv: [u8; 12],
}

/// KDF_MK: expand a message key into cipher key, MAC key, and IV.
/// 80 bytes are derived; the trailing 4 are discarded.
pub fn kdf_message(mk: &[u8; 32]) -> Result<MessageKeys, CryptoError> {
    let mut okm = [0u8; 80];
    hkdf_expand(mk, None, MESSAGE_INFO, &mut okm)?;
    let mut keys = MessageKeys {
        cipher_key: [0u8; 32],
        mac_key: [0u8; 32],
        iv: [0u8; 12],
    };
    keys.cipher_key.copy_from_slice(&okm[..32]);
    keys.mac_key.copy_from_slice(&okm[32..64]);
    keys.iv.copy_from_slice(&okm[64..76]);
    okm.zeroize();
    Ok(keys)
}

/// KDF_X3DH: derive the 32-byte master secret from the ordered DH outputs.
/// `ikm = 0xFF×32 ‖ DH1 ‖ DH2 ‖ DH3 [‖ DH4]`, salt = 32 zero bytes.
pub fn kdf_x3dh(dh_outputs: &[[u8; 32]]) -> Result<[u8; 32], CryptoError> {
    let mut ikm = vec![0xFFu8; 32];
    for dh in dh_outputs {
        ikm.extend_from_slice(dh);
    }
    let mut sk = [0u8; 32];
    let result = hkdf_expand(&ikm, Some(&[0u8; 32]), X3DH_INFO, &mut sk);
    ikm.zeroize();
    result?;
    Ok(sk)
}

/// Material expanded from a 64-byte media key. The AEAD consumes the first
/// 12 bytes of `iv`; the full 16 go into the truncated HMAC.
#[derive(ZeroizeOnDrop)]
pub struct MediaKeys {
    pub iv: [u8; 16],
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
}

/// KDF_Media: expand a 64-byte media key into IV, cipher key, and MAC key.
pub fn kdf_media(media_key: &[u8; 64]) -> Result<MediaKeys, CryptoError> {
    let mut okm = [0u8; 80];
    hkdf_expand(media_key, None, MEDIA_INFO, &mut okm)?;
    let mut keys = MediaKeys {
        iv: [0u8; 16],
        cipher_key: [0u8; 32],
        mac_key: [0u8; 32],
    };
    keys.iv.copy_from_slice(&okm[..16]);
    keys.cipher_key.copy_from_slice(&okm[16..48]);
    keys.mac_key.copy_from_slice(&okm[48..80]);
    okm.zeroize();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_kdf_is_deterministic_and_splits() {
        let rk = [1u8; 32];
        let dh = [2u8; 32];
        let (rk1, ck1) = kdf_root(&rk, &dh).unwrap();
        let (rk2, ck2) = kdf_root(&rk, &dh).unwrap();
        assert_eq!(rk1, rk2);
        assert_eq!(ck1, ck2);
        assert_ne!(rk1, ck1);
        assert_ne!(rk1, rk);
    }

    #[test]
    fn chain_kdf_separates_message_and_chain() {
        let ck = [9u8; 32];
        let (mk, next_ck) = kdf_chain(&ck).unwrap();
        assert_ne!(mk, next_ck);
        assert_ne!(next_ck, ck);
        // One-way: stepping again gives fresh values
        let (mk2, _) = kdf_chain(&next_ck).unwrap();
        assert_ne!(mk, mk2);
    }

    #[test]
    fn chain_kdf_uses_distinct_hmac_constants() {
        let ck = [9u8; 32];
        let (mk, next_ck) = kdf_chain(&ck).unwrap();
        assert_eq!(mk, hmac_sha256(&ck, &[0x01]).unwrap());
        assert_eq!(next_ck, hmac_sha256(&ck, &[0x02]).unwrap());
    }

    #[test]
    fn message_kdf_parts_differ() {
        let mk = [4u8; 32];
        let keys = kdf_message(&mk).unwrap();
        assert_ne!(keys.cipher_key, keys.mac_key);
        assert_ne!(&keys.cipher_key[..12], &keys.iv[..]);
    }

    #[test]
    fn x3dh_kdf_depends_on_every_term_and_count() {
        let d1 = [1u8; 32];
        let d2 = [2u8; 32];
        let d3 = [3u8; 32];
        let d4 = [4u8; 32];
        let three = kdf_x3dh(&[d1, d2, d3]).unwrap();
        let four = kdf_x3dh(&[d1, d2, d3, d4]).unwrap();
        assert_ne!(three, four);
        let reordered = kdf_x3dh(&[d2, d1, d3]).unwrap();
        assert_ne!(three, reordered);
    }

    #[test]
    fn media_kdf_layout() {
        let media_key = [6u8; 64];
        let a = kdf_media(&media_key).unwrap();
        let b = kdf_media(&media_key).unwrap();
        assert_eq!(a.iv, b.iv);
        assert_eq!(a.cipher_key, b.cipher_key);
        assert_eq!(a.mac_key, b.mac_key);
        assert_ne!(a.cipher_key, a.mac_key);
    }
}
