//! Long-term identity key material.
//!
//! Each device owns one `Identity`, created at registration and never sent
//! anywhere:
//! - an Ed25519 signing pair, which authenticates pre-keys and is bound into
//!   every message AEAD as associated data,
//! - an X25519 DH pair, which participates in DH1 of the X3DH agreement,
//! - a 14-bit registration id used for session-conflict detection.
//!
//! The signing and DH pairs are independent draws. Deriving one from the
//! other would let a signature oracle interact with the DH secret, so the
//! cross-protocol door stays closed.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::{encoding, error::CryptoError, rng};

/// Largest valid registration id (14-bit space, 0 reserved).
pub const MAX_REGISTRATION_ID: u16 = 16380;

/// Long-lived identity keys. Drop clears the secret halves.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Identity {
    #[zeroize(skip)]
    pub registration_id: u16,
    sign_secret: [u8; 32],
    #[zeroize(skip)]
    pub sign_pub: [u8; 32],
    dh_secret: [u8; 32],
    #[zeroize(skip)]
    pub dh_pub: [u8; 32],
}

impl Identity {
    /// Fresh identity: random registration id, independent signing and DH pairs.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let dh = StaticSecret::random_from_rng(OsRng);
        let dh_pub = X25519Public::from(&dh);
        Self {
            registration_id: rng::rand_registration_id(),
            sign_pub: signing.verifying_key().to_bytes(),
            sign_secret: signing.to_bytes(),
            dh_pub: dh_pub.to_bytes(),
            dh_secret: dh.to_bytes(),
        }
    }

    /// Sign arbitrary bytes with the identity signing key.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        SigningKey::from_bytes(&self.sign_secret).sign(msg).to_bytes()
    }

    /// Verify an Ed25519 signature made by any identity signing key.
    pub fn verify(sign_pub: &[u8; 32], msg: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        let vk = VerifyingKey::from_bytes(sign_pub)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig_arr: [u8; 64] = sig
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("signature must be 64 bytes".into()))?;
        vk.verify(msg, &Signature::from_bytes(&sig_arr))
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// X25519 agreement between our identity DH secret and a peer public key.
    pub fn dh(&self, peer_pub: &[u8; 32]) -> [u8; 32] {
        StaticSecret::from(self.dh_secret)
            .diffie_hellman(&X25519Public::from(*peer_pub))
            .to_bytes()
    }
}

/// Human-readable fingerprint of an identity signing key for manual
/// verification: SHA-256 truncated to 20 bytes, hex in groups of 4.
///
/// Example: "a1b2 c3d4 e5f6 7890 abcd ef01 2345 6789 0abc def0"
pub fn fingerprint(sign_pub: &[u8; 32]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(sign_pub);
    let hex = hex::encode(&hash[..20]);
    hex.as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).expect("hex output is ASCII"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compare two identity keys for a safety-number check, in constant time
/// over the full hashes.
pub fn fingerprints_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    use sha2::{Digest, Sha256};
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    crate::ct::ct_eq(&ha, &hb)
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("registration_id", &self.registration_id)
            .field("sign_pub", &hex::encode(self.sign_pub))
            .field("dh_pub", &hex::encode(self.dh_pub))
            .finish_non_exhaustive()
    }
}

// ── Persisted form ───────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct IdentityRecord {
    registration_id: u16,
    #[serde(with = "encoding::hex32")]
    sign_priv: [u8; 32],
    #[serde(with = "encoding::hex32")]
    sign_pub: [u8; 32],
    #[serde(with = "encoding::hex32")]
    dh_priv: [u8; 32],
    #[serde(with = "encoding::hex32")]
    dh_pub: [u8; 32],
}

impl Serialize for Identity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        IdentityRecord {
            registration_id: self.registration_id,
            sign_priv: self.sign_secret,
            sign_pub: self.sign_pub,
            dh_priv: self.dh_secret,
            dh_pub: self.dh_pub,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = IdentityRecord::deserialize(deserializer)?;
        if record.registration_id == 0 || record.registration_id > MAX_REGISTRATION_ID {
            return Err(serde::de::Error::custom("registration id out of range"));
        }
        // Public halves must match what the private halves derive to.
        let derived_sign = SigningKey::from_bytes(&record.sign_priv)
            .verifying_key()
            .to_bytes();
        if derived_sign != record.sign_pub {
            return Err(serde::de::Error::custom(
                "signing public key does not match private key",
            ));
        }
        let derived_dh = X25519Public::from(&StaticSecret::from(record.dh_priv)).to_bytes();
        if derived_dh != record.dh_pub {
            return Err(serde::de::Error::custom(
                "DH public key does not match private key",
            ));
        }
        Ok(Identity {
            registration_id: record.registration_id,
            sign_secret: record.sign_priv,
            sign_pub: record.sign_pub,
            dh_secret: record.dh_priv,
            dh_pub: record.dh_pub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let id = Identity::generate();
        let sig = id.sign(b"pre-key bytes");
        Identity::verify(&id.sign_pub, b"pre-key bytes", &sig).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_signer() {
        let a = Identity::generate();
        let b = Identity::generate();
        let sig = a.sign(b"pre-key bytes");
        assert!(matches!(
            Identity::verify(&b.sign_pub, b"pre-key bytes", &sig),
            Err(CryptoError::InvalidSignature)
        ));
    }

    #[test]
    fn dh_is_commutative() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_eq!(a.dh(&b.dh_pub), b.dh(&a.dh_pub));
    }

    #[test]
    fn serde_round_trip() {
        let id = Identity::generate();
        let json = serde_json::to_string(&id).unwrap();
        let restored: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.registration_id, id.registration_id);
        assert_eq!(restored.sign_pub, id.sign_pub);
        assert_eq!(restored.dh_pub, id.dh_pub);
        // Behaviour survives: signatures from the restored key still verify.
        let sig = restored.sign(b"x");
        Identity::verify(&id.sign_pub, b"x", &sig).unwrap();
    }

    #[test]
    fn deserialize_rejects_mismatched_public() {
        let id = Identity::generate();
        let mut value: serde_json::Value = serde_json::to_value(&id).unwrap();
        value["sign_pub"] = serde_json::Value::String(hex::encode([0u8; 32]));
        assert!(serde_json::from_value::<Identity>(value).is_err());
    }

    #[test]
    fn fingerprint_format_and_matching() {
        let id = Identity::generate();
        let fp = fingerprint(&id.sign_pub);
        assert_eq!(fp.len(), 40 + 9); // 40 hex chars in 10 groups
        assert!(fp.split(' ').all(|g| g.len() == 4));
        assert!(fingerprints_match(&id.sign_pub, &id.sign_pub));
        let other = Identity::generate();
        assert!(!fingerprints_match(&id.sign_pub, &other.sign_pub));
    }

    #[test]
    fn deserialize_rejects_unknown_fields() {
        let id = Identity::generate();
        let mut value: serde_json::Value = serde_json::to_value(&id).unwrap();
        value["extra"] = serde_json::Value::Bool(true);
        assert!(serde_json::from_value::<Identity>(value).is_err());
    }
}
