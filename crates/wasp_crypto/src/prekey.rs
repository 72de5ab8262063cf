//! Pre-keys published for asynchronous session setup.
//!
//! - Signed Pre-Key (SPK): X25519, rotated periodically (weekly in
//!   production), public half signed by the identity Ed25519 key. The old
//!   SPK is retained only long enough to decrypt in-flight sessions.
//! - One-Time Pre-Keys (OPK): X25519, batch-generated, uploaded as public
//!   halves, each consumed by exactly one incoming X3DH.
//!
//! Key ids live in a 24-bit space; running out is an error, never a wrap.

use chrono::Utc;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::{encoding, error::CryptoError, identity::Identity};

/// Largest valid pre-key id (24-bit space).
pub const MAX_PRE_KEY_ID: u32 = 0xFF_FFFF;

// ── Signed pre-key ───────────────────────────────────────────────────────────

/// Medium-term signed pre-key. Drop clears the secret half.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SignedPreKey {
    #[zeroize(skip)]
    pub key_id: u32,
    pub(crate) secret: [u8; 32],
    #[zeroize(skip)]
    pub public: [u8; 32],
    #[zeroize(skip)]
    pub signature: [u8; 64],
    /// Creation time, integer milliseconds since the Unix epoch.
    #[zeroize(skip)]
    pub created_at: i64,
}

impl SignedPreKey {
    /// X25519 agreement between the SPK secret and a peer public key.
    pub fn dh(&self, peer_pub: &[u8; 32]) -> [u8; 32] {
        StaticSecret::from(self.secret)
            .diffie_hellman(&X25519Public::from(*peer_pub))
            .to_bytes()
    }

    /// The shareable half: what goes into a published bundle.
    pub fn public_part(&self) -> SignedPreKeyPublic {
        SignedPreKeyPublic {
            key_id: self.key_id,
            public: self.public,
            signature: self.signature,
        }
    }
}

/// Generate a signed pre-key: a fresh X25519 pair whose public half is
/// signed by the identity signing key.
pub fn generate_signed_pre_key(
    identity: &Identity,
    key_id: u32,
) -> Result<SignedPreKey, CryptoError> {
    if key_id > MAX_PRE_KEY_ID {
        return Err(CryptoError::ExhaustedKeyIds);
    }
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&secret).to_bytes();
    let signature = identity.sign(&public);
    Ok(SignedPreKey {
        key_id,
        secret: secret.to_bytes(),
        public,
        signature,
        created_at: Utc::now().timestamp_millis(),
    })
}

// ── One-time pre-keys ────────────────────────────────────────────────────────

/// Single-use pre-key. Consumed by value; drop clears the secret half.
#[derive(ZeroizeOnDrop)]
pub struct OneTimePreKey {
    #[zeroize(skip)]
    pub key_id: u32,
    pub(crate) secret: [u8; 32],
    #[zeroize(skip)]
    pub public: [u8; 32],
}

impl OneTimePreKey {
    pub(crate) fn dh(&self, peer_pub: &[u8; 32]) -> [u8; 32] {
        StaticSecret::from(self.secret)
            .diffie_hellman(&X25519Public::from(*peer_pub))
            .to_bytes()
    }

    pub fn public_part(&self) -> OneTimePreKeyPublic {
        OneTimePreKeyPublic {
            key_id: self.key_id,
            public: self.public,
        }
    }
}

/// Generate `count` one-time pre-keys with sequential ids from `start_id`.
pub fn generate_one_time_pre_keys(
    start_id: u32,
    count: u32,
) -> Result<Vec<OneTimePreKey>, CryptoError> {
    let end = start_id
        .checked_add(count)
        .filter(|end| end.saturating_sub(1) <= MAX_PRE_KEY_ID)
        .ok_or(CryptoError::ExhaustedKeyIds)?;
    Ok((start_id..end)
        .map(|key_id| {
            let secret = StaticSecret::random_from_rng(OsRng);
            let public = X25519Public::from(&secret).to_bytes();
            OneTimePreKey {
                key_id,
                secret: secret.to_bytes(),
                public,
            }
        })
        .collect())
}

// ── Published forms ──────────────────────────────────────────────────────────

/// SPK as published: id, public half, identity signature over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedPreKeyPublic {
    pub key_id: u32,
    #[serde(with = "encoding::hex32")]
    pub public: [u8; 32],
    #[serde(with = "encoding::hex64")]
    pub signature: [u8; 64],
}

/// OPK as published: id and public half only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OneTimePreKeyPublic {
    pub key_id: u32,
    #[serde(with = "encoding::hex32")]
    pub public: [u8; 32],
}

/// Everything a sender fetches to initiate a session with a recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreKeyBundle {
    pub user_id: String,
    pub registration_id: u16,
    #[serde(with = "encoding::hex32")]
    pub identity_dh_pub: [u8; 32],
    #[serde(with = "encoding::hex32")]
    pub identity_sign_pub: [u8; 32],
    pub signed_pre_key: SignedPreKeyPublic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_pre_key: Option<OneTimePreKeyPublic>,
}

impl PreKeyBundle {
    /// Check the SPK signature against the bundle's identity signing key.
    /// Must pass before any DH is computed with the bundle.
    pub fn verify(&self) -> Result<(), CryptoError> {
        Identity::verify(
            &self.identity_sign_pub,
            &self.signed_pre_key.public,
            &self.signed_pre_key.signature,
        )
    }
}

// ── Persisted private forms ──────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SignedPreKeyRecord {
    key_id: u32,
    #[serde(with = "encoding::hex32")]
    secret: [u8; 32],
    #[serde(with = "encoding::hex32")]
    public: [u8; 32],
    #[serde(with = "encoding::hex64")]
    signature: [u8; 64],
    created_at: i64,
}

impl Serialize for SignedPreKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SignedPreKeyRecord {
            key_id: self.key_id,
            secret: self.secret,
            public: self.public,
            signature: self.signature,
            created_at: self.created_at,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SignedPreKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let r = SignedPreKeyRecord::deserialize(deserializer)?;
        let derived = X25519Public::from(&StaticSecret::from(r.secret)).to_bytes();
        if derived != r.public {
            return Err(serde::de::Error::custom(
                "SPK public key does not match private key",
            ));
        }
        Ok(SignedPreKey {
            key_id: r.key_id,
            secret: r.secret,
            public: r.public,
            signature: r.signature,
            created_at: r.created_at,
        })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct OneTimePreKeyRecord {
    key_id: u32,
    #[serde(with = "encoding::hex32")]
    secret: [u8; 32],
    #[serde(with = "encoding::hex32")]
    public: [u8; 32],
}

impl Serialize for OneTimePreKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        OneTimePreKeyRecord {
            key_id: self.key_id,
            secret: self.secret,
            public: self.public,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OneTimePreKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let r = OneTimePreKeyRecord::deserialize(deserializer)?;
        let derived = X25519Public::from(&StaticSecret::from(r.secret)).to_bytes();
        if derived != r.public {
            return Err(serde::de::Error::custom(
                "OPK public key does not match private key",
            ));
        }
        Ok(OneTimePreKey {
            key_id: r.key_id,
            secret: r.secret,
            public: r.public,
        })
    }
}
