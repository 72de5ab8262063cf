//! Encrypted message envelope — what the relay sees.
//!
//! The relay is a DUMB FORWARDER: it routes on the recipient id it was
//! handed out-of-band and treats the envelope as opaque bytes. It sees:
//!   - the ratchet header (DH public key + counters, meaningless without keys)
//!   - the ciphertext
//!   - a coarse `message_type` hint (not content-revealing)
//!   - the sender's registration id (session-conflict detection)
//!   - on the first message of a session, the X3DH bootstrap keys
//!
//! It is trusted only to eventually deliver what it accepted; ordering and
//! exactly-once are the ratchet's problem.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use wasp_crypto::encoding;
use wasp_crypto::ratchet::{EncryptedMessage, RatchetHeader};

use crate::error::WireError;

/// Coarse routing hint; deliberately says nothing about the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Media,
    System,
}

/// On-wire envelope, sent to and received from the relay as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    /// True only on the first message of a session; the bootstrap fields
    /// below are then present so the receiver can run its side of X3DH.
    pub is_pre_key_message: bool,

    /// Double Ratchet header (DH public key + message counters).
    pub header: RatchetHeader,

    /// AES-GCM body with the 16-byte tag appended, base64-encoded.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,

    pub message_type: MessageType,

    /// Sender's registration id.
    pub registration_id: u32,

    /// Sender's identity X25519 key (pre-key message only).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "encoding::opt_hex32")]
    pub sender_identity_dh_key: Option<[u8; 32]>,

    /// Sender's X3DH ephemeral key (pre-key message only).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "encoding::opt_hex32")]
    pub sender_ephemeral_key: Option<[u8; 32]>,

    /// Sender's identity Ed25519 key (pre-key message only).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "encoding::opt_hex32")]
    pub sender_identity_sign_key: Option<[u8; 32]>,

    /// Which of the recipient's one-time pre-keys was consumed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_one_time_prekey_id: Option<u32>,
}

impl Envelope {
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, WireError> {
        let envelope: Envelope = serde_json::from_str(json)?;
        if envelope.is_pre_key_message
            && (envelope.sender_identity_dh_key.is_none()
                || envelope.sender_ephemeral_key.is_none()
                || envelope.sender_identity_sign_key.is_none())
        {
            return Err(WireError::Parse(
                "pre-key envelope is missing bootstrap keys".into(),
            ));
        }
        Ok(envelope)
    }

    /// The ratchet-layer view of this envelope.
    pub fn ratchet_message(&self) -> EncryptedMessage {
        EncryptedMessage {
            header: self.header,
            ciphertext: self.ciphertext.clone(),
        }
    }
}

mod b64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD.decode(&s).map_err(serde::de::Error::custom)
    }
}
