//! Plaintext message types (inside the encrypted envelope).
//!
//! This is the decrypted content of `Envelope::ciphertext`. Media bodies
//! carry the media key and blob digest here, under the ratchet's
//! encryption, never in clear.

use serde::{Deserialize, Serialize};

use wasp_crypto::encoding;

use crate::envelope::MessageType;
use crate::error::WireError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum MessageContent {
    Text {
        body: String,
    },
    Media {
        /// 64-byte media key, lowercase hex.
        media_key: String,
        /// SHA-256 digest of the encrypted blob, lowercase hex.
        #[serde(with = "encoding::hex32")]
        digest: [u8; 32],
        /// Where the encrypted blob is hosted (opaque to this crate).
        blob_ref: String,
        mime_type: String,
        size_bytes: u64,
    },
    System {
        body: String,
    },
}

impl MessageContent {
    /// The envelope hint matching this content.
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageContent::Text { .. } => MessageType::Text,
            MessageContent::Media { .. } => MessageType::Media,
            MessageContent::System { .. } => MessageType::System,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Build a media body from the outputs of `wasp_crypto::media`.
    pub fn media(
        media_key: &[u8; 64],
        digest: [u8; 32],
        blob_ref: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        MessageContent::Media {
            media_key: hex::encode(media_key),
            digest,
            blob_ref: blob_ref.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }

    /// Decode the media key of a `Media` body.
    pub fn media_key_bytes(&self) -> Result<[u8; 64], WireError> {
        match self {
            MessageContent::Media { media_key, .. } => {
                let bytes = hex::decode(media_key)
                    .map_err(|e| WireError::Parse(format!("media key: {e}")))?;
                bytes
                    .try_into()
                    .map_err(|_| WireError::Parse("media key must be 64 bytes".into()))
            }
            _ => Err(WireError::Parse("not a media message".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip() {
        let content = MessageContent::Text { body: "hi".into() };
        let bytes = content.to_bytes().unwrap();
        match MessageContent::from_bytes(&bytes).unwrap() {
            MessageContent::Text { body } => assert_eq!(body, "hi"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn media_round_trip_and_key_decode() {
        let key = [0x5au8; 64];
        let content = MessageContent::media(&key, [9u8; 32], "blob/abc", "image/png", 1024);
        assert_eq!(content.message_type(), MessageType::Media);
        let back = MessageContent::from_bytes(&content.to_bytes().unwrap()).unwrap();
        assert_eq!(back.media_key_bytes().unwrap(), key);
    }

    #[test]
    fn unknown_variant_rejected() {
        let err = MessageContent::from_bytes(br#"{"type":"sticker","body":"x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn media_key_on_text_is_an_error() {
        let content = MessageContent::Text { body: "hi".into() };
        assert!(content.media_key_bytes().is_err());
    }
}
