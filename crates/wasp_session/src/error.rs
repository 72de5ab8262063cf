use thiserror::Error;

use wasp_crypto::CryptoError;
use wasp_proto::WireError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("registration id mismatch for {contact_id}: envelope says {envelope}, stored {stored}")]
    SessionConflict {
        contact_id: String,
        envelope: u32,
        stored: u16,
    },

    #[error("no session exists for {0} and the envelope is not a pre-key message")]
    NotPreKeyMessage(String),

    #[error("envelope consumed one-time pre-key {key_id} but none was supplied")]
    MissingOneTimePreKey { key_id: u32 },
}
