use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("pre-key signature verification failed")]
    InvalidSignature,

    #[error("AEAD decryption failed (authentication tag mismatch — possible tampering)")]
    AuthFailure,

    #[error("AEAD encryption failed")]
    EncryptFailure,

    #[error("sending chain not initialised")]
    NotInitialized,

    #[error("message counter gap of {gap} exceeds the skip limit of {max}")]
    TooManySkipped { gap: u32, max: u32 },

    #[error("media digest or MAC mismatch")]
    MediaIntegrity,

    #[error("pre-key id space exhausted")]
    ExhaustedKeyIds,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::Parse(format!("hex decode: {e}"))
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        CryptoError::Parse(format!("base64 decode: {e}"))
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(e: serde_json::Error) -> Self {
        CryptoError::Parse(e.to_string())
    }
}
