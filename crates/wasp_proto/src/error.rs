use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Parse(e.to_string())
    }
}

impl From<base64::DecodeError> for WireError {
    fn from(e: base64::DecodeError) -> Self {
        WireError::Parse(format!("base64 decode: {e}"))
    }
}
