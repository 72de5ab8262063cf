//! wasp_proto — Wire types and serialisation for the Wasp messenger core
//!
//! Everything on the wire is JSON with enumerated, validated fields.
//! Unknown fields are rejected outright so a peer cannot smuggle a
//! downgrade through "ignored" extensions.
//!
//! # Modules
//! - `envelope` — encrypted message envelope (the only thing the relay sees)
//! - `payload`  — plaintext message types (inside the envelope ciphertext)
//! - `error`    — wire error type

pub mod envelope;
pub mod error;
pub mod payload;

pub use envelope::{Envelope, MessageType};
pub use error::WireError;
pub use payload::MessageContent;
