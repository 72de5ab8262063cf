//! wasp_crypto — Wasp messenger cryptographic core
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Protocol operations are pure: they take a state by reference and return
//!   the successor state. A failed call leaves the input state untouched, so
//!   a send/receive either commits or it did not happen.
//!
//! # Module layout
//! - `identity` — long-term identity keys (Ed25519 signing + X25519 DH) and registration id
//! - `prekey`   — signed pre-keys, one-time pre-keys, published key bundles
//! - `x3dh`     — asynchronous 3/4-DH key agreement (SPK verification, master secret)
//! - `ratchet`  — Double Ratchet with DH ratchet steps + skipped message keys
//! - `media`    — standalone file encryption (AES-GCM + truncated HMAC + digest)
//! - `aead`     — AES-256-GCM seal/open helpers
//! - `kdf`      — HKDF / HMAC key schedule with the fixed wire labels
//! - `ct`       — constant-time comparison
//! - `rng`      — CSRNG helpers
//! - `encoding` — lowercase-hex serde adapters for key material
//! - `error`    — unified error type

pub mod aead;
pub mod ct;
pub mod encoding;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod media;
pub mod prekey;
pub mod ratchet;
pub mod rng;
pub mod x3dh;

pub use error::CryptoError;
