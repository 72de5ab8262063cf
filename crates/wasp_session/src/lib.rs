//! wasp_session — session management for the Wasp messenger core
//!
//! Maps application intent onto protocol actions:
//!   - `create_outgoing` runs X3DH against a fetched pre-key bundle and
//!     initialises the sender ratchet, yielding a [`PendingSession`];
//!   - [`PendingSession::encrypt_first`] consumes it to produce the one
//!     pre-key envelope a session ever gets;
//!   - [`Session::encrypt`] / [`Session::decrypt`] handle everything after;
//!   - `decrypt_incoming` bootstraps the receiving side from a pre-key
//!     envelope, consuming the one-time pre-key it names.
//!
//! Sessions are values: every operation returns the successor session and a
//! failed operation leaves the input usable. Callers persist whichever
//! session value they intend to keep; per-contact exclusive ownership is the
//! caller's job (one lock or queue per contact).

mod error;
mod session;

pub use error::SessionError;
pub use session::{
    create_outgoing, decrypt_incoming, deserialize_session, serialize_session, PendingSession,
    Session,
};
