//! Session lifecycle: X3DH handshake into Double Ratchet, envelope in/out.
//!
//! The associated data for every message AEAD is
//! `sender_identity_sign_pub ‖ recipient_identity_sign_pub`. This is the
//! only place identity keys are bound into message authentication, so both
//! directions build it here and nowhere else.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use wasp_crypto::{
    encoding,
    identity::{Identity, MAX_REGISTRATION_ID},
    prekey::{OneTimePreKey, PreKeyBundle, SignedPreKey},
    ratchet::RatchetState,
    x3dh, CryptoError,
};
use wasp_proto::envelope::{Envelope, MessageType};

use crate::error::SessionError;

// ── Session ──────────────────────────────────────────────────────────────────

/// Established ratchet session with one contact.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Session {
    pub contact_id: String,
    /// Peer's identity Ed25519 key, lowercase hex.
    pub peer_identity_sign_pub: String,
    pub peer_registration_id: u16,
    ratchet: RatchetState,
    /// Integer milliseconds since the Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
}

impl Session {
    fn new(
        contact_id: String,
        peer_identity_sign_pub: [u8; 32],
        peer_registration_id: u16,
        ratchet: RatchetState,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            contact_id,
            peer_identity_sign_pub: hex::encode(peer_identity_sign_pub),
            peer_registration_id,
            ratchet,
            created_at: now,
            updated_at: now,
        }
    }

    fn with_ratchet(&self, ratchet: RatchetState) -> Self {
        Self {
            contact_id: self.contact_id.clone(),
            peer_identity_sign_pub: self.peer_identity_sign_pub.clone(),
            peer_registration_id: self.peer_registration_id,
            ratchet,
            created_at: self.created_at,
            updated_at: Utc::now().timestamp_millis(),
        }
    }

    /// Read-only view of the ratchet state.
    pub fn ratchet(&self) -> &RatchetState {
        &self.ratchet
    }

    fn peer_sign_pub(&self) -> Result<[u8; 32], CryptoError> {
        encoding::decode_hex32(&self.peer_identity_sign_pub)
    }

    /// AAD for messages we send: our signing key, then the peer's.
    fn outgoing_ad(&self, identity: &Identity) -> Result<Vec<u8>, CryptoError> {
        let mut ad = Vec::with_capacity(64);
        ad.extend_from_slice(&identity.sign_pub);
        ad.extend_from_slice(&self.peer_sign_pub()?);
        Ok(ad)
    }

    /// AAD for messages we receive: the peer's signing key, then ours.
    fn incoming_ad(&self, identity: &Identity) -> Result<Vec<u8>, CryptoError> {
        let mut ad = Vec::with_capacity(64);
        ad.extend_from_slice(&self.peer_sign_pub()?);
        ad.extend_from_slice(&identity.sign_pub);
        Ok(ad)
    }

    /// Encrypt a message for this contact. Returns the successor session and
    /// the envelope; storing the successor is what commits the send.
    pub fn encrypt(
        &self,
        identity: &Identity,
        plaintext: &[u8],
        message_type: MessageType,
    ) -> Result<(Session, Envelope), SessionError> {
        let ad = self.outgoing_ad(identity)?;
        let (ratchet, message) = self.ratchet.encrypt(plaintext, &ad)?;
        let envelope = Envelope {
            is_pre_key_message: false,
            header: message.header,
            ciphertext: message.ciphertext,
            message_type,
            registration_id: u32::from(identity.registration_id),
            sender_identity_dh_key: None,
            sender_ephemeral_key: None,
            sender_identity_sign_key: None,
            used_one_time_prekey_id: None,
        };
        Ok((self.with_ratchet(ratchet), envelope))
    }

    /// Decrypt an envelope on an existing session. A pre-key envelope for a
    /// session that already exists decrypts like any other message; its
    /// bootstrap fields are simply ignored.
    pub fn decrypt(
        &self,
        identity: &Identity,
        envelope: &Envelope,
    ) -> Result<(Session, Zeroizing<Vec<u8>>), SessionError> {
        if envelope.registration_id != u32::from(self.peer_registration_id) {
            tracing::warn!(
                target: "wasp_session",
                event = "registration_id_conflict",
                contact_id = %self.contact_id,
                envelope = envelope.registration_id,
                stored = self.peer_registration_id,
            );
            return Err(SessionError::SessionConflict {
                contact_id: self.contact_id.clone(),
                envelope: envelope.registration_id,
                stored: self.peer_registration_id,
            });
        }
        let ad = self.incoming_ad(identity)?;
        let (ratchet, plaintext) = self.ratchet.decrypt(&envelope.ratchet_message(), &ad)?;
        Ok((self.with_ratchet(ratchet), plaintext))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("contact_id", &self.contact_id)
            .field("peer_registration_id", &self.peer_registration_id)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

// ── Outgoing bootstrap ───────────────────────────────────────────────────────

/// A freshly created outgoing session that has not yet produced its pre-key
/// message. Consuming it through [`PendingSession::encrypt_first`] is the
/// only way to emit the X3DH bootstrap fields, so they go out exactly once.
pub struct PendingSession {
    session: Session,
    ephemeral_pub: [u8; 32],
    used_one_time_prekey_id: Option<u32>,
}

impl PendingSession {
    /// The session as it will exist once the first envelope is produced.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Encrypt the first message of the session. Consumes the pending state:
    /// the returned [`Session`] only produces plain envelopes.
    pub fn encrypt_first(
        self,
        identity: &Identity,
        plaintext: &[u8],
        message_type: MessageType,
    ) -> Result<(Session, Envelope), SessionError> {
        let (session, mut envelope) = self.session.encrypt(identity, plaintext, message_type)?;
        envelope.is_pre_key_message = true;
        envelope.sender_identity_dh_key = Some(identity.dh_pub);
        envelope.sender_ephemeral_key = Some(self.ephemeral_pub);
        envelope.sender_identity_sign_key = Some(identity.sign_pub);
        envelope.used_one_time_prekey_id = self.used_one_time_prekey_id;
        tracing::debug!(
            target: "wasp_session",
            event = "first_envelope_built",
            contact_id = %session.contact_id,
            used_opk = ?self.used_one_time_prekey_id,
        );
        Ok((session, envelope))
    }
}

/// Start a session with a contact from their fetched pre-key bundle.
///
/// Runs the sender side of X3DH (verifying the SPK signature first) and
/// initialises the sender ratchet against the bundle's SPK.
pub fn create_outgoing(
    identity: &Identity,
    contact_id: &str,
    bundle: &PreKeyBundle,
) -> Result<PendingSession, SessionError> {
    let initiation = x3dh::initiate(identity, bundle)?;
    let ratchet = RatchetState::init_sender(
        &initiation.master_secret,
        &bundle.signed_pre_key.public,
    )?;
    let session = Session::new(
        contact_id.to_string(),
        bundle.identity_sign_pub,
        bundle.registration_id,
        ratchet,
    );
    tracing::debug!(
        target: "wasp_session",
        event = "outgoing_session_created",
        contact_id = %contact_id,
        used_opk = ?initiation.used_one_time_prekey_id,
    );
    Ok(PendingSession {
        session,
        ephemeral_pub: initiation.ephemeral_pub,
        used_one_time_prekey_id: initiation.used_one_time_prekey_id,
    })
}

// ── Incoming bootstrap ───────────────────────────────────────────────────────

/// First contact from a sender we have no session with: run the receiver
/// side of X3DH from the envelope's bootstrap fields, initialise the
/// receiver ratchet on our SPK pair, then decrypt.
///
/// The one-time pre-key is consumed by value; its private half is gone when
/// this returns, whether or not decryption succeeded. On any failure the
/// derived session is discarded, never persisted.
pub fn decrypt_incoming(
    identity: &Identity,
    spk: &SignedPreKey,
    opk: Option<OneTimePreKey>,
    contact_id: &str,
    envelope: &Envelope,
) -> Result<(Session, Zeroizing<Vec<u8>>), SessionError> {
    if !envelope.is_pre_key_message {
        return Err(SessionError::NotPreKeyMessage(contact_id.to_string()));
    }
    let missing = |field: &str| {
        SessionError::Wire(wasp_proto::WireError::Parse(format!(
            "pre-key envelope is missing {field}"
        )))
    };
    let sender_dh = envelope
        .sender_identity_dh_key
        .ok_or_else(|| missing("sender_identity_dh_key"))?;
    let sender_ephemeral = envelope
        .sender_ephemeral_key
        .ok_or_else(|| missing("sender_ephemeral_key"))?;
    let sender_sign = envelope
        .sender_identity_sign_key
        .ok_or_else(|| missing("sender_identity_sign_key"))?;
    let registration_id = u16::try_from(envelope.registration_id)
        .ok()
        .filter(|id| (1..=MAX_REGISTRATION_ID).contains(id))
        .ok_or_else(|| {
            SessionError::Wire(wasp_proto::WireError::Parse(
                "registration id out of range".into(),
            ))
        })?;

    if let Some(key_id) = envelope.used_one_time_prekey_id {
        match opk {
            None => return Err(SessionError::MissingOneTimePreKey { key_id }),
            Some(ref supplied) if supplied.key_id != key_id => {
                return Err(SessionError::MissingOneTimePreKey { key_id })
            }
            Some(_) => {}
        }
    }

    let master_secret = Zeroizing::new(x3dh::respond(
        identity,
        spk,
        opk,
        &sender_dh,
        &sender_ephemeral,
    )?);
    let ratchet = RatchetState::init_receiver(&master_secret, spk);
    let session = Session::new(
        contact_id.to_string(),
        sender_sign,
        registration_id,
        ratchet,
    );

    let (session, plaintext) = session.decrypt(identity, envelope)?;
    tracing::debug!(
        target: "wasp_session",
        event = "incoming_session_established",
        contact_id = %contact_id,
    );
    Ok((session, plaintext))
}

// ── Persistence ──────────────────────────────────────────────────────────────

/// Session to its stored JSON form (hex-lowercase byte strings throughout).
pub fn serialize_session(session: &Session) -> Result<String, SessionError> {
    serde_json::to_string(session).map_err(|e| SessionError::Crypto(CryptoError::Parse(e.to_string())))
}

/// Stored JSON back to a session. Malformed or unknown fields are an error.
pub fn deserialize_session(json: &str) -> Result<Session, SessionError> {
    serde_json::from_str(json).map_err(|e| SessionError::Crypto(CryptoError::Parse(e.to_string())))
}
