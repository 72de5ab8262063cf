//! End-to-end session flows: handshake, ratcheting, reordering, replay,
//! tampering, conflicts, media transport. Envelopes always round-trip
//! through their JSON wire form, the way the relay would carry them.

use wasp_crypto::identity::Identity;
use wasp_crypto::media::{decrypt_media, encrypt_media};
use wasp_crypto::prekey::{
    generate_one_time_pre_keys, generate_signed_pre_key, OneTimePreKey, PreKeyBundle, SignedPreKey,
};
use wasp_crypto::CryptoError;
use wasp_proto::envelope::{Envelope, MessageType};
use wasp_proto::payload::MessageContent;
use wasp_session::{
    create_outgoing, decrypt_incoming, deserialize_session, serialize_session, Session,
    SessionError,
};

struct Peer {
    identity: Identity,
    spk: SignedPreKey,
    opks: Vec<OneTimePreKey>,
}

impl Peer {
    fn new() -> Self {
        let identity = Identity::generate();
        let spk = generate_signed_pre_key(&identity, 1).unwrap();
        let opks = generate_one_time_pre_keys(100, 10).unwrap();
        Self { identity, spk, opks }
    }

    fn bundle(&self, with_opk: bool) -> PreKeyBundle {
        PreKeyBundle {
            user_id: "bob".into(),
            registration_id: self.identity.registration_id,
            identity_dh_pub: self.identity.dh_pub,
            identity_sign_pub: self.identity.sign_pub,
            signed_pre_key: self.spk.public_part(),
            one_time_pre_key: with_opk.then(|| self.opks[0].public_part()),
        }
    }

    /// Consume an OPK from the store, the way a client would on first receipt.
    fn take_opk(&mut self, key_id: u32) -> Option<OneTimePreKey> {
        let idx = self.opks.iter().position(|k| k.key_id == key_id)?;
        Some(self.opks.remove(idx))
    }
}

fn relay(envelope: &Envelope) -> Envelope {
    Envelope::from_json(&envelope.to_json().unwrap()).unwrap()
}

/// S1 plus the S2 continuation: returns (alice_identity, bob_identity,
/// alice_session, bob_session) with one message exchanged each way.
fn established_pair() -> (Identity, Identity, Session, Session) {
    let alice = Identity::generate();
    let mut bob = Peer::new();

    let pending = create_outgoing(&alice, "bob", &bob.bundle(true)).unwrap();
    let (alice_session, first) = pending
        .encrypt_first(&alice, b"Hello, Bob!", MessageType::Text)
        .unwrap();
    let first = relay(&first);

    let opk = bob.take_opk(first.used_one_time_prekey_id.unwrap()).unwrap();
    let (bob_session, plaintext) =
        decrypt_incoming(&bob.identity, &bob.spk, Some(opk), "alice", &first).unwrap();
    assert_eq!(&plaintext[..], b"Hello, Bob!");

    (alice, bob.identity, alice_session, bob_session)
}

#[test]
fn s1_simple_round_trip() {
    let alice = Identity::generate();
    let mut bob = Peer::new();

    let pending = create_outgoing(&alice, "bob", &bob.bundle(true)).unwrap();
    let (_alice_session, envelope) = pending
        .encrypt_first(&alice, b"Hello, Bob!", MessageType::Text)
        .unwrap();

    assert!(envelope.is_pre_key_message);
    assert_eq!(envelope.used_one_time_prekey_id, Some(100));
    assert_eq!(envelope.header.n, 0);
    assert_eq!(envelope.header.pn, 0);

    let envelope = relay(&envelope);
    let opk = bob.take_opk(100).unwrap();
    let (_bob_session, plaintext) =
        decrypt_incoming(&bob.identity, &bob.spk, Some(opk), "alice", &envelope).unwrap();
    assert_eq!(&plaintext[..], b"Hello, Bob!");

    // The consumed OPK is gone from Bob's store.
    assert!(bob.opks.iter().all(|k| k.key_id != 100));
}

#[test]
fn s2_bidirectional_with_dh_ratchet() {
    let (alice, bob, alice_session, bob_session) = established_pair();

    let (bob_session, reply) = bob_session
        .encrypt(&bob, b"Hi Alice", MessageType::Text)
        .unwrap();
    assert!(!reply.is_pre_key_message);
    let reply = relay(&reply);

    let (alice_session, plaintext) = alice_session.decrypt(&alice, &reply).unwrap();
    assert_eq!(&plaintext[..], b"Hi Alice");
    // Alice's DH ratchet stepped onto Bob's current key.
    assert_eq!(
        alice_session.ratchet().peer_ratchet_key(),
        Some(reply.header.dh_ratchet_key)
    );

    let (_, third) = alice_session
        .encrypt(&alice, b"back", MessageType::Text)
        .unwrap();
    assert_eq!(third.header.pn, 1);
    assert_eq!(third.header.n, 0);
    let third = relay(&third);

    let (bob_session, plaintext) = bob_session.decrypt(&bob, &third).unwrap();
    assert_eq!(&plaintext[..], b"back");
    assert_eq!(
        bob_session.ratchet().peer_ratchet_key(),
        Some(third.header.dh_ratchet_key)
    );
}

#[test]
fn s3_out_of_order_delivery() {
    let (alice, bob, alice_session, bob_session) = established_pair();

    let (alice_session, m1) = alice_session.encrypt(&alice, b"m1", MessageType::Text).unwrap();
    let (alice_session, m2) = alice_session.encrypt(&alice, b"m2", MessageType::Text).unwrap();
    let (_alice_session, m3) = alice_session.encrypt(&alice, b"m3", MessageType::Text).unwrap();

    let (bob_session, p3) = bob_session.decrypt(&bob, &relay(&m3)).unwrap();
    assert_eq!(&p3[..], b"m3");
    assert_eq!(bob_session.ratchet().skipped_key_count(), 2);

    let (bob_session, p1) = bob_session.decrypt(&bob, &relay(&m1)).unwrap();
    assert_eq!(&p1[..], b"m1");

    let (bob_session, p2) = bob_session.decrypt(&bob, &relay(&m2)).unwrap();
    assert_eq!(&p2[..], b"m2");
    assert_eq!(bob_session.ratchet().skipped_key_count(), 0);
}

#[test]
fn s4_replay_rejected() {
    let alice = Identity::generate();
    let mut bob = Peer::new();

    let pending = create_outgoing(&alice, "bob", &bob.bundle(true)).unwrap();
    let (alice_session, first) = pending
        .encrypt_first(&alice, b"Hello, Bob!", MessageType::Text)
        .unwrap();
    let first = relay(&first);
    let opk = bob.take_opk(100).unwrap();
    let (bob_session, _) =
        decrypt_incoming(&bob.identity, &bob.spk, Some(opk), "alice", &first).unwrap();

    // Replay of the already-consumed first message.
    let before = serialize_session(&bob_session).unwrap();
    assert!(matches!(
        bob_session.decrypt(&bob.identity, &first),
        Err(SessionError::Crypto(CryptoError::AuthFailure))
    ));
    assert_eq!(serialize_session(&bob_session).unwrap(), before);

    // Replays of later traffic fail the same way.
    let (_, m2) = alice_session.encrypt(&alice, b"m2", MessageType::Text).unwrap();
    let (bob_session, _) = bob_session.decrypt(&bob.identity, &m2).unwrap();
    assert!(matches!(
        bob_session.decrypt(&bob.identity, &m2),
        Err(SessionError::Crypto(CryptoError::AuthFailure))
    ));
}

#[test]
fn s5_tamper_detection() {
    let (alice, bob, alice_session, bob_session) = established_pair();

    let (_, envelope) = alice_session.encrypt(&alice, b"m", MessageType::Text).unwrap();

    let mut flipped = envelope.clone();
    flipped.ciphertext[0] ^= 0x01;
    assert!(matches!(
        bob_session.decrypt(&bob, &flipped),
        Err(SessionError::Crypto(CryptoError::AuthFailure))
    ));

    // Header counters are bound through the AAD.
    let mut bumped = envelope.clone();
    bumped.header.n += 1;
    assert!(bob_session.decrypt(&bob, &bumped).is_err());

    // The untampered envelope still decrypts: nothing above touched state.
    let (_, plaintext) = bob_session.decrypt(&bob, &envelope).unwrap();
    assert_eq!(&plaintext[..], b"m");
}

#[test]
fn s6_bundle_signature_tampering() {
    let alice = Identity::generate();
    let bob = Peer::new();

    let mut bundle = bob.bundle(false);
    bundle.signed_pre_key.signature = [0u8; 64];
    assert!(matches!(
        create_outgoing(&alice, "bob", &bundle),
        Err(SessionError::Crypto(CryptoError::InvalidSignature))
    ));
}

#[test]
fn s7_media_through_a_session() {
    let (alice, bob, alice_session, bob_session) = established_pair();

    let file = wasp_crypto::rng::rand_bytes(1024 * 1024);
    let media = encrypt_media(&file).unwrap();
    let content = MessageContent::media(
        &media.media_key,
        media.digest,
        "blobs/7f3a",
        "application/octet-stream",
        file.len() as u64,
    );

    let (_, envelope) = alice_session
        .encrypt(&alice, &content.to_bytes().unwrap(), MessageType::Media)
        .unwrap();
    assert_eq!(envelope.message_type, MessageType::Media);

    let (_, plaintext) = bob_session.decrypt(&bob, &relay(&envelope)).unwrap();
    let received = MessageContent::from_bytes(&plaintext).unwrap();
    let key = received.media_key_bytes().unwrap();
    let MessageContent::Media { digest, .. } = &received else {
        panic!("expected media content");
    };

    let decrypted = decrypt_media(&media.blob, &key, digest).unwrap();
    assert_eq!(&decrypted[..], &file[..]);

    // Corrupted digest must not decrypt.
    let mut bad_digest = *digest;
    bad_digest[31] ^= 0xFF;
    assert!(matches!(
        decrypt_media(&media.blob, &key, &bad_digest),
        Err(CryptoError::MediaIntegrity)
    ));
}

#[test]
fn registration_id_conflict_detected() {
    let (alice, bob, alice_session, bob_session) = established_pair();

    let (_, envelope) = alice_session.encrypt(&alice, b"m", MessageType::Text).unwrap();
    let mut conflicting = envelope.clone();
    conflicting.registration_id = u32::from(alice.registration_id) + 1;

    assert!(matches!(
        bob_session.decrypt(&bob, &conflicting),
        Err(SessionError::SessionConflict { .. })
    ));

    // The honest envelope still goes through afterwards.
    assert!(bob_session.decrypt(&bob, &envelope).is_ok());
}

#[test]
fn session_serde_round_trip_preserves_behaviour() {
    let (alice, bob, alice_session, bob_session) = established_pair();

    let json = serialize_session(&bob_session).unwrap();
    let restored = deserialize_session(&json).unwrap();
    assert_eq!(restored.contact_id, bob_session.contact_id);
    assert_eq!(restored.peer_registration_id, bob_session.peer_registration_id);

    let (_, envelope) = alice_session.encrypt(&alice, b"after restore", MessageType::Text).unwrap();
    let (_, from_original) = bob_session.decrypt(&bob, &envelope).unwrap();
    let (_, from_restored) = restored.decrypt(&bob, &envelope).unwrap();
    assert_eq!(&from_original[..], b"after restore");
    assert_eq!(&from_original[..], &from_restored[..]);
}

#[test]
fn malformed_session_json_rejected() {
    let (_, _, _, bob_session) = established_pair();
    let json = serialize_session(&bob_session).unwrap();

    let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
    value["unexpected"] = serde_json::Value::Bool(true);
    assert!(matches!(
        deserialize_session(&value.to_string()),
        Err(SessionError::Crypto(CryptoError::Parse(_)))
    ));

    assert!(deserialize_session("{not json").is_err());
}
