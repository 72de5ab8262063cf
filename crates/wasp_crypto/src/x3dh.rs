//! X3DH asynchronous key agreement.
//!
//! References:
//!   - Signal X3DH spec: <https://signal.org/docs/specifications/x3dh/>
//!   - RFC 7748 (X25519): <https://datatracker.ietf.org/doc/html/rfc7748>
//!   - RFC 5869 (HKDF):  <https://datatracker.ietf.org/doc/html/rfc5869>
//!
//! Protocol:
//!   The sender fetches the recipient's published bundle (identity DH key,
//!   signed pre-key + signature, optional one-time pre-key), generates ONE
//!   ephemeral X25519 pair EK, and computes in this exact order:
//!
//! ```text
//!     DH1 = DH(IK_sender,  SPK)   — mutual authentication
//!     DH2 = DH(EK,         IK)    — forward secrecy
//!     DH3 = DH(EK,         SPK)   — replay protection
//!     DH4 = DH(EK,         OPK)   — one-time forward secrecy [optional]
//!
//!     SK = KDF_X3DH([DH1, DH2, DH3, (DH4)])
//! ```
//!
//! The receiver mirrors the same terms from its side; DH commutativity puts
//! identical bytes in identical KDF positions, so both ends derive the same
//! SK. The master secret seeds the Double Ratchet.
//!
//! Non-negotiable: the SPK signature is verified before any DH is computed,
//! and the receiver's OPK private half is destroyed after one use.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    error::CryptoError,
    identity::Identity,
    kdf,
    prekey::{OneTimePreKey, PreKeyBundle, SignedPreKey},
};

/// Sender-side result: the master secret plus what the first envelope must
/// carry so the receiver can mirror the agreement.
#[derive(ZeroizeOnDrop)]
pub struct Initiation {
    pub master_secret: [u8; 32],
    #[zeroize(skip)]
    pub ephemeral_pub: [u8; 32],
    #[zeroize(skip)]
    pub used_one_time_prekey_id: Option<u32>,
}

/// Sender side: verify the bundle, run the 3 or 4 DH computations, derive SK.
pub fn initiate(identity: &Identity, bundle: &PreKeyBundle) -> Result<Initiation, CryptoError> {
    // Signature first; a relay that swapped the SPK gets nothing else run.
    bundle.verify()?;

    let ek = StaticSecret::random_from_rng(OsRng);
    let ephemeral_pub = X25519Public::from(&ek).to_bytes();
    let spk_pub = X25519Public::from(bundle.signed_pre_key.public);
    let identity_dh_pub = X25519Public::from(bundle.identity_dh_pub);

    let mut dh_outputs = Vec::with_capacity(4);
    dh_outputs.push(identity.dh(&bundle.signed_pre_key.public));
    dh_outputs.push(ek.diffie_hellman(&identity_dh_pub).to_bytes());
    dh_outputs.push(ek.diffie_hellman(&spk_pub).to_bytes());

    let mut used_one_time_prekey_id = None;
    if let Some(ref opk) = bundle.one_time_pre_key {
        let opk_pub = X25519Public::from(opk.public);
        dh_outputs.push(ek.diffie_hellman(&opk_pub).to_bytes());
        used_one_time_prekey_id = Some(opk.key_id);
    }

    let master_secret = kdf::kdf_x3dh(&dh_outputs);
    for dh in dh_outputs.iter_mut() {
        dh.zeroize();
    }

    Ok(Initiation {
        master_secret: master_secret?,
        ephemeral_pub,
        used_one_time_prekey_id,
    })
}

/// Receiver side: mirror the sender's DH terms and derive the same SK.
///
/// The consumed OPK is taken by value; its private half is zeroized when
/// this function returns, used or not.
pub fn respond(
    identity: &Identity,
    spk: &SignedPreKey,
    opk: Option<OneTimePreKey>,
    sender_identity_dh_pub: &[u8; 32],
    sender_ephemeral_pub: &[u8; 32],
) -> Result<[u8; 32], CryptoError> {
    let mut dh_outputs = Vec::with_capacity(4);
    dh_outputs.push(spk.dh(sender_identity_dh_pub));
    dh_outputs.push(identity.dh(sender_ephemeral_pub));
    dh_outputs.push(spk.dh(sender_ephemeral_pub));

    if let Some(opk) = opk {
        dh_outputs.push(opk.dh(sender_ephemeral_pub));
        // opk dropped (and zeroized) here; one receive is all it gets
    }

    let master_secret = kdf::kdf_x3dh(&dh_outputs);
    for dh in dh_outputs.iter_mut() {
        dh.zeroize();
    }
    master_secret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prekey::{generate_one_time_pre_keys, generate_signed_pre_key};

    fn bundle_for(
        identity: &Identity,
        spk: &SignedPreKey,
        opk: Option<&OneTimePreKey>,
    ) -> PreKeyBundle {
        PreKeyBundle {
            user_id: "bob".into(),
            registration_id: identity.registration_id,
            identity_dh_pub: identity.dh_pub,
            identity_sign_pub: identity.sign_pub,
            signed_pre_key: spk.public_part(),
            one_time_pre_key: opk.map(|k| k.public_part()),
        }
    }

    #[test]
    fn both_sides_derive_the_same_secret_without_opk() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let bob_spk = generate_signed_pre_key(&bob, 1).unwrap();

        let init = initiate(&alice, &bundle_for(&bob, &bob_spk, None)).unwrap();
        assert!(init.used_one_time_prekey_id.is_none());

        let sk = respond(&bob, &bob_spk, None, &alice.dh_pub, &init.ephemeral_pub).unwrap();
        assert_eq!(init.master_secret, sk);
    }

    #[test]
    fn both_sides_derive_the_same_secret_with_opk() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let bob_spk = generate_signed_pre_key(&bob, 1).unwrap();
        let mut opks = generate_one_time_pre_keys(100, 1).unwrap();

        let init = initiate(&alice, &bundle_for(&bob, &bob_spk, Some(&opks[0]))).unwrap();
        assert_eq!(init.used_one_time_prekey_id, Some(100));

        let opk = opks.remove(0);
        let sk = respond(&bob, &bob_spk, Some(opk), &alice.dh_pub, &init.ephemeral_pub).unwrap();
        assert_eq!(init.master_secret, sk);
    }

    #[test]
    fn opk_changes_the_secret() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let bob_spk = generate_signed_pre_key(&bob, 1).unwrap();
        let opks = generate_one_time_pre_keys(100, 1).unwrap();

        let with = initiate(&alice, &bundle_for(&bob, &bob_spk, Some(&opks[0]))).unwrap();
        let without = initiate(&alice, &bundle_for(&bob, &bob_spk, None)).unwrap();
        assert_ne!(with.master_secret, without.master_secret);
    }

    #[test]
    fn zeroed_spk_signature_rejected() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let bob_spk = generate_signed_pre_key(&bob, 1).unwrap();

        let mut bundle = bundle_for(&bob, &bob_spk, None);
        bundle.signed_pre_key.signature = [0u8; 64];
        assert!(matches!(
            initiate(&alice, &bundle),
            Err(CryptoError::InvalidSignature)
        ));
    }

    #[test]
    fn spk_signed_by_wrong_identity_rejected() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mallory = Identity::generate();
        let bob_spk = generate_signed_pre_key(&bob, 1).unwrap();

        let mut bundle = bundle_for(&bob, &bob_spk, None);
        bundle.signed_pre_key.signature = mallory.sign(&bob_spk.public);
        assert!(matches!(
            initiate(&alice, &bundle),
            Err(CryptoError::InvalidSignature)
        ));
    }
}
