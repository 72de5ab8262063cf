//! Double Ratchet with DH ratchet steps.
//!
//! References:
//!   - Signal Double Ratchet spec: <https://signal.org/docs/specifications/doubleratchet/>
//!
//! State separation (non-negotiable):
//!   RK  — root key (updated on every DH ratchet step)
//!   CKs — sending chain key (updated per message; absent until we have sent
//!         in the current DH epoch)
//!   CKr — receiving chain key (absent until we have received in it)
//!   MK  — message key (derived from CK, used once, then deleted)
//!
//! Every operation here is pure: `encrypt` and `decrypt` take `&self` and
//! return the successor state next to the wire object. A failed call returns
//! an error and the input state is untouched, so the caller either commits
//! the new state or nothing happened. Callers own serialisation of access:
//! two concurrent operations on the same state value would both advance the
//! chains, and the library does not lock for them.
//!
//! Out-of-order delivery is absorbed by caching skipped message keys, capped
//! at `MAX_CACHE` entries (FIFO eviction) and `MAX_SKIP` per call.

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::{aead, error::CryptoError, kdf, prekey::SignedPreKey};

/// Largest counter gap a single decrypt may bridge.
pub const MAX_SKIP: u32 = 1000;
/// Cap on cached skipped message keys per session.
pub const MAX_CACHE: usize = 2000;
/// Serialized header length: 32-byte ratchet key + two big-endian u32s.
pub const HEADER_LEN: usize = 40;

// ── Header ───────────────────────────────────────────────────────────────────

/// Sent in clear with every ciphertext so the receiver can advance its
/// ratchet: the sender's current DH ratchet key and chain counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatchetHeader {
    #[serde(with = "crate::encoding::hex32")]
    pub dh_ratchet_key: [u8; 32],
    /// Messages sent in the previous sending chain.
    pub pn: u32,
    /// Message number in the current sending chain.
    pub n: u32,
}

impl RatchetHeader {
    /// Exact wire form: `key ‖ BE(pn) ‖ BE(n)`. This is the header part of
    /// the AEAD associated data, so it must be byte-stable.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..32].copy_from_slice(&self.dh_ratchet_key);
        out[32..36].copy_from_slice(&self.pn.to_be_bytes());
        out[36..40].copy_from_slice(&self.n.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != HEADER_LEN {
            return Err(CryptoError::Parse(format!(
                "ratchet header must be {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut dh_ratchet_key = [0u8; 32];
        dh_ratchet_key.copy_from_slice(&bytes[..32]);
        let pn = u32::from_be_bytes(bytes[32..36].try_into().expect("4-byte slice"));
        let n = u32::from_be_bytes(bytes[36..40].try_into().expect("4-byte slice"));
        Ok(Self { dh_ratchet_key, pn, n })
    }
}

/// One ratcheted message: clear header + AES-GCM body (16-byte tag appended).
#[derive(Debug, Clone)]
pub struct EncryptedMessage {
    pub header: RatchetHeader,
    pub ciphertext: Vec<u8>,
}

// ── State ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct DhKeyPair {
    secret: [u8; 32],
    public: [u8; 32],
}

impl DhKeyPair {
    fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = X25519Public::from(&secret).to_bytes();
        Self {
            secret: secret.to_bytes(),
            public,
        }
    }

    fn dh(&self, peer_pub: &[u8; 32]) -> [u8; 32] {
        StaticSecret::from(self.secret)
            .diffie_hellman(&X25519Public::from(*peer_pub))
            .to_bytes()
    }
}

#[derive(Clone)]
struct SkippedKey {
    dh: [u8; 32],
    n: u32,
    mk: [u8; 32],
}

/// Complete Double Ratchet state for one contact.
#[derive(Clone)]
pub struct RatchetState {
    /// Our current DH ratchet pair. Regenerated on each DH step.
    dhs: DhKeyPair,
    /// Peer's last seen DH ratchet key.
    dhr: Option<[u8; 32]>,
    rk: [u8; 32],
    cks: Option<[u8; 32]>,
    ckr: Option<[u8; 32]>,
    ns: u32,
    nr: u32,
    pn: u32,
    /// Skipped message keys in insertion order; FIFO-evicted at `MAX_CACHE`.
    mk_skipped: Vec<SkippedKey>,
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.dhs.secret.zeroize();
        self.rk.zeroize();
        if let Some(ref mut ck) = self.cks {
            ck.zeroize();
        }
        if let Some(ref mut ck) = self.ckr {
            ck.zeroize();
        }
        for entry in self.mk_skipped.iter_mut() {
            entry.mk.zeroize();
        }
    }
}

impl std::fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetState")
            .field("dhs_pub", &hex::encode(self.dhs.public))
            .field("dhr", &self.dhr.map(hex::encode))
            .field("ns", &self.ns)
            .field("nr", &self.nr)
            .field("pn", &self.pn)
            .field("skipped", &self.mk_skipped.len())
            .finish_non_exhaustive()
    }
}

// ── Construction ─────────────────────────────────────────────────────────────

impl RatchetState {
    /// Initialise as the session initiator (post-X3DH sender).
    ///
    /// The peer's SPK becomes the first received ratchet key and the first
    /// DH ratchet step runs immediately, so a sending chain exists before
    /// the peer ever replies.
    pub fn init_sender(master_secret: &[u8; 32], peer_spk_pub: &[u8; 32]) -> Result<Self, CryptoError> {
        let dhs = DhKeyPair::generate();
        let mut dh_out = dhs.dh(peer_spk_pub);
        let (rk, cks) = kdf::kdf_root(master_secret, &dh_out)?;
        dh_out.zeroize();
        Ok(Self {
            dhs,
            dhr: Some(*peer_spk_pub),
            rk,
            cks: Some(cks),
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            mk_skipped: Vec::new(),
        })
    }

    /// Initialise as the session responder (post-X3DH receiver).
    ///
    /// Our SPK pair is the starting ratchet key; no chain exists until the
    /// initiator's first message triggers a DH ratchet step.
    pub fn init_receiver(master_secret: &[u8; 32], spk: &SignedPreKey) -> Self {
        Self {
            dhs: DhKeyPair {
                secret: spk.secret,
                public: spk.public,
            },
            dhr: None,
            rk: *master_secret,
            cks: None,
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            mk_skipped: Vec::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    /// Our current DH ratchet public key.
    pub fn ratchet_pub(&self) -> [u8; 32] {
        self.dhs.public
    }

    /// Peer's last seen DH ratchet key, if any message arrived yet.
    pub fn peer_ratchet_key(&self) -> Option<[u8; 32]> {
        self.dhr
    }

    /// True once a sending chain exists (encrypt will succeed).
    pub fn can_send(&self) -> bool {
        self.cks.is_some()
    }

    pub fn send_count(&self) -> u32 {
        self.ns
    }

    pub fn recv_count(&self) -> u32 {
        self.nr
    }

    pub fn prev_chain_len(&self) -> u32 {
        self.pn
    }

    pub fn skipped_key_count(&self) -> usize {
        self.mk_skipped.len()
    }

    // ── Encrypt ──────────────────────────────────────────────────────────

    /// Encrypt one message, returning the successor state and the wire
    /// object. AAD is `header_bytes ‖ associated_data`.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<(Self, EncryptedMessage), CryptoError> {
        let cks = self.cks.as_ref().ok_or(CryptoError::NotInitialized)?;
        let (mut mk, next_ck) = kdf::kdf_chain(cks)?;
        let keys = kdf::kdf_message(&mk)?;
        mk.zeroize();

        let header = RatchetHeader {
            dh_ratchet_key: self.dhs.public,
            pn: self.pn,
            n: self.ns,
        };
        let aad = build_aad(&header, associated_data);
        let ciphertext = aead::seal(&keys.cipher_key, &keys.iv, plaintext, &aad)?;

        let mut next = self.clone();
        next.cks = Some(next_ck);
        next.ns = self.ns + 1;
        Ok((next, EncryptedMessage { header, ciphertext }))
    }

    // ── Decrypt ──────────────────────────────────────────────────────────

    /// Decrypt one message, returning the successor state and the plaintext.
    ///
    /// Resolution order: cached skipped key, then DH ratchet step if the
    /// sender's ratchet key moved, then skip-and-cache up to the header
    /// counter, then the chain key itself. Any failure leaves `self` as the
    /// caller's current state.
    pub fn decrypt(
        &self,
        message: &EncryptedMessage,
        associated_data: &[u8],
    ) -> Result<(Self, Zeroizing<Vec<u8>>), CryptoError> {
        let header = &message.header;
        let aad = build_aad(header, associated_data);

        // Out-of-order message whose key was cached earlier.
        if let Some(idx) = self
            .mk_skipped
            .iter()
            .position(|s| s.dh == header.dh_ratchet_key && s.n == header.n)
        {
            let keys = kdf::kdf_message(&self.mk_skipped[idx].mk)?;
            let plaintext = aead::open(&keys.cipher_key, &keys.iv, &message.ciphertext, &aad)?;
            let mut next = self.clone();
            let mut used = next.mk_skipped.remove(idx);
            used.mk.zeroize();
            return Ok((next, plaintext));
        }

        let mut next = self.clone();

        // DH ratchet step: the sender moved to a new ratchet key.
        let ratchet_needed = next
            .dhr
            .map_or(true, |dhr| dhr != header.dh_ratchet_key);
        if ratchet_needed {
            // Close out the old receiving chain first, caching the keys of
            // messages still in flight under the OLD ratchet key.
            if next.dhr.is_some() && next.ckr.is_some() {
                next.skip_message_keys(header.pn)?;
            }

            let mut dh_recv = next.dhs.dh(&header.dh_ratchet_key);
            let (rk, ckr) = kdf::kdf_root(&next.rk, &dh_recv)?;
            dh_recv.zeroize();
            next.rk = rk;
            next.ckr = Some(ckr);
            next.dhr = Some(header.dh_ratchet_key);
            next.pn = next.ns;
            next.ns = 0;
            next.nr = 0;

            next.dhs = DhKeyPair::generate();
            let mut dh_send = next.dhs.dh(&header.dh_ratchet_key);
            let (rk, cks) = kdf::kdf_root(&next.rk, &dh_send)?;
            dh_send.zeroize();
            next.rk = rk;
            next.cks = Some(cks);
        }

        // Skip forward in the current chain, caching intermediate keys.
        next.skip_message_keys(header.n)?;

        let ckr = next.ckr.as_ref().ok_or(CryptoError::AuthFailure)?;
        let (mut mk, next_ckr) = kdf::kdf_chain(ckr)?;
        let keys = kdf::kdf_message(&mk)?;
        mk.zeroize();
        let plaintext = aead::open(&keys.cipher_key, &keys.iv, &message.ciphertext, &aad)?;

        next.ckr = Some(next_ckr);
        next.nr = header.n + 1;
        Ok((next, plaintext))
    }

    /// Advance the receiving chain to `until`, caching every intermediate
    /// message key under the current peer ratchet key.
    fn skip_message_keys(&mut self, until: u32) -> Result<(), CryptoError> {
        if until <= self.nr {
            return Ok(());
        }
        let gap = until - self.nr;
        if gap > MAX_SKIP {
            return Err(CryptoError::TooManySkipped { gap, max: MAX_SKIP });
        }
        // A gap in a chain we never received in cannot be bridged.
        let mut ck = self.ckr.ok_or(CryptoError::AuthFailure)?;
        let dhr = self.dhr.ok_or(CryptoError::AuthFailure)?;
        while self.nr < until {
            let (mk, next_ck) = kdf::kdf_chain(&ck)?;
            ck.zeroize();
            ck = next_ck;
            self.cache_skipped(dhr, self.nr, mk);
            self.nr += 1;
        }
        self.ckr = Some(ck);
        Ok(())
    }

    fn cache_skipped(&mut self, dh: [u8; 32], n: u32, mk: [u8; 32]) {
        if self.mk_skipped.len() >= MAX_CACHE {
            let mut oldest = self.mk_skipped.remove(0);
            oldest.mk.zeroize();
        }
        self.mk_skipped.push(SkippedKey { dh, n, mk });
    }
}

fn build_aad(header: &RatchetHeader, associated_data: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(HEADER_LEN + associated_data.len());
    aad.extend_from_slice(&header.to_bytes());
    aad.extend_from_slice(associated_data);
    aad
}

// ── Persisted form ───────────────────────────────────────────────────────────

/// Skipped-key cache entry on disk: `hex(peer_dh) + ":" + decimal(n)` paired
/// with the hex message key. List order is insertion order, so FIFO eviction
/// reproduces after a round-trip.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RatchetStateRecord {
    dhs_pub: String,
    dhs_priv: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dhr: Option<String>,
    rk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ckr: Option<String>,
    ns: u32,
    nr: u32,
    pn: u32,
    mk_skipped: Vec<(String, String)>,
}

impl Serialize for RatchetState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RatchetStateRecord {
            dhs_pub: hex::encode(self.dhs.public),
            dhs_priv: hex::encode(self.dhs.secret),
            dhr: self.dhr.map(hex::encode),
            rk: hex::encode(self.rk),
            cks: self.cks.map(hex::encode),
            ckr: self.ckr.map(hex::encode),
            ns: self.ns,
            nr: self.nr,
            pn: self.pn,
            mk_skipped: self
                .mk_skipped
                .iter()
                .map(|s| (format!("{}:{}", hex::encode(s.dh), s.n), hex::encode(s.mk)))
                .collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RatchetState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let r = RatchetStateRecord::deserialize(deserializer)?;

        let decode32 = |s: &str| crate::encoding::decode_hex32(s).map_err(D::Error::custom);
        let secret = decode32(&r.dhs_priv)?;
        let public = decode32(&r.dhs_pub)?;
        let derived = X25519Public::from(&StaticSecret::from(secret)).to_bytes();
        if derived != public {
            return Err(D::Error::custom("ratchet public key does not match private key"));
        }

        let mut mk_skipped = Vec::with_capacity(r.mk_skipped.len());
        for (cache_key, mk_hex) in &r.mk_skipped {
            let (dh_hex, n_dec) = cache_key
                .split_once(':')
                .ok_or_else(|| D::Error::custom("malformed skipped-key cache key"))?;
            let dh = decode32(dh_hex)?;
            let n: u32 = n_dec
                .parse()
                .map_err(|_| D::Error::custom("malformed skipped-key counter"))?;
            mk_skipped.push(SkippedKey { dh, n, mk: decode32(mk_hex)? });
        }
        if mk_skipped.len() > MAX_CACHE {
            return Err(D::Error::custom("skipped-key cache exceeds the cap"));
        }

        Ok(RatchetState {
            dhs: DhKeyPair { secret, public },
            dhr: r.dhr.as_deref().map(decode32).transpose()?,
            rk: decode32(&r.rk)?,
            cks: r.cks.as_deref().map(decode32).transpose()?,
            ckr: r.ckr.as_deref().map(decode32).transpose()?,
            ns: r.ns,
            nr: r.nr,
            pn: r.pn,
            mk_skipped,
        })
    }
}
