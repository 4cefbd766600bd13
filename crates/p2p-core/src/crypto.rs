//! Cryptographic primitives for the node's signed protocol.
//!
//! Provides three things:
//!   1. A long-lived ECDSA P-256 signing identity — sign/verify protocol messages.
//!   2. Ephemeral ECDH key exchange — one-off per session, never persisted.
//!   3. A symmetric AEAD session, keyed by the ECDH output, for sealing Datum
//!      bodies a sender chooses to protect.
//!
//! All key material derives Zeroize/ZeroizeOnDrop — wiped from memory when
//! dropped. There is no unsafe code in this module.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ecdsa::signature::{Signer, Verifier};
use elliptic_curve::sec1::ToEncodedPoint;
use hkdf::Hkdf;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::{PublicKey, SecretKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Hash a byte slice, returning a 32-byte SHA-256 digest.
///
/// Used for content hashes, handshake verification, and anywhere the
/// protocol calls for plain SHA-256 rather than a signature.
pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

// ── Signing identity ─────────────────────────────────────────────────────────

/// A peer's long-term ECDSA P-256 signing identity.
///
/// Generated once per peer and persisted as a PEM file (see [`crate::config`]).
/// The public key is published through the directory server under the
/// peer's name. The private key never leaves this struct.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct Identity {
    #[zeroize(skip)]
    signing_key: SigningKey,
    #[zeroize(skip)]
    verifying_key: VerifyingKey,
}

impl Identity {
    /// Generate a new random signing identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = *signing_key.verifying_key();
        Identity {
            signing_key,
            verifying_key,
        }
    }

    /// Reconstruct an identity from a raw 32-byte scalar (as stored in the
    /// PEM-wrapped private key file).
    pub fn from_scalar_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes(bytes.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let verifying_key = *signing_key.verifying_key();
        Ok(Identity {
            signing_key,
            verifying_key,
        })
    }

    /// Serialize the private scalar for persistent storage.
    pub fn scalar_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// The 64-byte encoded public key: 32-byte big-endian X concatenated
    /// with 32-byte big-endian Y, each left-padded with zeros.
    pub fn public_key_bytes(&self) -> [u8; 64] {
        encode_public_key(&self.verifying_key)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Sign `data` (already the exact signable byte range, e.g.
    /// `id | type | length | body`). Returns the 64-byte R||S signature.
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        let sig: Signature = self.signing_key.sign(data);
        sig.to_bytes().into()
    }
}

/// Encode a P-256 verifying key as the protocol's 64-byte raw X||Y form.
pub fn encode_public_key(key: &VerifyingKey) -> [u8; 64] {
    let point = key.to_encoded_point(false);
    let mut out = [0u8; 64];
    out[0..32].copy_from_slice(point.x().expect("uncompressed point has x"));
    out[32..64].copy_from_slice(point.y().expect("uncompressed point has y"));
    out
}

/// Decode a peer's 64-byte raw X||Y public key, as returned by the
/// directory server, into a verifying key.
pub fn decode_public_key(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    if bytes.len() != 64 {
        return Err(CryptoError::InvalidPublicKeyLength(bytes.len()));
    }
    let mut sec1 = [0u8; 65];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(bytes);
    VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Verify a 64-byte R||S signature over `data` against a verifying key.
/// Verification fails closed on any malformed input.
pub fn verify_signature(key: &VerifyingKey, data: &[u8], signature: &[u8; 64]) -> bool {
    match Signature::from_slice(signature) {
        Ok(sig) => key.verify(data, &sig).is_ok(),
        Err(_) => false,
    }
}

// ── Ephemeral ECDH ────────────────────────────────────────────────────────────

/// An ephemeral ECDH keypair, generated fresh for one KeyExchange and never
/// reused across sessions or persisted.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EphemeralSecret {
    #[zeroize(skip)]
    secret: SecretKey,
}

impl EphemeralSecret {
    pub fn generate() -> Self {
        EphemeralSecret {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// The 64-byte raw X||Y encoding of the ephemeral public key, the form
    /// carried in a KeyExchange message body.
    pub fn public_key_bytes(&self) -> [u8; 64] {
        let verifying = VerifyingKey::from(self.secret.public_key());
        encode_public_key(&verifying)
    }

    /// Perform ECDH against the peer's ephemeral public key and derive a
    /// 32-byte symmetric key via HKDF-SHA256. Both sides derive the same
    /// key because Diffie-Hellman is commutative; the HKDF `info` string
    /// binds the derivation to this protocol so the key can't be confused
    /// with a key derived for any other purpose.
    pub fn derive_session_key(&self, peer_public_bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
        if peer_public_bytes.len() != 64 {
            return Err(CryptoError::InvalidPublicKeyLength(peer_public_bytes.len()));
        }
        let mut sec1 = [0u8; 65];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(peer_public_bytes);
        let peer_public =
            PublicKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidPublicKey)?;

        let shared = elliptic_curve::ecdh::diffie_hellman(
            self.secret.to_nonzero_scalar(),
            peer_public.as_affine(),
        );

        let hk = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes());
        let mut key = [0u8; 32];
        hk.expand(b"p2p-node session key v1", &mut key)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        Ok(key)
    }
}

// ── Symmetric AEAD session ───────────────────────────────────────────────────

/// A sealed Datum body: a random nonce prepended to the ciphertext.
pub struct SealedBody(pub Vec<u8>);

/// Seal `plaintext` under `session_key` with a fresh random nonce, which is
/// prepended to the returned ciphertext.
pub fn seal(session_key: &[u8; 32], plaintext: &[u8]) -> SealedBody {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(session_key));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let mut out = nonce.to_vec();
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .expect("chacha20poly1305 encryption is infallible for valid inputs");
    out.extend_from_slice(&ciphertext);
    SealedBody(out)
}

/// Open a sealed body previously produced by [`seal`]. Fails if the nonce
/// prefix is missing or the authentication tag does not match.
pub fn open(session_key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    const NONCE_LEN: usize = 12;
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::SealedBodyTooShort);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(session_key));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid private key bytes")]
    InvalidPrivateKey,

    #[error("public key must be exactly 64 bytes, got {0}")]
    InvalidPublicKeyLength(usize),

    #[error("public key bytes do not decode to a point on the curve")]
    InvalidPublicKey,

    #[error("session key derivation failed")]
    KeyDerivationFailed,

    #[error("sealed body shorter than the nonce prefix")]
    SealedBodyTooShort,

    #[error("AEAD decryption failed (bad key or tampered ciphertext)")]
    DecryptionFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let identity = Identity::generate();
        let data = b"id|type|length|body";
        let sig = identity.sign(data);
        assert!(verify_signature(&identity.verifying_key, data, &sig));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let identity = Identity::generate();
        let sig = identity.sign(b"original body");
        assert!(!verify_signature(&identity.verifying_key, b"tampered body", &sig));
    }

    #[test]
    fn public_key_round_trip_through_wire_encoding() {
        let identity = Identity::generate();
        let encoded = identity.public_key_bytes();
        assert_eq!(encoded.len(), 64);
        let decoded = decode_public_key(&encoded).unwrap();
        assert_eq!(decoded, identity.verifying_key);
    }

    #[test]
    fn private_key_persistence_round_trip() {
        let identity = Identity::generate();
        let scalar = identity.scalar_bytes();
        let restored = Identity::from_scalar_bytes(&scalar).unwrap();
        assert_eq!(restored.public_key_bytes(), identity.public_key_bytes());
    }

    #[test]
    fn ecdh_agrees_on_both_sides() {
        let a = EphemeralSecret::generate();
        let b = EphemeralSecret::generate();
        let key_a = a.derive_session_key(&b.public_key_bytes()).unwrap();
        let key_b = b.derive_session_key(&a.public_key_bytes()).unwrap();
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn seal_and_open_round_trip() {
        let key = [0x42u8; 32];
        let sealed = seal(&key, b"datum payload");
        let opened = open(&key, &sealed.0).unwrap();
        assert_eq!(opened, b"datum payload");
    }

    #[test]
    fn open_fails_with_wrong_key() {
        let sealed = seal(&[1u8; 32], b"secret");
        assert!(open(&[2u8; 32], &sealed.0).is_err());
    }

    #[test]
    fn hash_is_plain_sha256() {
        let expected = Sha256::digest(b"hello");
        assert_eq!(hash(b"hello"), expected.as_slice());
    }
}
