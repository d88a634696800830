//! Sealing asset keys to the user's public key.
//!
//! # Protocol
//!
//! 1. Generate an ephemeral X25519 keypair
//! 2. shared = ECDH(ephemeral_private, user_public)
//! 3. kek = HKDF-SHA256(salt = ephemeral_public, ikm = shared, info = context)
//! 4. Output `base64(ephemeral_public || nonce || AES-GCM(kek, asset_key))`
//!
//! Opening recomputes the shared secret from the user's private key and the
//! embedded ephemeral public key.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::cipher::{self, NONCE_LEN, TAG_LEN};
use crate::error::{CryptoError, CryptoResult};
use crate::format::{base64_decode, base64_encode};
use crate::keys::{AssetKey, UserPrivateKey, UserPublicKey};

/// Domain separation context for HKDF.
const HKDF_INFO_SEAL: &[u8] = b"tripup-asset-key-seal-v1";

const EPHEMERAL_LEN: usize = 32;

fn derive_kek(shared: &[u8; 32], ephemeral_public: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(Some(ephemeral_public), shared);
    let mut kek = Zeroizing::new([0u8; 32]);
    // A 32-byte output is always within HKDF-SHA256's expand limit.
    hkdf.expand(HKDF_INFO_SEAL, &mut *kek)
        .expect("32-byte HKDF output is valid");
    kek
}

/// Encrypt `key` so that only the holder of `recipient`'s private key can open it.
pub fn seal_key(key: &AssetKey, recipient: &UserPublicKey) -> CryptoResult<String> {
    let mut ephemeral_bytes: [u8; 32] = cipher::generate_random();
    let ephemeral = StaticSecret::from(ephemeral_bytes);
    ephemeral_bytes.zeroize();
    let ephemeral_public = X25519Public::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&recipient.to_x25519());
    let kek = derive_kek(shared.as_bytes(), ephemeral_public.as_bytes());
    let sealed = cipher::seal(&kek, key.as_bytes())?;

    let mut out = Vec::with_capacity(EPHEMERAL_LEN + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(base64_encode(&out))
}

/// Recover an asset key sealed with [`seal_key`].
pub fn open_sealed_key(sealed: &str, private: &UserPrivateKey) -> CryptoResult<AssetKey> {
    let bytes = base64_decode(sealed)?;
    let minimum = EPHEMERAL_LEN + NONCE_LEN + TAG_LEN;
    if bytes.len() < minimum {
        return Err(CryptoError::Truncated {
            expected: minimum,
            actual: bytes.len(),
        });
    }

    let (ephemeral, payload) = bytes.split_at(EPHEMERAL_LEN);
    let mut ephemeral_public = [0u8; 32];
    ephemeral_public.copy_from_slice(ephemeral);

    let shared = private
        .to_x25519()
        .diffie_hellman(&X25519Public::from(ephemeral_public));
    let kek = derive_kek(shared.as_bytes(), &ephemeral_public);
    let key_bytes = Zeroizing::new(cipher::open(&kek, payload)?);
    AssetKey::from_slice(&key_bytes)
}
