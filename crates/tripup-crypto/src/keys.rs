//! Key material: per-asset symmetric keys and the user's X25519 keypair.
//!
//! # Security
//!
//! - Secret keys are zeroized on drop
//! - Debug output never includes secret bytes
//! - The user key file is written with owner-only permissions on Unix

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};
use crate::format::{base64_decode, base64_encode};

/// Number of BLAKE3 bytes kept in a fingerprint.
const FINGERPRINT_LEN: usize = 20;

fn to_array(bytes: &[u8]) -> CryptoResult<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))
}

// =============================================================================
// ASSET KEYS
// =============================================================================

/// Symmetric AES-256 key protecting one asset's renditions and metadata.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct AssetKey([u8; 32]);

impl AssetKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build a key from a stored slice, rejecting the wrong length.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        to_array(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Keychain identifier: Base58 of the first 20 bytes of BLAKE3(key).
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        bs58::encode(&hash.as_bytes()[..FINGERPRINT_LEN]).into_string()
    }
}

impl Clone for AssetKey {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl std::fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetKey")
            .field("fingerprint", &self.fingerprint())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// USER KEYS
// =============================================================================

/// The user's X25519 public key. Asset keys are sealed to it.
#[derive(Clone, PartialEq, Eq)]
pub struct UserPublicKey([u8; 32]);

impl UserPublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub(crate) fn to_x25519(&self) -> X25519Public {
        X25519Public::from(self.0)
    }
}

impl std::fmt::Debug for UserPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserPublicKey({})", hex::encode(&self.0[..8]))
    }
}

/// The user's X25519 private key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct UserPrivateKey([u8; 32]);

impl UserPrivateKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub(crate) fn to_x25519(&self) -> StaticSecret {
        StaticSecret::from(self.0)
    }

    pub fn public_key(&self) -> UserPublicKey {
        let public = X25519Public::from(&self.to_x25519());
        UserPublicKey(*public.as_bytes())
    }
}

impl Clone for UserPrivateKey {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl std::fmt::Debug for UserPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserPrivateKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// The user's keypair.
#[derive(Clone)]
pub struct UserKeypair {
    pub public: UserPublicKey,
    pub private: UserPrivateKey,
}

impl UserKeypair {
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let secret = StaticSecret::from(secret_bytes);
        secret_bytes.zeroize();

        let private = UserPrivateKey(secret.to_bytes());
        Self {
            public: private.public_key(),
            private,
        }
    }

    pub fn from_private(private: UserPrivateKey) -> Self {
        Self {
            public: private.public_key(),
            private,
        }
    }
}

impl std::fmt::Debug for UserKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserKeypair")
            .field("public", &self.public)
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// On-disk user key file (JSON).
#[derive(Serialize, Deserialize)]
struct UserKeyFile {
    version: u8,
    private_key: String,
    public_key: String,
}

/// Write the user keypair to `path`.
pub fn save_user_keypair(keypair: &UserKeypair, path: &Path) -> CryptoResult<()> {
    let file = UserKeyFile {
        version: 1,
        private_key: base64_encode(keypair.private.as_bytes()),
        public_key: base64_encode(keypair.public.as_bytes()),
    };
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Read the user keypair from `path`.
///
/// The stored public key must match the one derived from the private key.
pub fn load_user_keypair(path: &Path) -> CryptoResult<UserKeypair> {
    let contents = std::fs::read_to_string(path)?;
    let file: UserKeyFile =
        serde_json::from_str(&contents).map_err(|e| CryptoError::InvalidKeyfile(e.to_string()))?;
    if file.version != 1 {
        return Err(CryptoError::InvalidKeyfile(format!(
            "unsupported version {}",
            file.version
        )));
    }

    let private = UserPrivateKey(to_array(&base64_decode(&file.private_key)?)?);
    let keypair = UserKeypair::from_private(private);
    let stored_public = to_array(&base64_decode(&file.public_key)?)?;
    if keypair.public.as_bytes() != &stored_public {
        return Err(CryptoError::InvalidKeyfile(
            "public key does not match private key".to_string(),
        ));
    }
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_asset_key_fingerprint_stable() {
        let key = AssetKey::generate();
        assert_eq!(key.fingerprint(), key.clone().fingerprint());
        assert_ne!(key.fingerprint(), AssetKey::generate().fingerprint());
    }

    #[test]
    fn test_fingerprint_is_base58_of_20_bytes() {
        let key = AssetKey::from_bytes([9u8; 32]);
        let decoded = bs58::decode(key.fingerprint()).into_vec().unwrap();
        assert_eq!(decoded.len(), FINGERPRINT_LEN);
        assert_eq!(decoded, &blake3::hash(&[9u8; 32]).as_bytes()[..FINGERPRINT_LEN]);
    }

    #[test]
    fn test_asset_key_from_slice_length() {
        assert!(AssetKey::from_slice(&[0u8; 32]).is_ok());
        assert!(matches!(
            AssetKey::from_slice(&[0u8; 16]),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_asset_key_debug_redacted() {
        let debug = format!("{:?}", AssetKey::from_bytes([0xAB; 32]));
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("171, 171"));
    }

    #[test]
    fn test_user_private_derives_public() {
        let kp = UserKeypair::generate();
        assert_eq!(kp.private.public_key(), kp.public);
    }

    #[test]
    fn test_save_load_user_keypair() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user.key");
        let kp = UserKeypair::generate();

        save_user_keypair(&kp, &path).unwrap();
        let loaded = load_user_keypair(&path).unwrap();
        assert_eq!(loaded.public, kp.public);
        assert_eq!(loaded.private.as_bytes(), kp.private.as_bytes());
    }

    #[test]
    fn test_load_rejects_mismatched_public() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user.key");
        let a = UserKeypair::generate();
        let b = UserKeypair::generate();
        let json = serde_json::json!({
            "version": 1,
            "private_key": base64_encode(a.private.as_bytes()),
            "public_key": base64_encode(b.public.as_bytes()),
        });
        std::fs::write(&path, json.to_string()).unwrap();

        assert!(matches!(
            load_user_keypair(&path),
            Err(CryptoError::InvalidKeyfile(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = load_user_keypair(&dir.path().join("absent.key"));
        assert!(matches!(result, Err(CryptoError::Io(_))));
    }
}
