//! # tripup-crypto
//!
//! Client-side encryption for TripUp assets.
//!
//! ## Cryptographic Primitives
//!
//! - **Asset encryption**: AES-256-GCM with a random per-asset key
//! - **Key identity**: fingerprint = Base58(BLAKE3(key)[..20])
//! - **Key sealing**: X25519 ECDH + HKDF-SHA256 + AES-256-GCM to the user key
//! - **Random generation**: OS-seeded CSPRNG
//!
//! ## Examples
//!
//! ```rust
//! use tripup_crypto::{decrypt_asset_bytes, encrypt_asset_bytes, AssetKey};
//!
//! let key = AssetKey::generate();
//! let encrypted = encrypt_asset_bytes(&key, b"photo bytes").unwrap();
//! assert_eq!(decrypt_asset_bytes(&key, &encrypted).unwrap(), b"photo bytes");
//! ```
//!
//! ```rust
//! use tripup_crypto::{open_sealed_key, seal_key, AssetKey, UserKeypair};
//!
//! let user = UserKeypair::generate();
//! let key = AssetKey::generate();
//! let sealed = seal_key(&key, &user.public).unwrap();
//! let opened = open_sealed_key(&sealed, &user.private).unwrap();
//! assert_eq!(opened.fingerprint(), key.fingerprint());
//! ```

pub mod cipher;
pub mod error;
pub mod format;
pub mod keys;
pub mod seal;

pub use error::{CryptoError, CryptoResult};
pub use format::{
    base64_decode, base64_encode, decrypt_asset_bytes, decrypt_string, encrypt_asset_bytes,
    encrypt_string, is_encrypted_asset, MAGIC_ASSET,
};
pub use keys::{
    load_user_keypair, save_user_keypair, AssetKey, UserKeypair, UserPrivateKey, UserPublicKey,
};
pub use seal::{open_sealed_key, seal_key};
