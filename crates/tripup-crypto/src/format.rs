//! Encrypted asset file format and string encoding.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ Magic: "TUASSET1" (8 bytes)          │
//! ├──────────────────────────────────────┤
//! │ Nonce (12 bytes)                     │
//! ├──────────────────────────────────────┤
//! │ AES-256-GCM ciphertext + tag         │
//! └──────────────────────────────────────┘
//! ```

use base64::Engine;

use crate::cipher;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::AssetKey;

/// Magic bytes at the start of every encrypted asset file.
pub const MAGIC_ASSET: &[u8; 8] = b"TUASSET1";

/// Whether `data` starts with the encrypted asset magic.
pub fn is_encrypted_asset(data: &[u8]) -> bool {
    data.starts_with(MAGIC_ASSET)
}

/// Encrypt the bytes of one physical asset.
pub fn encrypt_asset_bytes(key: &AssetKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let sealed = cipher::seal(key.as_bytes(), plaintext)?;
    let mut out = Vec::with_capacity(MAGIC_ASSET.len() + sealed.len());
    out.extend_from_slice(MAGIC_ASSET);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt the bytes of one physical asset.
pub fn decrypt_asset_bytes(key: &AssetKey, data: &[u8]) -> CryptoResult<Vec<u8>> {
    if !is_encrypted_asset(data) {
        return Err(CryptoError::InvalidMagic);
    }
    cipher::open(key.as_bytes(), &data[MAGIC_ASSET.len()..])
}

/// Encrypt a metadata string (md5, creation date, location, duration).
///
/// The result is `base64(nonce || ciphertext)`.
pub fn encrypt_string(key: &AssetKey, value: &str) -> CryptoResult<String> {
    let sealed = cipher::seal(key.as_bytes(), value.as_bytes())?;
    Ok(base64_encode(&sealed))
}

/// Decrypt a metadata string produced by [`encrypt_string`].
pub fn decrypt_string(key: &AssetKey, encoded: &str) -> CryptoResult<String> {
    let sealed = base64_decode(encoded)?;
    let plaintext = cipher::open(key.as_bytes(), &sealed)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Utf8)
}

/// Encode bytes as base64.
pub fn base64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode base64 string to bytes.
pub fn base64_decode(data: &str) -> CryptoResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| CryptoError::Base64(e.to_string()))
}
