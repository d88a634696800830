//! Per-asset key management on top of the key repository.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use tripup_core::{Error, KeyRepository, Result};
use tripup_crypto::{open_sealed_key, seal_key, AssetKey, CryptoError, UserKeypair};

fn crypto_error(e: CryptoError) -> Error {
    Error::Crypto(e.to_string())
}

/// Serialises access to asset key material and the user's keypair.
pub struct Keychain {
    keys: Arc<dyn KeyRepository>,
    user: Option<UserKeypair>,
    lock: Mutex<()>,
}

impl Keychain {
    pub fn new(keys: Arc<dyn KeyRepository>, user: Option<UserKeypair>) -> Self {
        Self {
            keys,
            user,
            lock: Mutex::new(()),
        }
    }

    pub fn has_user_key(&self) -> bool {
        self.user.is_some()
    }

    fn user(&self) -> Result<&UserKeypair> {
        self.user
            .as_ref()
            .ok_or_else(|| Error::Config("user keypair not loaded".to_string()))
    }

    /// Generate and store a fresh asset key, returning its fingerprint.
    pub async fn generate_asset_key(&self) -> Result<String> {
        let _guard = self.lock.lock().await;
        let key = AssetKey::generate();
        let fingerprint = key.fingerprint();
        self.keys.insert_key(&fingerprint, key.as_bytes()).await?;
        debug!(subsystem = "sync", component = "keychain", %fingerprint, "Asset key generated");
        Ok(fingerprint)
    }

    pub async fn asset_key(&self, fingerprint: &str) -> Result<AssetKey> {
        let _guard = self.lock.lock().await;
        let bytes = self
            .keys
            .key(fingerprint)
            .await?
            .ok_or_else(|| Error::NotFound(format!("asset key {fingerprint}")))?;
        AssetKey::from_slice(&bytes).map_err(crypto_error)
    }

    /// The asset key sealed to the user's public key, for the server.
    pub async fn seal_for_user(&self, fingerprint: &str) -> Result<String> {
        let user = self.user()?;
        let key = self.asset_key(fingerprint).await?;
        seal_key(&key, &user.public).map_err(crypto_error)
    }

    /// Open a key sealed to the user and store it, returning its fingerprint.
    pub async fn store_sealed(&self, sealed: &str) -> Result<String> {
        let user = self.user()?;
        let key = open_sealed_key(sealed, &user.private).map_err(crypto_error)?;
        let fingerprint = key.fingerprint();
        let _guard = self.lock.lock().await;
        self.keys.insert_key(&fingerprint, key.as_bytes()).await?;
        Ok(fingerprint)
    }

    pub async fn delete(&self, fingerprint: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.keys.delete_key(fingerprint).await
    }
}
