use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use common::crypto::{CryptoError, CryptoService};
use common::tuf::{KeyAlgorithm, PublicKey, RoleName};

use crate::storage::Gun;

/// Per-GUN snapshot/timestamp key management for the `.key` endpoints.
///
/// Keys are created on first request and replaced on rotation. The map is
/// process-local; durable key material lives in the crypto service (which
/// is the remote signer in production setups).
pub struct KeyStore {
    crypto: Arc<dyn CryptoService>,
    algorithm: KeyAlgorithm,
    keys: RwLock<HashMap<(String, String), PublicKey>>,
}

impl KeyStore {
    pub fn new(crypto: Arc<dyn CryptoService>, algorithm: KeyAlgorithm) -> Self {
        KeyStore {
            crypto,
            algorithm,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// The current key for `(gun, role)`, created on demand.
    pub async fn current(&self, gun: &Gun, role: &RoleName) -> Result<PublicKey, CryptoError> {
        let map_key = (gun.to_string(), role.to_string());
        if let Some(key) = self.keys.read().await.get(&map_key) {
            return Ok(key.clone());
        }
        let key = self.crypto.create_key(role, gun.as_str(), self.algorithm).await?;
        let mut keys = self.keys.write().await;
        // another request may have raced us here; first one wins
        Ok(keys.entry(map_key).or_insert(key).clone())
    }

    /// Replace the key for `(gun, role)` with a freshly created one.
    pub async fn rotate(&self, gun: &Gun, role: &RoleName) -> Result<PublicKey, CryptoError> {
        let key = self.crypto.create_key(role, gun.as_str(), self.algorithm).await?;
        self.keys
            .write()
            .await
            .insert((gun.to_string(), role.to_string()), key.clone());
        Ok(key)
    }
}
