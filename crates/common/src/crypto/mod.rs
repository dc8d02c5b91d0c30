//! Signing backends.
//!
//! Everything that produces a TUF signature goes through [`CryptoService`]:
//! the in-process [`LocalCryptoService`] for dev and tests, or the
//! [`RemoteCryptoService`] client talking to an external signer.

mod local;
mod remote;

pub use local::LocalCryptoService;
pub use remote::{RemoteCryptoService, RemoteSignerConfig};

use async_trait::async_trait;

use crate::tuf::{KeyAlgorithm, PublicKey, RoleName};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("no private key held for key id {0}")]
    KeyNotFound(String),

    #[error("operation not supported by this signer: {0}")]
    Unsupported(&'static str),

    #[error("signer backend error: {0}")]
    Backend(String),

    #[error("signer request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A service that creates and holds signing keys and signs payloads with
/// them. Private material never crosses this boundary except through
/// `export_private_pkcs8`, which only the in-process signer supports.
#[async_trait]
pub trait CryptoService: Send + Sync {
    /// Create a new key for a role under a GUN and return its public half.
    async fn create_key(
        &self,
        role: &RoleName,
        gun: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<PublicKey, CryptoError>;

    /// Sign a payload with a previously created key.
    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Register existing private key material under a caller-chosen key ID,
    /// e.g. a key whose public half is wrapped in an x509 certificate (the
    /// certificate changes the key ID but not the signer). Remote signers
    /// refuse.
    async fn add_key(
        &self,
        key_id: &str,
        algorithm: KeyAlgorithm,
        private_pkcs8: &[u8],
    ) -> Result<(), CryptoError>;

    /// Look up the public half of a held key.
    async fn public_key(&self, key_id: &str) -> Option<PublicKey>;

    /// Export a key as PKCS#8 DER, for x509 certificate generation at
    /// bootstrap. Remote signers refuse.
    async fn export_private_pkcs8(&self, key_id: &str) -> Result<Vec<u8>, CryptoError>;

    /// Liveness probe used by the periodic health check.
    async fn check_health(&self) -> Result<(), CryptoError>;
}
