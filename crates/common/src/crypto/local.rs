use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use ed25519_dalek::Signer as _;
use p256::ecdsa::signature::Signer as _;
use p256::pkcs8::EncodePrivateKey as _;
use rand::rngs::OsRng;

use crate::tuf::{KeyAlgorithm, PublicKey, RoleName};

use super::{CryptoError, CryptoService};

enum PrivateKey {
    Ed25519(ed25519_dalek::SigningKey),
    Ecdsa(p256::ecdsa::SigningKey),
}

/// In-process signer holding keys in memory. Keys live exactly as long as
/// the process; a restart against persistent metadata storage therefore
/// requires a remote signer instead.
#[derive(Default)]
pub struct LocalCryptoService {
    keys: RwLock<HashMap<String, PrivateKey>>,
}

impl LocalCryptoService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CryptoService for LocalCryptoService {
    async fn create_key(
        &self,
        _role: &RoleName,
        _gun: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<PublicKey, CryptoError> {
        let (private, public) = match algorithm {
            KeyAlgorithm::Ed25519 => {
                let signing = ed25519_dalek::SigningKey::generate(&mut OsRng);
                let public = PublicKey::new(
                    KeyAlgorithm::Ed25519,
                    signing.verifying_key().to_bytes().to_vec(),
                );
                (PrivateKey::Ed25519(signing), public)
            }
            KeyAlgorithm::Ecdsa | KeyAlgorithm::EcdsaX509 => {
                let signing = p256::ecdsa::SigningKey::random(&mut OsRng);
                let point = signing.verifying_key().to_encoded_point(false);
                let public = PublicKey::new(KeyAlgorithm::Ecdsa, point.as_bytes().to_vec());
                (PrivateKey::Ecdsa(signing), public)
            }
            KeyAlgorithm::Rsa => {
                return Err(CryptoError::Unsupported(
                    "rsa keys are not supported by the in-process signer",
                ))
            }
        };
        let key_id = public.key_id();
        self.keys
            .write()
            .expect("crypto key map poisoned")
            .insert(key_id, private);
        Ok(public)
    }

    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let keys = self.keys.read().expect("crypto key map poisoned");
        match keys.get(key_id) {
            Some(PrivateKey::Ed25519(signing)) => Ok(signing.sign(message).to_bytes().to_vec()),
            Some(PrivateKey::Ecdsa(signing)) => {
                let signature: p256::ecdsa::Signature = signing.sign(message);
                Ok(signature.to_bytes().to_vec())
            }
            None => Err(CryptoError::KeyNotFound(key_id.to_string())),
        }
    }

    async fn add_key(
        &self,
        key_id: &str,
        algorithm: KeyAlgorithm,
        private_pkcs8: &[u8],
    ) -> Result<(), CryptoError> {
        use p256::pkcs8::DecodePrivateKey as _;

        let private = match algorithm {
            KeyAlgorithm::Ecdsa | KeyAlgorithm::EcdsaX509 => {
                let signing = p256::ecdsa::SigningKey::from_pkcs8_der(private_pkcs8)
                    .map_err(|err| CryptoError::Backend(err.to_string()))?;
                PrivateKey::Ecdsa(signing)
            }
            _ => {
                return Err(CryptoError::Unsupported(
                    "key import is only implemented for ecdsa keys",
                ))
            }
        };
        self.keys
            .write()
            .expect("crypto key map poisoned")
            .insert(key_id.to_string(), private);
        Ok(())
    }

    async fn public_key(&self, key_id: &str) -> Option<PublicKey> {
        let keys = self.keys.read().expect("crypto key map poisoned");
        match keys.get(key_id)? {
            PrivateKey::Ed25519(signing) => Some(PublicKey::new(
                KeyAlgorithm::Ed25519,
                signing.verifying_key().to_bytes().to_vec(),
            )),
            PrivateKey::Ecdsa(signing) => {
                let point = signing.verifying_key().to_encoded_point(false);
                Some(PublicKey::new(
                    KeyAlgorithm::Ecdsa,
                    point.as_bytes().to_vec(),
                ))
            }
        }
    }

    async fn export_private_pkcs8(&self, key_id: &str) -> Result<Vec<u8>, CryptoError> {
        let keys = self.keys.read().expect("crypto key map poisoned");
        match keys.get(key_id) {
            Some(PrivateKey::Ecdsa(signing)) => {
                let document = signing
                    .to_pkcs8_der()
                    .map_err(|err| CryptoError::Backend(err.to_string()))?;
                Ok(document.as_bytes().to_vec())
            }
            Some(PrivateKey::Ed25519(_)) => Err(CryptoError::Unsupported(
                "pkcs8 export is only implemented for ecdsa keys",
            )),
            None => Err(CryptoError::KeyNotFound(key_id.to_string())),
        }
    }

    async fn check_health(&self) -> Result<(), CryptoError> {
        Ok(())
    }
}
