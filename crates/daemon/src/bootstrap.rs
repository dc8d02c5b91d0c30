//! First-start generation of the organizational root repository.
//!
//! The root is written through a write-only view into the `Root` channel
//! before the multiplexing store enters the request pipeline, which breaks
//! the cycle between "bootstrap needs a store" and "swizzle needs a root".

use std::collections::BTreeMap;
use std::sync::Arc;

use common::crypto::{CryptoError, CryptoService};
use common::tuf::{
    default_expiry, KeyAlgorithm, PublicKey, Repo, RoleName, RoleObject, RootMeta, TufError,
};

use crate::service_config::RootStorageSection;
use crate::storage::{
    set_channels, ChannelStore, Gun, MetaStore, MetaUpdate, StorageError, WriteOnlyStore, ROOT,
};

/// Validity of the self-signed root certificate: ten years.
const ROOT_CERT_VALIDITY_DAYS: i64 = 3650;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("no organizational root present for {0} and root generation is disabled")]
    NoRoot(String),

    #[error("organizational root exists but its {role} signing keys are not available")]
    MissingSigningKeys { role: String },

    #[error("unable to generate root certificate: {0}")]
    Certificate(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Tuf(#[from] TufError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("stored organizational root is not valid JSON: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Make sure a signed organizational root repository exists in the `Root`
/// channel for the configured root GUN, generating one if permitted.
pub async fn ensure_organizational_root(
    crypto: &Arc<dyn CryptoService>,
    root_backing: &Arc<dyn MetaStore>,
    config: &RootStorageSection,
) -> Result<(), BootstrapError> {
    let root_gun = Gun::new(config.root_gun.clone());
    let read_view = ChannelStore::new(root_backing.clone(), ROOT);

    match read_view.get_current(&root_gun, &RoleName::root(), None).await {
        Ok((_, existing)) => {
            verify_signing_keys(crypto, &existing).await?;
            tracing::info!(root_gun = %root_gun, "organizational root already present");
            Ok(())
        }
        Err(StorageError::NotFound { .. }) if config.generate_root() => {
            tracing::info!(root_gun = %root_gun, "generating organizational root");
            generate_organizational_root(crypto, root_backing, &root_gun).await
        }
        Err(StorageError::NotFound { .. }) => Err(BootstrapError::NoRoot(root_gun.to_string())),
        Err(err) => Err(err.into()),
    }
}

/// A root that exists on disk is only usable if the process can still sign
/// with its non-root role keys; otherwise every publish would fail later.
async fn verify_signing_keys(
    crypto: &Arc<dyn CryptoService>,
    root_bytes: &[u8],
) -> Result<(), BootstrapError> {
    let envelope = common::tuf::Signed::from_slice(root_bytes)?;
    let meta: RootMeta = serde_json::from_str(envelope.signed.get())?;
    for role in [RoleName::targets(), RoleName::snapshot(), RoleName::timestamp()] {
        let Some(role_object) = meta.roles.get(&role) else {
            return Err(BootstrapError::MissingSigningKeys {
                role: role.to_string(),
            });
        };
        let mut held = false;
        for key_id in &role_object.keyids {
            if crypto.public_key(key_id).await.is_some() {
                held = true;
                break;
            }
        }
        if !held {
            return Err(BootstrapError::MissingSigningKeys {
                role: role.to_string(),
            });
        }
    }
    Ok(())
}

async fn generate_organizational_root(
    crypto: &Arc<dyn CryptoService>,
    root_backing: &Arc<dyn MetaStore>,
    root_gun: &Gun,
) -> Result<(), BootstrapError> {
    let mut keys = BTreeMap::new();
    let mut roles = BTreeMap::new();

    for role in RoleName::base_roles() {
        let key = crypto
            .create_key(&role, root_gun.as_str(), KeyAlgorithm::Ecdsa)
            .await?;
        let key = if role == RoleName::root() {
            certify_root_key(crypto, root_gun, key).await?
        } else {
            key
        };
        roles.insert(
            role,
            RoleObject {
                keyids: vec![key.key_id()],
                threshold: 1,
            },
        );
        keys.insert(key.key_id(), key);
    }

    let meta = RootMeta {
        typ: "Root".to_string(),
        consistent_snapshot: false,
        expires: default_expiry(&RoleName::root()),
        keys,
        roles,
        version: 1,
    };

    let mut repo = Repo::new(crypto.clone(), meta);
    let root_bytes = repo.sign_root().await?;
    repo.init_targets(RoleName::targets(), 1);
    let targets_bytes = repo.sign_targets(&RoleName::targets()).await?;
    repo.init_snapshot(1);
    let snapshot_bytes = repo.sign_snapshot().await?;
    repo.init_timestamp(1);
    let timestamp_bytes = repo.sign_timestamp().await?;

    let updates = set_channels(
        vec![
            MetaUpdate::new(RoleName::root(), 1, root_bytes),
            MetaUpdate::new(RoleName::targets(), 1, targets_bytes),
            MetaUpdate::new(RoleName::snapshot(), 1, snapshot_bytes),
            MetaUpdate::new(RoleName::timestamp(), 1, timestamp_bytes),
        ],
        ROOT,
    );

    let admin_view = WriteOnlyStore::new(root_backing.clone());
    admin_view.update_many(root_gun, updates).await?;
    tracing::info!(root_gun = %root_gun, "organizational root generated and persisted");
    Ok(())
}

/// Wrap the root key's public half in a self-signed x509 certificate with a
/// ten-year validity. The certificate changes the key ID, so the private
/// key is re-registered with the crypto service under the new ID. Signers
/// that refuse to export key material serve the plain key instead.
async fn certify_root_key(
    crypto: &Arc<dyn CryptoService>,
    root_gun: &Gun,
    key: PublicKey,
) -> Result<PublicKey, BootstrapError> {
    let pkcs8 = match crypto.export_private_pkcs8(&key.key_id()).await {
        Ok(pkcs8) => pkcs8,
        Err(CryptoError::Unsupported(reason)) => {
            tracing::warn!(reason, "root key certificate skipped");
            return Ok(key);
        }
        Err(err) => return Err(err.into()),
    };

    let keypair = rcgen::KeyPair::try_from(pkcs8.as_slice())
        .map_err(|err| BootstrapError::Certificate(err.to_string()))?;
    let mut params = rcgen::CertificateParams::new(vec![root_gun.to_string()])
        .map_err(|err| BootstrapError::Certificate(err.to_string()))?;
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(ROOT_CERT_VALIDITY_DAYS);
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, root_gun.to_string());
    let certificate = params
        .self_signed(&keypair)
        .map_err(|err| BootstrapError::Certificate(err.to_string()))?;

    let certified = PublicKey::new(
        KeyAlgorithm::EcdsaX509,
        certificate.pem().into_bytes(),
    );
    crypto
        .add_key(&certified.key_id(), KeyAlgorithm::Ecdsa, &pkcs8)
        .await?;
    Ok(certified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use common::crypto::LocalCryptoService;
    use common::tuf::Signed;

    fn generate_config() -> RootStorageSection {
        RootStorageSection {
            backend: crate::service_config::StorageBackend::Memory,
            db_url: None,
            root: Some("generate".to_string()),
            root_gun: "quay".to_string(),
        }
    }

    #[tokio::test]
    async fn generates_signed_root_repository() {
        let crypto: Arc<dyn CryptoService> = Arc::new(LocalCryptoService::new());
        let backing: Arc<dyn MetaStore> = Arc::new(MemoryStore::new());

        ensure_organizational_root(&crypto, &backing, &generate_config())
            .await
            .unwrap();

        let view = ChannelStore::new(backing.clone(), ROOT);
        let gun = Gun::from("quay");
        let (_, root_bytes) = view.get_current(&gun, &RoleName::root(), None).await.unwrap();
        let envelope = Signed::from_slice(&root_bytes).unwrap();
        let meta: RootMeta = serde_json::from_str(envelope.signed.get()).unwrap();
        assert_eq!(meta.version, 1);
        assert_eq!(meta.roles.len(), 4);

        // the root key is an x509 certificate over the generated key
        let root_key_id = &meta.roles[&RoleName::root()].keyids[0];
        let root_key = &meta.keys[root_key_id];
        assert_eq!(root_key.algorithm, KeyAlgorithm::EcdsaX509);
        let pem = String::from_utf8(root_key.public_bytes().to_vec()).unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE"));

        // all four roles are present and signed
        for role in RoleName::base_roles() {
            let (_, bytes) = view.get_current(&gun, &role, None).await.unwrap();
            let envelope = Signed::from_slice(&bytes).unwrap();
            assert!(!envelope.signatures.is_empty());
        }
    }

    #[tokio::test]
    async fn second_start_reuses_existing_root() {
        let crypto: Arc<dyn CryptoService> = Arc::new(LocalCryptoService::new());
        let backing: Arc<dyn MetaStore> = Arc::new(MemoryStore::new());
        let config = generate_config();

        ensure_organizational_root(&crypto, &backing, &config)
            .await
            .unwrap();
        let view = ChannelStore::new(backing.clone(), ROOT);
        let gun = Gun::from("quay");
        let (_, first) = view.get_current(&gun, &RoleName::root(), None).await.unwrap();

        ensure_organizational_root(&crypto, &backing, &config)
            .await
            .unwrap();
        let (_, second) = view.get_current(&gun, &RoleName::root(), None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_root_without_generate_fails() {
        let crypto: Arc<dyn CryptoService> = Arc::new(LocalCryptoService::new());
        let backing: Arc<dyn MetaStore> = Arc::new(MemoryStore::new());
        let mut config = generate_config();
        config.root = None;

        let err = ensure_organizational_root(&crypto, &backing, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::NoRoot(_)));
    }

    #[tokio::test]
    async fn existing_root_with_lost_keys_fails() {
        let crypto: Arc<dyn CryptoService> = Arc::new(LocalCryptoService::new());
        let backing: Arc<dyn MetaStore> = Arc::new(MemoryStore::new());
        let config = generate_config();
        ensure_organizational_root(&crypto, &backing, &config)
            .await
            .unwrap();

        // a fresh in-process signer no longer holds the generated keys
        let fresh: Arc<dyn CryptoService> = Arc::new(LocalCryptoService::new());
        let err = ensure_organizational_root(&fresh, &backing, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::MissingSigningKeys { .. }));
    }
}
