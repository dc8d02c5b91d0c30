//! Shared fixtures for unit and integration tests: a generated
//! organizational root and a generated publisher repository, both backed
//! by in-process ed25519 keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use ed25519_dalek::{Verifier as _, VerifyingKey};

use common::crypto::{CryptoService, LocalCryptoService};
use common::tuf::{
    default_expiry, KeyAlgorithm, Repo, RoleName, RoleObject, RootMeta, Signed,
};

use crate::storage::{Gun, MetaStore, MetaUpdate, ROOT};

async fn generate_root_meta(crypto: &Arc<LocalCryptoService>, gun: &str) -> RootMeta {
    let mut keys = BTreeMap::new();
    let mut roles = BTreeMap::new();
    for role in RoleName::base_roles() {
        let key = crypto
            .create_key(&role, gun, KeyAlgorithm::Ed25519)
            .await
            .expect("local key generation cannot fail");
        let key_id = key.key_id();
        roles.insert(
            role,
            RoleObject {
                keyids: vec![key_id.clone()],
                threshold: 1,
            },
        );
        keys.insert(key_id, key);
    }
    RootMeta {
        typ: "Root".to_string(),
        consistent_snapshot: false,
        expires: default_expiry(&RoleName::root()),
        keys,
        roles,
        version: 1,
    }
}

async fn sign_full_repo(
    crypto: Arc<LocalCryptoService>,
    meta: &RootMeta,
    version: i64,
) -> BTreeMap<String, Vec<u8>> {
    let mut root_meta = meta.clone();
    root_meta.version = version;
    let mut repo = Repo::new(crypto, root_meta);
    let mut out = BTreeMap::new();
    out.insert(
        "root".to_string(),
        repo.sign_root().await.expect("signing with held keys"),
    );
    repo.init_targets(RoleName::targets(), version);
    out.insert(
        "targets".to_string(),
        repo.sign_targets(&RoleName::targets())
            .await
            .expect("signing with held keys"),
    );
    repo.init_snapshot(version);
    out.insert(
        "snapshot".to_string(),
        repo.sign_snapshot().await.expect("signing with held keys"),
    );
    repo.init_timestamp(version);
    out.insert(
        "timestamp".to_string(),
        repo.sign_timestamp().await.expect("signing with held keys"),
    );
    out
}

fn verify_against(meta: &RootMeta, role: &RoleName, data: &[u8]) {
    let envelope = Signed::from_slice(data).expect("envelope parses");
    assert!(
        !envelope.signatures.is_empty(),
        "no signatures on {role} metadata"
    );
    let role_object = meta.roles.get(role).expect("role defined in root");
    for signature in &envelope.signatures {
        assert!(
            role_object.keyids.contains(&signature.key_id),
            "{role} signed by foreign key {}",
            signature.key_id
        );
        let key = meta.keys.get(&signature.key_id).expect("key in key map");
        let verifying = VerifyingKey::from_bytes(
            key.public_bytes().try_into().expect("32-byte ed25519 key"),
        )
        .expect("valid ed25519 key");
        let sig =
            ed25519_dalek::Signature::from_slice(&signature.sig).expect("64-byte signature");
        verifying
            .verify(envelope.signed.get().as_bytes(), &sig)
            .unwrap_or_else(|_| panic!("{role} signature does not verify"));
    }
}

/// A generated organizational root repository held in memory.
pub struct TestRoot {
    crypto: Arc<LocalCryptoService>,
    meta: RootMeta,
    files: BTreeMap<String, Vec<u8>>,
    gun: Gun,
}

impl TestRoot {
    pub async fn generate() -> Self {
        Self::generate_with(Arc::new(LocalCryptoService::new()), 1).await
    }

    /// Generate a root whose keys land in an existing signer, e.g. to model
    /// an admin rotation of the organizational root.
    pub async fn generate_with(crypto: Arc<LocalCryptoService>, version: i64) -> Self {
        let meta = generate_root_meta(&crypto, "quay").await;
        let files = sign_full_repo(crypto.clone(), &meta, version).await;
        TestRoot {
            crypto,
            meta,
            files,
            gun: Gun::from("quay"),
        }
    }

    pub fn crypto(&self) -> Arc<dyn CryptoService> {
        self.crypto.clone()
    }

    pub fn shared_crypto(&self) -> Arc<LocalCryptoService> {
        self.crypto.clone()
    }

    pub fn gun(&self) -> &Gun {
        &self.gun
    }

    pub fn root_bytes(&self) -> &[u8] {
        &self.files["root"]
    }

    /// Write the signed v1 repository into the `Root` channel of a store.
    pub async fn persist(&self, store: &Arc<dyn MetaStore>) {
        let updates = self
            .files
            .iter()
            .map(|(role, data)| MetaUpdate {
                role: RoleName::from(role.as_str()),
                version: 1,
                data: data.clone(),
                channels: vec![ROOT],
            })
            .collect();
        store
            .update_many(&self.gun, updates)
            .await
            .expect("seeding the organizational root");
    }

    /// Assert that `data` is an envelope signed by this root's keys for
    /// the given role.
    pub fn verify_signed_by(&self, role: &RoleName, data: &[u8]) {
        verify_against(&self.meta, role, data);
    }
}

/// A publisher owning its own signer-rooted repository for one GUN.
pub struct TestPublisher {
    crypto: Arc<LocalCryptoService>,
    meta: RootMeta,
    gun: Gun,
}

impl TestPublisher {
    pub async fn generate(gun: &str) -> Self {
        let crypto = Arc::new(LocalCryptoService::new());
        let meta = generate_root_meta(&crypto, gun).await;
        TestPublisher {
            crypto,
            meta,
            gun: Gun::from(gun),
        }
    }

    pub fn gun(&self) -> &Gun {
        &self.gun
    }

    pub fn targets_key_ids(&self) -> Vec<String> {
        self.meta
            .roles
            .get(&RoleName::targets())
            .expect("targets role defined")
            .keyids
            .clone()
    }

    /// A full freshly-signed publish (root, targets, snapshot, timestamp)
    /// at the given version.
    pub async fn signed_files(&self, version: i64) -> BTreeMap<String, Vec<u8>> {
        sign_full_repo(self.crypto.clone(), &self.meta, version).await
    }

    pub async fn root_update(&self, version: i64) -> MetaUpdate {
        let files = self.signed_files(version).await;
        MetaUpdate::new(RoleName::root(), version, files["root"].clone())
    }

    pub async fn timestamp_update(&self, version: i64) -> MetaUpdate {
        let files = self.signed_files(version).await;
        MetaUpdate::new(RoleName::timestamp(), version, files["timestamp"].clone())
    }

    /// Assert that `data` is an envelope signed by this publisher's keys.
    pub fn verify_signed_by(&self, role: &RoleName, data: &[u8]) {
        verify_against(&self.meta, role, data);
    }
}

/// The standard four-role publish batch for a publisher.
pub async fn publish_updates(publisher: &TestPublisher, version: i64) -> Vec<MetaUpdate> {
    let files = publisher.signed_files(version).await;
    ["root", "targets", "snapshot", "timestamp"]
        .into_iter()
        .map(|role| MetaUpdate::new(RoleName::from(role), version, files[role].clone()))
        .collect()
}
