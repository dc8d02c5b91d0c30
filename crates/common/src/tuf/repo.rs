use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::value::RawValue;
use time::OffsetDateTime;

use crate::crypto::CryptoService;

use super::data::{to_canonical_json, PublicKey, RoleName, Signature, Signed};
use super::meta::{DelegationRole, FileMeta, RootMeta, SnapshotMeta, TargetsMeta, TimestampMeta};
use super::{TufError, ROOT_EXPIRY, SNAPSHOT_EXPIRY, TARGETS_EXPIRY, TIMESTAMP_EXPIRY};

/// Default expiry for a role signed now.
pub fn default_expiry(role: &RoleName) -> OffsetDateTime {
    let lifetime = match role.as_str() {
        "root" => ROOT_EXPIRY,
        "targets" => TARGETS_EXPIRY,
        "snapshot" => SNAPSHOT_EXPIRY,
        _ => TIMESTAMP_EXPIRY,
    };
    OffsetDateTime::now_utc() + lifetime
}

/// A targets file held by the repository: either one we are building and
/// will sign ourselves, or a foreign signed envelope carried verbatim.
#[derive(Debug, Clone)]
enum TargetsFile {
    Built(TargetsMeta),
    Stashed { raw: Vec<u8>, version: i64 },
}

/// An in-memory TUF repository bound to a crypto service.
///
/// The root body defines which keys sign which roles; `sign_*` methods
/// marshal a role body to canonical JSON, collect signatures from the
/// crypto service, and cache the resulting envelope bytes so snapshot and
/// timestamp bodies can reference them.
pub struct Repo {
    crypto: Arc<dyn CryptoService>,
    root: RootMeta,
    root_raw: Vec<u8>,
    targets: BTreeMap<RoleName, TargetsFile>,
    snapshot: Option<SnapshotMeta>,
    timestamp: Option<TimestampMeta>,
    marshalled: BTreeMap<RoleName, Vec<u8>>,
}

impl Repo {
    /// Start a repository from an unsigned root body. `sign_root` must be
    /// called before the root bytes are read.
    pub fn new(crypto: Arc<dyn CryptoService>, root: RootMeta) -> Self {
        Repo {
            crypto,
            root,
            root_raw: Vec::new(),
            targets: BTreeMap::new(),
            snapshot: None,
            timestamp: None,
            marshalled: BTreeMap::new(),
        }
    }

    /// Load a repository skeleton from an existing signed root envelope.
    /// The envelope bytes are carried verbatim; only the body is parsed.
    pub fn from_signed_root(crypto: Arc<dyn CryptoService>, raw: &[u8]) -> Result<Self, TufError> {
        let envelope = Signed::from_slice(raw)?;
        let root: RootMeta = serde_json::from_str(envelope.signed.get())?;
        Ok(Repo {
            crypto,
            root,
            root_raw: raw.to_vec(),
            targets: BTreeMap::new(),
            snapshot: None,
            timestamp: None,
            marshalled: BTreeMap::new(),
        })
    }

    pub fn root(&self) -> &RootMeta {
        &self.root
    }

    /// Signed root envelope bytes, as loaded or as last signed.
    pub fn root_bytes(&self) -> &[u8] {
        &self.root_raw
    }

    pub fn init_targets(&mut self, role: RoleName, version: i64) {
        let expires = default_expiry(&RoleName::targets());
        self.targets
            .insert(role, TargetsFile::Built(TargetsMeta::empty(version, expires)));
    }

    pub fn init_snapshot(&mut self, version: i64) {
        let expires = default_expiry(&RoleName::snapshot());
        self.snapshot = Some(SnapshotMeta::empty(version, expires));
    }

    pub fn init_timestamp(&mut self, version: i64) {
        let expires = default_expiry(&RoleName::timestamp());
        self.timestamp = Some(TimestampMeta::empty(version, expires));
    }

    /// Add (or replace) a delegation under the base targets role.
    pub fn add_delegation(
        &mut self,
        parent: &RoleName,
        name: RoleName,
        keys: Vec<PublicKey>,
        paths: Vec<String>,
        threshold: u32,
    ) -> Result<(), TufError> {
        let entry = match self.targets.get_mut(parent) {
            Some(TargetsFile::Built(meta)) => meta,
            _ => return Err(TufError::MissingMetadata(parent.clone())),
        };
        let mut keyids = Vec::with_capacity(keys.len());
        for key in keys {
            let key_id = key.key_id();
            entry.delegations.keys.insert(key_id.clone(), key);
            keyids.push(key_id);
        }
        entry.delegations.roles.retain(|r| r.name != name);
        entry.delegations.roles.push(DelegationRole {
            keyids,
            name,
            paths,
            threshold,
        });
        Ok(())
    }

    /// Install a foreign signed targets envelope under a delegation role,
    /// carrying its bytes verbatim. Returns the version recorded in the
    /// envelope's signed body.
    pub fn set_stashed_targets(&mut self, role: RoleName, raw: Vec<u8>) -> Result<i64, TufError> {
        let envelope = Signed::from_slice(&raw)?;
        let version = envelope.version()?;
        self.targets.insert(role, TargetsFile::Stashed { raw, version });
        Ok(version)
    }

    pub fn targets_version(&self, role: &RoleName) -> Option<i64> {
        match self.targets.get(role)? {
            TargetsFile::Built(meta) => Some(meta.version),
            TargetsFile::Stashed { version, .. } => Some(*version),
        }
    }

    /// Sign the root body with the root role's keys and cache the envelope.
    pub async fn sign_root(&mut self) -> Result<Vec<u8>, TufError> {
        self.root.expires = default_expiry(&RoleName::root());
        let body = to_canonical_json(&self.root)?;
        let signatures = self.sign_body(&RoleName::root(), &body).await?;
        let raw = envelope(body, signatures)?;
        self.root_raw = raw.clone();
        self.marshalled.insert(RoleName::root(), raw.clone());
        Ok(raw)
    }

    /// Marshal and sign a targets role. Built bodies are signed with the
    /// base targets keys; stashed bodies are returned byte-for-byte.
    pub async fn sign_targets(&mut self, role: &RoleName) -> Result<Vec<u8>, TufError> {
        let raw = match self
            .targets
            .get(role)
            .ok_or_else(|| TufError::MissingMetadata(role.clone()))?
        {
            TargetsFile::Built(meta) => {
                let body = to_canonical_json(meta)?;
                let signatures = self.sign_body(&RoleName::targets(), &body).await?;
                envelope(body, signatures)?
            }
            TargetsFile::Stashed { raw, .. } => raw.clone(),
        };
        self.marshalled.insert(role.clone(), raw.clone());
        Ok(raw)
    }

    /// Fill the snapshot body from every marshalled role and sign it.
    pub async fn sign_snapshot(&mut self) -> Result<Vec<u8>, TufError> {
        let snapshot_role = RoleName::snapshot();
        {
            let snapshot = self
                .snapshot
                .as_mut()
                .ok_or_else(|| TufError::MissingMetadata(snapshot_role.clone()))?;
            snapshot.meta.clear();
            if !self.root_raw.is_empty() {
                snapshot
                    .meta
                    .insert("root".to_string(), FileMeta::from_bytes(&self.root_raw));
            }
            for (role, raw) in &self.marshalled {
                if *role == RoleName::root() {
                    continue;
                }
                snapshot
                    .meta
                    .insert(role.as_str().to_string(), FileMeta::from_bytes(raw));
            }
        }
        let body = to_canonical_json(self.snapshot.as_ref().expect("set above"))?;
        let signatures = self.sign_body(&snapshot_role, &body).await?;
        let raw = envelope(body, signatures)?;
        self.marshalled.insert(snapshot_role, raw.clone());
        Ok(raw)
    }

    /// Fill the timestamp body from the marshalled snapshot and sign it.
    pub async fn sign_timestamp(&mut self) -> Result<Vec<u8>, TufError> {
        let timestamp_role = RoleName::timestamp();
        let snapshot_raw = self
            .marshalled
            .get(&RoleName::snapshot())
            .cloned()
            .ok_or_else(|| TufError::MissingMetadata(RoleName::snapshot()))?;
        {
            let timestamp = self
                .timestamp
                .as_mut()
                .ok_or_else(|| TufError::MissingMetadata(timestamp_role.clone()))?;
            timestamp.meta.clear();
            timestamp
                .meta
                .insert("snapshot".to_string(), FileMeta::from_bytes(&snapshot_raw));
        }
        let body = to_canonical_json(self.timestamp.as_ref().expect("set above"))?;
        let signatures = self.sign_body(&timestamp_role, &body).await?;
        let raw = envelope(body, signatures)?;
        self.marshalled.insert(timestamp_role, raw.clone());
        Ok(raw)
    }

    async fn sign_body(&self, role: &RoleName, body: &[u8]) -> Result<Vec<Signature>, TufError> {
        let role_object = self
            .root
            .roles
            .get(role)
            .ok_or_else(|| TufError::UnknownRole(role.clone()))?;
        let mut signatures = Vec::with_capacity(role_object.keyids.len());
        for key_id in &role_object.keyids {
            let key = self
                .root
                .keys
                .get(key_id)
                .ok_or_else(|| TufError::UnknownKey(key_id.clone()))?;
            let sig = self.crypto.sign(key_id, body).await?;
            signatures.push(Signature {
                key_id: key_id.clone(),
                method: key.algorithm.signature_method().to_string(),
                sig,
            });
        }
        Ok(signatures)
    }
}

fn envelope(body: Vec<u8>, signatures: Vec<Signature>) -> Result<Vec<u8>, TufError> {
    let body = String::from_utf8(body).map_err(|err| {
        TufError::Encoding(serde_json::Error::io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err,
        )))
    })?;
    let signed = Signed {
        signed: RawValue::from_string(body)?,
        signatures,
    };
    Ok(signed.to_bytes()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::LocalCryptoService;
    use crate::tuf::meta::RoleObject;
    use crate::tuf::KeyAlgorithm;
    use ed25519_dalek::{Verifier, VerifyingKey};

    async fn org_repo(crypto: Arc<LocalCryptoService>) -> Repo {
        let mut keys = BTreeMap::new();
        let mut roles = BTreeMap::new();
        for role in RoleName::base_roles() {
            let key = crypto
                .create_key(&role, "example/org", KeyAlgorithm::Ed25519)
                .await
                .unwrap();
            roles.insert(
                role,
                RoleObject {
                    keyids: vec![key.key_id()],
                    threshold: 1,
                },
            );
            keys.insert(key.key_id(), key);
        }
        let root = RootMeta {
            typ: "Root".to_string(),
            consistent_snapshot: false,
            expires: default_expiry(&RoleName::root()),
            keys,
            roles,
            version: 1,
        };
        Repo::new(crypto, root)
    }

    fn verify_envelope(repo: &Repo, role: &RoleName, raw: &[u8]) {
        let parsed = Signed::from_slice(raw).unwrap();
        assert!(!parsed.signatures.is_empty());
        for signature in &parsed.signatures {
            let key = repo.root().keys.get(&signature.key_id).unwrap();
            let verifying =
                VerifyingKey::from_bytes(key.public_bytes().try_into().unwrap()).unwrap();
            let sig = ed25519_dalek::Signature::from_slice(&signature.sig).unwrap();
            verifying
                .verify(parsed.signed.get().as_bytes(), &sig)
                .unwrap_or_else(|_| panic!("signature for {role} does not verify"));
        }
    }

    #[tokio::test]
    async fn signs_full_repository() {
        let crypto = Arc::new(LocalCryptoService::new());
        let mut repo = org_repo(crypto).await;

        let root_raw = repo.sign_root().await.unwrap();
        verify_envelope(&repo, &RoleName::root(), &root_raw);

        repo.init_targets(RoleName::targets(), 1);
        repo.init_snapshot(1);
        repo.init_timestamp(1);

        let targets_raw = repo.sign_targets(&RoleName::targets()).await.unwrap();
        verify_envelope(&repo, &RoleName::targets(), &targets_raw);

        let snapshot_raw = repo.sign_snapshot().await.unwrap();
        verify_envelope(&repo, &RoleName::snapshot(), &snapshot_raw);
        let snapshot: Signed = Signed::from_slice(&snapshot_raw).unwrap();
        let body: SnapshotMeta = serde_json::from_str(snapshot.signed.get()).unwrap();
        assert!(body.meta.contains_key("root"));
        assert!(body.meta.contains_key("targets"));

        let timestamp_raw = repo.sign_timestamp().await.unwrap();
        verify_envelope(&repo, &RoleName::timestamp(), &timestamp_raw);
        let timestamp: Signed = Signed::from_slice(&timestamp_raw).unwrap();
        let body: TimestampMeta = serde_json::from_str(timestamp.signed.get()).unwrap();
        assert_eq!(
            body.meta["snapshot"],
            FileMeta::from_bytes(&snapshot_raw)
        );
    }

    #[tokio::test]
    async fn stashed_targets_round_trip_verbatim() {
        let crypto = Arc::new(LocalCryptoService::new());
        let mut repo = org_repo(crypto).await;
        repo.sign_root().await.unwrap();
        repo.init_targets(RoleName::targets(), 1);

        let foreign = br#"{"signed":{"_type":"Targets","version":9},"signatures":[]}"#.to_vec();
        let stash = RoleName::from("targets/releases");
        let version = repo.set_stashed_targets(stash.clone(), foreign.clone()).unwrap();
        assert_eq!(version, 9);
        assert_eq!(repo.targets_version(&stash), Some(9));

        let emitted = repo.sign_targets(&stash).await.unwrap();
        assert_eq!(emitted, foreign);
    }

    #[tokio::test]
    async fn delegation_lands_in_signed_targets() {
        let crypto = Arc::new(LocalCryptoService::new());
        let mut repo = org_repo(crypto.clone()).await;
        repo.sign_root().await.unwrap();
        repo.init_targets(RoleName::targets(), 3);

        let delegate_key = crypto
            .create_key(&RoleName::targets(), "example/app", KeyAlgorithm::Ed25519)
            .await
            .unwrap();
        let stash = RoleName::from("targets/releases");
        repo.add_delegation(
            &RoleName::targets(),
            stash.clone(),
            vec![delegate_key.clone()],
            vec![String::new()],
            1,
        )
        .unwrap();

        let raw = repo.sign_targets(&RoleName::targets()).await.unwrap();
        let parsed = Signed::from_slice(&raw).unwrap();
        let body: TargetsMeta = serde_json::from_str(parsed.signed.get()).unwrap();
        assert_eq!(body.version, 3);
        assert_eq!(body.delegations.roles.len(), 1);
        let role = &body.delegations.roles[0];
        assert_eq!(role.name, stash);
        assert_eq!(role.paths, vec![String::new()]);
        assert_eq!(role.keyids, vec![delegate_key.key_id()]);
        assert!(body.delegations.keys.contains_key(&delegate_key.key_id()));
    }
}
