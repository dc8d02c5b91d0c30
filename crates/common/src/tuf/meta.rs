use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use time::OffsetDateTime;

use super::data::{base64_bytes, PublicKey, RoleName};
use super::TufError;

/// `roles` entry in a root body: which keys may sign a role, and how many
/// of them must.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleObject {
    pub keyids: Vec<String>,
    pub threshold: u32,
}

/// A role resolved against the root body's key map.
#[derive(Debug, Clone)]
pub struct BaseRole {
    pub name: RoleName,
    pub keys: Vec<PublicKey>,
    pub threshold: u32,
}

/// Signed body of `root.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootMeta {
    #[serde(rename = "_type")]
    pub typ: String,
    pub consistent_snapshot: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,
    pub keys: BTreeMap<String, PublicKey>,
    pub roles: BTreeMap<RoleName, RoleObject>,
    pub version: i64,
}

impl RootMeta {
    /// Resolve a canonical role's key IDs into full public keys.
    pub fn build_base_role(&self, role: &RoleName) -> Result<BaseRole, TufError> {
        let role_object = self
            .roles
            .get(role)
            .ok_or_else(|| TufError::UnknownRole(role.clone()))?;
        let mut keys = Vec::with_capacity(role_object.keyids.len());
        for key_id in &role_object.keyids {
            let key = self
                .keys
                .get(key_id)
                .ok_or_else(|| TufError::UnknownKey(key_id.clone()))?;
            keys.push(key.clone());
        }
        Ok(BaseRole {
            name: role.clone(),
            keys,
            threshold: role_object.threshold,
        })
    }
}

/// Signed body of a targets (or delegated targets) file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetsMeta {
    #[serde(rename = "_type")]
    pub typ: String,
    pub delegations: Delegations,
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,
    pub targets: BTreeMap<String, FileMeta>,
    pub version: i64,
}

impl TargetsMeta {
    pub fn empty(version: i64, expires: OffsetDateTime) -> Self {
        TargetsMeta {
            typ: "Targets".to_string(),
            delegations: Delegations::default(),
            expires,
            targets: BTreeMap::new(),
            version,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: BTreeMap<String, PublicKey>,
    pub roles: Vec<DelegationRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationRole {
    pub keyids: Vec<String>,
    pub name: RoleName,
    pub paths: Vec<String>,
    pub threshold: u32,
}

/// Signed body of `snapshot.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    #[serde(rename = "_type")]
    pub typ: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,
    pub meta: BTreeMap<String, FileMeta>,
    pub version: i64,
}

impl SnapshotMeta {
    pub fn empty(version: i64, expires: OffsetDateTime) -> Self {
        SnapshotMeta {
            typ: "Snapshot".to_string(),
            expires,
            meta: BTreeMap::new(),
            version,
        }
    }
}

/// Signed body of `timestamp.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampMeta {
    #[serde(rename = "_type")]
    pub typ: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,
    pub meta: BTreeMap<String, FileMeta>,
    pub version: i64,
}

impl TimestampMeta {
    pub fn empty(version: i64, expires: OffsetDateTime) -> Self {
        TimestampMeta {
            typ: "Timestamp".to_string(),
            expires,
            meta: BTreeMap::new(),
            version,
        }
    }
}

/// Length and digests of a referenced metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub hashes: BTreeMap<String, HashValue>,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashValue(#[serde(with = "base64_bytes")] pub Vec<u8>);

impl FileMeta {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hashes = BTreeMap::new();
        hashes.insert(
            "sha256".to_string(),
            HashValue(Sha256::digest(data).to_vec()),
        );
        hashes.insert(
            "sha512".to_string(),
            HashValue(Sha512::digest(data).to_vec()),
        );
        FileMeta {
            hashes,
            length: data.len() as u64,
        }
    }

    pub fn sha256_hex(&self) -> Option<String> {
        self.hashes.get("sha256").map(|h| hex::encode(&h.0))
    }
}
