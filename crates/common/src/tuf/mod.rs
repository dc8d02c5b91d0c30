//! TUF metadata primitives.
//!
//! The model mirrors the wire format served to content-trust clients:
//! every role file is a `{"signed": ..., "signatures": [...]}` envelope
//! whose `signed` section is one of the four canonical metadata bodies
//! (or a delegated targets body). [`Repo`] holds a repository in memory
//! and signs role bodies through a [`crate::crypto::CryptoService`].

mod data;
mod meta;
mod repo;

pub use data::{
    to_canonical_json, KeyAlgorithm, PublicKey, RoleName, Signature, Signed, BASE_ROLE_NAMES,
};
pub use meta::{
    BaseRole, Delegations, DelegationRole, FileMeta, HashValue, RoleObject, RootMeta,
    SnapshotMeta, TargetsMeta, TimestampMeta,
};
pub use repo::{default_expiry, Repo};

use time::Duration;

/// Default lifetime of a freshly signed root body.
pub const ROOT_EXPIRY: Duration = Duration::days(365);
/// Default lifetime of a freshly signed targets body.
pub const TARGETS_EXPIRY: Duration = Duration::days(90);
/// Default lifetime of a freshly signed snapshot body.
pub const SNAPSHOT_EXPIRY: Duration = Duration::days(7);
/// Default lifetime of a freshly signed timestamp body.
pub const TIMESTAMP_EXPIRY: Duration = Duration::days(1);

#[derive(Debug, thiserror::Error)]
pub enum TufError {
    #[error("metadata is not valid JSON: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("role {0} is not defined in the root body")]
    UnknownRole(RoleName),

    #[error("key {0} referenced by a role is not present in the key map")]
    UnknownKey(String),

    #[error("repository has no {0} metadata loaded")]
    MissingMetadata(RoleName),

    #[error("signing failed: {0}")]
    Signing(#[from] crate::crypto::CryptoError),
}
