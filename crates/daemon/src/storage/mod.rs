//! Metadata storage.
//!
//! One narrow [`MetaStore`] trait describes the backing store; every other
//! shape is a composed view over it: [`ChannelStore`] pins a channel,
//! [`ReadOnlyStore`] / [`WriteOnlyStore`] reject one direction, and
//! [`MultiplexingStore`] fans a publish out to the signer-rooted and
//! alternate-rooted channels in a single atomic batch.

mod channel;
mod memory;
mod multiplexing;
mod readonly;
mod sql;
mod swizzle;
mod writeonly;

pub use channel::ChannelStore;
pub use memory::MemoryStore;
pub use multiplexing::MultiplexingStore;
pub use readonly::ReadOnlyStore;
pub use sql::SqlStore;
pub use swizzle::SwizzleError;
pub use writeonly::WriteOnlyStore;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use common::tuf::RoleName;

/// A logical namespace partitioning the backing store. Integer IDs exist
/// only at the storage boundary; everything above passes these constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    pub id: i64,
    pub name: &'static str,
}

/// The store's default channel: metadata exactly as the publisher signed it.
pub const PUBLISHED: Channel = Channel {
    id: 1,
    name: "published",
};

/// Signer-rooted metadata is aliased to the published channel so the rest
/// of the serving pipeline (key rotation, changefeed) sees canonical rows.
pub const SIGNER_ROOT: Channel = PUBLISHED;

/// Metadata re-signed against the organizational root.
pub const ALTERNATE_ROOT: Channel = Channel {
    id: 3,
    name: "alternate-rooted",
};

/// The single-GUN channel holding the organizational root repository.
pub const ROOT: Channel = Channel { id: 4, name: "root" };

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A globally unique name identifying a trust repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gun(String);

impl Gun {
    pub fn new(name: impl Into<String>) -> Self {
        Gun(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this GUN falls under one of the configured prefixes.
    /// An empty prefix list admits everything.
    pub fn matches_prefixes(&self, prefixes: &[String]) -> bool {
        prefixes.is_empty() || prefixes.iter().any(|prefix| self.0.starts_with(prefix.as_str()))
    }
}

impl fmt::Display for Gun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Gun {
    fn from(value: &str) -> Self {
        Gun(value.to_string())
    }
}

/// A GUN prefix is acceptable when it ends in `/`, does not start with `/`,
/// and cannot escape upward.
pub fn valid_gun_prefix(prefix: &str) -> bool {
    prefix.ends_with('/') && !prefix.starts_with('/') && !prefix.starts_with("..")
}

/// One role file in a publish batch, tagged with the channels it lands in.
#[derive(Debug, Clone)]
pub struct MetaUpdate {
    pub role: RoleName,
    pub version: i64,
    pub data: Vec<u8>,
    pub channels: Vec<Channel>,
}

impl MetaUpdate {
    pub fn new(role: RoleName, version: i64, data: Vec<u8>) -> Self {
        MetaUpdate {
            role,
            version,
            data,
            channels: Vec::new(),
        }
    }

    /// Write channels for the update; an empty list means [`PUBLISHED`].
    pub fn write_channels(&self) -> Vec<Channel> {
        if self.channels.is_empty() {
            vec![PUBLISHED]
        } else {
            self.channels.clone()
        }
    }
}

/// Retags a batch of updates into a single channel.
pub fn set_channels(updates: Vec<MetaUpdate>, channel: Channel) -> Vec<MetaUpdate> {
    updates
        .into_iter()
        .map(|mut update| {
            update.channels = vec![channel];
            update
        })
        .collect()
}

/// A changefeed record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "GUN")]
    pub gun: String,
    #[serde(rename = "Role")]
    pub role: String,
    #[serde(rename = "Channel")]
    pub channel_id: i64,
    #[serde(rename = "Version")]
    pub version: i64,
    #[serde(rename = "CreatedAt", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no metadata found for {gun} {role}")]
    NotFound { gun: String, role: String },

    #[error("a newer or equal version of {role} already exists for {gun}")]
    OldVersion { gun: String, role: String },

    #[error("metadata store is read only")]
    ReadOnly,

    #[error("metadata store is write only")]
    WriteOnly,

    #[error(transparent)]
    Swizzle(#[from] SwizzleError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// The backing store contract: `(gun, role, channel, version) → bytes`
/// with monotonic versions and atomic batches.
///
/// Read operations take an optional channel; `None` selects the store's
/// default ([`PUBLISHED`]) unless a wrapping view pins another one.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Highest-version row for `(gun, role, channel)`.
    async fn get_current(
        &self,
        gun: &Gun,
        role: &RoleName,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError>;

    /// Row whose content hashes (SHA-256, hex) to `checksum`.
    async fn get_checksum(
        &self,
        gun: &Gun,
        role: &RoleName,
        checksum: &str,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError>;

    /// Exact-version row.
    async fn get_version(
        &self,
        gun: &Gun,
        role: &RoleName,
        version: i64,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError>;

    async fn update_current(&self, gun: &Gun, update: MetaUpdate) -> Result<(), StorageError>;

    /// Apply a batch atomically: any version conflict rejects the whole
    /// batch with no rows written.
    async fn update_many(&self, gun: &Gun, updates: Vec<MetaUpdate>) -> Result<(), StorageError>;

    /// Remove rows for a GUN; `None` removes every channel.
    async fn delete(&self, gun: &Gun, channel: Option<Channel>) -> Result<(), StorageError>;

    /// Changefeed page: records with id greater than `change_id`,
    /// optionally filtered to one GUN.
    async fn get_changes(
        &self,
        change_id: &str,
        records: usize,
        filter_gun: &str,
    ) -> Result<Vec<Change>, StorageError>;

    async fn check_health(&self) -> Result<(), StorageError>;
}
