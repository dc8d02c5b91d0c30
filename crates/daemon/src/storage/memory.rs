use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use common::tuf::RoleName;

use super::{Change, Channel, Gun, MetaStore, MetaUpdate, StorageError, PUBLISHED};

#[derive(Debug, Clone)]
struct VersionEntry {
    version: i64,
    data: Vec<u8>,
    created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    gun: String,
    role: String,
    channel_id: i64,
}

#[derive(Default)]
struct Inner {
    // entries are kept sorted by version, last is current
    rows: HashMap<EntryKey, Vec<VersionEntry>>,
    checksums: HashMap<(EntryKey, String), VersionEntry>,
    changes: Vec<Change>,
    next_change_id: i64,
}

/// In-memory backing store, used for dev setups and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: RwLock::new(Inner {
                next_change_id: 1,
                ..Inner::default()
            }),
        }
    }
}

fn entry_key(gun: &Gun, role: &RoleName, channel: Channel) -> EntryKey {
    EntryKey {
        gun: gun.as_str().to_string(),
        role: role.as_str().to_string(),
        channel_id: channel.id,
    }
}

fn not_found(gun: &Gun, role: &RoleName) -> StorageError {
    StorageError::NotFound {
        gun: gun.to_string(),
        role: role.to_string(),
    }
}

#[async_trait]
impl MetaStore for MemoryStore {
    async fn get_current(
        &self,
        gun: &Gun,
        role: &RoleName,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        let inner = self.inner.read().expect("memory store poisoned");
        let key = entry_key(gun, role, channel.unwrap_or(PUBLISHED));
        let entry = inner
            .rows
            .get(&key)
            .and_then(|versions| versions.last())
            .ok_or_else(|| not_found(gun, role))?;
        Ok((entry.created_at, entry.data.clone()))
    }

    async fn get_checksum(
        &self,
        gun: &Gun,
        role: &RoleName,
        checksum: &str,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        let inner = self.inner.read().expect("memory store poisoned");
        let key = entry_key(gun, role, channel.unwrap_or(PUBLISHED));
        let entry = inner
            .checksums
            .get(&(key, checksum.to_lowercase()))
            .ok_or_else(|| not_found(gun, role))?;
        Ok((entry.created_at, entry.data.clone()))
    }

    async fn get_version(
        &self,
        gun: &Gun,
        role: &RoleName,
        version: i64,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        let inner = self.inner.read().expect("memory store poisoned");
        let key = entry_key(gun, role, channel.unwrap_or(PUBLISHED));
        let entry = inner
            .rows
            .get(&key)
            .and_then(|versions| versions.iter().find(|entry| entry.version == version))
            .ok_or_else(|| not_found(gun, role))?;
        Ok((entry.created_at, entry.data.clone()))
    }

    async fn update_current(&self, gun: &Gun, update: MetaUpdate) -> Result<(), StorageError> {
        self.update_many(gun, vec![update]).await
    }

    async fn update_many(&self, gun: &Gun, updates: Vec<MetaUpdate>) -> Result<(), StorageError> {
        let mut guard = self.inner.write().expect("memory store poisoned");
        let inner = &mut *guard;

        // validate the whole batch before touching anything
        let mut batch_versions: HashMap<(String, i64), i64> = HashMap::new();
        for update in &updates {
            for channel in update.write_channels() {
                let old_version = StorageError::OldVersion {
                    gun: gun.to_string(),
                    role: update.role.to_string(),
                };
                let batch_key = (update.role.to_string(), channel.id);
                if batch_versions.insert(batch_key, update.version).is_some() {
                    return Err(old_version);
                }
                let key = entry_key(gun, &update.role, channel);
                if let Some(current) = inner.rows.get(&key).and_then(|versions| versions.last()) {
                    if current.version >= update.version {
                        return Err(old_version);
                    }
                }
            }
        }

        let now = OffsetDateTime::now_utc();
        for update in updates {
            let checksum = hex::encode(Sha256::digest(&update.data));
            for channel in update.write_channels() {
                let key = entry_key(gun, &update.role, channel);
                let entry = VersionEntry {
                    version: update.version,
                    data: update.data.clone(),
                    created_at: now,
                };
                inner
                    .checksums
                    .insert((key.clone(), checksum.clone()), entry.clone());
                let versions = inner.rows.entry(key).or_default();
                versions.push(entry);
                versions.sort_by_key(|entry| entry.version);

                let id = inner.next_change_id;
                inner.next_change_id += 1;
                inner.changes.push(Change {
                    id,
                    gun: gun.to_string(),
                    role: update.role.to_string(),
                    channel_id: channel.id,
                    version: update.version,
                    created_at: now,
                });
            }
        }
        Ok(())
    }

    async fn delete(&self, gun: &Gun, channel: Option<Channel>) -> Result<(), StorageError> {
        let mut inner = self.inner.write().expect("memory store poisoned");
        let gun_str = gun.as_str();
        let keep = |key: &EntryKey| {
            key.gun != gun_str || channel.map(|c| key.channel_id != c.id).unwrap_or(false)
        };
        inner.rows.retain(|key, _| keep(key));
        inner.checksums.retain(|(key, _), _| keep(key));
        Ok(())
    }

    async fn get_changes(
        &self,
        change_id: &str,
        records: usize,
        filter_gun: &str,
    ) -> Result<Vec<Change>, StorageError> {
        let inner = self.inner.read().expect("memory store poisoned");
        let after: i64 = change_id.parse().unwrap_or(0);
        Ok(inner
            .changes
            .iter()
            .filter(|change| change.id > after)
            .filter(|change| filter_gun.is_empty() || change.gun == filter_gun)
            .take(records)
            .cloned()
            .collect())
    }

    async fn check_health(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
