use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use common::tuf::RoleName;

use super::{Change, Channel, Gun, MetaStore, MetaUpdate, StorageError};

/// Rejects every mutating operation with [`StorageError::ReadOnly`].
pub struct ReadOnlyStore {
    inner: Arc<dyn MetaStore>,
}

impl ReadOnlyStore {
    pub fn new(inner: Arc<dyn MetaStore>) -> Self {
        ReadOnlyStore { inner }
    }
}

#[async_trait]
impl MetaStore for ReadOnlyStore {
    async fn get_current(
        &self,
        gun: &Gun,
        role: &RoleName,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        self.inner.get_current(gun, role, channel).await
    }

    async fn get_checksum(
        &self,
        gun: &Gun,
        role: &RoleName,
        checksum: &str,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        self.inner.get_checksum(gun, role, checksum, channel).await
    }

    async fn get_version(
        &self,
        gun: &Gun,
        role: &RoleName,
        version: i64,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        self.inner.get_version(gun, role, version, channel).await
    }

    async fn update_current(&self, _gun: &Gun, _update: MetaUpdate) -> Result<(), StorageError> {
        Err(StorageError::ReadOnly)
    }

    async fn update_many(&self, _gun: &Gun, _updates: Vec<MetaUpdate>) -> Result<(), StorageError> {
        Err(StorageError::ReadOnly)
    }

    async fn delete(&self, _gun: &Gun, _channel: Option<Channel>) -> Result<(), StorageError> {
        Err(StorageError::ReadOnly)
    }

    async fn get_changes(
        &self,
        change_id: &str,
        records: usize,
        filter_gun: &str,
    ) -> Result<Vec<Change>, StorageError> {
        self.inner.get_changes(change_id, records, filter_gun).await
    }

    async fn check_health(&self) -> Result<(), StorageError> {
        self.inner.check_health().await
    }
}

#[cfg(test)]
mod tests {
    use super::super::MemoryStore;
    use super::*;

    #[tokio::test]
    async fn writes_rejected_reads_forwarded() {
        let backing = Arc::new(MemoryStore::new());
        let gun = Gun::from("quay.io/acme/app");
        backing
            .update_many(
                &gun,
                vec![MetaUpdate::new(RoleName::root(), 1, b"root".to_vec())],
            )
            .await
            .unwrap();

        let view = ReadOnlyStore::new(backing);
        assert!(view.get_current(&gun, &RoleName::root(), None).await.is_ok());
        let err = view
            .update_many(&gun, vec![MetaUpdate::new(RoleName::root(), 2, vec![])])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ReadOnly));
        let err = view.delete(&gun, None).await.unwrap_err();
        assert!(matches!(err, StorageError::ReadOnly));
    }
}
