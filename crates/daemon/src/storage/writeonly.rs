use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use common::tuf::RoleName;

use super::{Change, Channel, Gun, MetaStore, MetaUpdate, StorageError};

/// Rejects every read with [`StorageError::WriteOnly`]. Deletion is also
/// rejected so the organizational root cannot be erased through the admin
/// write path.
pub struct WriteOnlyStore {
    inner: Arc<dyn MetaStore>,
}

impl WriteOnlyStore {
    pub fn new(inner: Arc<dyn MetaStore>) -> Self {
        WriteOnlyStore { inner }
    }
}

#[async_trait]
impl MetaStore for WriteOnlyStore {
    async fn get_current(
        &self,
        _gun: &Gun,
        _role: &RoleName,
        _channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        Err(StorageError::WriteOnly)
    }

    async fn get_checksum(
        &self,
        _gun: &Gun,
        _role: &RoleName,
        _checksum: &str,
        _channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        Err(StorageError::WriteOnly)
    }

    async fn get_version(
        &self,
        _gun: &Gun,
        _role: &RoleName,
        _version: i64,
        _channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        Err(StorageError::WriteOnly)
    }

    async fn update_current(&self, gun: &Gun, update: MetaUpdate) -> Result<(), StorageError> {
        self.inner.update_current(gun, update).await
    }

    async fn update_many(&self, gun: &Gun, updates: Vec<MetaUpdate>) -> Result<(), StorageError> {
        self.inner.update_many(gun, updates).await
    }

    async fn delete(&self, _gun: &Gun, _channel: Option<Channel>) -> Result<(), StorageError> {
        Err(StorageError::WriteOnly)
    }

    async fn get_changes(
        &self,
        _change_id: &str,
        _records: usize,
        _filter_gun: &str,
    ) -> Result<Vec<Change>, StorageError> {
        Err(StorageError::WriteOnly)
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
    async fn reads_and_delete_rejected() {
        let backing = Arc::new(MemoryStore::new());
        let gun = Gun::from("quay.io/acme/app");
        let view = WriteOnlyStore::new(backing.clone());

        view.update_many(
            &gun,
            vec![MetaUpdate::new(RoleName::root(), 1, b"root".to_vec())],
        )
        .await
        .unwrap();

        let err = view.get_current(&gun, &RoleName::root(), None).await.unwrap_err();
        assert!(matches!(err, StorageError::WriteOnly));
        let err = view.delete(&gun, None).await.unwrap_err();
        assert!(matches!(err, StorageError::WriteOnly));

        // but the write really landed in the backing store
        assert!(backing.get_current(&gun, &RoleName::root(), None).await.is_ok());
    }
}
