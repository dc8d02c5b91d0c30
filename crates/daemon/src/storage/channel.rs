use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use common::tuf::RoleName;

use super::{Change, Channel, Gun, MetaStore, MetaUpdate, StorageError};

/// A view over a backing store that pins one channel for reads (and for
/// deletion). Whatever channel a caller passes is overridden; writes pass
/// through with their own channel tags.
pub struct ChannelStore {
    inner: Arc<dyn MetaStore>,
    channel: Channel,
}

impl ChannelStore {
    pub fn new(inner: Arc<dyn MetaStore>, channel: Channel) -> Self {
        ChannelStore { inner, channel }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }
}

#[async_trait]
impl MetaStore for ChannelStore {
    async fn get_current(
        &self,
        gun: &Gun,
        role: &RoleName,
        _channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        self.inner.get_current(gun, role, Some(self.channel)).await
    }

    async fn get_checksum(
        &self,
        gun: &Gun,
        role: &RoleName,
        checksum: &str,
        _channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        self.inner
            .get_checksum(gun, role, checksum, Some(self.channel))
            .await
    }

    async fn get_version(
        &self,
        gun: &Gun,
        role: &RoleName,
        version: i64,
        _channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        self.inner
            .get_version(gun, role, version, Some(self.channel))
            .await
    }

    async fn update_current(&self, gun: &Gun, update: MetaUpdate) -> Result<(), StorageError> {
        self.inner.update_current(gun, update).await
    }

    async fn update_many(&self, gun: &Gun, updates: Vec<MetaUpdate>) -> Result<(), StorageError> {
        self.inner.update_many(gun, updates).await
    }

    async fn delete(&self, gun: &Gun, _channel: Option<Channel>) -> Result<(), StorageError> {
        self.inner.delete(gun, Some(self.channel)).await
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
    use super::super::{MemoryStore, ALTERNATE_ROOT, SIGNER_ROOT};
    use super::*;

    #[tokio::test]
    async fn reads_ignore_caller_channel() {
        let backing = Arc::new(MemoryStore::new());
        let gun = Gun::from("quay.io/acme/app");
        let mut update = MetaUpdate::new(RoleName::targets(), 1, b"alternate".to_vec());
        update.channels = vec![ALTERNATE_ROOT];
        backing.update_many(&gun, vec![update]).await.unwrap();

        let view = ChannelStore::new(backing, ALTERNATE_ROOT);
        // caller asks for the signer channel, the view still pins alternate
        let (_, data) = view
            .get_current(&gun, &RoleName::targets(), Some(SIGNER_ROOT))
            .await
            .unwrap();
        assert_eq!(data, b"alternate");
    }
}
