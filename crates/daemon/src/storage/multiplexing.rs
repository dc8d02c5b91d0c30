use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use common::crypto::CryptoService;
use common::tuf::RoleName;

use super::swizzle::swizzle_targets;
use super::{
    set_channels, Change, Channel, ChannelStore, Gun, MetaStore, MetaUpdate, StorageError,
    ALTERNATE_ROOT, SIGNER_ROOT,
};

/// Dual-write coordinator: one client publish lands in the signer-rooted
/// channel verbatim and in the alternate-rooted channel re-signed against
/// the organizational root, as a single atomic batch.
///
/// The per-instance lock serializes publishes (and the forwarded mutations)
/// so the two channels can never be observed diverging. It is only held
/// around storage work, never across auth or other request I/O.
pub struct MultiplexingStore {
    backing: Arc<dyn MetaStore>,
    crypto: Arc<dyn CryptoService>,
    root_store: Arc<dyn MetaStore>,
    root_gun: Gun,
    stashed_targets_role: RoleName,
    signer_view: Arc<ChannelStore>,
    alternate_view: Arc<ChannelStore>,
    lock: Mutex<()>,
}

impl MultiplexingStore {
    /// `root_store` must be a view whose reads resolve in the `Root`
    /// channel; it is only ever read here.
    pub fn new(
        backing: Arc<dyn MetaStore>,
        crypto: Arc<dyn CryptoService>,
        root_store: Arc<dyn MetaStore>,
        root_gun: Gun,
        stashed_targets_role: RoleName,
    ) -> Self {
        let signer_view = Arc::new(ChannelStore::new(backing.clone(), SIGNER_ROOT));
        let alternate_view = Arc::new(ChannelStore::new(backing.clone(), ALTERNATE_ROOT));
        MultiplexingStore {
            backing,
            crypto,
            root_store,
            root_gun,
            stashed_targets_role,
            signer_view,
            alternate_view,
            lock: Mutex::new(()),
        }
    }

    /// The channel view serving signer-rooted reads.
    pub fn signer_view(&self) -> Arc<ChannelStore> {
        self.signer_view.clone()
    }

    /// The channel view serving alternate-rooted reads.
    pub fn alternate_view(&self) -> Arc<ChannelStore> {
        self.alternate_view.clone()
    }

    /// The delegation slot reserved for stashing publisher targets.
    pub fn stashed_targets_role(&self) -> &RoleName {
        &self.stashed_targets_role
    }
}

#[async_trait]
impl MetaStore for MultiplexingStore {
    async fn get_current(
        &self,
        gun: &Gun,
        role: &RoleName,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        let _guard = self.lock.lock().await;
        self.backing.get_current(gun, role, channel).await
    }

    async fn get_checksum(
        &self,
        gun: &Gun,
        role: &RoleName,
        checksum: &str,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        let _guard = self.lock.lock().await;
        self.backing.get_checksum(gun, role, checksum, channel).await
    }

    async fn get_version(
        &self,
        gun: &Gun,
        role: &RoleName,
        version: i64,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        let _guard = self.lock.lock().await;
        self.backing.get_version(gun, role, version, channel).await
    }

    async fn update_current(&self, gun: &Gun, update: MetaUpdate) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        self.backing.update_current(gun, update).await
    }

    async fn update_many(&self, gun: &Gun, updates: Vec<MetaUpdate>) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;

        let alternate_updates = swizzle_targets(
            &self.crypto,
            &self.backing,
            &self.root_store,
            &self.root_gun,
            gun,
            &updates,
            &self.stashed_targets_role,
        )
        .await
        .map_err(|err| {
            tracing::warn!(gun = %gun, error = %err, "unable to swizzle targets");
            StorageError::Swizzle(err)
        })?;

        let mut batch = set_channels(updates, SIGNER_ROOT);
        batch.extend(set_channels(alternate_updates, ALTERNATE_ROOT));
        for update in &batch {
            tracing::debug!(
                gun = %gun,
                role = %update.role,
                version = update.version,
                channel = %update.channels[0],
                "queueing metadata row"
            );
        }

        self.backing.update_many(gun, batch).await
    }

    async fn delete(&self, gun: &Gun, channel: Option<Channel>) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        self.backing.delete(gun, channel).await
    }

    async fn get_changes(
        &self,
        change_id: &str,
        records: usize,
        filter_gun: &str,
    ) -> Result<Vec<Change>, StorageError> {
        let _guard = self.lock.lock().await;
        self.backing.get_changes(change_id, records, filter_gun).await
    }

    async fn check_health(&self) -> Result<(), StorageError> {
        self.backing.check_health().await
    }
}

#[cfg(test)]
mod tests {
    use super::super::{MemoryStore, SwizzleError, ROOT};
    use super::*;
    use crate::testkit::{publish_updates, TestPublisher, TestRoot};

    async fn multiplexer() -> (MultiplexingStore, TestRoot, TestPublisher, Arc<MemoryStore>) {
        let root = TestRoot::generate().await;
        let publisher = TestPublisher::generate("quay.io/acme/app").await;
        let backing = Arc::new(MemoryStore::new());
        let backing_dyn: Arc<dyn MetaStore> = backing.clone();
        root.persist(&backing_dyn).await;
        let root_store: Arc<dyn MetaStore> =
            Arc::new(ChannelStore::new(backing_dyn.clone(), ROOT));
        let store = MultiplexingStore::new(
            backing_dyn,
            root.crypto(),
            root_store,
            root.gun().clone(),
            RoleName::from("targets/releases"),
        );
        (store, root, publisher, backing)
    }

    #[tokio::test]
    async fn publish_lands_in_both_channels() {
        let (store, root, publisher, _) = multiplexer().await;
        let updates = publish_updates(&publisher, 1).await;
        let submitted_targets = updates
            .iter()
            .find(|u| u.role == RoleName::targets())
            .unwrap()
            .data
            .clone();

        store.update_many(publisher.gun(), updates).await.unwrap();

        // signer channel: byte-identical to the publish
        let (_, signer_targets) = store
            .signer_view()
            .get_current(publisher.gun(), &RoleName::targets(), None)
            .await
            .unwrap();
        assert_eq!(signer_targets, submitted_targets);

        // alternate channel: re-signed by the organizational keys, with the
        // original targets stashed under the delegation
        let (_, alternate_targets) = store
            .alternate_view()
            .get_current(publisher.gun(), &RoleName::targets(), None)
            .await
            .unwrap();
        assert_ne!(alternate_targets, submitted_targets);
        root.verify_signed_by(&RoleName::targets(), &alternate_targets);

        let (_, stash) = store
            .alternate_view()
            .get_current(
                publisher.gun(),
                &RoleName::from("targets/releases"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(stash, submitted_targets);
        publisher.verify_signed_by(&RoleName::targets(), &stash);
    }

    #[tokio::test]
    async fn reserved_delegation_rejected_without_side_effects() {
        let (store, _, publisher, _) = multiplexer().await;
        let mut updates = publish_updates(&publisher, 1).await;
        updates.push(MetaUpdate::new(
            RoleName::from("targets/releases"),
            1,
            b"{}".to_vec(),
        ));

        let changes_before = store.get_changes("0", 1000, "").await.unwrap().len();
        let err = store
            .update_many(publisher.gun(), updates)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Swizzle(SwizzleError::ReservedDelegation(_))
        ));
        let changes_after = store.get_changes("0", 1000, "").await.unwrap().len();
        assert_eq!(changes_before, changes_after);
        assert!(store
            .signer_view()
            .get_current(publisher.gun(), &RoleName::targets(), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn stale_publish_rejected_atomically_on_both_channels() {
        let (store, _, publisher, _) = multiplexer().await;
        store
            .update_many(publisher.gun(), publish_updates(&publisher, 1).await)
            .await
            .unwrap();
        let (_, v1_signer) = store
            .signer_view()
            .get_current(publisher.gun(), &RoleName::root(), None)
            .await
            .unwrap();

        let err = store
            .update_many(publisher.gun(), publish_updates(&publisher, 1).await)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::OldVersion { .. }));

        let (_, still_v1) = store
            .signer_view()
            .get_current(publisher.gun(), &RoleName::root(), None)
            .await
            .unwrap();
        assert_eq!(v1_signer, still_v1);
    }

    #[tokio::test]
    async fn channel_version_counts_stay_in_lockstep() {
        let (store, _, publisher, _) = multiplexer().await;
        store
            .update_many(publisher.gun(), publish_updates(&publisher, 1).await)
            .await
            .unwrap();
        store
            .update_many(publisher.gun(), publish_updates(&publisher, 2).await)
            .await
            .unwrap();

        for role in RoleName::base_roles() {
            for version in 1..=2 {
                assert!(
                    store
                        .signer_view()
                        .get_version(publisher.gun(), &role, version, None)
                        .await
                        .is_ok(),
                    "signer channel missing {role} v{version}"
                );
                assert!(
                    store
                        .alternate_view()
                        .get_version(publisher.gun(), &role, version, None)
                        .await
                        .is_ok(),
                    "alternate channel missing {role} v{version}"
                );
            }
        }
    }

    #[tokio::test]
    async fn admin_root_rotation_applies_to_next_publish() {
        let (store, root, publisher, backing) = multiplexer().await;
        store
            .update_many(publisher.gun(), publish_updates(&publisher, 1).await)
            .await
            .unwrap();

        // rotate the organizational root out from under the multiplexer;
        // the rotated keys live in the same signer
        let new_root = TestRoot::generate_with(root.shared_crypto(), 2).await;
        let backing_dyn: Arc<dyn MetaStore> = backing;
        backing_dyn
            .update_many(
                new_root.gun(),
                vec![MetaUpdate {
                    role: RoleName::root(),
                    version: 2,
                    data: new_root.root_bytes().to_vec(),
                    channels: vec![ROOT],
                }],
            )
            .await
            .unwrap();

        // swizzles read the root on each publish, so the next publish
        // chains to the rotated root immediately
        let (_, emitted_root) = {
            store
                .update_many(publisher.gun(), publish_updates(&publisher, 2).await)
                .await
                .unwrap();
            store
                .alternate_view()
                .get_current(publisher.gun(), &RoleName::root(), None)
                .await
                .unwrap()
        };
        assert_eq!(emitted_root, new_root.root_bytes());
    }
}
