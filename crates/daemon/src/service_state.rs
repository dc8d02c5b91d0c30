use std::sync::Arc;

use common::crypto::CryptoService;
use common::tuf::{KeyAlgorithm, RoleName};

use crate::auth::AccessController;
use crate::http_server::CacheSettings;
use crate::key_store::KeyStore;
use crate::storage::{ChannelStore, Gun, MetaStore, MultiplexingStore, ROOT};

/// Everything a request handler needs: the multiplexing store, the three
/// channel views, the access controller for this listener, and the serving
/// policy knobs.
#[derive(Clone)]
pub struct State {
    multiplexer: Arc<MultiplexingStore>,
    signer_view: Arc<ChannelStore>,
    alternate_view: Arc<ChannelStore>,
    root_view: Arc<ChannelStore>,
    access: Arc<dyn AccessController>,
    key_store: Arc<KeyStore>,
    gun_prefixes: Arc<Vec<String>>,
    cache: CacheSettings,
}

impl State {
    pub fn new(
        multiplexer: Arc<MultiplexingStore>,
        root_backing: Arc<dyn MetaStore>,
        access: Arc<dyn AccessController>,
        crypto: Arc<dyn CryptoService>,
        key_algorithm: KeyAlgorithm,
        gun_prefixes: Vec<String>,
        cache: CacheSettings,
    ) -> Self {
        let signer_view = multiplexer.signer_view();
        let alternate_view = multiplexer.alternate_view();
        let root_view = Arc::new(ChannelStore::new(root_backing, ROOT));
        State {
            multiplexer,
            signer_view,
            alternate_view,
            root_view,
            access,
            key_store: Arc::new(KeyStore::new(crypto, key_algorithm)),
            gun_prefixes: Arc::new(gun_prefixes),
            cache,
        }
    }

    /// The same state wired to a different access controller, for the
    /// admin listener.
    pub fn with_access(&self, access: Arc<dyn AccessController>) -> Self {
        let mut state = self.clone();
        state.access = access;
        state
    }

    pub fn multiplexer(&self) -> &Arc<MultiplexingStore> {
        &self.multiplexer
    }

    pub fn signer_view(&self) -> Arc<ChannelStore> {
        self.signer_view.clone()
    }

    pub fn alternate_view(&self) -> Arc<ChannelStore> {
        self.alternate_view.clone()
    }

    pub fn root_view(&self) -> Arc<ChannelStore> {
        self.root_view.clone()
    }

    pub fn access(&self) -> &Arc<dyn AccessController> {
        &self.access
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    pub fn gun_allowed(&self, gun: &Gun) -> bool {
        gun.matches_prefixes(&self.gun_prefixes)
    }

    pub fn gun_prefixes(&self) -> &[String] {
        &self.gun_prefixes
    }

    pub fn cache(&self) -> CacheSettings {
        self.cache
    }

    /// Reserved delegation role, surfaced for error messages.
    pub fn stashed_targets_role(&self) -> RoleName {
        self.multiplexer.stashed_targets_role().clone()
    }
}
