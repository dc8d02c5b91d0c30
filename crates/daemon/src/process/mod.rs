use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common::crypto::{CryptoService, LocalCryptoService, RemoteCryptoService, RemoteSignerConfig};

use crate::auth::{AccessController, ConstantAccessController, KeyserverAccessController};
use crate::bootstrap::{ensure_organizational_root, BootstrapError};
use crate::http_server;
use crate::service_config::{AuthType, Config, ConfigError, StorageBackend, TrustServiceType};
use crate::service_state::State;
use crate::storage::{Gun, MemoryStore, MetaStore, MultiplexingStore, SqlStore, StorageError};
use crate::storage::{ChannelStore, ReadOnlyStore, ROOT};

use common::tuf::RoleName;

/// How long stopped listeners and background tasks get to drain before
/// they are abandoned. Publishes are serialized under the multiplexer
/// lock and axum finishes in-flight requests on its own, so anything
/// still running after this window is stuck, not busy.
const DRAIN_WINDOW: Duration = Duration::from_secs(20);

const STORAGE_HEALTH_INTERVAL: Duration = Duration::from_secs(60);
const SIGNER_HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// The delegation slot the swizzler stashes publisher targets under.
const STASHED_TARGETS_ROLE: &str = "targets/releases";

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage backend is not supported by this build: {0:?}")]
    UnsupportedBackend(String),

    #[error("storage.db_url is required for SQL backends")]
    MissingDbUrl,

    #[error("unable to open backing store: {0}")]
    Storage(#[from] StorageError),

    #[error("unable to reach remote signer: {0}")]
    Signer(#[from] common::crypto::CryptoError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("unable to read TLS material {0}: {1}")]
    Tls(std::path::PathBuf, std::io::Error),
}

/// A running countersign service: the operator and admin listeners plus
/// the JWK refresh and health-check tasks, all stopped through one watch
/// signal.
pub struct Service {
    stop_tx: watch::Sender<()>,
    tasks: JoinSet<()>,
}

impl Service {
    /// Signal every listener and background task to stop. `serve` (if
    /// running) then drains and returns.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    /// Run until SIGINT, SIGTERM, or a programmatic [`stop`](Self::stop),
    /// then drain the tasks. Tasks that outlive the drain window are
    /// abandoned with an error logged.
    pub async fn serve(mut self) {
        let mut stopped = self.stop_tx.subscribe();
        let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler installs");
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler installs");

        tokio::select! {
            _ = sigint.recv() => tracing::info!("stopping on SIGINT"),
            _ = sigterm.recv() => tracing::info!("stopping on SIGTERM"),
            _ = stopped.changed() => tracing::info!("stopping on request"),
        }
        let _ = self.stop_tx.send(());

        let drained = timeout(DRAIN_WINDOW, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::error!(
                window_secs = DRAIN_WINDOW.as_secs(),
                "tasks did not drain in time, abandoning them"
            );
            self.tasks.abort_all();
        }
    }
}

/// Initialize logging and the panic hook. Returns guards that must be
/// kept alive for the duration of the program.
pub fn init_logging(config: &Config) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let env_filter = EnvFilter::builder()
        .with_default_directive(
            config
                .logging
                .level
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        )
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stdout_layer).init();

    // panics must land in the log stream, not just stderr
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()));
        tracing::error!(
            message = %info,
            location = location.as_deref().unwrap_or("unknown"),
            "panic"
        );
    }));

    guards
}

async fn build_crypto(config: &Config) -> Result<Arc<dyn CryptoService>, StartupError> {
    match config.trust_service.service_type {
        TrustServiceType::Local => {
            tracing::info!(
                "using local signing service, which requires ed25519; \
                 ignoring all other trust_service parameters"
            );
            Ok(Arc::new(LocalCryptoService::new()))
        }
        TrustServiceType::Remote => {
            tracing::info!("using remote signing service");
            let read = |path: &Option<std::path::PathBuf>| -> Result<Option<Vec<u8>>, StartupError> {
                match path {
                    Some(path) => std::fs::read(path)
                        .map(Some)
                        .map_err(|err| StartupError::Tls(path.clone(), err)),
                    None => Ok(None),
                }
            };
            let tls_client_identity = match (
                read(&config.trust_service.tls_client_cert_file)?,
                read(&config.trust_service.tls_client_key_file)?,
            ) {
                (Some(mut cert), Some(key)) => {
                    cert.extend_from_slice(&key);
                    Some(cert)
                }
                _ => None,
            };
            let signer = RemoteCryptoService::connect(RemoteSignerConfig {
                hostname: config
                    .trust_service
                    .hostname
                    .clone()
                    .expect("validated by Config::validate"),
                port: config.trust_service.port.expect("validated by Config::validate"),
                tls_ca: read(&config.trust_service.tls_ca_file)?,
                tls_client_identity,
            })
            .await?;
            Ok(Arc::new(signer))
        }
    }
}

struct Stores {
    backing: Arc<dyn MetaStore>,
    root_backing: Arc<dyn MetaStore>,
}

async fn build_stores(config: &Config) -> Result<Stores, StartupError> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("using memory backend");
            // channels partition a single store, so the root repository
            // shares the instance
            let store: Arc<dyn MetaStore> = Arc::new(MemoryStore::new());
            Ok(Stores {
                backing: store.clone(),
                root_backing: store,
            })
        }
        StorageBackend::Sqlite3 => {
            tracing::info!("using sqlite3 backend");
            let db_url = config
                .storage
                .db_url
                .as_deref()
                .ok_or(StartupError::MissingDbUrl)?;
            let primary = SqlStore::connect(db_url, "").await?;
            let root_db_url = config.root_storage.db_url.as_deref().unwrap_or(db_url);
            let root = if root_db_url == db_url {
                // one physical database, two namespaces
                SqlStore::with_pool(primary.pool().clone(), "root").await?
            } else {
                SqlStore::connect(root_db_url, "").await?
            };
            Ok(Stores {
                backing: Arc::new(primary),
                root_backing: Arc::new(root),
            })
        }
        other => Err(StartupError::UnsupportedBackend(format!("{other:?}"))),
    }
}

async fn build_access_controller(
    config: &Config,
    stop_rx: &watch::Receiver<()>,
    tasks: &mut JoinSet<()>,
) -> Result<Arc<dyn AccessController>, StartupError> {
    match config.auth.auth_type {
        AuthType::Quaytoken => {
            let options = config.auth.keyserver_options()?;
            let controller = KeyserverAccessController::new(options).await;
            tasks.spawn(controller.clone().refresh_loop(stop_rx.clone()));
            Ok(controller)
        }
        AuthType::Testing => {
            tracing::warn!(
                "test auth config enabled - all requests will be authorized as 'signer'"
            );
            Ok(Arc::new(ConstantAccessController::new("signer")))
        }
        AuthType::Admin => Ok(Arc::new(ConstantAccessController::new("admin"))),
    }
}

fn spawn_health_checks(
    backing: Arc<dyn MetaStore>,
    crypto: Arc<dyn CryptoService>,
    stop_rx: &watch::Receiver<()>,
    tasks: &mut JoinSet<()>,
) {
    let mut storage_rx = stop_rx.clone();
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(STORAGE_HEALTH_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = backing.check_health().await {
                        tracing::error!(error = %err, "storage not operational");
                    }
                }
                _ = storage_rx.changed() => break,
            }
        }
    });

    let mut signer_rx = stop_rx.clone();
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(SIGNER_HEALTH_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = crypto.check_health().await {
                        tracing::error!(error = %err, "trust not fully operational");
                    }
                }
                _ = signer_rx.changed() => break,
            }
        }
    });
}

/// Build all state and spawn the operator and admin listeners plus the
/// background tasks, returning the service handle.
pub async fn start_service(config: &Config) -> Result<(State, Service), StartupError> {
    if config.server.tls_cert_file.is_some() || config.server.tls_key_file.is_some() {
        tracing::warn!("TLS termination is delegated to the fronting proxy; cert/key ignored");
    }

    let (stop_tx, stop_rx) = watch::channel(());
    let mut tasks = JoinSet::new();

    let crypto = build_crypto(config).await?;
    let stores = build_stores(config).await?;

    // the root repository is written before the multiplexer goes live
    ensure_organizational_root(&crypto, &stores.root_backing, &config.root_storage).await?;

    let root_read: Arc<dyn MetaStore> = Arc::new(ChannelStore::new(
        Arc::new(ReadOnlyStore::new(stores.root_backing.clone())),
        ROOT,
    ));
    let multiplexer = Arc::new(MultiplexingStore::new(
        stores.backing.clone(),
        crypto.clone(),
        root_read,
        Gun::new(config.root_storage.root_gun.clone()),
        RoleName::from(STASHED_TARGETS_ROLE),
    ));

    // the local signing service only does ed25519; remote signers honor
    // the configured algorithm
    let key_algorithm = match config.trust_service.service_type {
        TrustServiceType::Local => common::tuf::KeyAlgorithm::Ed25519,
        TrustServiceType::Remote => config
            .trust_service
            .key_algorithm
            .unwrap_or(common::tuf::KeyAlgorithm::Ecdsa),
    };

    let operator_access = build_access_controller(config, &stop_rx, &mut tasks).await?;
    let operator_state = State::new(
        multiplexer,
        stores.root_backing.clone(),
        operator_access,
        crypto.clone(),
        key_algorithm,
        config.repositories.gun_prefixes.clone(),
        config.cache_settings(),
    );
    let admin_state =
        operator_state.with_access(Arc::new(ConstantAccessController::new("admin")));

    spawn_health_checks(
        stores.backing.clone(),
        crypto.clone(),
        &stop_rx,
        &mut tasks,
    );

    let operator_addr = config.server.http_addr;
    let operator_rx = stop_rx.clone();
    let operator = operator_state.clone();
    tasks.spawn(async move {
        if let Err(err) = http_server::run(operator_addr, operator, operator_rx).await {
            tracing::error!(error = %err, "operator server error");
        }
    });

    let admin_addr = config.server.admin_http_addr;
    let admin_rx = stop_rx.clone();
    tasks.spawn(async move {
        if let Err(err) = http_server::run(admin_addr, admin_state, admin_rx).await {
            tracing::error!(error = %err, "admin server error");
        }
    });

    tracing::info!(
        operator = %operator_addr,
        admin = %admin_addr,
        "countersign servers running"
    );

    Ok((operator_state, Service { stop_tx, tasks }))
}

/// Run the daemon until a shutdown signal arrives. Startup failures exit
/// the process with a non-zero code.
pub async fn spawn_service(config: &Config) {
    let _guards = init_logging(config);
    match start_service(config).await {
        Ok((_, service)) => service.serve().await,
        Err(err) => {
            tracing::error!(error = %err, "error starting service");
            std::process::exit(2);
        }
    }
}
