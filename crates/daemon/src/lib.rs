// Service modules
pub mod auth;
pub mod bootstrap;
pub mod cli;
pub mod http_server;
pub mod key_store;
pub mod process;
pub mod service_config;
pub mod service_state;
pub mod storage;

// Shared fixtures for unit and integration tests
pub mod testkit;

// Re-exports for consumers
pub use process::{spawn_service, start_service, Service};
pub use service_config::Config as ServiceConfig;
pub use service_state::State as ServiceState;
