pub mod handlers;
pub mod server;
pub mod service;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub secrets: service::SecretService,
}

pub use server::{build_state, resolve_data_dir, router, run, BackendKind, ServerConfig};
pub use service::SecretService;
pub use store::{ConsumedSecret, StoreError};
