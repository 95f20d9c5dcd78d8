pub mod backend;
pub mod db;
pub mod error;
pub mod guard;
pub mod keygen;
pub mod memory;
pub mod model;
pub mod secrets;

pub use backend::SecretBackend;
pub use db::RedbBackend;
pub use error::{BackendError, StoreError};
pub use guard::{SizeCheck, SizeGuard};
pub use keygen::{KeyGenerator, TimeOrderedKeys};
pub use memory::MemoryBackend;
pub use model::{ConsumedSecret, NewSecret, SecretRecord};
pub use secrets::SecretStore;
