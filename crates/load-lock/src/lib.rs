//! Crate `load-lock` — locks exclusivos por load tag
//!
//! Serializa las cargas masivas que apuntan al mismo destino, sin importar
//! en qué proceso corre cada flight. El contrato está en `LoadLockStore`;
//! la implementación durable vive en `flight-persistence`.
mod backoff;
mod domain;
mod errors;
mod load_tag;
mod store;
pub mod stubs;

pub use backoff::lock_with_backoff;
pub use domain::{LoadLock, LockOutcome};
pub use errors::{LoadLockError, Result};
pub use load_tag::{compute_load_tag, compute_load_tag_at, validate_load_tag, MAX_LOAD_TAG_LEN};
pub use store::LoadLockStore;
pub use stubs::InMemoryLoadLockStore;
