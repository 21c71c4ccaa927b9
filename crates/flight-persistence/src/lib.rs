//! Persistencia Diesel para el motor de flights y los locks de carga.
//! Expone el módulo `schema`, el pool compartido y las implementaciones de
//! `FlightRepository` (`DieselFlightRepository`) y `LoadLockStore`
//! (`DieselLoadLockStore`). SQLite por defecto; Postgres con la feature `pg`.

mod errors;
mod flight_persistence;
mod load_lock_persistence;
pub mod pool;
pub mod schema;

pub use errors::PersistenceError;
pub use flight_persistence::{new_from_env, DieselFlightRepository};
pub use load_lock_persistence::{new_from_env as new_lock_store_from_env, DieselLoadLockStore};
pub use pool::{build_pool, pool_from_env, DbPool};
