// Errores de la capa Diesel y su traducción a los errores de dominio.
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use flight::FlightError;
use load_lock::LoadLockError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
  #[error("pool: {0}")]
  Pool(#[from] r2d2::Error),
  #[error("db: {0}")]
  Db(#[from] DieselError),
  #[error("migraciones: {0}")]
  Migration(String),
  #[error("configuración: {0}")]
  Config(String),
  #[error("fila inválida: {0}")]
  Corrupt(String),
}

impl PersistenceError {
  pub fn is_unique_violation(&self) -> bool {
    matches!(self, PersistenceError::Db(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)))
  }
}

impl From<PersistenceError> for FlightError {
  fn from(e: PersistenceError) -> Self {
    FlightError::Storage(e.to_string())
  }
}

impl From<PersistenceError> for LoadLockError {
  fn from(e: PersistenceError) -> Self {
    LoadLockError::Storage(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
