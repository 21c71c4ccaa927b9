// errors.rs
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadLockError {
  #[error("Load tag inválido: {0}")]
  InvalidTag(String),
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
  #[error("Espera del lock interrumpida")]
  Interrupted,
}

pub type Result<T> = std::result::Result<T, LoadLockError>;
