use async_trait::async_trait;
use flight::UserRequestInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Tipos de recurso sobre los que se toman decisiones de acceso.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IamResourceType {
  Datarepo,
  Dataset,
  Datasnapshot,
  SpendProfile,
}

impl IamResourceType {
  pub fn as_str(&self) -> &'static str {
    match self {
      IamResourceType::Datarepo => "datarepo",
      IamResourceType::Dataset => "dataset",
      IamResourceType::Datasnapshot => "datasnapshot",
      IamResourceType::SpendProfile => "spend-profile",
    }
  }
}

impl fmt::Display for IamResourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Acciones que un flight puede necesitar verificar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IamAction {
  ReadData,
  IngestData,
  ManageSchema,
  UpdateSnapshot,
  Delete,
}

impl IamAction {
  pub fn as_str(&self) -> &'static str {
    match self {
      IamAction::ReadData => "read_data",
      IamAction::IngestData => "ingest_data",
      IamAction::ManageSchema => "manage_schema",
      IamAction::UpdateSnapshot => "update_snapshot",
      IamAction::Delete => "delete",
    }
  }
}

impl fmt::Display for IamAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Errores del colaborador de decisiones de acceso.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PolicyError {
  /// Falla pasajera (timeout, rate limit, servicio caído).
  #[error("servicio de políticas no disponible: {0}")]
  Unavailable(String),

  /// La consulta en sí es inválida; reintentar no cambia nada.
  #[error("consulta de política inválida: {0}")]
  Invalid(String),
}

impl PolicyError {
  pub fn is_transient(&self) -> bool {
    matches!(self, PolicyError::Unavailable(_))
  }
}

/// Punto de decisión de políticas externo. Cómo se calcula la decisión no
/// es asunto de este crate; los pasos sólo preguntan.
#[async_trait]
pub trait PolicyDecisionPoint: Send + Sync {
  async fn is_authorized(&self,
                         user: &UserRequestInfo,
                         resource_type: IamResourceType,
                         resource_id: &str,
                         action: IamAction)
                         -> Result<bool, PolicyError>;
}
