// Archivo: errors.rs
// Propósito: definir los errores del motor de flights y el alias Result<T>
// usado por las APIs del crate. Los fallos de un paso NO son errores de
// Rust: viajan como `StepOutcome` (ver `step.rs`).
use crate::domain::FlightStatus;
use thiserror::Error;

/// Errores comunes del motor y de la persistencia de flights.
///
/// - `NotFound`: flight inexistente.
/// - `Conflict`: id duplicado, flight ya activo o ya terminado.
/// - `Storage`: error al acceder al almacenamiento externo.
/// - `MakeFlight`: no se pudo construir un flight desde el registro.
#[derive(Error, Debug)]
pub enum FlightError {
    /// Entidad no encontrada (por ejemplo, un flight).
    #[error("No encontrado: {0}")]
    NotFound(String),
    /// Conflicto de estado o de unicidad.
    #[error("Conflicto: {0}")]
    Conflict(String),
    /// Error genérico de almacenamiento (BD, pool, mutex envenenado).
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
    /// Errores de serializacion/deserializacion JSON del `FlightMap`.
    #[error("Error de serializacion: {0}")]
    Serialization(#[from] serde_json::Error),
    /// La clase pedida no está registrada o su definición falló.
    #[error("No se pudo construir el flight: {0}")]
    MakeFlight(String),
    /// El usuario no es dueño del flight consultado.
    #[error("No autorizado: {0}")]
    Unauthorized(String),
    /// El motor dejó de aceptar flights (quiet down / terminate).
    #[error("El motor no acepta nuevos flights: {0}")]
    ShuttingDown(String),
    /// El flight terminó sin éxito; se devuelve al pedir su resultado.
    #[error("El flight terminó en {status}: {message}")]
    FlightFailed { status: FlightStatus, message: String },
    /// Otro tipo de error.
    #[error("Otro: {0}")]
    Other(String),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, FlightError>;
