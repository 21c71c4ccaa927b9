// Archivo: step.rs
// Propósito: contrato de un paso de flight (do/undo) y el resultado
// tri-estado que devuelve cada intento.
use crate::context::FlightContext;
use crate::domain::{StepFailure, StepStatus};
use async_trait::async_trait;
use thiserror::Error;

/// Resultado de un intento de `do` o `undo`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success,
    /// Fallo transitorio: la regla de reintento del paso decide si se repite.
    RetryableFailure(StepFailure),
    /// Fallo definitivo: en DOING dispara el undo; en UNDOING termina en FATAL.
    FatalFailure(StepFailure),
}

impl StepOutcome {
    pub fn retry(message: impl Into<String>) -> Self {
        StepOutcome::RetryableFailure(StepFailure::new(message))
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        StepOutcome::FatalFailure(StepFailure::new(message))
    }

    pub fn status(&self) -> StepStatus {
        match self {
            StepOutcome::Success => StepStatus::Success,
            StepOutcome::RetryableFailure(_) => StepStatus::RetryableFailure,
            StepOutcome::FatalFailure(_) => StepStatus::FatalFailure,
        }
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            StepOutcome::Success => None,
            StepOutcome::RetryableFailure(f) | StepOutcome::FatalFailure(f) => Some(f),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success)
    }
}

/// Señal de apagado cooperativo recibida durante un paso. No es un fallo:
/// el intento no se registra y el flight queda aparcado para reanudarse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrumpido por una solicitud de apagado")]
pub struct Interrupted;

pub type StepResult = std::result::Result<StepOutcome, Interrupted>;

/// Un paso de flight con su acción y su compensación.
///
/// Ambas operaciones deben ser idempotentes: tras una caída pueden
/// ejecutarse más de una vez. Los efectos que otros pasos necesiten se
/// comunican escribiendo en el working map del contexto.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult;

    /// Compensación. Por defecto no hace nada (pasos sin efectos externos).
    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(StepOutcome::Success)
    }
}
