// Archivo: repository.rs
// Propósito: definir el trait `FlightRepository`, el contrato que deben
// implementar las persistencias del motor (diesel, in-memory, etc.).
use crate::domain::{FlightProgress, FlightRecord, StepExecutionRecord};
use crate::errors::Result;
use uuid::Uuid;

/// Contrato del almacén durable de flights y de su log de pasos.
///
/// La durabilidad del motor depende de `record_step`: el registro del
/// intento y el progreso del flight (estado, dirección, working state) se
/// guardan de forma atómica, de modo que tras una caída nunca se observa
/// uno sin el otro.
pub trait FlightRepository: Send + Sync {
    /// Inserta un flight nuevo (normalmente QUEUED). Un id repetido es
    /// `Conflict`.
    fn create_flight(&self, record: &FlightRecord) -> Result<()>;

    /// Lee un flight. `NotFound` si no existe.
    fn get_flight(&self, flight_id: &Uuid) -> Result<FlightRecord>;

    /// Lista flights por fecha de envío, opcionalmente filtrando por el
    /// `subject_id` del dueño.
    fn list_flights(&self, offset: i64, limit: i64, owner_subject: Option<&str>) -> Result<Vec<FlightRecord>>;

    /// Pasa un flight QUEUED a RUNNING. No hace nada si ya está RUNNING.
    fn mark_running(&self, flight_id: &Uuid) -> Result<()>;

    /// Guarda un intento de paso junto con el progreso del flight, en una
    /// sola transacción.
    fn record_step(&self, record: &StepExecutionRecord, progress: &FlightProgress) -> Result<()>;

    /// Log de intentos del flight en orden de registro.
    fn read_steps(&self, flight_id: &Uuid) -> Result<Vec<StepExecutionRecord>>;

    /// Deja el flight en su estado terminal. Sólo actualiza flights que aún
    /// no terminaron; devuelve `false` si ya estaba terminado.
    fn complete_flight(&self, flight_id: &Uuid, progress: &FlightProgress) -> Result<bool>;

    /// Flights que quedaron QUEUED o RUNNING (candidatos a recuperación).
    fn recover_flights(&self) -> Result<Vec<FlightRecord>>;

    /// Borra un flight y su log.
    fn delete_flight(&self, flight_id: &Uuid) -> Result<()>;

    /// Descarta todo el estado persistido (arranque limpio forzado).
    fn start_clean(&self) -> Result<()>;
}
