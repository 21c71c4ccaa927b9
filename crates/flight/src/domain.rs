// Archivo: domain.rs
// Propósito: tipos del modelo de flights (estados, direcciones, registros
// persistidos) y el cálculo del punto de reanudación a partir del log.
use crate::errors::FlightError;
use crate::flight_map::FlightMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Estado de ciclo de vida de un flight.
///
/// QUEUED -> RUNNING -> {SUCCEEDED | ERROR | FATAL}. Los tres últimos son
/// terminales y nunca se vuelven a ejecutar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    Queued,
    Running,
    Succeeded,
    /// Falló un `do` y todos los `undo` necesarios terminaron bien.
    Error,
    /// Falló un `undo`: el sistema externo puede quedar inconsistente.
    Fatal,
}

impl FlightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightStatus::Queued => "QUEUED",
            FlightStatus::Running => "RUNNING",
            FlightStatus::Succeeded => "SUCCEEDED",
            FlightStatus::Error => "ERROR",
            FlightStatus::Fatal => "FATAL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FlightStatus::Succeeded | FlightStatus::Error | FlightStatus::Fatal)
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlightStatus {
    type Err = FlightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(FlightStatus::Queued),
            "RUNNING" => Ok(FlightStatus::Running),
            "SUCCEEDED" => Ok(FlightStatus::Succeeded),
            "ERROR" => Ok(FlightStatus::Error),
            "FATAL" => Ok(FlightStatus::Fatal),
            other => Err(FlightError::Storage(format!("estado de flight desconocido: {}", other))),
        }
    }
}

/// Dirección en la que avanza un flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Doing,
    Undoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Doing => "DOING",
            Direction::Undoing => "UNDOING",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = FlightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DOING" => Ok(Direction::Doing),
            "UNDOING" => Ok(Direction::Undoing),
            other => Err(FlightError::Storage(format!("direccion desconocida: {}", other))),
        }
    }
}

/// Resultado persistido de un intento de paso.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    RetryableFailure,
    FatalFailure,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "SUCCESS",
            StepStatus::RetryableFailure => "RETRYABLE_FAILURE",
            StepStatus::FatalFailure => "FATAL_FAILURE",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = FlightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(StepStatus::Success),
            "RETRYABLE_FAILURE" => Ok(StepStatus::RetryableFailure),
            "FATAL_FAILURE" => Ok(StepStatus::FatalFailure),
            other => Err(FlightError::Storage(format!("resultado de paso desconocido: {}", other))),
        }
    }
}

/// Detalle de un fallo: mensaje principal más la cadena de causas.
///
/// Es serializable para poder guardarlo en el log de pasos y en la fila
/// del flight, y devolverlo luego desde una consulta de estado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub message: String,
    #[serde(default)]
    pub causes: Vec<String>,
}

impl StepFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(),
               causes: Vec::new() }
    }

    /// Construye el detalle recorriendo `source()` para conservar la cadena
    /// completa de causas del error original.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut current = err.source();
        while let Some(cause) = current {
            causes.push(cause.to_string());
            current = cause.source();
        }
        Self { message: err.to_string(),
               causes }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.causes {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

/// Identidad del usuario que envió el flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRequestInfo {
    pub subject_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserRequestInfo {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self { subject_id: subject_id.into(),
               email: None }
    }
}

/// Fila persistida de un flight.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightRecord {
    pub id: Uuid,
    pub class_ref: String,
    pub status: FlightStatus,
    pub direction: Direction,
    pub input_params: FlightMap,
    pub working_state: FlightMap,
    /// Fallo que llevó al undo (o fallo del undo si es FATAL).
    pub error: Option<StepFailure>,
    pub owner: Option<UserRequestInfo>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FlightRecord {
    /// Registro recién enviado: QUEUED, dirección DOING, working state vacío.
    pub fn queued(id: Uuid, class_ref: impl Into<String>, input_params: FlightMap, owner: Option<UserRequestInfo>) -> Self {
        let now = Utc::now();
        Self { id,
               class_ref: class_ref.into(),
               status: FlightStatus::Queued,
               direction: Direction::Doing,
               input_params,
               working_state: FlightMap::new(),
               error: None,
               owner,
               submitted_at: now,
               updated_at: now,
               completed_at: None }
    }
}

/// Entrada del log de ejecución: un intento de un paso.
#[derive(Debug, Clone, PartialEq)]
pub struct StepExecutionRecord {
    pub flight_id: Uuid,
    pub step_index: i64,
    pub direction: Direction,
    pub attempt: u32,
    pub outcome: StepStatus,
    pub error_detail: Option<StepFailure>,
    pub recorded_at: DateTime<Utc>,
}

/// Progreso del flight que se persiste en la misma transacción que el
/// `StepExecutionRecord` correspondiente.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightProgress {
    pub status: FlightStatus,
    pub direction: Direction,
    pub working_state: FlightMap,
    pub error: Option<StepFailure>,
}

/// Vista devuelta por una consulta de estado.
///
/// `result` sólo se informa en SUCCEEDED (working state final); `error`
/// sólo en ERROR/FATAL.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightState {
    pub flight_id: Uuid,
    pub class_ref: String,
    pub status: FlightStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<FlightMap>,
    pub error: Option<StepFailure>,
    pub owner: Option<UserRequestInfo>,
}

impl From<&FlightRecord> for FlightState {
    fn from(rec: &FlightRecord) -> Self {
        let result = match rec.status {
            FlightStatus::Succeeded => Some(rec.working_state.clone()),
            _ => None,
        };
        let error = match rec.status {
            FlightStatus::Error | FlightStatus::Fatal => rec.error.clone(),
            _ => None,
        };
        Self { flight_id: rec.id,
               class_ref: rec.class_ref.clone(),
               status: rec.status,
               submitted_at: rec.submitted_at,
               completed_at: rec.completed_at,
               result,
               error,
               owner: rec.owner.clone() }
    }
}

/// Punto desde el que continúa un flight interrumpido.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub step_index: i64,
    pub direction: Direction,
    /// Fallos reintentables ya registrados para ese paso en esa dirección;
    /// se descuentan de su regla de reintento.
    pub prior_failures: u32,
}

/// Calcula dónde reanudar a partir de la dirección persistida y del log.
///
/// - DOING: siguiente índice tras el último `do` exitoso (0 si no hay).
/// - UNDOING: uno antes del menor `undo` exitoso; si todavía no hubo
///   ninguno, uno antes del paso cuyo `do` falló. Un paso cuyo `do` nunca
///   se completó no se compensa.
///
/// El resultado en UNDOING puede ser -1: no queda nada por deshacer.
pub fn resume_point(direction: Direction, records: &[StepExecutionRecord]) -> ResumePoint {
    let (step_index, direction) = resume_position(direction, records);
    let prior_failures = records.iter()
                                .rev()
                                .take_while(|r| {
                                    r.step_index == step_index
                                    && r.direction == direction
                                    && r.outcome == StepStatus::RetryableFailure
                                })
                                .count();
    ResumePoint { step_index,
                  direction,
                  prior_failures: u32::try_from(prior_failures).unwrap_or(u32::MAX) }
}

/// Registro de un undo que terminó en fallo definitivo, si lo hay. Un flight
/// así ya es FATAL aunque la caída haya impedido persistir el estado final.
pub fn failed_undo(records: &[StepExecutionRecord]) -> Option<&StepExecutionRecord> {
    records.iter()
           .rev()
           .find(|r| r.direction == Direction::Undoing && r.outcome == StepStatus::FatalFailure)
}

fn resume_position(direction: Direction, records: &[StepExecutionRecord]) -> (i64, Direction) {
    let last_done = records.iter()
                           .filter(|r| r.direction == Direction::Doing && r.outcome == StepStatus::Success)
                           .map(|r| r.step_index)
                           .max();
    match direction {
        Direction::Doing => (last_done.map_or(0, |i| i + 1), direction),
        Direction::Undoing => {
            let first_undone = records.iter()
                                      .filter(|r| r.direction == Direction::Undoing && r.outcome == StepStatus::Success)
                                      .map(|r| r.step_index)
                                      .min();
            let step_index = match first_undone {
                Some(i) => i - 1,
                None => {
                    let failed_at = records.iter()
                                           .filter(|r| r.direction == Direction::Doing && r.outcome == StepStatus::FatalFailure)
                                           .map(|r| r.step_index)
                                           .max()
                                           .unwrap_or_else(|| last_done.map_or(0, |i| i + 1));
                    failed_at - 1
                }
            };
            (step_index, direction)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(step_index: i64, direction: Direction, outcome: StepStatus) -> StepExecutionRecord {
        StepExecutionRecord { flight_id: Uuid::nil(),
                              step_index,
                              direction,
                              attempt: 1,
                              outcome,
                              error_detail: None,
                              recorded_at: Utc::now() }
    }

    #[test]
    fn doing_resumes_after_last_success() {
        assert_eq!(resume_point(Direction::Doing, &[]).step_index, 0);
        let log = vec![rec(0, Direction::Doing, StepStatus::Success),
                       rec(1, Direction::Doing, StepStatus::RetryableFailure),
                       rec(1, Direction::Doing, StepStatus::Success)];
        assert_eq!(resume_point(Direction::Doing, &log).step_index, 2);
    }

    #[test]
    fn undoing_starts_before_the_failed_step() {
        let log = vec![rec(0, Direction::Doing, StepStatus::Success),
                       rec(1, Direction::Doing, StepStatus::Success),
                       rec(2, Direction::Doing, StepStatus::FatalFailure)];
        let rp = resume_point(Direction::Undoing, &log);
        assert_eq!(rp,
                   ResumePoint { step_index: 1,
                                 direction: Direction::Undoing,
                                 prior_failures: 0 });
    }

    #[test]
    fn pending_retries_are_carried_over() {
        let log = vec![rec(0, Direction::Doing, StepStatus::RetryableFailure),
                       rec(0, Direction::Doing, StepStatus::Success),
                       rec(1, Direction::Doing, StepStatus::RetryableFailure),
                       rec(1, Direction::Doing, StepStatus::RetryableFailure)];
        let rp = resume_point(Direction::Doing, &log);
        assert_eq!((rp.step_index, rp.prior_failures), (1, 2));

        let undoing = vec![rec(0, Direction::Doing, StepStatus::Success),
                           rec(1, Direction::Doing, StepStatus::FatalFailure),
                           rec(0, Direction::Undoing, StepStatus::RetryableFailure)];
        let rp = resume_point(Direction::Undoing, &undoing);
        assert_eq!((rp.step_index, rp.prior_failures), (0, 1));
    }

    #[test]
    fn failed_undo_is_found_in_the_log() {
        let mut log = vec![rec(0, Direction::Doing, StepStatus::Success),
                           rec(1, Direction::Doing, StepStatus::FatalFailure)];
        assert!(failed_undo(&log).is_none());
        log.push(rec(0, Direction::Undoing, StepStatus::FatalFailure));
        assert_eq!(failed_undo(&log).map(|r| r.step_index), Some(0));
    }

    #[test]
    fn undoing_continues_below_last_compensated_step() {
        let log = vec![rec(0, Direction::Doing, StepStatus::Success),
                       rec(1, Direction::Doing, StepStatus::Success),
                       rec(2, Direction::Doing, StepStatus::FatalFailure),
                       rec(1, Direction::Undoing, StepStatus::Success)];
        assert_eq!(resume_point(Direction::Undoing, &log).step_index, 0);
    }

    #[test]
    fn failure_on_first_step_leaves_nothing_to_undo() {
        let log = vec![rec(0, Direction::Doing, StepStatus::FatalFailure)];
        assert_eq!(resume_point(Direction::Undoing, &log).step_index, -1);
    }

    #[test]
    fn failure_keeps_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disco lleno");
        let failure = StepFailure::from_error(&io).with_cause("reintentos agotados");
        assert_eq!(failure.message, "disco lleno");
        assert_eq!(failure.causes, vec!["reintentos agotados".to_string()]);
        assert_eq!(failure.to_string(), "disco lleno: reintentos agotados");
    }
}
