// Archivo: context.rs
// Propósito: contexto que recibe cada paso: identidad del flight,
// parámetros de entrada, working map, posición actual y la señal de
// apagado cooperativo.
use crate::domain::{Direction, FlightRecord, ResumePoint, StepFailure, UserRequestInfo};
use crate::errors::Result;
use crate::flight_map::FlightMap;
use crate::step::Interrupted;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Estado en memoria de un flight en ejecución.
///
/// Los pasos sólo pueden modificar el working map; la posición y la
/// dirección las mueve el motor.
#[derive(Debug)]
pub struct FlightContext {
    flight_id: Uuid,
    class_ref: String,
    input_parameters: FlightMap,
    working_map: FlightMap,
    owner: Option<UserRequestInfo>,
    step_index: i64,
    direction: Direction,
    attempt: u32,
    carried_failures: u32,
    failure: Option<StepFailure>,
    cancel: CancellationToken,
}

impl FlightContext {
    pub fn new(flight_id: Uuid, class_ref: impl Into<String>, input_parameters: FlightMap, owner: Option<UserRequestInfo>, cancel: CancellationToken) -> Self {
        Self { flight_id,
               class_ref: class_ref.into(),
               input_parameters,
               working_map: FlightMap::new(),
               owner,
               step_index: 0,
               direction: Direction::Doing,
               attempt: 1,
               carried_failures: 0,
               failure: None,
               cancel }
    }

    /// Reconstruye el contexto de un flight persistido en el punto dado.
    pub fn restore(record: &FlightRecord, resume: ResumePoint, cancel: CancellationToken) -> Self {
        Self { flight_id: record.id,
               class_ref: record.class_ref.clone(),
               input_parameters: record.input_params.clone(),
               working_map: record.working_state.clone(),
               owner: record.owner.clone(),
               step_index: resume.step_index,
               direction: resume.direction,
               attempt: resume.prior_failures.saturating_add(1),
               carried_failures: resume.prior_failures,
               failure: record.error.clone(),
               cancel }
    }

    pub fn flight_id(&self) -> Uuid {
        self.flight_id
    }

    pub fn class_ref(&self) -> &str {
        &self.class_ref
    }

    pub fn input_parameters(&self) -> &FlightMap {
        &self.input_parameters
    }

    pub fn working_map(&self) -> &FlightMap {
        &self.working_map
    }

    pub fn working_map_mut(&mut self) -> &mut FlightMap {
        &mut self.working_map
    }

    pub fn owner(&self) -> Option<&UserRequestInfo> {
        self.owner.as_ref()
    }

    pub fn step_index(&self) -> i64 {
        self.step_index
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_doing(&self) -> bool {
        self.direction == Direction::Doing
    }

    /// Número de intento del paso actual (1 en el primer intento).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Fallo que provocó el undo, si el flight está deshaciendo.
    pub fn failure(&self) -> Option<&StepFailure> {
        self.failure.as_ref()
    }

    /// Busca `key` primero en los parámetros de entrada y luego en el
    /// working map.
    pub fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.input_parameters.get(key)? {
            Some(v) => Ok(Some(v)),
            None => self.working_map.get(key),
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> std::result::Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Ejecuta `fut` hasta que termine o hasta que llegue la señal de
    /// apagado, lo que ocurra primero.
    pub async fn interruptible<F: Future>(&self, fut: F) -> std::result::Result<F::Output, Interrupted> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted),
            out = fut => Ok(out),
        }
    }

    /// Espera interrumpible (backoff de reintentos, sondeos).
    pub async fn sleep(&self, delay: Duration) -> std::result::Result<(), Interrupted> {
        self.interruptible(tokio::time::sleep(delay)).await
    }

    /// Fallos previos al reinicio del paso actual; sólo los ve el primer
    /// paso que se ejecuta tras restaurar.
    pub(crate) fn take_carried_failures(&mut self) -> u32 {
        std::mem::take(&mut self.carried_failures)
    }

    pub(crate) fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Avanza al siguiente paso según la dirección actual.
    pub(crate) fn advance(&mut self) {
        match self.direction {
            Direction::Doing => self.step_index += 1,
            Direction::Undoing => self.step_index -= 1,
        }
    }

    /// Pasa a UNDOING empezando por el paso anterior al que falló.
    pub(crate) fn switch_to_undo(&mut self, failure: StepFailure) {
        self.direction = Direction::Undoing;
        self.failure = Some(failure);
        self.step_index -= 1;
    }

    pub(crate) fn set_failure(&mut self, failure: StepFailure) {
        self.failure = Some(failure);
    }

    /// Hay paso pendiente en la dirección actual para un flight de `len` pasos.
    /// En UNDOING el índice baja hasta -1, en DOING sube hasta `len`.
    pub(crate) fn has_step_to_do(&self, len: usize) -> bool {
        self.step_index >= 0 && (self.step_index as usize) < len
    }
}
