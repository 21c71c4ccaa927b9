// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// Incluye un repositorio en memoria (`InMemoryFlightRepository`) y un paso
// guionado (`ScriptedStep`) que anota cada invocación en un `StepJournal`.
// Nada de esto es durable.
use crate::context::FlightContext;
use crate::domain::{Direction, FlightProgress, FlightRecord, FlightStatus, StepExecutionRecord, StepFailure};
use crate::errors::{FlightError, Result};
use crate::repository::FlightRepository;
use crate::step::{Interrupted, Step, StepOutcome, StepResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

// Minimal in-memory repository (not durable)
pub struct InMemoryFlightRepository {
    /// Flights indexados por id.
    flights: Mutex<HashMap<Uuid, FlightRecord>>,
    /// Log de intentos por flight.
    steps: Mutex<HashMap<Uuid, Vec<StepExecutionRecord>>>,
}

impl InMemoryFlightRepository {
    pub fn new() -> Self {
        Self { flights: Mutex::new(HashMap::new()),
               steps: Mutex::new(HashMap::new()) }
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `FlightError::Storage`.
    fn lock<'a, T>(&'a self, m: &'a Mutex<T>) -> std::result::Result<MutexGuard<'a, T>, FlightError> {
        m.lock().map_err(|e| FlightError::Storage(format!("mutex poisoned: {:?}", e)))
    }
}

impl Default for InMemoryFlightRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl FlightRepository for InMemoryFlightRepository {
    fn create_flight(&self, record: &FlightRecord) -> Result<()> {
        let mut flights = self.lock(&self.flights)?;
        if flights.contains_key(&record.id) {
            return Err(FlightError::Conflict(format!("flight {} ya existe", record.id)));
        }
        flights.insert(record.id, record.clone());
        Ok(())
    }

    fn get_flight(&self, flight_id: &Uuid) -> Result<FlightRecord> {
        self.lock(&self.flights)?
            .get(flight_id)
            .cloned()
            .ok_or(FlightError::NotFound(format!("flight {}", flight_id)))
    }

    fn list_flights(&self, offset: i64, limit: i64, owner_subject: Option<&str>) -> Result<Vec<FlightRecord>> {
        let flights = self.lock(&self.flights)?;
        let mut list: Vec<FlightRecord> = flights.values()
                                                 .filter(|f| match owner_subject {
                                                     Some(subject) => f.owner.as_ref().map(|o| o.subject_id.as_str()) == Some(subject),
                                                     None => true,
                                                 })
                                                 .cloned()
                                                 .collect();
        list.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        Ok(list.into_iter()
               .skip(offset.max(0) as usize)
               .take(limit.max(0) as usize)
               .collect())
    }

    fn mark_running(&self, flight_id: &Uuid) -> Result<()> {
        let mut flights = self.lock(&self.flights)?;
        let rec = flights.get_mut(flight_id)
                         .ok_or(FlightError::NotFound(format!("flight {}", flight_id)))?;
        if rec.status == FlightStatus::Queued {
            rec.status = FlightStatus::Running;
            rec.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Ambos mutex se toman antes de escribir para que el log y el
    /// progreso cambien juntos.
    fn record_step(&self, record: &StepExecutionRecord, progress: &FlightProgress) -> Result<()> {
        let mut flights = self.lock(&self.flights)?;
        let mut steps = self.lock(&self.steps)?;
        let rec = flights.get_mut(&record.flight_id)
                         .ok_or(FlightError::NotFound(format!("flight {}", record.flight_id)))?;
        rec.status = progress.status;
        rec.direction = progress.direction;
        rec.working_state = progress.working_state.clone();
        rec.error = progress.error.clone();
        rec.updated_at = Utc::now();
        steps.entry(record.flight_id).or_default().push(record.clone());
        Ok(())
    }

    fn read_steps(&self, flight_id: &Uuid) -> Result<Vec<StepExecutionRecord>> {
        Ok(self.lock(&self.steps)?
               .get(flight_id)
               .cloned()
               .unwrap_or_default())
    }

    fn complete_flight(&self, flight_id: &Uuid, progress: &FlightProgress) -> Result<bool> {
        let mut flights = self.lock(&self.flights)?;
        let rec = flights.get_mut(flight_id)
                         .ok_or(FlightError::NotFound(format!("flight {}", flight_id)))?;
        if rec.status.is_terminal() {
            return Ok(false);
        }
        let now = Utc::now();
        rec.status = progress.status;
        rec.direction = progress.direction;
        rec.working_state = progress.working_state.clone();
        rec.error = progress.error.clone();
        rec.updated_at = now;
        rec.completed_at = Some(now);
        Ok(true)
    }

    fn recover_flights(&self) -> Result<Vec<FlightRecord>> {
        let flights = self.lock(&self.flights)?;
        let mut list: Vec<FlightRecord> = flights.values()
                                                 .filter(|f| !f.status.is_terminal())
                                                 .cloned()
                                                 .collect();
        list.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(list)
    }

    fn delete_flight(&self, flight_id: &Uuid) -> Result<()> {
        let mut flights = self.lock(&self.flights)?;
        let mut steps = self.lock(&self.steps)?;
        if flights.remove(flight_id).is_none() {
            return Err(FlightError::NotFound(format!("flight {}", flight_id)));
        }
        steps.remove(flight_id);
        Ok(())
    }

    fn start_clean(&self) -> Result<()> {
        let mut flights = self.lock(&self.flights)?;
        let mut steps = self.lock(&self.steps)?;
        flights.clear();
        steps.clear();
        Ok(())
    }
}

/// Acción que ejecuta un `ScriptedStep` en una invocación.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedAction {
    Succeed,
    Retry(String),
    Fail(String),
    /// Queda bloqueado hasta recibir la señal de apagado.
    WaitForCancel,
}

/// Registro compartido de invocaciones `(paso, dirección)` en orden.
#[derive(Debug, Default)]
pub struct StepJournal {
    entries: Mutex<Vec<(String, Direction)>>,
}

impl StepJournal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, step: &str, direction: Direction) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((step.to_string(), direction));
    }

    pub fn entries(&self) -> Vec<(String, Direction)> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls(&self, step: &str, direction: Direction) -> usize {
        self.entries()
            .iter()
            .filter(|(s, d)| s == step && *d == direction)
            .count()
    }

    /// Nombres de los pasos invocados en `direction`, en orden.
    pub fn order(&self, direction: Direction) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(_, d)| *d == direction)
            .map(|(s, _)| s)
            .collect()
    }

    /// Espera (sondeando) a que `step` acumule `count` invocaciones.
    pub async fn wait_for_calls(&self, step: &str, direction: Direction, count: usize) {
        while self.calls(step, direction) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Paso de prueba cuyo comportamiento sigue un guion por invocación.
/// Cuando el guion se agota, las invocaciones siguientes tienen éxito.
pub struct ScriptedStep {
    name: String,
    journal: Arc<StepJournal>,
    do_script: Mutex<VecDeque<ScriptedAction>>,
    undo_script: Mutex<VecDeque<ScriptedAction>>,
    writes: Vec<(String, JsonValue)>,
}

impl ScriptedStep {
    pub fn new(name: impl Into<String>, journal: Arc<StepJournal>) -> Self {
        Self { name: name.into(),
               journal,
               do_script: Mutex::new(VecDeque::new()),
               undo_script: Mutex::new(VecDeque::new()),
               writes: Vec::new() }
    }

    pub fn on_do(self, script: Vec<ScriptedAction>) -> Self {
        *self.do_script.lock().unwrap_or_else(|e| e.into_inner()) = script.into();
        self
    }

    pub fn on_undo(self, script: Vec<ScriptedAction>) -> Self {
        *self.undo_script.lock().unwrap_or_else(|e| e.into_inner()) = script.into();
        self
    }

    /// Clave que el `do` exitoso escribe en el working map.
    pub fn writes(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.writes.push((key.into(), value));
        self
    }

    fn next(&self, script: &Mutex<VecDeque<ScriptedAction>>) -> ScriptedAction {
        script.lock()
              .unwrap_or_else(|e| e.into_inner())
              .pop_front()
              .unwrap_or(ScriptedAction::Succeed)
    }

    async fn play(&self, action: ScriptedAction, ctx: &mut FlightContext) -> StepResult {
        match action {
            ScriptedAction::Succeed => Ok(StepOutcome::Success),
            ScriptedAction::Retry(m) => Ok(StepOutcome::RetryableFailure(StepFailure::new(m))),
            ScriptedAction::Fail(m) => Ok(StepOutcome::FatalFailure(StepFailure::new(m))),
            ScriptedAction::WaitForCancel => {
                ctx.cancellation().cancelled().await;
                Err(Interrupted)
            }
        }
    }
}

#[async_trait]
impl Step for ScriptedStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.journal.record(&self.name, Direction::Doing);
        let action = self.next(&self.do_script);
        let outcome = self.play(action, ctx).await?;
        if outcome.is_success() {
            for (key, value) in &self.writes {
                if let Err(e) = ctx.working_map_mut().put(key.clone(), value.clone()) {
                    return Ok(StepOutcome::FatalFailure(StepFailure::from_error(&e)));
                }
            }
        }
        Ok(outcome)
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.journal.record(&self.name, Direction::Undoing);
        let action = self.next(&self.undo_script);
        self.play(action, ctx).await
    }
}
