// Archivo: engine.rs
// Propósito: motor de flights. Acepta envíos, los ejecuta en un pool
// acotado de workers, expone el estado persistido, entrega la señal de
// apagado cooperativo y recupera flights tras un reinicio.
use crate::context::FlightContext;
use crate::definition::Flight;
use crate::domain::{failed_undo, resume_point, FlightProgress, FlightRecord, FlightState, FlightStatus, StepFailure, UserRequestInfo};
use crate::errors::{FlightError, Result};
use crate::flight_map::FlightMap;
use crate::hooks::FlightHook;
use crate::registry::FlightRegistry;
use crate::repository::FlightRepository;
use crate::runner::{FlightRunner, RunOutcome};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Configuración del motor.
///
/// - `max_workers`: flights que pueden ejecutarse a la vez. El resto espera
///   en cola (FIFO) dentro del proceso.
/// - `status_poll_interval`: cada cuánto `wait_for_flight` y `quiet_down`
///   vuelven a mirar el estado.
/// - `shutdown_timeout`: espera por defecto del apagado del proceso.
#[derive(Debug, Clone)]
pub struct FlightEngineConfig {
    pub max_workers: usize,
    pub status_poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for FlightEngineConfig {
    fn default() -> Self {
        Self { max_workers: 8,
               status_poll_interval: Duration::from_millis(100),
               shutdown_timeout: Duration::from_secs(30) }
    }
}

impl FlightEngineConfig {
    /// Lee la configuración desde variables de entorno (con `.env` si
    /// existe). Valores ausentes o inválidos usan el default.
    ///
    /// FLIGHT_MAX_WORKERS, FLIGHT_STATUS_POLL_MS, FLIGHT_SHUTDOWN_TIMEOUT_SECS
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();
        let max_workers = env_parse::<usize>("FLIGHT_MAX_WORKERS").filter(|n| *n > 0)
                                                                  .unwrap_or(defaults.max_workers);
        let status_poll_interval = env_parse::<u64>("FLIGHT_STATUS_POLL_MS").map(Duration::from_millis)
                                                                            .unwrap_or(defaults.status_poll_interval);
        let shutdown_timeout = env_parse::<u64>("FLIGHT_SHUTDOWN_TIMEOUT_SECS").map(Duration::from_secs)
                                                                               .unwrap_or(defaults.shutdown_timeout);
        Self { max_workers,
               status_poll_interval,
               shutdown_timeout }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{}={} no es válido; se usa el valor por defecto", key, raw);
            None
        }
    }
}

/// Motor de flights sobre un repositorio `R`.
///
/// Es barato de clonar: todos los clones comparten el pool de workers, el
/// registro y la tabla de flights activos.
pub struct FlightEngine<R: FlightRepository> {
    repo: Arc<R>,
    registry: Arc<FlightRegistry>,
    config: FlightEngineConfig,
    hooks: Arc<Vec<Arc<dyn FlightHook>>>,
    workers: Arc<Semaphore>,
    /// Flights con un worker asignado o esperando uno, con su señal de apagado.
    active: Arc<DashMap<Uuid, CancellationToken>>,
    accepting: Arc<AtomicBool>,
    /// Padre de todas las señales por flight; cancelarlo apaga el motor.
    shutdown: CancellationToken,
}

impl<R: FlightRepository> Clone for FlightEngine<R> {
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone(),
               registry: self.registry.clone(),
               config: self.config.clone(),
               hooks: self.hooks.clone(),
               workers: self.workers.clone(),
               active: self.active.clone(),
               accepting: self.accepting.clone(),
               shutdown: self.shutdown.clone() }
    }
}

impl<R: FlightRepository + 'static> FlightEngine<R> {
    pub fn new(repo: Arc<R>, registry: FlightRegistry, config: FlightEngineConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Self { repo,
               registry: Arc::new(registry),
               config,
               hooks: Arc::new(Vec::new()),
               workers,
               active: Arc::new(DashMap::new()),
               accepting: Arc::new(AtomicBool::new(true)),
               shutdown: CancellationToken::new() }
    }

    /// Agrega un hook. Debe llamarse antes de enviar flights.
    pub fn with_hook(mut self, hook: Arc<dyn FlightHook>) -> Self {
        Arc::make_mut(&mut self.hooks).push(hook);
        self
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn config(&self) -> &FlightEngineConfig {
        &self.config
    }

    /// Prepara el motor tras un arranque. Con `force_clean_start` descarta
    /// todo lo persistido; si no, relanza los flights QUEUED/RUNNING desde
    /// su punto de reanudación. Devuelve cuántos flights se relanzaron.
    pub fn initialize(&self, force_clean_start: bool) -> Result<usize> {
        if force_clean_start {
            warn!("arranque limpio forzado: se descartan todos los flights persistidos");
            self.repo.start_clean()?;
            return Ok(0);
        }
        let pending = self.repo.recover_flights()?;
        let mut relaunched = 0;
        for record in pending {
            if self.active.contains_key(&record.id) {
                continue;
            }
            if self.relaunch(record)? {
                relaunched += 1;
            }
        }
        info!("recuperación: {} flights relanzados", relaunched);
        Ok(relaunched)
    }

    /// Envía un flight con un id nuevo.
    pub fn submit(&self, class_ref: &str, inputs: FlightMap) -> Result<Uuid> {
        self.submit_with_id(Uuid::new_v4(), class_ref, inputs, None)
    }

    /// Envía un flight con id elegido por el caller. Un id ya usado es
    /// `Conflict`; una clase no registrada es `MakeFlight`.
    pub fn submit_with_id(&self, flight_id: Uuid, class_ref: &str, inputs: FlightMap, owner: Option<UserRequestInfo>) -> Result<Uuid> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(FlightError::ShuttingDown(format!("flight {} rechazado", flight_id)));
        }
        let flight = self.registry.make_flight(class_ref, &inputs)?;
        let record = FlightRecord::queued(flight_id, class_ref, inputs, owner);
        self.repo.create_flight(&record)?;
        let ctx = FlightContext::new(flight_id,
                                     class_ref,
                                     record.input_params.clone(),
                                     record.owner.clone(),
                                     self.shutdown.child_token());
        self.launch(flight, ctx)?;
        info!("flight {} ({}) encolado", flight_id, class_ref);
        Ok(flight_id)
    }

    /// Estado actual leído del almacenamiento.
    pub fn get_status(&self, flight_id: &Uuid) -> Result<FlightState> {
        Ok(FlightState::from(&self.repo.get_flight(flight_id)?))
    }

    /// Pide a un flight activo que se detenga en el próximo punto de
    /// interrupción. Devuelve `false` si el flight existe pero no está
    /// activo en este motor (terminado o aparcado).
    pub fn request_shutdown(&self, flight_id: &Uuid) -> Result<bool> {
        if let Some(token) = self.active.get(flight_id) {
            token.cancel();
            info!("flight {}: apagado solicitado", flight_id);
            return Ok(true);
        }
        self.repo.get_flight(flight_id)?;
        Ok(false)
    }

    /// Relanza un flight aparcado (no terminado y sin worker).
    pub fn resume_flight(&self, flight_id: &Uuid) -> Result<()> {
        let record = self.repo.get_flight(flight_id)?;
        if record.status.is_terminal() {
            return Err(FlightError::Conflict(format!("flight {} ya terminó en {}", flight_id, record.status)));
        }
        if self.active.contains_key(flight_id) {
            return Err(FlightError::Conflict(format!("flight {} ya está en ejecución", flight_id)));
        }
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(FlightError::ShuttingDown(format!("flight {} no se reanuda", flight_id)));
        }
        self.relaunch(record)?;
        Ok(())
    }

    /// Espera a que el flight llegue a un estado terminal. Si deja de estar
    /// activo sin terminar (aparcado), devuelve el estado tal cual.
    pub async fn wait_for_flight(&self, flight_id: &Uuid) -> Result<FlightState> {
        loop {
            let state = self.get_status(flight_id)?;
            if state.status.is_terminal() || !self.active.contains_key(flight_id) {
                return Ok(state);
            }
            tokio::time::sleep(self.config.status_poll_interval).await;
        }
    }

    pub fn list_flights(&self, offset: i64, limit: i64) -> Result<Vec<FlightState>> {
        Ok(self.repo
               .list_flights(offset, limit, None)?
               .iter()
               .map(FlightState::from)
               .collect())
    }

    pub fn list_flights_for_user(&self, offset: i64, limit: i64, user: &UserRequestInfo) -> Result<Vec<FlightState>> {
        Ok(self.repo
               .list_flights(offset, limit, Some(&user.subject_id))?
               .iter()
               .map(FlightState::from)
               .collect())
    }

    /// Sólo el dueño del flight puede verlo. Flights sin dueño son visibles
    /// para cualquiera.
    pub fn verify_flight_access(&self, flight_id: &Uuid, user: &UserRequestInfo) -> Result<()> {
        let record = self.repo.get_flight(flight_id)?;
        match record.owner {
            Some(owner) if owner.subject_id != user.subject_id => {
                Err(FlightError::Unauthorized(format!("{} no puede ver el flight {}", user.subject_id, flight_id)))
            }
            _ => Ok(()),
        }
    }

    /// Borra un flight que no esté en ejecución.
    pub fn delete_flight(&self, flight_id: &Uuid) -> Result<()> {
        if self.active.contains_key(flight_id) {
            return Err(FlightError::Conflict(format!("flight {} está en ejecución", flight_id)));
        }
        self.repo.delete_flight(flight_id)
    }

    pub fn active_flights(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, flight_id: &Uuid) -> bool {
        self.active.contains_key(flight_id)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Deja de aceptar envíos y espera a que terminen los flights activos.
    /// Devuelve `true` si no quedó ninguno antes de `timeout`.
    pub async fn quiet_down(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        info!("quiet down: esperando {} flights activos", self.active.len());
        self.wait_idle(timeout).await
    }

    /// Deja de aceptar envíos y manda la señal de apagado a todos los
    /// flights activos; espera a que aparquen hasta `timeout`.
    pub async fn terminate(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        info!("terminate: señal enviada a {} flights activos", self.active.len());
        self.wait_idle(timeout).await
    }

    async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.active.is_empty() {
            if Instant::now() >= deadline {
                warn!("{} flights siguen activos al vencer el plazo", self.active.len());
                return false;
            }
            tokio::time::sleep(self.config.status_poll_interval).await;
        }
        true
    }

    /// Reconstruye un flight persistido y lo lanza desde su punto de
    /// reanudación. Una clase que ya no está registrada, o un undo que ya
    /// falló, terminan en FATAL.
    fn relaunch(&self, record: FlightRecord) -> Result<bool> {
        let flight = match self.registry.make_flight(&record.class_ref, &record.input_params) {
            Ok(flight) => flight,
            Err(e) => {
                error!("flight {} no se puede reconstruir: {}", record.id, e);
                let progress = FlightProgress { status: FlightStatus::Fatal,
                                                direction: record.direction,
                                                working_state: record.working_state.clone(),
                                                error: Some(StepFailure::from_error(&e)) };
                self.repo.complete_flight(&record.id, &progress)?;
                return Ok(false);
            }
        };
        let steps = self.repo.read_steps(&record.id)?;
        // Un undo fallido es un fallo terminal aunque la caída haya impedido
        // marcarlo: se cierra como FATAL sin volver a ejecutar nada.
        if let Some(undo) = failed_undo(&steps) {
            warn!("flight {}: el undo del paso {} ya había fallado, queda FATAL", record.id, undo.step_index);
            let progress = FlightProgress { status: FlightStatus::Fatal,
                                            direction: record.direction,
                                            working_state: record.working_state.clone(),
                                            error: record.error.clone().or_else(|| undo.error_detail.clone()) };
            self.repo.complete_flight(&record.id, &progress)?;
            return Ok(false);
        }
        let resume = resume_point(record.direction, &steps);
        debug!("flight {} reanuda en {} paso {}", record.id, resume.direction, resume.step_index);
        let ctx = FlightContext::restore(&record, resume, self.shutdown.child_token());
        self.launch(flight, ctx)?;
        Ok(true)
    }

    /// Registra el flight como activo y lo ejecuta en cuanto haya worker.
    /// Si llega la señal de apagado mientras espera, queda sin tocar.
    fn launch(&self, flight: Flight, mut ctx: FlightContext) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| FlightError::Other(format!("sin runtime de tokio: {}", e)))?;
        let flight_id = ctx.flight_id();
        let token = ctx.cancellation().clone();
        self.active.insert(flight_id, token.clone());
        let workers = self.workers.clone();
        let active = self.active.clone();
        let runner = FlightRunner::new(self.repo.clone(), self.hooks.clone());
        handle.spawn(async move {
                  let permit = tokio::select! {
                      biased;
                      _ = token.cancelled() => None,
                      permit = workers.acquire_owned() => permit.ok(),
                  };
                  match permit {
                      Some(_permit) => match runner.run(&flight, &mut ctx).await {
                          RunOutcome::Completed(status) => debug!("flight {} completado: {}", flight_id, status),
                          RunOutcome::Parked => debug!("flight {} aparcado", flight_id),
                      },
                      None => info!("flight {} aparcado antes de obtener worker", flight_id),
                  }
                  active.remove(&flight_id);
              });
        Ok(())
    }
}
