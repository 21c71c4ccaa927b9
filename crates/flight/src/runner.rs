// Archivo: runner.rs
// Propósito: ejecución de un flight dentro de un worker: recorre los pasos
// hacia adelante, aplica reintentos, deshace en orden inverso ante un fallo
// y persiste cada intento antes de avanzar.
use crate::context::FlightContext;
use crate::definition::{Flight, StepEntry};
use crate::domain::{Direction, FlightProgress, FlightStatus, StepExecutionRecord, StepFailure, StepStatus};
use crate::errors::{FlightError, Result};
use crate::hooks::FlightHook;
use crate::repository::FlightRepository;
use crate::step::StepOutcome;
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;

/// Cómo terminó la ejecución de un flight en este worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Llegó a un estado terminal persistido.
    Completed(FlightStatus),
    /// Se detuvo (apagado o almacenamiento no disponible) sin terminar. El
    /// flight sigue QUEUED/RUNNING y se reanuda en la próxima recuperación.
    Parked,
}

/// Resultado de recorrer los pasos en una dirección.
enum Pass {
    Completed,
    Failed(StepFailure),
    Interrupted,
}

enum StepRun {
    Success,
    Failed(StepFailure),
    Interrupted,
}

pub(crate) struct FlightRunner<R: FlightRepository> {
    repo: Arc<R>,
    hooks: Arc<Vec<Arc<dyn FlightHook>>>,
}

impl<R: FlightRepository + 'static> FlightRunner<R> {
    pub(crate) fn new(repo: Arc<R>, hooks: Arc<Vec<Arc<dyn FlightHook>>>) -> Self {
        Self { repo, hooks }
    }

    /// Ejecuta `flight` desde la posición de `ctx` hasta un estado terminal
    /// o hasta que llegue la señal de apagado.
    pub(crate) async fn run(&self, flight: &Flight, ctx: &mut FlightContext) -> RunOutcome {
        let flight_id = ctx.flight_id();
        if let Err(e) = self.blocking(move |repo| repo.mark_running(&flight_id)).await {
            error!("flight {}: no se pudo marcar RUNNING: {}", ctx.flight_id(), e);
            return RunOutcome::Parked;
        }
        for hook in self.hooks.iter() {
            hook.start_flight(ctx);
        }
        let status = match self.fly(flight, ctx).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                info!("flight {} aparcado en el paso {} ({})", ctx.flight_id(), ctx.step_index(), ctx.direction());
                return RunOutcome::Parked;
            }
            Err(e) => {
                error!("flight {}: fallo de almacenamiento, queda para recuperación: {}", ctx.flight_id(), e);
                return RunOutcome::Parked;
            }
        };
        let progress = FlightProgress { status,
                                        direction: ctx.direction(),
                                        working_state: ctx.working_map().clone(),
                                        error: match status {
                                            FlightStatus::Succeeded => None,
                                            _ => ctx.failure().cloned(),
                                        } };
        match self.blocking(move |repo| repo.complete_flight(&flight_id, &progress)).await {
            Ok(true) => {}
            Ok(false) => warn!("flight {} ya estaba terminado", ctx.flight_id()),
            Err(e) => {
                error!("flight {}: no se pudo persistir {}: {}", ctx.flight_id(), status, e);
                return RunOutcome::Parked;
            }
        }
        for hook in self.hooks.iter() {
            hook.end_flight(ctx, status);
        }
        RunOutcome::Completed(status)
    }

    /// `Ok(None)` significa interrumpido.
    async fn fly(&self, flight: &Flight, ctx: &mut FlightContext) -> Result<Option<FlightStatus>> {
        if ctx.is_doing() {
            match self.run_steps(flight, ctx).await? {
                Pass::Completed => return Ok(Some(FlightStatus::Succeeded)),
                Pass::Interrupted => return Ok(None),
                Pass::Failed(failure) => ctx.switch_to_undo(failure),
            }
        }
        match self.run_steps(flight, ctx).await? {
            Pass::Completed => Ok(Some(FlightStatus::Error)),
            Pass::Interrupted => Ok(None),
            Pass::Failed(undo_failure) => {
                let dismal = dismal_failure(&undo_failure, ctx.failure());
                ctx.set_failure(dismal);
                Ok(Some(FlightStatus::Fatal))
            }
        }
    }

    async fn run_steps(&self, flight: &Flight, ctx: &mut FlightContext) -> Result<Pass> {
        while ctx.has_step_to_do(flight.len()) {
            if ctx.is_cancelled() {
                return Ok(Pass::Interrupted);
            }
            let entry = match flight.entry(ctx.step_index()) {
                Some(entry) => entry,
                None => break,
            };
            match self.step_with_retry(entry, ctx).await? {
                StepRun::Success => ctx.advance(),
                StepRun::Failed(failure) => return Ok(Pass::Failed(failure)),
                StepRun::Interrupted => return Ok(Pass::Interrupted),
            }
        }
        Ok(Pass::Completed)
    }

    async fn step_with_retry(&self, entry: &StepEntry, ctx: &mut FlightContext) -> Result<StepRun> {
        let name = entry.step.name().to_string();
        let mut failures = ctx.take_carried_failures();
        loop {
            ctx.set_attempt(failures + 1);
            for hook in self.hooks.iter() {
                hook.start_step(ctx, &name);
            }
            let result = match ctx.direction() {
                Direction::Doing => entry.step.do_step(ctx).await,
                Direction::Undoing => entry.step.undo_step(ctx).await,
            };
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(_) => return Ok(StepRun::Interrupted),
            };
            for hook in self.hooks.iter() {
                hook.end_step(ctx, &name, &outcome);
            }
            match outcome {
                StepOutcome::Success => {
                    self.persist(ctx, StepStatus::Success, None).await?;
                    return Ok(StepRun::Success);
                }
                StepOutcome::FatalFailure(failure) => {
                    self.persist(ctx, StepStatus::FatalFailure, Some(&failure)).await?;
                    return Ok(StepRun::Failed(failure));
                }
                StepOutcome::RetryableFailure(failure) => {
                    failures += 1;
                    match entry.retry.next_delay(failures) {
                        Some(delay) => {
                            self.persist(ctx, StepStatus::RetryableFailure, Some(&failure)).await?;
                            info!("flight {} paso {} [{}] reintenta en {:?}", ctx.flight_id(), ctx.step_index(), name, delay);
                            if ctx.sleep(delay).await.is_err() {
                                return Ok(StepRun::Interrupted);
                            }
                        }
                        None => {
                            let failure = failure.with_cause(format!("reintentos agotados tras {} fallos", failures));
                            self.persist(ctx, StepStatus::FatalFailure, Some(&failure)).await?;
                            return Ok(StepRun::Failed(failure));
                        }
                    }
                }
            }
        }
    }

    /// Persiste el intento y el progreso del flight en una sola llamada.
    ///
    /// Un fallo fatal en DOING ya deja el flight en UNDOING, y uno en
    /// UNDOING deja como error el fallo del undo encadenado al original.
    async fn persist(&self, ctx: &FlightContext, outcome: StepStatus, failure: Option<&StepFailure>) -> Result<()> {
        let mut direction = ctx.direction();
        let mut error = ctx.failure().cloned();
        if let (StepStatus::FatalFailure, Some(f)) = (outcome, failure) {
            match direction {
                Direction::Doing => {
                    direction = Direction::Undoing;
                    error = Some(f.clone());
                }
                Direction::Undoing => error = Some(dismal_failure(f, ctx.failure())),
            }
        }
        let record = StepExecutionRecord { flight_id: ctx.flight_id(),
                                           step_index: ctx.step_index(),
                                           direction: ctx.direction(),
                                           attempt: ctx.attempt(),
                                           outcome,
                                           error_detail: failure.cloned(),
                                           recorded_at: Utc::now() };
        let progress = FlightProgress { status: FlightStatus::Running,
                                        direction,
                                        working_state: ctx.working_map().clone(),
                                        error };
        self.blocking(move |repo| repo.record_step(&record, &progress)).await
    }

    /// Las llamadas al repositorio son síncronas (y pueden esperar un lock
    /// de la base); corren en el pool bloqueante de tokio.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
        where T: Send + 'static,
              F: FnOnce(&R) -> Result<T> + Send + 'static
    {
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || op(&repo)).await
                                                      .map_err(|e| FlightError::Storage(format!("tarea de almacenamiento abortada: {}", e)))?
    }
}

/// Fallo de un undo con el fallo original del do agregado a sus causas.
fn dismal_failure(undo: &StepFailure, original: Option<&StepFailure>) -> StepFailure {
    match original {
        Some(original) => undo.clone().with_cause(format!("fallo original: {}", original)),
        None => undo.clone(),
    }
}
