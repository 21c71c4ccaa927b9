// Pasos de lock y unlock del load tag.
//
// Ninguno de los dos compensa por defecto: el unlock es idempotente y va al
// final del flight. `LoadLockStep::release_on_undo` agrega la liberación
// como compensación para flights que fallan después de tomar el lock.
use crate::load_tag_step::resolve_load_tag;
use async_trait::async_trait;
use flight::{FlightContext, Interrupted, RetryRule, Step, StepFailure, StepOutcome, StepResult};
use load_lock::{lock_with_backoff, LoadLockError, LoadLockStore, LockOutcome};
use log::{info, warn};
use std::sync::Arc;

/// Qué hace el paso de lock cuando otro flight tiene el tag.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConflictPolicy {
  /// Falla el flight de inmediato (no reintentable).
  #[default]
  FailFast,
  /// Espera y reintenta según la regla; si se agota, falla el flight.
  Retry(RetryRule),
}

/// Traduce un error del store al resultado del paso.
fn store_failure(e: LoadLockError) -> StepResult {
  match e {
    LoadLockError::Interrupted => Err(Interrupted),
    LoadLockError::Storage(_) => Ok(StepOutcome::RetryableFailure(StepFailure::from_error(&e))),
    LoadLockError::InvalidTag(_) => Ok(StepOutcome::FatalFailure(StepFailure::from_error(&e))),
  }
}

pub struct LoadLockStep {
  store: Arc<dyn LoadLockStore>,
  policy: ConflictPolicy,
  release_on_undo: bool,
}

impl LoadLockStep {
  pub fn new(store: Arc<dyn LoadLockStore>) -> Self {
    Self { store,
           policy: ConflictPolicy::FailFast,
           release_on_undo: false }
  }

  pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Libera el tag al deshacer el flight.
  pub fn release_on_undo(mut self) -> Self {
    self.release_on_undo = true;
    self
  }

  pub fn policy(&self) -> &ConflictPolicy {
    &self.policy
  }
}

#[async_trait]
impl Step for LoadLockStep {
  fn name(&self) -> &str {
    "load-lock"
  }

  async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
    let tag = match resolve_load_tag(ctx) {
      Ok(tag) => tag,
      Err(failure) => return Ok(StepOutcome::FatalFailure(failure)),
    };
    let holder = ctx.flight_id();
    let attempt = match &self.policy {
      ConflictPolicy::FailFast => self.store.lock(&tag, &holder),
      ConflictPolicy::Retry(rule) => lock_with_backoff(self.store.as_ref(), &tag, &holder, rule, ctx.cancellation()).await,
    };
    match attempt {
      Ok(LockOutcome::Acquired) | Ok(LockOutcome::AlreadyHeldBySelf) => Ok(StepOutcome::Success),
      Ok(LockOutcome::Conflict { holder: other }) => {
        warn!("flight {}: load tag {} tomado por el flight {}", holder, tag, other);
        Ok(StepOutcome::FatalFailure(StepFailure::new(format!("load tag {} en uso por el flight {}", tag, other))))
      }
      Err(e) => store_failure(e),
    }
  }

  async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
    if !self.release_on_undo {
      return Ok(StepOutcome::Success);
    }
    // Sin tag no pudo haberse tomado nada.
    let Ok(tag) = resolve_load_tag(ctx) else {
      return Ok(StepOutcome::Success);
    };
    match self.store.unlock(&tag, &ctx.flight_id()) {
      Ok(released) => {
        if released {
          info!("flight {}: load tag {} liberado al deshacer", ctx.flight_id(), tag);
        }
        Ok(StepOutcome::Success)
      }
      Err(e) => store_failure(e),
    }
  }
}

/// Libera el tag del flight. Siempre termina bien, aunque el tag no estuviera
/// tomado o el store falle, y no tiene compensación.
pub struct LoadUnlockStep {
  store: Arc<dyn LoadLockStore>,
}

impl LoadUnlockStep {
  pub fn new(store: Arc<dyn LoadLockStore>) -> Self {
    Self { store }
  }
}

#[async_trait]
impl Step for LoadUnlockStep {
  fn name(&self) -> &str {
    "load-unlock"
  }

  async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
    let Ok(tag) = resolve_load_tag(ctx) else {
      return Ok(StepOutcome::Success);
    };
    // La carga ya terminó: un error del store no debe deshacerla. El tag
    // queda tomado por este flight y se libera a mano.
    if let Err(e) = self.store.unlock(&tag, &ctx.flight_id()) {
      warn!("flight {}: no se pudo liberar el load tag {}: {}", ctx.flight_id(), tag, e);
    }
    Ok(StepOutcome::Success)
  }
}
