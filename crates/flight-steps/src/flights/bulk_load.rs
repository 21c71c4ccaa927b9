use crate::authz_step::VerifyAuthorizationStep;
use crate::keys::DATASET_ID;
use crate::load_tag_step::ComputeLoadTagStep;
use crate::lock_step::{ConflictPolicy, LoadLockStep, LoadUnlockStep};
use crate::policy::{IamAction, IamResourceType, PolicyDecisionPoint};
use flight::{Flight, FlightDefinition, FlightError, FlightMap, Result, RetryRule, Step, StepEntry};
use load_lock::LoadLockStore;
use std::sync::Arc;
use std::time::Duration;

pub const BULK_LOAD_CLASS: &str = "bulk-load";

/// Carga masiva sobre un dataset.
///
/// Plan del flight:
/// 0. verificar que el usuario pueda ingerir en el dataset
/// 1. fijar el load tag en el working map
/// 2. tomar el lock del tag (se libera si el flight se deshace)
/// 3. pasos del cuerpo, en el orden agregado
/// 4. liberar el lock
pub struct BulkLoadFlight {
  class_ref: String,
  pdp: Arc<dyn PolicyDecisionPoint>,
  locks: Arc<dyn LoadLockStore>,
  conflict_policy: ConflictPolicy,
  check_retry: RetryRule,
  body: Vec<StepEntry>,
}

impl BulkLoadFlight {
  pub fn new(pdp: Arc<dyn PolicyDecisionPoint>, locks: Arc<dyn LoadLockStore>) -> Self {
    Self { class_ref: BULK_LOAD_CLASS.to_string(),
           pdp,
           locks,
           conflict_policy: ConflictPolicy::FailFast,
           check_retry: RetryRule::exponential(Duration::from_millis(100), Duration::from_secs(2), 3),
           body: Vec::new() }
  }

  /// Registra la misma composición bajo otro `class_ref` (por ejemplo, con
  /// otro cuerpo).
  pub fn with_class_ref(mut self, class_ref: impl Into<String>) -> Self {
    self.class_ref = class_ref.into();
    self
  }

  pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
    self.conflict_policy = policy;
    self
  }

  /// Regla de reintento de la verificación de permisos.
  pub fn with_check_retry(mut self, retry: RetryRule) -> Self {
    self.check_retry = retry;
    self
  }

  pub fn with_body_step(mut self, step: Arc<dyn Step>, retry: RetryRule) -> Self {
    self.body.push(StepEntry { step, retry });
    self
  }
}

impl FlightDefinition for BulkLoadFlight {
  fn class_ref(&self) -> &str {
    &self.class_ref
  }

  fn build(&self, inputs: &FlightMap) -> Result<Flight> {
    let dataset_id = inputs.get::<String>(DATASET_ID)?
                           .ok_or_else(|| FlightError::MakeFlight(format!("{}: falta {}", self.class_ref, DATASET_ID)))?;
    let lock = LoadLockStep::new(self.locks.clone()).with_policy(self.conflict_policy.clone())
                                                    .release_on_undo();
    let mut builder =
      Flight::builder(self.class_ref.clone()).step_with_retry(VerifyAuthorizationStep::new(self.pdp.clone(),
                                                                                             IamResourceType::Dataset,
                                                                                             dataset_id,
                                                                                             IamAction::IngestData),
                                                              self.check_retry.clone())
                                             .step(ComputeLoadTagStep)
                                             .step(lock);
    for entry in &self.body {
      builder = builder.shared_step(entry.step.clone(), entry.retry.clone());
    }
    Ok(builder.step(LoadUnlockStep::new(self.locks.clone())).build())
  }
}
