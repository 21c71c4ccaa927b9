use crate::keys::LOAD_TAG;
use async_trait::async_trait;
use flight::{FlightContext, Step, StepFailure, StepOutcome, StepResult};
use load_lock::compute_load_tag;

/// Load tag vigente del flight: el del input si no está en blanco, si no
/// el que dejó `ComputeLoadTagStep` en el working map.
pub fn resolve_load_tag(ctx: &FlightContext) -> Result<String, StepFailure> {
  let requested = ctx.input_parameters()
                     .get::<String>(LOAD_TAG)
                     .map_err(|e| StepFailure::from_error(&e))?;
  if let Some(tag) = requested.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
    return Ok(tag.to_string());
  }
  ctx.working_map()
     .get::<String>(LOAD_TAG)
     .map_err(|e| StepFailure::from_error(&e))?
     .ok_or_else(|| StepFailure::new("el flight no tiene load tag"))
}

/// Fija el load tag del flight en el working map.
///
/// Si el working map ya tiene uno (re-ejecución tras reinicio) se conserva,
/// así lock y unlock ven siempre el mismo valor.
pub struct ComputeLoadTagStep;

#[async_trait]
impl Step for ComputeLoadTagStep {
  fn name(&self) -> &str {
    "compute-load-tag"
  }

  async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
    if ctx.working_map().contains_key(LOAD_TAG) {
      return Ok(StepOutcome::Success);
    }
    let requested = match ctx.input_parameters().get::<String>(LOAD_TAG) {
      Ok(requested) => requested,
      Err(e) => return Ok(StepOutcome::FatalFailure(StepFailure::from_error(&e))),
    };
    let tag = compute_load_tag(requested.as_deref());
    match ctx.working_map_mut().put(LOAD_TAG, tag) {
      Ok(()) => Ok(StepOutcome::Success),
      Err(e) => Ok(StepOutcome::FatalFailure(StepFailure::from_error(&e))),
    }
  }
}
