use crate::keys::{FILE_COUNT, FILES_LOADED};
use async_trait::async_trait;
use flight::{FlightContext, Step, StepFailure, StepOutcome, StepResult};
use log::info;
use std::time::Duration;

/// Cuerpo de demostración para la carga masiva: "ingiere" `file_count`
/// archivos con una pausa por archivo y anota cuántos cargó.
pub struct IngestFilesStep {
  per_file: Duration,
}

impl IngestFilesStep {
  pub fn new(per_file: Duration) -> Self {
    Self { per_file }
  }
}

#[async_trait]
impl Step for IngestFilesStep {
  fn name(&self) -> &str {
    "ingest-files"
  }

  async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
    let count = match ctx.lookup::<u64>(FILE_COUNT) {
      Ok(count) => count.unwrap_or(1),
      Err(e) => return Ok(StepOutcome::FatalFailure(StepFailure::from_error(&e))),
    };
    for _ in 0..count {
      ctx.sleep(self.per_file).await?;
    }
    info!("flight {}: {} archivos cargados", ctx.flight_id(), count);
    match ctx.working_map_mut().put(FILES_LOADED, count) {
      Ok(()) => Ok(StepOutcome::Success),
      Err(e) => Ok(StepOutcome::FatalFailure(StepFailure::from_error(&e))),
    }
  }

  async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
    ctx.working_map_mut().remove(FILES_LOADED);
    Ok(StepOutcome::Success)
  }
}
