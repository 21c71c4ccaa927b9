use crate::policy::{IamAction, IamResourceType, PolicyDecisionPoint};
use async_trait::async_trait;
use flight::{FlightContext, Step, StepFailure, StepOutcome, StepResult};
use log::{debug, warn};
use std::sync::Arc;

/// Verifica que el usuario del flight pueda ejecutar `action` sobre el
/// recurso. No tiene compensación: una consulta no deja nada que deshacer.
///
/// La consulta corre bajo la señal de apagado del flight; si llega mientras
/// el colaborador responde, el paso devuelve `Interrupted` en lugar de
/// esperar la respuesta.
pub struct VerifyAuthorizationStep {
  pdp: Arc<dyn PolicyDecisionPoint>,
  resource_type: IamResourceType,
  resource_id: String,
  action: IamAction,
}

impl VerifyAuthorizationStep {
  pub fn new(pdp: Arc<dyn PolicyDecisionPoint>,
             resource_type: IamResourceType,
             resource_id: impl Into<String>,
             action: IamAction)
             -> Self {
    Self { pdp,
           resource_type,
           resource_id: resource_id.into(),
           action }
  }
}

#[async_trait]
impl Step for VerifyAuthorizationStep {
  fn name(&self) -> &str {
    "verify-authorization"
  }

  async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
    let user = match ctx.owner() {
      Some(user) => user.clone(),
      None => return Ok(StepOutcome::fatal("el flight no tiene usuario que autorizar")),
    };
    let decision = ctx.interruptible(self.pdp
                                         .is_authorized(&user, self.resource_type, &self.resource_id, self.action))
                      .await?;
    match decision {
      Ok(true) => {
        debug!("{} autorizado para {} sobre {} {}",
               user.subject_id, self.action, self.resource_type, self.resource_id);
        Ok(StepOutcome::Success)
      }
      Ok(false) => Ok(StepOutcome::FatalFailure(StepFailure::new(format!("{} no tiene permiso {} sobre {} {}",
                                                                         user.subject_id,
                                                                         self.action,
                                                                         self.resource_type,
                                                                         self.resource_id)))),
      Err(e) if e.is_transient() => {
        warn!("consulta de autorización fallida, se reintenta: {}", e);
        Ok(StepOutcome::RetryableFailure(StepFailure::from_error(&e)))
      }
      Err(e) => Ok(StepOutcome::FatalFailure(StepFailure::from_error(&e))),
    }
  }
}
