// Colaborador de políticas en memoria para tests y para la demo.
use crate::policy::{IamAction, IamResourceType, PolicyDecisionPoint, PolicyError};
use async_trait::async_trait;
use flight::UserRequestInfo;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Grant = (String, IamResourceType, String, IamAction);

/// Autoriza sólo lo concedido con `grant`. Puede simular latencia y caídas
/// pasajeras del servicio.
#[derive(Default)]
pub struct StaticPolicyDecisionPoint {
  grants: Mutex<HashSet<Grant>>,
  allow_all: bool,
  latency: Option<Duration>,
  outages: AtomicU32,
  calls: AtomicU32,
}

impl StaticPolicyDecisionPoint {
  pub fn new() -> Self {
    Self::default()
  }

  /// Autoriza cualquier consulta.
  pub fn permissive() -> Self {
    Self { allow_all: true,
           ..Self::default() }
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  /// Las próximas `n` consultas responden `Unavailable`.
  pub fn with_outages(self, n: u32) -> Self {
    self.outages.store(n, Ordering::SeqCst);
    self
  }

  pub fn grant(&self, subject_id: &str, resource_type: IamResourceType, resource_id: &str, action: IamAction) {
    self.grants
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert((subject_id.to_string(), resource_type, resource_id.to_string(), action));
  }

  pub fn calls(&self) -> u32 {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl PolicyDecisionPoint for StaticPolicyDecisionPoint {
  async fn is_authorized(&self,
                         user: &UserRequestInfo,
                         resource_type: IamResourceType,
                         resource_id: &str,
                         action: IamAction)
                         -> Result<bool, PolicyError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(latency) = self.latency {
      tokio::time::sleep(latency).await;
    }
    let in_outage = self.outages
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok();
    if in_outage {
      return Err(PolicyError::Unavailable("simulada".into()));
    }
    if self.allow_all {
      return Ok(true);
    }
    let key = (user.subject_id.clone(), resource_type, resource_id.to_string(), action);
    Ok(self.grants.lock().unwrap_or_else(|e| e.into_inner()).contains(&key))
  }
}
