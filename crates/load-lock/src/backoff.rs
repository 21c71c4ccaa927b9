// Archivo: backoff.rs
// Propósito: adquisición con espera. El store nunca bloquea; este helper
// repite `lock` mientras haya conflicto, esperando según una `RetryRule`.
use crate::domain::LockOutcome;
use crate::errors::{LoadLockError, Result};
use crate::store::LoadLockStore;
use flight::RetryRule;
use log::debug;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Intenta tomar `load_tag` hasta obtenerlo o agotar `rule`. Devuelve el
/// último resultado (que puede seguir siendo `Conflict`). La espera entre
/// intentos se corta con `cancel` y devuelve `Interrupted`.
pub async fn lock_with_backoff<S>(store: &S, load_tag: &str, holder: &Uuid, rule: &RetryRule, cancel: &CancellationToken) -> Result<LockOutcome>
    where S: LoadLockStore + ?Sized
{
    let mut conflicts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(LoadLockError::Interrupted);
        }
        let outcome = store.lock(load_tag, holder)?;
        let holder_now = match outcome {
            LockOutcome::Conflict { holder } => holder,
            held => return Ok(held),
        };
        conflicts += 1;
        let delay = match rule.next_delay(conflicts) {
            Some(delay) => delay,
            None => return Ok(outcome),
        };
        debug!("load tag {} tomado por {}; reintento {} en {:?}", load_tag, holder_now, conflicts, delay);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LoadLockError::Interrupted),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
