use crate::domain::{LoadLock, LockOutcome};
use crate::errors::{LoadLockError, Result};
use crate::load_tag::validate_load_tag;
use crate::store::LoadLockStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Implementación en memoria para tests y desarrollo. El mutex hace que
/// leer y escribir el dueño sea atómico dentro del proceso.
#[derive(Debug, Default)]
pub struct InMemoryLoadLockStore {
    locks: Mutex<HashMap<String, LoadLock>>,
}

impl InMemoryLoadLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<MutexGuard<'_, HashMap<String, LoadLock>>> {
        self.locks
            .lock()
            .map_err(|e| LoadLockError::Storage(format!("mutex poisoned: {:?}", e)))
    }
}

impl LoadLockStore for InMemoryLoadLockStore {
    fn lock(&self, load_tag: &str, holder: &Uuid) -> Result<LockOutcome> {
        validate_load_tag(load_tag)?;
        let mut locks = self.guard()?;
        match locks.get(load_tag) {
            Some(current) if current.holder_flight_id == *holder => Ok(LockOutcome::AlreadyHeldBySelf),
            Some(current) => Ok(LockOutcome::Conflict { holder: current.holder_flight_id }),
            None => {
                locks.insert(load_tag.to_string(),
                             LoadLock { load_tag: load_tag.to_string(),
                                        holder_flight_id: *holder,
                                        acquired_at: Utc::now() });
                Ok(LockOutcome::Acquired)
            }
        }
    }

    fn unlock(&self, load_tag: &str, holder: &Uuid) -> Result<bool> {
        let mut locks = self.guard()?;
        match locks.get(load_tag) {
            Some(current) if current.holder_flight_id == *holder => {
                locks.remove(load_tag);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn lookup(&self, load_tag: &str) -> Result<Option<LoadLock>> {
        Ok(self.guard()?.get(load_tag).cloned())
    }

    fn list_locks(&self) -> Result<Vec<LoadLock>> {
        let mut all: Vec<LoadLock> = self.guard()?.values().cloned().collect();
        all.sort_by(|a, b| a.load_tag.cmp(&b.load_tag));
        Ok(all)
    }
}
