use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Registro de lock: a lo sumo uno por `load_tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadLock {
    pub load_tag: String,
    pub holder_flight_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

/// Resultado de `lock`. Un conflicto no es un error: es una señal de
/// contención y el caller decide si falla o espera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    AlreadyHeldBySelf,
    Conflict { holder: Uuid },
}

impl LockOutcome {
    /// `true` si el caller quedó como dueño del tag.
    pub fn is_held(&self) -> bool {
        matches!(self, LockOutcome::Acquired | LockOutcome::AlreadyHeldBySelf)
    }
}

impl fmt::Display for LockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOutcome::Acquired => f.write_str("ACQUIRED"),
            LockOutcome::AlreadyHeldBySelf => f.write_str("ALREADY_HELD_BY_SELF"),
            LockOutcome::Conflict { holder } => write!(f, "CONFLICT (holder {})", holder),
        }
    }
}
