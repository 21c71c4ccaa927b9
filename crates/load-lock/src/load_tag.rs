use crate::errors::{LoadLockError, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Largo máximo aceptado para un tag (columna `load_tag`).
pub const MAX_LOAD_TAG_LEN: usize = 255;

/// Devuelve `requested` si trae texto; si no, un tag derivado del instante
/// actual (`load-at-<RFC3339>`).
pub fn compute_load_tag(requested: Option<&str>) -> String {
    compute_load_tag_at(requested, Utc::now())
}

pub fn compute_load_tag_at(requested: Option<&str>, now: DateTime<Utc>) -> String {
    match requested.map(str::trim) {
        Some(tag) if !tag.is_empty() => tag.to_string(),
        _ => format!("load-at-{}", now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    }
}

pub fn validate_load_tag(load_tag: &str) -> Result<()> {
    if load_tag.trim().is_empty() {
        return Err(LoadLockError::InvalidTag("vacío".into()));
    }
    if load_tag.len() > MAX_LOAD_TAG_LEN {
        return Err(LoadLockError::InvalidTag(format!("más de {} bytes", MAX_LOAD_TAG_LEN)));
    }
    Ok(())
}
