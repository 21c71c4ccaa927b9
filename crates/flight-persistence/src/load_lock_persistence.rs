// Store Diesel que implementa `LoadLockStore`.
//
// La exclusión la da la clave primaria de `load_locks`: se intenta el
// INSERT y, si choca con la unicidad, se lee quién tiene el tag.
use crate::errors::{PersistenceError, Result as PResult};
use crate::pool::{build_pool, from_ts, pool_from_env, to_ts, DbPool, PooledConn};
use crate::schema;
use crate::schema::load_locks::dsl as l_dsl;
use chrono::Utc;
use diesel::prelude::*;
use load_lock::{validate_load_tag, LoadLock, LoadLockError, LoadLockStore, LockOutcome, Result};
use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

/// Veces que se reintenta si el dueño libera el tag entre el INSERT
/// fallido y la lectura.
const MAX_ACQUIRE_ROUNDS: usize = 8;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = schema::load_locks)]
struct LoadLockRow {
  pub load_tag: String,
  pub holder_flight_id: String,
  pub acquired_at_ts: i64,
}

impl LoadLockRow {
  fn into_lock(self) -> Result<LoadLock> {
    Ok(LoadLock { holder_flight_id: parse_holder(&self.holder_flight_id)?,
                  acquired_at: from_ts(self.acquired_at_ts)?,
                  load_tag: self.load_tag })
  }
}

fn parse_holder(raw: &str) -> Result<Uuid> {
  Uuid::parse_str(raw).map_err(|e| LoadLockError::Storage(format!("invalid uuid {}: {}", raw, e)))
}

pub struct DieselLoadLockStore {
  pool: Arc<DbPool>,
}

impl DieselLoadLockStore {
  pub fn new(database_url: &str, pool_size: u32) -> PResult<Self> {
    Ok(Self { pool: build_pool(database_url, pool_size)? })
  }

  pub fn from_pool(pool: Arc<DbPool>) -> Self {
    Self { pool }
  }

  fn conn(&self) -> Result<PooledConn> {
    self.pool
        .get()
        .map_err(|e| LoadLockError::Storage(format!("pool: {}", e)))
  }

  fn current_holder(&self, conn: &mut PooledConn, load_tag: &str) -> Result<Option<LoadLockRow>> {
    l_dsl::load_locks.filter(l_dsl::load_tag.eq(load_tag))
                     .first::<LoadLockRow>(conn)
                     .optional()
                     .map_err(|e| PersistenceError::from(e).into())
  }
}

pub fn new_from_env() -> PResult<DieselLoadLockStore> {
  Ok(DieselLoadLockStore::from_pool(pool_from_env()?))
}

impl LoadLockStore for DieselLoadLockStore {
  fn lock(&self, load_tag: &str, holder: &Uuid) -> Result<LockOutcome> {
    validate_load_tag(load_tag)?;
    let holder_s = holder.to_string();
    let mut conn = self.conn()?;
    for _ in 0..MAX_ACQUIRE_ROUNDS {
      let row = LoadLockRow { load_tag: load_tag.to_string(),
                              holder_flight_id: holder_s.clone(),
                              acquired_at_ts: to_ts(Utc::now()) };
      match diesel::insert_into(l_dsl::load_locks).values(&row).execute(&mut conn) {
        Ok(_) => {
          info!("load tag {} tomado por {}", load_tag, holder);
          return Ok(LockOutcome::Acquired);
        }
        Err(e) => {
          let e = PersistenceError::from(e);
          if !e.is_unique_violation() {
            return Err(e.into());
          }
        }
      }
      match self.current_holder(&mut conn, load_tag)? {
        Some(current) if current.holder_flight_id == holder_s => return Ok(LockOutcome::AlreadyHeldBySelf),
        Some(current) => {
          let other = parse_holder(&current.holder_flight_id)?;
          debug!("load tag {} en conflicto: lo tiene {}", load_tag, other);
          return Ok(LockOutcome::Conflict { holder: other });
        }
        None => continue,
      }
    }
    Err(LoadLockError::Storage(format!("no se pudo resolver el dueño de {} tras {} intentos", load_tag, MAX_ACQUIRE_ROUNDS)))
  }

  fn unlock(&self, load_tag: &str, holder: &Uuid) -> Result<bool> {
    let mut conn = self.conn()?;
    let deleted = diesel::delete(l_dsl::load_locks.filter(l_dsl::load_tag.eq(load_tag))
                                                  .filter(l_dsl::holder_flight_id.eq(holder.to_string())))
                                                  .execute(&mut conn)
                                                  .map_err(PersistenceError::from)?;
    if deleted > 0 {
      info!("load tag {} liberado por {}", load_tag, holder);
    }
    Ok(deleted > 0)
  }

  fn lookup(&self, load_tag: &str) -> Result<Option<LoadLock>> {
    let mut conn = self.conn()?;
    self.current_holder(&mut conn, load_tag)?
        .map(LoadLockRow::into_lock)
        .transpose()
  }

  fn list_locks(&self) -> Result<Vec<LoadLock>> {
    let mut conn = self.conn()?;
    let rows = l_dsl::load_locks.order(l_dsl::load_tag.asc())
                                .load::<LoadLockRow>(&mut conn)
                                .map_err(PersistenceError::from)?;
    rows.into_iter().map(LoadLockRow::into_lock).collect()
  }
}
