// Repositorio Diesel que implementa `FlightRepository`.
//
// `record_step` escribe la fila del intento y actualiza el flight dentro de
// la misma transacción; `complete_flight` sólo toca flights no terminados.
use crate::errors::{PersistenceError, Result as PResult};
use crate::pool::{build_pool, from_ts, pool_from_env, to_ts, DbPool, PooledConn};
use crate::schema;
use crate::schema::flights::dsl as f_dsl;
use crate::schema::step_executions::dsl as s_dsl;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use flight::{Direction, FlightError, FlightMap, FlightProgress, FlightRecord, FlightRepository, FlightStatus, Result, StepExecutionRecord,
             StepFailure, StepStatus, UserRequestInfo};
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

const OPEN_STATUSES: [&str; 2] = ["QUEUED", "RUNNING"];

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = schema::flights)]
struct FlightRow {
  pub id: String,
  pub class_ref: String,
  pub status: String,
  pub direction: String,
  pub input_params: String,
  pub working_state: String,
  pub error_detail: Option<String>,
  pub owner_subject: Option<String>,
  pub owner_email: Option<String>,
  pub submitted_at_ts: i64,
  pub updated_at_ts: i64,
  pub completed_at_ts: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = schema::step_executions)]
struct StepExecutionRow {
  pub flight_id: String,
  pub seq: i64,
  pub step_index: i64,
  pub direction: String,
  pub attempt: i32,
  pub outcome: String,
  pub error_detail: Option<String>,
  pub recorded_at_ts: i64,
}

fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T> {
  res.map_err(|e| FlightError::Storage(format!("db: {}", e)))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
  Uuid::parse_str(raw).map_err(|e| FlightError::Storage(format!("invalid uuid {}: {}", raw, e)))
}

fn failure_to_json(failure: &Option<StepFailure>) -> Result<Option<String>> {
  match failure {
    Some(f) => Ok(Some(serde_json::to_string(f)?)),
    None => Ok(None),
  }
}

fn failure_from_json(raw: Option<&str>) -> Result<Option<StepFailure>> {
  match raw {
    Some(s) => Ok(Some(serde_json::from_str(s)?)),
    None => Ok(None),
  }
}

impl FlightRow {
  fn from_record(rec: &FlightRecord) -> Result<Self> {
    Ok(Self { id: rec.id.to_string(),
              class_ref: rec.class_ref.clone(),
              status: rec.status.as_str().to_string(),
              direction: rec.direction.as_str().to_string(),
              input_params: rec.input_params.to_json()?,
              working_state: rec.working_state.to_json()?,
              error_detail: failure_to_json(&rec.error)?,
              owner_subject: rec.owner.as_ref().map(|o| o.subject_id.clone()),
              owner_email: rec.owner.as_ref().and_then(|o| o.email.clone()),
              submitted_at_ts: to_ts(rec.submitted_at),
              updated_at_ts: to_ts(rec.updated_at),
              completed_at_ts: rec.completed_at.map(to_ts) })
  }

  fn into_record(self) -> Result<FlightRecord> {
    let owner = self.owner_subject.map(|subject_id| UserRequestInfo { subject_id,
                                                                      email: self.owner_email.clone() });
    Ok(FlightRecord { id: parse_uuid(&self.id)?,
                      class_ref: self.class_ref,
                      status: self.status.parse::<FlightStatus>()?,
                      direction: self.direction.parse::<Direction>()?,
                      input_params: FlightMap::from_json(&self.input_params)?,
                      working_state: FlightMap::from_json(&self.working_state)?,
                      error: failure_from_json(self.error_detail.as_deref())?,
                      owner,
                      submitted_at: from_ts(self.submitted_at_ts)?,
                      updated_at: from_ts(self.updated_at_ts)?,
                      completed_at: self.completed_at_ts.map(from_ts).transpose()? })
  }
}

impl StepExecutionRow {
  fn into_record(self) -> Result<StepExecutionRecord> {
    Ok(StepExecutionRecord { flight_id: parse_uuid(&self.flight_id)?,
                             step_index: self.step_index,
                             direction: self.direction.parse::<Direction>()?,
                             attempt: u32::try_from(self.attempt).map_err(|_| FlightError::Storage(format!("attempt inválido: {}", self.attempt)))?,
                             outcome: self.outcome.parse::<StepStatus>()?,
                             error_detail: failure_from_json(self.error_detail.as_deref())?,
                             recorded_at: from_ts(self.recorded_at_ts)? })
  }
}

/// Repo Diesel que implementa `FlightRepository`.
pub struct DieselFlightRepository {
  pool: Arc<DbPool>,
}

impl DieselFlightRepository {
  /// Abre (o crea) la base en `database_url` con un pool propio.
  pub fn new(database_url: &str, pool_size: u32) -> PResult<Self> {
    Ok(Self { pool: build_pool(database_url, pool_size)? })
  }

  /// Usa un pool ya creado (por ejemplo, compartido con el store de locks).
  pub fn from_pool(pool: Arc<DbPool>) -> Self {
    Self { pool }
  }

  fn conn(&self) -> Result<PooledConn> {
    self.pool
        .get()
        .map_err(|e| FlightError::Storage(format!("pool: {}", e)))
  }

  fn exists(&self, conn: &mut PooledConn, id_s: &str) -> Result<bool> {
    let n: i64 = map_db_err(f_dsl::flights.filter(f_dsl::id.eq(id_s)).count().get_result(conn))?;
    Ok(n > 0)
  }
}

/// Repositorio configurado desde el entorno (ver `pool::database_url_from_env`).
pub fn new_from_env() -> PResult<DieselFlightRepository> {
  Ok(DieselFlightRepository::from_pool(pool_from_env()?))
}

impl FlightRepository for DieselFlightRepository {
  fn create_flight(&self, record: &FlightRecord) -> Result<()> {
    let row = FlightRow::from_record(record)?;
    let mut conn = self.conn()?;
    match diesel::insert_into(f_dsl::flights).values(&row).execute(&mut conn) {
      Ok(_) => Ok(()),
      Err(e) => {
        let e = PersistenceError::from(e);
        if e.is_unique_violation() {
          Err(FlightError::Conflict(format!("flight {} ya existe", record.id)))
        } else {
          Err(e.into())
        }
      }
    }
  }

  fn get_flight(&self, flight_id: &Uuid) -> Result<FlightRecord> {
    let mut conn = self.conn()?;
    let row = map_db_err(f_dsl::flights.filter(f_dsl::id.eq(flight_id.to_string()))
                                       .first::<FlightRow>(&mut conn)
                                       .optional())?;
    match row {
      Some(r) => r.into_record(),
      None => Err(FlightError::NotFound(format!("flight {}", flight_id))),
    }
  }

  fn list_flights(&self, offset: i64, limit: i64, owner_subject: Option<&str>) -> Result<Vec<FlightRecord>> {
    let mut conn = self.conn()?;
    let mut query = f_dsl::flights.into_boxed();
    if let Some(subject) = owner_subject {
      query = query.filter(f_dsl::owner_subject.eq(subject.to_string()));
    }
    let rows = map_db_err(query.order((f_dsl::submitted_at_ts.asc(), f_dsl::id.asc()))
                               .offset(offset.max(0))
                               .limit(limit.max(0))
                               .load::<FlightRow>(&mut conn))?;
    rows.into_iter().map(FlightRow::into_record).collect()
  }

  fn mark_running(&self, flight_id: &Uuid) -> Result<()> {
    let mut conn = self.conn()?;
    let id_s = flight_id.to_string();
    let updated = map_db_err(diesel::update(f_dsl::flights.filter(f_dsl::id.eq(&id_s))
                                                          .filter(f_dsl::status.eq(FlightStatus::Queued.as_str())))
                                                          .set((f_dsl::status.eq(FlightStatus::Running.as_str()),
                                                                f_dsl::updated_at_ts.eq(to_ts(chrono::Utc::now()))))
                                                          .execute(&mut conn))?;
    if updated == 0 && !self.exists(&mut conn, &id_s)? {
      return Err(FlightError::NotFound(format!("flight {}", flight_id)));
    }
    Ok(())
  }

  fn record_step(&self, record: &StepExecutionRecord, progress: &FlightProgress) -> Result<()> {
    let id_s = record.flight_id.to_string();
    let working_state = progress.working_state.to_json()?;
    let error_detail = failure_to_json(&progress.error)?;
    let step_error = failure_to_json(&record.error_detail)?;
    let attempt = i32::try_from(record.attempt).map_err(|_| FlightError::Storage(format!("attempt fuera de rango: {}", record.attempt)))?;
    let mut conn = self.conn()?;
    let result = conn.transaction::<bool, DieselError, _>(|conn| {
                       let updated = diesel::update(f_dsl::flights.filter(f_dsl::id.eq(&id_s)))
                                       .set((f_dsl::status.eq(progress.status.as_str()),
                                             f_dsl::direction.eq(progress.direction.as_str()),
                                             f_dsl::working_state.eq(&working_state),
                                             f_dsl::error_detail.eq(&error_detail),
                                             f_dsl::updated_at_ts.eq(to_ts(chrono::Utc::now()))))
                                       .execute(conn)?;
                       if updated == 0 {
                         return Ok(false);
                       }
                       let last: Option<i64> = s_dsl::step_executions.filter(s_dsl::flight_id.eq(&id_s))
                                                                     .select(diesel::dsl::max(s_dsl::seq))
                                                                     .first(conn)?;
                       let row = StepExecutionRow { flight_id: id_s.clone(),
                                                    seq: last.map_or(0, |s| s + 1),
                                                    step_index: record.step_index,
                                                    direction: record.direction.as_str().to_string(),
                                                    attempt,
                                                    outcome: record.outcome.as_str().to_string(),
                                                    error_detail: step_error.clone(),
                                                    recorded_at_ts: to_ts(record.recorded_at) };
                       diesel::insert_into(s_dsl::step_executions).values(&row).execute(conn)?;
                       Ok(true)
                     });
    match map_db_err(result)? {
      true => {
        debug!("flight {}: paso {} {} -> {}", id_s, record.step_index, record.direction, record.outcome);
        Ok(())
      }
      false => Err(FlightError::NotFound(format!("flight {}", record.flight_id))),
    }
  }

  fn read_steps(&self, flight_id: &Uuid) -> Result<Vec<StepExecutionRecord>> {
    let mut conn = self.conn()?;
    let rows = map_db_err(s_dsl::step_executions.filter(s_dsl::flight_id.eq(flight_id.to_string()))
                                                .order(s_dsl::seq.asc())
                                                .load::<StepExecutionRow>(&mut conn))?;
    rows.into_iter().map(StepExecutionRow::into_record).collect()
  }

  fn complete_flight(&self, flight_id: &Uuid, progress: &FlightProgress) -> Result<bool> {
    let id_s = flight_id.to_string();
    let working_state = progress.working_state.to_json()?;
    let error_detail = failure_to_json(&progress.error)?;
    let now = to_ts(chrono::Utc::now());
    let mut conn = self.conn()?;
    let updated = map_db_err(diesel::update(f_dsl::flights.filter(f_dsl::id.eq(&id_s))
                                                          .filter(f_dsl::status.eq_any(OPEN_STATUSES)))
                                                          .set((f_dsl::status.eq(progress.status.as_str()),
                                                                f_dsl::direction.eq(progress.direction.as_str()),
                                                                f_dsl::working_state.eq(&working_state),
                                                                f_dsl::error_detail.eq(&error_detail),
                                                                f_dsl::updated_at_ts.eq(now),
                                                                f_dsl::completed_at_ts.eq(Some(now))))
                                                          .execute(&mut conn))?;
    if updated > 0 {
      return Ok(true);
    }
    if self.exists(&mut conn, &id_s)? {
      Ok(false)
    } else {
      Err(FlightError::NotFound(format!("flight {}", flight_id)))
    }
  }

  fn recover_flights(&self) -> Result<Vec<FlightRecord>> {
    let mut conn = self.conn()?;
    let rows = map_db_err(f_dsl::flights.filter(f_dsl::status.eq_any(OPEN_STATUSES))
                                        .order(f_dsl::submitted_at_ts.asc())
                                        .load::<FlightRow>(&mut conn))?;
    rows.into_iter().map(FlightRow::into_record).collect()
  }

  fn delete_flight(&self, flight_id: &Uuid) -> Result<()> {
    let id_s = flight_id.to_string();
    let mut conn = self.conn()?;
    let deleted = map_db_err(conn.transaction::<usize, DieselError, _>(|conn| {
                                   diesel::delete(s_dsl::step_executions.filter(s_dsl::flight_id.eq(&id_s))).execute(conn)?;
                                   diesel::delete(f_dsl::flights.filter(f_dsl::id.eq(&id_s))).execute(conn)
                                 }))?;
    if deleted == 0 {
      return Err(FlightError::NotFound(format!("flight {}", flight_id)));
    }
    Ok(())
  }

  fn start_clean(&self) -> Result<()> {
    let mut conn = self.conn()?;
    map_db_err(conn.transaction::<(), DieselError, _>(|conn| {
                     diesel::delete(s_dsl::step_executions).execute(conn)?;
                     diesel::delete(f_dsl::flights).execute(conn)?;
                     Ok(())
                   }))
  }
}
