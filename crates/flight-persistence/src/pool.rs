// Pool de conexiones r2d2 y migraciones embebidas.
//
// Con la feature `pg` el backend es Postgres; sin ella, SQLite con WAL y
// busy_timeout configurados en cada conexión del pool.
use crate::errors::{PersistenceError, Result};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

/// Tamaño del pool si no se define `FLIGHT_DB_POOL_SIZE`.
pub const DEFAULT_POOL_SIZE: u32 = 4;

#[cfg(feature = "pg")]
pub type DbConn = PgConnection;
#[cfg(not(feature = "pg"))]
pub type DbConn = SqliteConnection;
pub type DbPool = Pool<ConnectionManager<DbConn>>;
pub type PooledConn = PooledConnection<ConnectionManager<DbConn>>;

#[cfg(not(feature = "pg"))]
#[derive(Debug, Clone, Copy)]
struct SqlitePragmas;

#[cfg(not(feature = "pg"))]
impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
    use diesel::connection::SimpleConnection;
    conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        .map_err(diesel::r2d2::Error::QueryError)
  }
}

/// Crea el pool y aplica las migraciones pendientes.
pub fn build_pool(database_url: &str, max_size: u32) -> Result<Arc<DbPool>> {
  let manager = ConnectionManager::<DbConn>::new(database_url);
  let builder = Pool::builder().max_size(max_size.max(1))
                               .connection_timeout(Duration::from_secs(10));
  #[cfg(not(feature = "pg"))]
  let builder = builder.connection_customizer(Box::new(SqlitePragmas));
  let pool = builder.build(manager)?;
  let mut conn = pool.get()?;
  let applied = conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| PersistenceError::Migration(e.to_string()))?;
  if !applied.is_empty() {
    info!("flight-persistence: {} migraciones aplicadas", applied.len());
  }
  Ok(Arc::new(pool))
}

/// Lee la URL (`FLIGHT_DB_URL`, o `DATABASE_URL` como respaldo) y el
/// tamaño del pool del entorno, con `.env` si existe.
pub fn database_url_from_env() -> Result<String> {
  dotenvy::dotenv().ok();
  let url = std::env::var("FLIGHT_DB_URL").or_else(|_| std::env::var("DATABASE_URL"));
  #[cfg(feature = "pg")]
  {
    let url = url.map_err(|_| PersistenceError::Config("FLIGHT_DB_URL / DATABASE_URL not set".into()))?;
    let l = url.to_lowercase();
    if !(l.starts_with("postgres://") || l.starts_with("postgresql://")) {
      return Err(PersistenceError::Config("FLIGHT_DB_URL / DATABASE_URL does not look like Postgres URL".into()));
    }
    Ok(url)
  }
  #[cfg(not(feature = "pg"))]
  {
    let url = url.unwrap_or_else(|_| "flights.db".into());
    let l = url.to_lowercase();
    if l.starts_with("postgres://") || l.starts_with("postgresql://") {
      return Err(PersistenceError::Config("flight-persistence was compiled without 'pg' feature; enable the 'pg' feature \
                                           to use Postgres"
                                                           .into()));
    }
    Ok(url)
  }
}

pub fn pool_size_from_env() -> u32 {
  match std::env::var("FLIGHT_DB_POOL_SIZE").ok().and_then(|v| v.trim().parse::<u32>().ok()) {
    Some(n) if n > 0 => n,
    _ => DEFAULT_POOL_SIZE,
  }
}

/// Pool configurado desde el entorno, listo para compartir entre el
/// repositorio de flights y el store de locks.
pub fn pool_from_env() -> Result<Arc<DbPool>> {
  let url = database_url_from_env()?;
  let size = pool_size_from_env();
  debug!("flight-persistence: pool de {} conexiones", size);
  build_pool(&url, size)
}

/// Timestamps persistidos en microsegundos.
pub(crate) fn to_ts(at: chrono::DateTime<chrono::Utc>) -> i64 {
  at.timestamp_micros()
}

pub(crate) fn from_ts(ts: i64) -> Result<chrono::DateTime<chrono::Utc>> {
  chrono::DateTime::from_timestamp_micros(ts).ok_or_else(|| PersistenceError::Corrupt(format!("timestamp fuera de rango: {}", ts)))
}
