use crate::domain::{LoadLock, LockOutcome};
use crate::errors::Result;
use uuid::Uuid;

/// Tabla de locks exclusivos por load tag, compartida por todos los
/// procesos que ejecutan flights.
pub trait LoadLockStore: Send + Sync {
    /// Intenta tomar `load_tag` para `holder`. La lectura del dueño actual
    /// y la escritura del registro son una sola operación atómica: dos
    /// llamadas concurrentes con dueños distintos nunca obtienen ambas
    /// `Acquired`. Repetir la llamada con el mismo dueño devuelve
    /// `AlreadyHeldBySelf` sin crear otro registro.
    fn lock(&self, load_tag: &str, holder: &Uuid) -> Result<LockOutcome>;

    /// Libera `load_tag` si lo tiene `holder`. Siempre termina bien, también
    /// si el tag no estaba tomado o lo tiene otro; devuelve si se borró algo.
    fn unlock(&self, load_tag: &str, holder: &Uuid) -> Result<bool>;

    /// Dueño actual del tag.
    fn lookup(&self, load_tag: &str) -> Result<Option<LoadLock>>;

    /// Todos los locks vigentes, ordenados por tag.
    fn list_locks(&self) -> Result<Vec<LoadLock>>;
}
