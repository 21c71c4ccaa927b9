// Archivo: service.rs
// Propósito: fachada de alto nivel sobre `FlightEngine` para callers que
// trabajan con JSON y con identidad de usuario (API, CLI).
use crate::domain::{FlightState, FlightStatus, UserRequestInfo};
use crate::engine::FlightEngine;
use crate::errors::{FlightError, Result};
use crate::flight_map::FlightMap;
use crate::repository::FlightRepository;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Servicio de envío y consulta de flights.
///
/// A diferencia del motor, todas las consultas que reciben un usuario
/// verifican que sea el dueño del flight.
pub struct FlightService<R: FlightRepository> {
    engine: FlightEngine<R>,
}

impl<R: FlightRepository + 'static> FlightService<R> {
    pub fn new(engine: FlightEngine<R>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &FlightEngine<R> {
        &self.engine
    }

    /// Envía `class_ref` con parámetros dados como objeto JSON.
    pub fn submit_json(&self, class_ref: &str, inputs: JsonValue, user: Option<UserRequestInfo>) -> Result<Uuid> {
        if !inputs.is_object() && !inputs.is_null() {
            return Err(FlightError::Other("los parámetros de un flight deben ser un objeto JSON".into()));
        }
        let inputs = if inputs.is_null() { FlightMap::new() } else { FlightMap::from_value(inputs)? };
        self.engine.submit_with_id(Uuid::new_v4(), class_ref, inputs, user)
    }

    /// Estado del flight, verificando acceso si hay usuario.
    pub fn retrieve(&self, flight_id: &Uuid, user: Option<&UserRequestInfo>) -> Result<FlightState> {
        if let Some(user) = user {
            self.engine.verify_flight_access(flight_id, user)?;
        }
        self.engine.get_status(flight_id)
    }

    /// Lee `key` del resultado de un flight SUCCEEDED. Un flight que
    /// terminó mal devuelve `FlightFailed`; uno sin terminar, `Conflict`.
    pub fn retrieve_result<T: DeserializeOwned>(&self, flight_id: &Uuid, key: &str, user: Option<&UserRequestInfo>) -> Result<Option<T>> {
        let state = self.retrieve(flight_id, user)?;
        match state.status {
            FlightStatus::Succeeded => match state.result {
                Some(result) => result.get(key),
                None => Ok(None),
            },
            FlightStatus::Error | FlightStatus::Fatal => {
                Err(FlightError::FlightFailed { status: state.status,
                                                message: state.error
                                                              .map(|e| e.to_string())
                                                              .unwrap_or_default() })
            }
            other => Err(FlightError::Conflict(format!("flight {} todavía en {}", flight_id, other))),
        }
    }

    /// Página de flights: del usuario si se indica, todos si no.
    pub fn enumerate(&self, offset: i64, limit: i64, user: Option<&UserRequestInfo>) -> Result<Vec<FlightState>> {
        match user {
            Some(user) => self.engine.list_flights_for_user(offset, limit, user),
            None => self.engine.list_flights(offset, limit),
        }
    }

    /// Solicita el apagado cooperativo de un flight propio.
    pub fn cancel(&self, flight_id: &Uuid, user: Option<&UserRequestInfo>) -> Result<bool> {
        if let Some(user) = user {
            self.engine.verify_flight_access(flight_id, user)?;
        }
        self.engine.request_shutdown(flight_id)
    }
}
