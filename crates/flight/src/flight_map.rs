// Archivo: flight_map.rs
// Propósito: mapa clave -> valor JSON usado para los parámetros de entrada
// inmutables y para el working state compartido por los pasos.
use crate::errors::Result;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Mapa serializable de `String` a valor tipado (guardado como JSON).
///
/// Se usa con dos roles:
/// - parámetros de entrada del flight (no cambian tras el submit);
/// - working state: lo leen y escriben todos los pasos, en ambas
///   direcciones, y se persiste junto al flight tras cada paso exitoso.
///
/// El orden de inserción no tiene significado semántico; `IndexMap` sólo
/// hace que el JSON persistido sea estable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightMap {
    entries: IndexMap<String, JsonValue>,
}

impl FlightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserta (o reemplaza) `key` serializando `value`.
    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<()> {
        self.entries.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Variante encadenable de `put`, útil al armar parámetros de entrada.
    pub fn with<T: Serialize>(mut self, key: impl Into<String>, value: T) -> Result<Self> {
        self.put(key, value)?;
        Ok(self)
    }

    /// Lee `key` y la deserializa en `T`. Una clave ausente (o `null`)
    /// devuelve `Ok(None)`; un valor con otro tipo es un error.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.entries.get(key) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<&JsonValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.entries.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializa el mapa completo (columna `input_params`/`working_state`).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.entries)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(Self { entries: serde_json::from_str(raw)? })
    }

    /// Convierte un objeto JSON arbitrario en `FlightMap`. Cualquier otro
    /// tipo de valor se rechaza.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        Ok(Self { entries: serde_json::from_value(value)? })
    }
}
