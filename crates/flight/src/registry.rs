// Archivo: registry.rs
// Propósito: registro de tipos de flight por `class_ref`, usado tanto en
// el submit como en la recuperación tras reinicio.
use crate::definition::{Flight, FlightDefinition};
use crate::errors::{FlightError, Result};
use crate::flight_map::FlightMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Adaptador para registrar un closure como definición.
struct FnDefinition<F> {
    class_ref: String,
    build: F,
}

impl<F> FlightDefinition for FnDefinition<F> where F: Fn(&FlightMap) -> Result<Flight> + Send + Sync
{
    fn class_ref(&self) -> &str {
        &self.class_ref
    }

    fn build(&self, inputs: &FlightMap) -> Result<Flight> {
        (self.build)(inputs)
    }
}

#[derive(Default, Clone)]
pub struct FlightRegistry {
    definitions: HashMap<String, Arc<dyn FlightDefinition>>,
}

impl FlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra (o reemplaza) una definición bajo su `class_ref`.
    pub fn register<D: FlightDefinition + 'static>(&mut self, definition: D) -> &mut Self {
        self.definitions.insert(definition.class_ref().to_string(), Arc::new(definition));
        self
    }

    pub fn register_fn<F>(&mut self, class_ref: impl Into<String>, build: F) -> &mut Self
        where F: Fn(&FlightMap) -> Result<Flight> + Send + Sync + 'static
    {
        let class_ref = class_ref.into();
        self.definitions.insert(class_ref.clone(), Arc::new(FnDefinition { class_ref, build }));
        self
    }

    pub fn contains(&self, class_ref: &str) -> bool {
        self.definitions.contains_key(class_ref)
    }

    pub fn class_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.definitions.keys().cloned().collect();
        refs.sort();
        refs
    }

    /// Construye el flight `class_ref` con `inputs`. Una clase desconocida o
    /// un fallo de la definición se informan como `MakeFlight`.
    pub fn make_flight(&self, class_ref: &str, inputs: &FlightMap) -> Result<Flight> {
        let definition = self.definitions
                             .get(class_ref)
                             .ok_or_else(|| FlightError::MakeFlight(format!("clase de flight no registrada: {}", class_ref)))?;
        definition.build(inputs).map_err(|e| match e {
                                      FlightError::MakeFlight(m) => FlightError::MakeFlight(m),
                                      other => FlightError::MakeFlight(format!("{}: {}", class_ref, other)),
                                  })
    }
}
