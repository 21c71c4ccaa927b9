// Archivo: definition.rs
// Propósito: composición de un flight (lista ordenada de pasos con su
// regla de reintento) y el trait que construye flights desde sus inputs.
use crate::errors::Result;
use crate::flight_map::FlightMap;
use crate::retry::RetryRule;
use crate::step::Step;
use std::sync::Arc;

/// Un paso dentro de un flight junto con su regla de reintento.
#[derive(Clone)]
pub struct StepEntry {
    pub step: Arc<dyn Step>,
    pub retry: RetryRule,
}

/// Secuencia ordenada de pasos identificada por `class_ref`.
#[derive(Clone)]
pub struct Flight {
    class_ref: String,
    steps: Vec<StepEntry>,
}

impl Flight {
    pub fn builder(class_ref: impl Into<String>) -> FlightBuilder {
        FlightBuilder { class_ref: class_ref.into(),
                        steps: Vec::new() }
    }

    pub fn class_ref(&self) -> &str {
        &self.class_ref
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn entry(&self, index: i64) -> Option<&StepEntry> {
        usize::try_from(index).ok().and_then(|i| self.steps.get(i))
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|e| e.step.name().to_string()).collect()
    }
}

impl std::fmt::Debug for Flight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flight")
         .field("class_ref", &self.class_ref)
         .field("steps", &self.step_names())
         .finish()
    }
}

/// Builder de `Flight`. El orden de las llamadas es el orden de ejecución.
pub struct FlightBuilder {
    class_ref: String,
    steps: Vec<StepEntry>,
}

impl FlightBuilder {
    pub fn step<S: Step + 'static>(self, step: S) -> Self {
        self.step_with_retry(step, RetryRule::None)
    }

    pub fn step_with_retry<S: Step + 'static>(self, step: S, retry: RetryRule) -> Self {
        self.shared_step(Arc::new(step), retry)
    }

    /// Agrega un paso ya compartido (por ejemplo, uno que guarda un store).
    pub fn shared_step(mut self, step: Arc<dyn Step>, retry: RetryRule) -> Self {
        self.steps.push(StepEntry { step, retry });
        self
    }

    pub fn build(self) -> Flight {
        Flight { class_ref: self.class_ref,
                 steps: self.steps }
    }
}

/// Construye instancias de un tipo de flight a partir de sus parámetros.
///
/// El motor vuelve a llamar a `build` al recuperar un flight tras una
/// caída, así que el resultado debe depender sólo de `inputs`.
pub trait FlightDefinition: Send + Sync {
    fn class_ref(&self) -> &str;

    fn build(&self, inputs: &FlightMap) -> Result<Flight>;
}
