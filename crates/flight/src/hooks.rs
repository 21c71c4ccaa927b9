// Archivo: hooks.rs
// Propósito: puntos de extensión que el motor invoca alrededor de cada
// flight y de cada paso, más un hook que sólo registra en el log.
use crate::context::FlightContext;
use crate::domain::FlightStatus;
use crate::step::StepOutcome;
use log::{info, warn};

/// Observador del ciclo de vida de los flights. Todas las llamadas son
/// síncronas y deben ser baratas: corren dentro del worker del flight.
pub trait FlightHook: Send + Sync {
    fn start_flight(&self, _ctx: &FlightContext) {}

    fn start_step(&self, _ctx: &FlightContext, _step_name: &str) {}

    fn end_step(&self, _ctx: &FlightContext, _step_name: &str, _outcome: &StepOutcome) {}

    fn end_flight(&self, _ctx: &FlightContext, _status: FlightStatus) {}
}

/// Hook que escribe una línea por evento con el crate `log`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHook;

impl FlightHook for LoggingHook {
    fn start_flight(&self, ctx: &FlightContext) {
        info!("flight {} ({}) inicia en {} desde el paso {}",
              ctx.flight_id(),
              ctx.class_ref(),
              ctx.direction(),
              ctx.step_index());
    }

    fn start_step(&self, ctx: &FlightContext, step_name: &str) {
        info!("flight {} paso {} [{}] {} intento {}",
              ctx.flight_id(),
              ctx.step_index(),
              step_name,
              ctx.direction(),
              ctx.attempt());
    }

    fn end_step(&self, ctx: &FlightContext, step_name: &str, outcome: &StepOutcome) {
        match outcome.failure() {
            None => info!("flight {} paso {} [{}] {} ok", ctx.flight_id(), ctx.step_index(), step_name, ctx.direction()),
            Some(f) => warn!("flight {} paso {} [{}] {} -> {}: {}",
                             ctx.flight_id(),
                             ctx.step_index(),
                             step_name,
                             ctx.direction(),
                             outcome.status(),
                             f),
        }
    }

    fn end_flight(&self, ctx: &FlightContext, status: FlightStatus) {
        info!("flight {} ({}) termina en {}", ctx.flight_id(), ctx.class_ref(), status);
    }
}
