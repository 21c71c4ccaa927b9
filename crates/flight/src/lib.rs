//! Crate `flight` — motor de sagas durables
//!
//! Un *flight* es una secuencia ordenada de pasos con acción (`do`) y
//! compensación (`undo`). El motor ejecuta los pasos en orden, persiste cada
//! intento junto con el working state y, ante un fallo definitivo, deshace
//! en orden inverso los pasos ya completados. Tras un reinicio, los flights
//! que quedaron a medias se retoman desde el último paso persistido.
//!
//! Diseño resumido:
//! - Persistencia por intento: `FlightRepository::record_step` guarda el
//!   registro del paso y el progreso del flight de forma atómica.
//! - Resultado tri-estado por paso (`StepOutcome`) más reglas de reintento
//!   por paso (`RetryRule`).
//! - Apagado cooperativo con `CancellationToken`: un flight interrumpido no
//!   registra el intento y queda aparcado para reanudarse.
//!
//! Ejemplo rápido:
//! ```rust
//! use flight::stubs::InMemoryFlightRepository;
//! use flight::{FlightEngine, FlightEngineConfig, FlightRegistry};
//! use std::sync::Arc;
//! let repo = Arc::new(InMemoryFlightRepository::new());
//! let engine = FlightEngine::new(repo, FlightRegistry::new(), FlightEngineConfig::default());
//! assert_eq!(engine.active_flights(), 0);
//! ```
pub mod context;
pub mod definition;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod flight_map;
pub mod hooks;
pub mod registry;
pub mod repository;
pub mod retry;
mod runner;
pub mod service;
pub mod step;
pub mod stubs;

pub use context::*;
pub use definition::*;
pub use domain::*;
pub use engine::*;
pub use errors::*;
pub use flight_map::*;
pub use hooks::*;
pub use registry::*;
pub use repository::*;
pub use retry::*;
pub use runner::RunOutcome;
pub use service::*;
pub use step::*;
pub use stubs::*;
