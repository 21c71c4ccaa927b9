use anyhow::Context;
use flight::{FlightEngine, FlightEngineConfig, FlightRegistry, FlightService, LoggingHook, RetryRule, UserRequestInfo};
use flight_persistence::{DieselFlightRepository, DieselLoadLockStore};
use flight_steps::{BulkLoadFlight, IngestFilesStep, StaticPolicyDecisionPoint, BULK_LOAD_CLASS};
use load_lock::LoadLockStore;
use log::info;
use serde_json::json;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Menú interactivo para operar el motor de flights sobre la base
/// configurada en `FLIGHT_DB_URL` (SQLite por defecto).
///
/// Opciones soportadas:
/// 1) Lanzar una carga masiva de demostración
/// 2) Ver flights
/// 3) Ver estado de un flight
/// 4) Pedir apagado de un flight
/// 5) Reanudar un flight aparcado
/// 6) Ver load tags tomados
/// 7) Salir (aparca los flights en curso)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_target(false))
                                  .with(tracing_subscriber::EnvFilter::try_from_default_env()
                                            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
                                  .init();

    // Un solo pool para flights y locks; aplica migraciones embebidas.
    let pool = flight_persistence::pool_from_env().context("abriendo la base de flights")?;
    let repo = Arc::new(DieselFlightRepository::from_pool(pool.clone()));
    let locks = Arc::new(DieselLoadLockStore::from_pool(pool));

    let bulk_load = BulkLoadFlight::new(Arc::new(StaticPolicyDecisionPoint::permissive()), locks.clone())
        .with_body_step(Arc::new(IngestFilesStep::new(Duration::from_millis(500))), RetryRule::None);
    let mut registry = FlightRegistry::new();
    registry.register(bulk_load);

    let config = FlightEngineConfig::from_env();
    let shutdown_timeout = config.shutdown_timeout;
    let engine = FlightEngine::new(repo, registry, config).with_hook(Arc::new(LoggingHook));
    let recovered = engine.initialize(false).context("recuperando flights")?;
    info!("{} flights recuperados", recovered);
    let service = FlightService::new(engine);

    loop {
        println!("\n== Flight CLI menu ==");
        println!("1) Lanzar carga masiva de demostración");
        println!("2) Ver flights");
        println!("3) Ver estado de un flight");
        println!("4) Pedir apagado de un flight");
        println!("5) Reanudar flight aparcado");
        println!("6) Ver load tags tomados");
        println!("7) Salir");
        let choice = prompt("Elige una opción: ")?;
        match choice.trim() {
            "1" => {
                let user = prompt("Usuario: ")?;
                let dataset = prompt("Dataset id: ")?;
                let tag = prompt("Load tag (enter para calcularlo): ")?;
                let files: u64 = prompt("Cantidad de archivos (enter = 3): ")?.trim().parse().unwrap_or(3);
                let mut inputs = json!({ "dataset_id": dataset.trim(), "file_count": files });
                if !tag.trim().is_empty() {
                    inputs["load_tag"] = json!(tag.trim());
                }
                match service.submit_json(BULK_LOAD_CLASS, inputs, Some(UserRequestInfo::new(user.trim()))) {
                    Ok(id) => println!("Flight lanzado: {}", id),
                    Err(e) => eprintln!("Error lanzando flight: {}", e),
                }
            }
            "2" => match service.enumerate(0, 50, None) {
                Ok(flights) => {
                    println!("\nID                                   | CLASE      | ESTADO    | USUARIO");
                    println!("-----------------------------------------------------------------------------");
                    for f in flights {
                        let owner = f.owner.map(|o| o.subject_id).unwrap_or_else(|| "-".into());
                        println!("{} | {:<10} | {:<9} | {}", f.flight_id, f.class_ref, f.status, owner);
                    }
                }
                Err(e) => eprintln!("Error listando flights: {}", e),
            },
            "3" => {
                let Some(id) = prompt_uuid("Flight id: ")? else { continue };
                match service.retrieve(&id, None) {
                    Ok(state) => {
                        println!("Estado: {}", state.status);
                        if let Some(result) = state.result {
                            println!("Resultado: {}", result.to_json().unwrap_or_default());
                        }
                        if let Some(error) = state.error {
                            println!("Error: {}", error);
                        }
                    }
                    Err(e) => eprintln!("Error consultando flight: {}", e),
                }
            }
            "4" => {
                let Some(id) = prompt_uuid("Flight id a detener: ")? else { continue };
                match service.cancel(&id, None) {
                    Ok(true) => println!("Apagado solicitado para {}", id),
                    Ok(false) => println!("El flight {} no está en ejecución", id),
                    Err(e) => eprintln!("Error pidiendo apagado: {}", e),
                }
            }
            "5" => {
                let Some(id) = prompt_uuid("Flight id a reanudar: ")? else { continue };
                match service.engine().resume_flight(&id) {
                    Ok(()) => println!("Flight {} reanudado", id),
                    Err(e) => eprintln!("Error reanudando flight: {}", e),
                }
            }
            "6" => match locks.list_locks() {
                Ok(held) if held.is_empty() => println!("No hay load tags tomados"),
                Ok(held) => {
                    for lock in held {
                        println!("{} | {} | {}", lock.load_tag, lock.holder_flight_id, lock.acquired_at);
                    }
                }
                Err(e) => eprintln!("Error listando locks: {}", e),
            },
            "7" => {
                println!("Saliendo...");
                break;
            }
            _ => println!("Opción inválida"),
        }
    }

    if !service.engine().terminate(shutdown_timeout).await {
        eprintln!("Algunos flights no alcanzaron a aparcarse");
    }
    Ok(())
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}

fn prompt_uuid(msg: &str) -> io::Result<Option<Uuid>> {
    let raw = prompt(msg)?;
    match Uuid::parse_str(raw.trim()) {
        Ok(id) => Ok(Some(id)),
        Err(_) => {
            eprintln!("UUID inválido");
            Ok(None)
        }
    }
}
