#![cfg(not(feature = "pg"))]

use flight::stubs::{ScriptedAction, ScriptedStep, StepJournal};
use flight::{Direction, Flight, FlightEngine, FlightEngineConfig, FlightMap, FlightRegistry, FlightRepository, FlightState, FlightStatus,
             RetryRule, StepStatus};
use flight_persistence::DieselFlightRepository;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn config() -> FlightEngineConfig {
  FlightEngineConfig { max_workers: 2,
                       status_poll_interval: Duration::from_millis(10),
                       shutdown_timeout: Duration::from_secs(5) }
}

fn registry(steps: Vec<Arc<ScriptedStep>>) -> FlightRegistry {
  let mut registry = FlightRegistry::new();
  registry.register_fn("sqlite-abc", move |_inputs| {
            let mut builder = Flight::builder("sqlite-abc");
            for step in &steps {
              builder = builder.shared_step(step.clone(), RetryRule::fixed(Duration::from_millis(1), 2));
            }
            Ok(builder.build())
          });
  registry
}

async fn wait(engine: &FlightEngine<DieselFlightRepository>, id: &Uuid) -> FlightState {
  tokio::time::timeout(Duration::from_secs(10), engine.wait_for_flight(id)).await
                                                                           .expect("flight did not settle in time")
                                                                           .expect("status")
}

fn temp_url() -> String {
  std::env::temp_dir().join(format!("flight-engine-{}.db", Uuid::new_v4()))
                      .to_string_lossy()
                      .into_owned()
}

#[tokio::test]
async fn failing_flight_is_compensated_and_logged_in_sqlite() {
  let journal = StepJournal::new();
  let a = Arc::new(ScriptedStep::new("A", journal.clone()).writes("a_done", serde_json::json!(true)));
  let b = Arc::new(ScriptedStep::new("B", journal.clone()).on_do(vec![ScriptedAction::Retry("busy".into()),
                                                                      ScriptedAction::Fail("rechazado".into())]));
  let repo = Arc::new(DieselFlightRepository::new(&temp_url(), 2).expect("repo"));
  let engine = FlightEngine::new(repo.clone(), registry(vec![a, b]), config());

  let id = engine.submit("sqlite-abc", FlightMap::new()).expect("submit");
  let state = wait(&engine, &id).await;

  assert_eq!(state.status, FlightStatus::Error);
  assert_eq!(state.error.as_ref().map(|e| e.message.as_str()), Some("rechazado"));
  assert_eq!(journal.order(Direction::Undoing), vec!["A".to_string()]);

  let log: Vec<(i64, Direction, StepStatus)> = repo.read_steps(&id)
                                                   .expect("steps")
                                                   .into_iter()
                                                   .map(|r| (r.step_index, r.direction, r.outcome))
                                                   .collect();
  assert_eq!(log,
             vec![(0, Direction::Doing, StepStatus::Success),
                  (1, Direction::Doing, StepStatus::RetryableFailure),
                  (1, Direction::Doing, StepStatus::FatalFailure),
                  (0, Direction::Undoing, StepStatus::Success)]);
  assert_eq!(repo.get_flight(&id).expect("record").working_state.get::<bool>("a_done").expect("map"), Some(true));
}

#[tokio::test]
async fn parked_flight_resumes_from_sqlite_after_restart() {
  let url = temp_url();
  let journal = StepJournal::new();
  let a = Arc::new(ScriptedStep::new("A", journal.clone()));
  let b = Arc::new(ScriptedStep::new("B", journal.clone()).on_do(vec![ScriptedAction::WaitForCancel]));
  let c = Arc::new(ScriptedStep::new("C", journal.clone()));
  let steps = vec![a, b, c];

  let first_repo = Arc::new(DieselFlightRepository::new(&url, 2).expect("repo"));
  let first = FlightEngine::new(first_repo, registry(steps.clone()), config());
  let id = first.submit("sqlite-abc", FlightMap::new()).expect("submit");
  journal.wait_for_calls("B", Direction::Doing, 1).await;
  assert!(first.terminate(Duration::from_secs(5)).await);
  drop(first);

  // Otro pool sobre el mismo archivo, como tras reiniciar el proceso.
  let second_repo = Arc::new(DieselFlightRepository::new(&url, 2).expect("repo"));
  assert_eq!(second_repo.get_flight(&id).expect("record").status, FlightStatus::Running);
  let second = FlightEngine::new(second_repo.clone(), registry(steps), config());
  assert_eq!(second.initialize(false).expect("recover"), 1);
  let state = wait(&second, &id).await;

  assert_eq!(state.status, FlightStatus::Succeeded);
  assert_eq!(journal.calls("A", Direction::Doing), 1);
  assert_eq!(journal.calls("B", Direction::Doing), 2);
  assert_eq!(journal.calls("C", Direction::Doing), 1);
  assert_eq!(second_repo.read_steps(&id).expect("steps").len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_flights_share_one_sqlite_file() {
  let journal = StepJournal::new();
  let a = Arc::new(ScriptedStep::new("A", journal.clone()).writes("a_done", serde_json::json!(true)));
  let b = Arc::new(ScriptedStep::new("B", journal.clone()));
  let repo = Arc::new(DieselFlightRepository::new(&temp_url(), 2).expect("repo"));
  let config = FlightEngineConfig { max_workers: 6, ..config() };
  let engine = FlightEngine::new(repo.clone(), registry(vec![a, b]), config);

  // Más workers que conexiones y que hilos del runtime: las escrituras
  // esperan su turno fuera de los hilos async.
  let ids: Vec<Uuid> = (0..12).map(|_| engine.submit("sqlite-abc", FlightMap::new()).expect("submit"))
                              .collect();
  for id in &ids {
    assert_eq!(wait(&engine, id).await.status, FlightStatus::Succeeded);
    assert_eq!(repo.read_steps(id).expect("steps").len(), 2);
  }
  assert_eq!(journal.calls("A", Direction::Doing), 12);
  assert_eq!(journal.calls("B", Direction::Doing), 12);
}
