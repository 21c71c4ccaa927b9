use flight::stubs::{InMemoryFlightRepository, ScriptedAction, ScriptedStep, StepJournal};
use flight::{Direction, Flight, FlightEngine, FlightEngineConfig, FlightError, FlightMap, FlightProgress, FlightRecord, FlightRegistry,
             FlightRepository, FlightState, FlightStatus, RetryRule, StepExecutionRecord, StepFailure, StepStatus};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn config() -> FlightEngineConfig {
  FlightEngineConfig { max_workers: 4,
                       status_poll_interval: Duration::from_millis(5),
                       shutdown_timeout: Duration::from_secs(5) }
}

fn register(registry: &mut FlightRegistry, class_ref: &str, steps: Vec<Arc<ScriptedStep>>) {
  register_with_rules(registry, class_ref, steps.into_iter().map(|s| (s, RetryRule::None)).collect());
}

fn register_with_rules(registry: &mut FlightRegistry, class_ref: &str, steps: Vec<(Arc<ScriptedStep>, RetryRule)>) {
  let class = class_ref.to_string();
  registry.register_fn(class_ref, move |_inputs| {
            let mut builder = Flight::builder(class.clone());
            for (step, rule) in &steps {
              builder = builder.shared_step(step.clone(), rule.clone());
            }
            Ok(builder.build())
          });
}

fn seed_step(repo: &InMemoryFlightRepository, flight: &FlightRecord, step_index: i64, direction: Direction, outcome: StepStatus) {
  let error_detail = match outcome {
    StepStatus::Success => None,
    _ => Some(StepFailure::new(format!("step {} failed", step_index))),
  };
  let record = StepExecutionRecord { flight_id: flight.id,
                                     step_index,
                                     direction,
                                     attempt: 1,
                                     outcome,
                                     error_detail,
                                     recorded_at: chrono::Utc::now() };
  let progress = FlightProgress { status: FlightStatus::Running,
                                  direction: flight.direction,
                                  working_state: FlightMap::new(),
                                  error: flight.error.clone() };
  repo.record_step(&record, &progress).expect("seed step");
}

async fn wait(engine: &FlightEngine<InMemoryFlightRepository>, id: &Uuid) -> FlightState {
  tokio::time::timeout(Duration::from_secs(5), engine.wait_for_flight(id)).await
                                                                          .expect("flight did not settle in time")
                                                                          .expect("status")
}

#[tokio::test]
async fn interrupted_flight_parks_and_resumes_after_restart() {
  let journal = StepJournal::new();
  let a = Arc::new(ScriptedStep::new("A", journal.clone()));
  let b = Arc::new(ScriptedStep::new("B", journal.clone()).on_do(vec![ScriptedAction::WaitForCancel]));
  let c = Arc::new(ScriptedStep::new("C", journal.clone()));
  let mut registry = FlightRegistry::new();
  register(&mut registry, "abc", vec![a, b, c]);
  let repo = Arc::new(InMemoryFlightRepository::new());

  let first = FlightEngine::new(repo.clone(), registry.clone(), config());
  let id = first.submit("abc", FlightMap::new()).expect("submit");
  journal.wait_for_calls("B", Direction::Doing, 1).await;
  assert!(first.request_shutdown(&id).expect("shutdown"));
  let parked = wait(&first, &id).await;
  assert_eq!(parked.status, FlightStatus::Running);

  // El intento interrumpido no queda en el log.
  let log = repo.read_steps(&id).expect("steps");
  assert_eq!(log.len(), 1);
  assert_eq!((log[0].step_index, log[0].outcome), (0, StepStatus::Success));

  let second = FlightEngine::new(repo.clone(), registry, config());
  assert_eq!(second.initialize(false).expect("recover"), 1);
  let state = wait(&second, &id).await;

  assert_eq!(state.status, FlightStatus::Succeeded);
  assert_eq!(journal.calls("A", Direction::Doing), 1);
  assert_eq!(journal.calls("B", Direction::Doing), 2);
  assert_eq!(journal.calls("C", Direction::Doing), 1);
}

#[tokio::test]
async fn recovery_during_undo_continues_compensating() {
  let journal = StepJournal::new();
  let a = Arc::new(ScriptedStep::new("A", journal.clone()));
  let b = Arc::new(ScriptedStep::new("B", journal.clone()).on_undo(vec![ScriptedAction::WaitForCancel]));
  let c = Arc::new(ScriptedStep::new("C", journal.clone()).on_do(vec![ScriptedAction::Fail("boom".into())]));
  let mut registry = FlightRegistry::new();
  register(&mut registry, "abc", vec![a, b, c]);
  let repo = Arc::new(InMemoryFlightRepository::new());

  let first = FlightEngine::new(repo.clone(), registry.clone(), config());
  let id = first.submit("abc", FlightMap::new()).expect("submit");
  journal.wait_for_calls("B", Direction::Undoing, 1).await;
  assert!(first.terminate(Duration::from_secs(5)).await);
  assert_eq!(repo.get_flight(&id).expect("flight").direction, Direction::Undoing);

  let second = FlightEngine::new(repo.clone(), registry, config());
  second.initialize(false).expect("recover");
  let state = wait(&second, &id).await;

  assert_eq!(state.status, FlightStatus::Error);
  assert_eq!(journal.order(Direction::Undoing), vec!["B", "B", "A"]);
  assert_eq!(journal.calls("C", Direction::Undoing), 0);
  assert_eq!(state.error.expect("error").message, "boom");
}

#[tokio::test]
async fn recovered_flight_of_unknown_class_is_fatal() {
  let repo = Arc::new(InMemoryFlightRepository::new());
  let mut record = FlightRecord::queued(Uuid::new_v4(), "retired-class", FlightMap::new(), None);
  record.status = FlightStatus::Running;
  repo.create_flight(&record).expect("seed");

  let engine = FlightEngine::new(repo.clone(), FlightRegistry::new(), config());
  assert_eq!(engine.initialize(false).expect("recover"), 0);

  let state = engine.get_status(&record.id).expect("status");
  assert_eq!(state.status, FlightStatus::Fatal);
  assert!(state.error.expect("error").message.contains("retired-class"));
}

#[tokio::test]
async fn queued_flights_are_recovered_from_the_start() {
  let journal = StepJournal::new();
  let a = Arc::new(ScriptedStep::new("A", journal.clone()));
  let mut registry = FlightRegistry::new();
  register(&mut registry, "a", vec![a]);
  let repo = Arc::new(InMemoryFlightRepository::new());
  let record = FlightRecord::queued(Uuid::new_v4(), "a", FlightMap::new(), None);
  repo.create_flight(&record).expect("seed");

  let engine = FlightEngine::new(repo, registry, config());
  assert_eq!(engine.initialize(false).expect("recover"), 1);
  assert_eq!(wait(&engine, &record.id).await.status, FlightStatus::Succeeded);
  assert_eq!(journal.calls("A", Direction::Doing), 1);
}

#[tokio::test]
async fn force_clean_start_discards_everything() {
  let repo = Arc::new(InMemoryFlightRepository::new());
  repo.create_flight(&FlightRecord::queued(Uuid::new_v4(), "a", FlightMap::new(), None))
      .expect("seed");
  let engine = FlightEngine::new(repo.clone(), FlightRegistry::new(), config());
  assert_eq!(engine.initialize(true).expect("clean"), 0);
  assert!(repo.recover_flights().expect("recover").is_empty());
  assert!(engine.list_flights(0, 10).expect("list").is_empty());
}

#[tokio::test]
async fn parked_flight_can_be_resumed_in_place() {
  let journal = StepJournal::new();
  let a = Arc::new(ScriptedStep::new("A", journal.clone()).on_do(vec![ScriptedAction::WaitForCancel]));
  let mut registry = FlightRegistry::new();
  register(&mut registry, "a", vec![a]);
  let engine = FlightEngine::new(Arc::new(InMemoryFlightRepository::new()), registry, config());

  let id = engine.submit("a", FlightMap::new()).expect("submit");
  journal.wait_for_calls("A", Direction::Doing, 1).await;
  engine.request_shutdown(&id).expect("shutdown");
  assert_eq!(wait(&engine, &id).await.status, FlightStatus::Running);
  assert!(!engine.request_shutdown(&id).expect("not active"));

  engine.resume_flight(&id).expect("resume");
  assert_eq!(wait(&engine, &id).await.status, FlightStatus::Succeeded);
  match engine.resume_flight(&id) {
    Err(FlightError::Conflict(_)) => {}
    other => panic!("unexpected: {:?}", other),
  }
}

#[tokio::test]
async fn quiet_down_rejects_new_submissions() {
  let mut registry = FlightRegistry::new();
  register(&mut registry, "empty", vec![]);
  let engine = FlightEngine::new(Arc::new(InMemoryFlightRepository::new()), registry, config());
  let id = engine.submit("empty", FlightMap::new()).expect("submit");

  assert!(engine.quiet_down(Duration::from_secs(5)).await);
  assert_eq!(engine.get_status(&id).expect("status").status, FlightStatus::Succeeded);
  match engine.submit("empty", FlightMap::new()) {
    Err(FlightError::ShuttingDown(_)) => {}
    other => panic!("unexpected: {:?}", other),
  }
}

#[tokio::test]
async fn unknown_flight_queries_are_not_found() {
  let engine = FlightEngine::new(Arc::new(InMemoryFlightRepository::new()), FlightRegistry::new(), config());
  let missing = Uuid::new_v4();
  assert!(matches!(engine.get_status(&missing), Err(FlightError::NotFound(_))));
  assert!(matches!(engine.request_shutdown(&missing), Err(FlightError::NotFound(_))));
  assert!(matches!(engine.delete_flight(&missing), Err(FlightError::NotFound(_))));
}

#[tokio::test]
async fn failed_undo_is_not_run_again_after_a_crash() {
  // Caída justo después de registrar el undo fallido de B y antes de cerrar
  // el flight: queda RUNNING/UNDOING con el fallo encadenado.
  let journal = StepJournal::new();
  let a = Arc::new(ScriptedStep::new("A", journal.clone()));
  let b = Arc::new(ScriptedStep::new("B", journal.clone()));
  let c = Arc::new(ScriptedStep::new("C", journal.clone()));
  let mut registry = FlightRegistry::new();
  register(&mut registry, "abc", vec![a, b, c]);
  let repo = Arc::new(InMemoryFlightRepository::new());
  let mut record = FlightRecord::queued(Uuid::new_v4(), "abc", FlightMap::new(), None);
  record.status = FlightStatus::Running;
  record.direction = Direction::Undoing;
  record.error = Some(StepFailure::new("undo B failed").with_cause("fallo original: C boom"));
  repo.create_flight(&record).expect("seed");
  seed_step(&repo, &record, 0, Direction::Doing, StepStatus::Success);
  seed_step(&repo, &record, 1, Direction::Doing, StepStatus::Success);
  seed_step(&repo, &record, 2, Direction::Doing, StepStatus::FatalFailure);
  seed_step(&repo, &record, 1, Direction::Undoing, StepStatus::FatalFailure);

  let engine = FlightEngine::new(repo.clone(), registry, config());
  assert_eq!(engine.initialize(false).expect("recover"), 0);

  let state = engine.get_status(&record.id).expect("status");
  assert_eq!(state.status, FlightStatus::Fatal);
  assert!(journal.order(Direction::Undoing).is_empty());
  assert!(journal.order(Direction::Doing).is_empty());
  let error = state.error.expect("error detail");
  assert_eq!(error.message, "undo B failed");
  assert!(error.causes.iter().any(|c| c.contains("C boom")));
  assert_eq!(repo.read_steps(&record.id).expect("steps").len(), 4);
}

#[tokio::test]
async fn retry_budget_survives_a_restart() {
  let journal = StepJournal::new();
  let a = Arc::new(ScriptedStep::new("A", journal.clone()));
  let b = Arc::new(ScriptedStep::new("B", journal.clone()).on_do(vec![ScriptedAction::Retry("busy".into()),
                                                                      ScriptedAction::Retry("busy".into())]));
  let mut registry = FlightRegistry::new();
  register_with_rules(&mut registry,
                      "ab",
                      vec![(a, RetryRule::None), (b, RetryRule::fixed(Duration::from_millis(300), 1))]);
  let repo = Arc::new(InMemoryFlightRepository::new());

  // El apagado llega durante la espera entre el primer fallo y el reintento.
  let first = FlightEngine::new(repo.clone(), registry.clone(), config());
  let id = first.submit("ab", FlightMap::new()).expect("submit");
  journal.wait_for_calls("B", Direction::Doing, 1).await;
  assert!(first.terminate(Duration::from_secs(5)).await);
  assert_eq!(repo.get_flight(&id).expect("flight").status, FlightStatus::Running);

  let second = FlightEngine::new(repo.clone(), registry, config());
  assert_eq!(second.initialize(false).expect("recover"), 1);
  let state = wait(&second, &id).await;

  // Un único reintento en total: el segundo fallo ya agota la regla.
  assert_eq!(state.status, FlightStatus::Error);
  assert_eq!(journal.calls("B", Direction::Doing), 2);
  assert_eq!(journal.order(Direction::Undoing), vec!["A"]);
  let error = state.error.expect("error detail");
  assert!(error.causes.iter().any(|c| c.contains("reintentos agotados tras 2 fallos")));
  let b_log: Vec<(u32, StepStatus)> = repo.read_steps(&id)
                                          .expect("steps")
                                          .iter()
                                          .filter(|r| r.step_index == 1 && r.direction == Direction::Doing)
                                          .map(|r| (r.attempt, r.outcome))
                                          .collect();
  assert_eq!(b_log, vec![(1, StepStatus::RetryableFailure), (2, StepStatus::FatalFailure)]);
}
