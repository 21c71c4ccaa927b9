use chrono::Utc;
use flight::stubs::InMemoryFlightRepository;
use flight::{Direction, FlightEngine, FlightEngineConfig, FlightError, FlightMap, FlightProgress, FlightRecord, FlightRegistry,
             FlightRepository, FlightService, FlightStatus, StepExecutionRecord, StepFailure, StepStatus, UserRequestInfo};
use flight::Flight;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn progress(status: FlightStatus, direction: Direction) -> FlightProgress {
  FlightProgress { status,
                   direction,
                   working_state: FlightMap::new().with("k", 1).expect("map"),
                   error: None }
}

#[test]
fn record_step_updates_flight_and_log_together() {
  let repo = InMemoryFlightRepository::new();
  let rec = FlightRecord::queued(Uuid::new_v4(), "c", FlightMap::new(), None);
  repo.create_flight(&rec).expect("create");
  repo.mark_running(&rec.id).expect("running");

  let step = StepExecutionRecord { flight_id: rec.id,
                                   step_index: 0,
                                   direction: Direction::Doing,
                                   attempt: 1,
                                   outcome: StepStatus::FatalFailure,
                                   error_detail: Some(StepFailure::new("x")),
                                   recorded_at: Utc::now() };
  repo.record_step(&step, &progress(FlightStatus::Running, Direction::Undoing))
      .expect("record");

  let stored = repo.get_flight(&rec.id).expect("get");
  assert_eq!(stored.status, FlightStatus::Running);
  assert_eq!(stored.direction, Direction::Undoing);
  assert_eq!(stored.working_state.get::<i64>("k").unwrap(), Some(1));
  assert_eq!(repo.read_steps(&rec.id).expect("steps"), vec![step]);
}

#[test]
fn complete_is_applied_only_once() {
  let repo = InMemoryFlightRepository::new();
  let rec = FlightRecord::queued(Uuid::new_v4(), "c", FlightMap::new(), None);
  repo.create_flight(&rec).expect("create");

  assert!(repo.complete_flight(&rec.id, &progress(FlightStatus::Succeeded, Direction::Doing))
              .expect("complete"));
  assert!(!repo.complete_flight(&rec.id, &progress(FlightStatus::Error, Direction::Undoing))
               .expect("second complete"));
  let stored = repo.get_flight(&rec.id).expect("get");
  assert_eq!(stored.status, FlightStatus::Succeeded);
  assert!(stored.completed_at.is_some());
  assert!(repo.recover_flights().expect("recover").is_empty());
}

#[test]
fn list_filters_by_owner_and_pages() {
  let repo = InMemoryFlightRepository::new();
  let alice = UserRequestInfo::new("alice");
  for _ in 0..3 {
    repo.create_flight(&FlightRecord::queued(Uuid::new_v4(), "c", FlightMap::new(), Some(alice.clone())))
        .expect("create");
  }
  repo.create_flight(&FlightRecord::queued(Uuid::new_v4(), "c", FlightMap::new(), None))
      .expect("create");

  assert_eq!(repo.list_flights(0, 10, None).expect("all").len(), 4);
  assert_eq!(repo.list_flights(0, 10, Some("alice")).expect("alice").len(), 3);
  assert_eq!(repo.list_flights(2, 10, Some("alice")).expect("page").len(), 1);
  assert_eq!(repo.list_flights(0, 2, None).expect("limit").len(), 2);
  assert!(repo.list_flights(0, 10, Some("bob")).expect("bob").is_empty());
}

#[test]
fn delete_removes_flight_and_log() {
  let repo = InMemoryFlightRepository::new();
  let rec = FlightRecord::queued(Uuid::new_v4(), "c", FlightMap::new(), None);
  repo.create_flight(&rec).expect("create");
  repo.delete_flight(&rec.id).expect("delete");
  assert!(matches!(repo.get_flight(&rec.id), Err(FlightError::NotFound(_))));
  assert!(repo.read_steps(&rec.id).expect("steps").is_empty());
}

#[tokio::test]
async fn service_checks_ownership_and_returns_results() {
  let mut registry = FlightRegistry::new();
  registry.register_fn("noop", |_| Ok(Flight::builder("noop").build()));
  let engine = FlightEngine::new(Arc::new(InMemoryFlightRepository::new()),
                                 registry,
                                 FlightEngineConfig { max_workers: 2,
                                                      status_poll_interval: Duration::from_millis(5),
                                                      shutdown_timeout: Duration::from_secs(5) });
  let service = FlightService::new(engine);
  let alice = UserRequestInfo::new("alice");
  let bob = UserRequestInfo::new("bob");

  let id = service.submit_json("noop", json!({"dataset": "d1"}), Some(alice.clone()))
                  .expect("submit");
  let state = tokio::time::timeout(Duration::from_secs(5), service.engine().wait_for_flight(&id)).await
                                                                                                 .expect("timeout")
                                                                                                 .expect("wait");
  assert_eq!(state.status, FlightStatus::Succeeded);

  assert!(service.retrieve(&id, Some(&alice)).is_ok());
  assert!(matches!(service.retrieve(&id, Some(&bob)), Err(FlightError::Unauthorized(_))));
  assert_eq!(service.enumerate(0, 10, Some(&alice)).expect("list").len(), 1);
  assert!(service.enumerate(0, 10, Some(&bob)).expect("list").is_empty());
  assert_eq!(service.retrieve_result::<String>(&id, "missing", Some(&alice)).expect("result"), None);
  assert!(service.submit_json("noop", json!([1, 2]), None).is_err());
}
