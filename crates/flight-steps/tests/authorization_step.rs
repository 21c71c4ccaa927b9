use flight::stubs::{InMemoryFlightRepository, StepJournal, ScriptedStep};
use flight::{Direction, FlightEngine, FlightEngineConfig, FlightMap, FlightRegistry, FlightRepository, FlightState, FlightStatus, RetryRule,
             StepStatus, UserRequestInfo};
use flight_steps::keys::{DATASET_ID, LOAD_TAG};
use flight_steps::{BulkLoadFlight, IamAction, IamResourceType, StaticPolicyDecisionPoint, BULK_LOAD_CLASS};
use load_lock::{InMemoryLoadLockStore, LoadLockStore};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Fixture {
  engine: FlightEngine<InMemoryFlightRepository>,
  repo: Arc<InMemoryFlightRepository>,
  store: Arc<InMemoryLoadLockStore>,
  journal: Arc<StepJournal>,
}

fn fixture(pdp: Arc<StaticPolicyDecisionPoint>) -> Fixture {
  let repo = Arc::new(InMemoryFlightRepository::new());
  let store = Arc::new(InMemoryLoadLockStore::new());
  let journal = StepJournal::new();
  let flight = BulkLoadFlight::new(pdp, store.clone())
    .with_check_retry(RetryRule::fixed(Duration::from_millis(5), 3))
    .with_body_step(Arc::new(ScriptedStep::new("body", journal.clone())), RetryRule::None);
  let mut registry = FlightRegistry::new();
  registry.register(flight);
  let config = FlightEngineConfig { max_workers: 2,
                                    status_poll_interval: Duration::from_millis(5),
                                    shutdown_timeout: Duration::from_secs(5) };
  Fixture { engine: FlightEngine::new(repo.clone(), registry, config),
            repo,
            store,
            journal }
}

fn inputs() -> FlightMap {
  FlightMap::new().with(DATASET_ID, "ds-1")
                  .and_then(|m| m.with(LOAD_TAG, "ingest-2024-01"))
                  .expect("inputs")
}

async fn wait(engine: &FlightEngine<InMemoryFlightRepository>, id: &Uuid) -> FlightState {
  tokio::time::timeout(Duration::from_secs(5), engine.wait_for_flight(id)).await
                                                                          .expect("flight did not settle in time")
                                                                          .expect("status")
}

#[tokio::test]
async fn granted_user_runs_the_whole_flight() {
  let pdp = Arc::new(StaticPolicyDecisionPoint::new());
  pdp.grant("alice", IamResourceType::Dataset, "ds-1", IamAction::IngestData);
  let fx = fixture(pdp);

  let id = fx.engine
             .submit_with_id(Uuid::new_v4(), BULK_LOAD_CLASS, inputs(), Some(UserRequestInfo::new("alice")))
             .expect("submit");
  assert_eq!(wait(&fx.engine, &id).await.status, FlightStatus::Succeeded);
  assert_eq!(fx.journal.calls("body", Direction::Doing), 1);
}

#[tokio::test]
async fn denied_user_fails_before_locking() {
  let pdp = Arc::new(StaticPolicyDecisionPoint::new());
  pdp.grant("alice", IamResourceType::Dataset, "ds-1", IamAction::ReadData);
  let fx = fixture(pdp);

  let id = fx.engine
             .submit_with_id(Uuid::new_v4(), BULK_LOAD_CLASS, inputs(), Some(UserRequestInfo::new("alice")))
             .expect("submit");
  let state = wait(&fx.engine, &id).await;

  assert_eq!(state.status, FlightStatus::Error);
  assert!(state.error.expect("error").message.contains("ingest_data"));
  assert!(fx.store.list_locks().expect("locks").is_empty());
  assert_eq!(fx.journal.calls("body", Direction::Doing), 0);
}

#[tokio::test]
async fn flight_without_user_is_rejected() {
  let fx = fixture(Arc::new(StaticPolicyDecisionPoint::permissive()));
  let id = fx.engine.submit(BULK_LOAD_CLASS, inputs()).expect("submit");
  assert_eq!(wait(&fx.engine, &id).await.status, FlightStatus::Error);
}

#[tokio::test]
async fn transient_outage_is_retried() {
  let pdp = Arc::new(StaticPolicyDecisionPoint::permissive().with_outages(2));
  let fx = fixture(pdp.clone());

  let id = fx.engine
             .submit_with_id(Uuid::new_v4(), BULK_LOAD_CLASS, inputs(), Some(UserRequestInfo::new("alice")))
             .expect("submit");
  assert_eq!(wait(&fx.engine, &id).await.status, FlightStatus::Succeeded);
  assert_eq!(pdp.calls(), 3);

  let check_attempts: Vec<StepStatus> = fx.repo
                                          .read_steps(&id)
                                          .expect("steps")
                                          .into_iter()
                                          .filter(|r| r.step_index == 0)
                                          .map(|r| r.outcome)
                                          .collect();
  assert_eq!(check_attempts,
             vec![StepStatus::RetryableFailure, StepStatus::RetryableFailure, StepStatus::Success]);
}

#[tokio::test]
async fn shutdown_interrupts_a_slow_policy_check() {
  let pdp = Arc::new(StaticPolicyDecisionPoint::permissive().with_latency(Duration::from_secs(30)));
  let fx = fixture(pdp.clone());

  let id = fx.engine
             .submit_with_id(Uuid::new_v4(), BULK_LOAD_CLASS, inputs(), Some(UserRequestInfo::new("alice")))
             .expect("submit");
  tokio::time::timeout(Duration::from_secs(5), async {
    while pdp.calls() == 0 {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }).await
    .expect("policy check never started");
  assert!(fx.engine.request_shutdown(&id).expect("shutdown"));

  let state = wait(&fx.engine, &id).await;
  assert_eq!(state.status, FlightStatus::Running);
  assert!(fx.repo.read_steps(&id).expect("steps").is_empty());
  assert!(!fx.engine.is_active(&id));
}
