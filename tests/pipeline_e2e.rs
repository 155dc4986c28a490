//! End-to-end pipeline scenarios.
//!
//! Each test runs the full worker runtime against the in-memory bus and
//! stores: source intake → splitter → enricher → router → uploaders, plus
//! the lag and resume paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;

use fitlink_core::activity::{
    ActivityEnvelope, ActivityType, Destination, Session, Source, StandardizedActivity,
};
use fitlink_core::bus::MemoryBus;
use fitlink_core::enrich::{
    EnrichContext, EnricherProvider, EnricherRegistry, EnrichmentResult, ProviderType,
};
use fitlink_core::ledger::UploadedActivityRecord;
use fitlink_core::notify::LogNotifier;
use fitlink_core::pending::{PendingInput, PendingInputState};
use fitlink_core::pipeline::{
    DestinationState, ExecutionStatus, PipelineConfig, PipelineRun, PipelineRuntime, PipelineStep,
    RunStatus,
};
use fitlink_core::source::{IntakeDecision, SourceIntake};
use fitlink_core::stage::LogErrorSink;
use fitlink_core::store::{
    BlobStore, ExecutionLogStore, LedgerStore, MemoryStore, PendingInputStore, PipelineRunStore,
    UserStore,
};
use fitlink_core::types::{CoreConfig, Error, PendingInputId, Result, UserId};
use fitlink_core::upload::{MockCall, MockUploader, UploaderRegistry, WebhookUploader};
use fitlink_core::user::{Integration, UserRecord};
use fitlink_core::CoreServices;

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    services: Arc<CoreServices>,
    store: Arc<MemoryStore>,
    runtime: PipelineRuntime,
    intake: SourceIntake,
}

async fn start(
    enrichers: EnricherRegistry,
    uploaders: UploaderRegistry,
    config: CoreConfig,
) -> Harness {
    let store = MemoryStore::new_shared();
    let bus = MemoryBus::new();
    let services = CoreServices::new(
        config,
        bus.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        enrichers,
        uploaders,
        Arc::new(LogNotifier),
        Arc::new(LogErrorSink),
    );
    let runtime = PipelineRuntime::start(services.clone(), bus).await;
    let intake = SourceIntake::new(services.clone());
    Harness {
        services,
        store,
        runtime,
        intake,
    }
}

fn user_id() -> UserId {
    UserId::from_string("u1".to_string()).unwrap()
}

async fn seed_user(store: &MemoryStore, destinations: &[Destination]) {
    let mut user = UserRecord::new(user_id());
    for destination in destinations {
        user.add_integration(Integration::new(*destination));
    }
    store.put_user(user).await.unwrap();
}

async fn seed_pipeline(
    store: &MemoryStore,
    steps: Vec<PipelineStep>,
    destinations: &[Destination],
) -> PipelineConfig {
    let mut config = PipelineConfig::new("e2e pipeline", Source::Garmin);
    config.steps = steps;
    config.destinations = destinations.to_vec();
    store.put_pipeline(&user_id(), config.clone()).await.unwrap();
    config
}

fn run_envelope() -> ActivityEnvelope {
    let mut standardized = StandardizedActivity::new(ActivityType::Run);
    standardized.sessions.push(Session {
        total_elapsed_time_s: 3600.0,
        total_distance_m: 10_000.0,
        ..Session::default()
    });
    ActivityEnvelope::new(Source::Garmin, user_id(), standardized)
}

/// Poll until the user's single run satisfies the predicate.
async fn wait_for_run<F>(store: &MemoryStore, predicate: F) -> PipelineRun
where
    F: Fn(&PipelineRun) -> bool,
{
    for _ in 0..250 {
        let runs = store.list_for_user(&user_id()).await.unwrap();
        if let Some(run) = runs.iter().find(|run| predicate(run)) {
            return run.clone();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run never reached the expected state");
}

// =============================================================================
// Scenario 1: happy path, single destination
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_single_destination() {
    let mock = Arc::new(MockUploader::succeeding(Destination::Mock));
    let h = start(
        EnricherRegistry::standard(),
        UploaderRegistry::new().with_uploader(mock.clone()),
        CoreConfig::default(),
    )
    .await;
    seed_user(&h.store, &[Destination::Mock]).await;
    seed_pipeline(
        &h.store,
        vec![PipelineStep::new(ProviderType::Calories)],
        &[Destination::Mock],
    )
    .await;

    let envelope = run_envelope();
    let activity_id = envelope.activity_id.clone();
    let decision = h.intake.accept(envelope, None).await.unwrap();
    assert_eq!(decision, IntakeDecision::Accepted);

    let run = wait_for_run(&h.store, |run| run.status.is_terminal()).await;
    assert_eq!(run.status, RunStatus::Success);

    // The enriched description made it through to the destination.
    assert!(mock.remote().description.contains("🔥 Calories:"));

    let ledger_key = UploadedActivityRecord::key(Destination::Mock, &format!("mock-{activity_id}"));
    let row = h.store.get_record(&user_id(), &ledger_key).await.unwrap();
    assert!(row.is_some(), "ledger row {ledger_key} missing");

    let mock_status = &run.destinations[&Destination::Mock];
    assert_eq!(mock_status.state, DestinationState::Success);
    assert_eq!(
        mock_status.external_id.as_deref(),
        Some(format!("mock-{activity_id}").as_str())
    );

    let user = h.store.get_user(&user_id()).await.unwrap();
    assert_eq!(user.sync.count_this_month, 1);

    // Enricher output is visible on the audit trail.
    let records = h
        .store
        .for_pipeline_execution(&run.pipeline_execution_id)
        .await
        .unwrap();
    assert!(records
        .iter()
        .any(|r| r.service == "enricher" && r.status == ExecutionStatus::Success));

    h.runtime.shutdown().await;
}

// =============================================================================
// Scenario 2: bounceback
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn bounceback_creates_no_run() {
    let h = start(
        EnricherRegistry::standard(),
        UploaderRegistry::standard(),
        CoreConfig::default(),
    )
    .await;
    seed_user(&h.store, &[Destination::Hevy]).await;
    seed_pipeline(&h.store, vec![], &[Destination::Hevy]).await;

    // We uploaded abc123 to Hevy earlier.
    h.services
        .ledger()
        .record_upload(&user_id(), Destination::Hevy, "abc123", Source::Garmin, None)
        .await
        .unwrap();

    // Now Hevy's webhook echoes it back, repeatedly.
    for _ in 0..3 {
        let mut envelope = run_envelope();
        envelope.source = Source::Hevy;
        let decision = h.intake.accept(envelope, Some("abc123")).await.unwrap();
        assert_eq!(decision, IntakeDecision::DroppedLoop);
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.store.list_for_user(&user_id()).await.unwrap().is_empty());

    h.runtime.shutdown().await;
}

// =============================================================================
// Scenario 3: halt gate
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn logic_gate_halt_skips_run() {
    let h = start(
        EnricherRegistry::standard(),
        UploaderRegistry::standard(),
        CoreConfig::default(),
    )
    .await;
    seed_user(&h.store, &[Destination::Mock]).await;
    seed_pipeline(
        &h.store,
        vec![PipelineStep::new(ProviderType::LogicGate).with_input(
            "rules",
            r#"[{"field":"activity_type","op":"eq","value":"RUN"}]"#,
        )],
        &[Destination::Mock],
    )
    .await;

    h.intake.accept(run_envelope(), None).await.unwrap();

    let run = wait_for_run(&h.store, |run| run.status.is_terminal()).await;
    assert_eq!(run.status, RunStatus::Skipped);
    assert!(run
        .status_reason
        .as_deref()
        .unwrap_or("")
        .contains("logic_gate"));

    // Nothing reached the destination stage: the sub-status never left
    // PENDING and no ledger row exists.
    assert_eq!(
        run.destinations[&Destination::Mock].state,
        DestinationState::Pending
    );

    let records = h
        .store
        .for_pipeline_execution(&run.pipeline_execution_id)
        .await
        .unwrap();
    assert!(records
        .iter()
        .any(|r| r.service == "enricher" && r.status == ExecutionStatus::Skipped));

    h.runtime.shutdown().await;
}

// =============================================================================
// Scenario 4: retryable lag
// =============================================================================

/// Lags once with a short delay, then contributes.
#[derive(Debug, Default)]
struct LagOnceProvider {
    attempts: AtomicU32,
}

#[async_trait]
impl EnricherProvider for LagOnceProvider {
    fn name(&self) -> &str {
        "Lag Once"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Calories
    }

    async fn enrich(&self, _ctx: &EnrichContext<'_>) -> Result<EnrichmentResult> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(Error::data_lag(
                Duration::from_millis(50),
                "vendor still processing",
            ));
        }
        Ok(EnrichmentResult::empty().with_section("🔥 Calories:", "🔥 Calories: 700 kcal"))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn retryable_lag_completes_on_redelivery() {
    let enrichers =
        EnricherRegistry::new().with_provider(Arc::new(LagOnceProvider::default()));
    let h = start(
        enrichers,
        UploaderRegistry::new()
            .with_uploader(Arc::new(MockUploader::succeeding(Destination::Mock))),
        CoreConfig::default(),
    )
    .await;
    seed_user(&h.store, &[Destination::Mock]).await;
    seed_pipeline(
        &h.store,
        vec![PipelineStep::new(ProviderType::Calories)],
        &[Destination::Mock],
    )
    .await;

    h.intake.accept(run_envelope(), None).await.unwrap();

    let run = wait_for_run(&h.store, |run| run.status == RunStatus::Success).await;
    assert_eq!(run.lag_attempts, 1);

    let records = h
        .store
        .for_pipeline_execution(&run.pipeline_execution_id)
        .await
        .unwrap();
    assert!(records
        .iter()
        .any(|r| r.service == "enricher" && r.status == ExecutionStatus::LagRetry));
    assert!(records
        .iter()
        .any(|r| r.service == "enricher" && r.status == ExecutionStatus::Success));

    h.runtime.shutdown().await;
}

// =============================================================================
// Scenario 5: pause and resume
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn pause_and_resume_on_pending_input() {
    let mock = Arc::new(MockUploader::succeeding(Destination::Mock));
    let h = start(
        EnricherRegistry::standard(),
        UploaderRegistry::new().with_uploader(mock.clone()),
        CoreConfig::default(),
    )
    .await;
    seed_user(&h.store, &[Destination::Mock]).await;
    seed_pipeline(
        &h.store,
        vec![PipelineStep::new(ProviderType::CustomTitle)],
        &[Destination::Mock],
    )
    .await;

    let envelope = run_envelope();
    let activity_id = envelope.activity_id.clone();
    h.intake.accept(envelope, None).await.unwrap();

    // The provider parks and the run waits.
    let run = wait_for_run(&h.store, |run| run.status == RunStatus::AwaitingInput).await;
    let pending = h.store.waiting_for_user(&user_id()).await.unwrap();
    assert_eq!(pending.len(), 1);
    let pending = pending[0].clone();
    assert_eq!(pending.linked_activity_id, activity_id);
    assert_eq!(pending.enricher_provider_id, ProviderType::CustomTitle);
    assert_eq!(pending.required_fields, vec!["title".to_string()]);

    // The user answers; the run resumes and completes.
    let mut input = HashMap::new();
    input.insert("title".to_string(), "Sunrise Intervals".to_string());
    h.services
        .resumer()
        .resolve(&user_id(), &pending.pending_id, input)
        .await
        .unwrap();

    let run = wait_for_run(&h.store, |run| run.status == RunStatus::Success).await;
    assert_eq!(run.pipeline_execution_id, pending.pipeline_execution_id);

    // First upload for this destination: CREATE, carrying the user's title.
    let calls = mock.calls();
    assert!(matches!(calls.as_slice(), [MockCall::Create { .. }]));
    assert_eq!(mock.remote().name, "Sunrise Intervals");
    assert!(mock.remote().description.contains("📝 Title: Sunrise Intervals"));

    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn second_resume_updates_instead_of_recreating() {
    let mock = Arc::new(MockUploader::succeeding(Destination::Mock));
    let h = start(
        EnricherRegistry::standard(),
        UploaderRegistry::new().with_uploader(mock.clone()),
        CoreConfig::default(),
    )
    .await;
    seed_user(&h.store, &[Destination::Mock]).await;
    seed_pipeline(
        &h.store,
        vec![
            PipelineStep::new(ProviderType::CustomTitle),
            PipelineStep::new(ProviderType::Calories),
        ],
        &[Destination::Mock],
    )
    .await;

    // First round: pause, resolve, sync.
    h.intake.accept(run_envelope(), None).await.unwrap();
    wait_for_run(&h.store, |run| run.status == RunStatus::AwaitingInput).await;
    let pending = h.store.waiting_for_user(&user_id()).await.unwrap()[0].clone();

    let mut input = HashMap::new();
    input.insert("title".to_string(), "First Title".to_string());
    h.services
        .resumer()
        .resolve(&user_id(), &pending.pending_id, input)
        .await
        .unwrap();
    let run = wait_for_run(&h.store, |run| run.status == RunStatus::Success).await;

    // The user edits the title later: a second pending input against the
    // same, already-synced run.
    let parked = h
        .services
        .blobs
        .get(&pending.original_payload_uri)
        .await
        .unwrap();
    let parked_envelope: ActivityEnvelope = serde_json::from_slice(&parked).unwrap();

    let followup_id = PendingInputId::new();
    let payload = serde_json::to_vec(&parked_envelope).unwrap();
    let uri = h
        .services
        .blobs
        .put("fitlink-artifacts", &format!("pending/{followup_id}.json"), payload.into())
        .await
        .unwrap();
    let now = Utc::now();
    h.store
        .create(PendingInput {
            pending_id: followup_id.clone(),
            user_id: user_id(),
            pipeline_id: run.pipeline_id.clone(),
            pipeline_execution_id: run.pipeline_execution_id.clone(),
            enricher_provider_id: ProviderType::CustomTitle,
            required_fields: vec!["title".to_string()],
            input_data: HashMap::new(),
            original_payload_uri: uri,
            linked_activity_id: parked_envelope.activity_id.clone(),
            auto_deadline: now + chrono::Duration::hours(24),
            state: PendingInputState::Waiting,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    let mut input = HashMap::new();
    input.insert("title".to_string(), "Second Title".to_string());
    h.services
        .resumer()
        .resolve(&user_id(), &followup_id, input)
        .await
        .unwrap();

    // Wait until the mock records the update.
    for _ in 0..250 {
        if mock
            .calls()
            .iter()
            .any(|call| matches!(call, MockCall::Update { .. }))
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let calls = mock.calls();
    let update = calls
        .iter()
        .find_map(|call| match call {
            MockCall::Update { external_id, patch } => Some((external_id.clone(), patch.clone())),
            _ => None,
        })
        .expect("second resume should update, not create");

    assert_eq!(
        update.0,
        run.successful_external_id(Destination::Mock).unwrap()
    );
    assert_eq!(update.1.name.as_deref(), Some("Second Title"));
    // The title section was replaced, not duplicated.
    let remote = mock.remote().description;
    assert!(remote.contains("📝 Title: Second Title"));
    assert!(!remote.contains("First Title"));

    // Exactly one CREATE across both rounds.
    assert_eq!(
        calls
            .iter()
            .filter(|call| matches!(call, MockCall::Create { .. }))
            .count(),
        1
    );

    h.runtime.shutdown().await;
}

// =============================================================================
// Scenario 6: partial fan-out
// =============================================================================

async fn failing_webhook_server() -> String {
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;

    let app = Router::new().route(
        "/activities",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "backend exploded") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_fan_out_mixes_success_and_failure() {
    let mock = Arc::new(MockUploader::succeeding(Destination::Mock));
    let h = start(
        EnricherRegistry::standard(),
        UploaderRegistry::new()
            .with_uploader(mock.clone())
            .with_uploader(Arc::new(WebhookUploader::new(Destination::Webhook))),
        CoreConfig::default(),
    )
    .await;

    let base_url = failing_webhook_server().await;
    let mut user = UserRecord::new(user_id());
    user.add_integration(Integration::new(Destination::Mock));
    user.add_integration(
        Integration::new(Destination::Webhook).with_credential("base_url", &base_url),
    );
    h.store.put_user(user).await.unwrap();
    seed_pipeline(
        &h.store,
        vec![PipelineStep::new(ProviderType::Calories)],
        &[Destination::Mock, Destination::Webhook],
    )
    .await;

    let envelope = run_envelope();
    let activity_id = envelope.activity_id.clone();
    h.intake.accept(envelope, None).await.unwrap();

    let run = wait_for_run(&h.store, |run| run.status.is_terminal()).await;
    assert_eq!(run.status, RunStatus::Partial);

    assert_eq!(
        run.destinations[&Destination::Mock].state,
        DestinationState::Success
    );
    let webhook_status = &run.destinations[&Destination::Webhook];
    assert_eq!(webhook_status.state, DestinationState::Failed);
    assert!(webhook_status
        .error
        .as_deref()
        .unwrap_or("")
        .contains("500"));

    // Ledger: one row, for the successful destination only.
    let mock_key = UploadedActivityRecord::key(Destination::Mock, &format!("mock-{activity_id}"));
    assert!(h.store.get_record(&user_id(), &mock_key).await.unwrap().is_some());

    // Counter: one per successful destination.
    let user = h.store.get_user(&user_id()).await.unwrap();
    assert_eq!(user.sync.count_this_month, 1);

    // The failed run shows up on the unsynchronized surface.
    let unsynced = h.store.unsynchronized(&user_id()).await.unwrap();
    assert_eq!(unsynced.len(), 1);

    h.runtime.shutdown().await;
}

// =============================================================================
// Webhook destination happy path (real HTTP round trip)
// =============================================================================

async fn healthy_webhook_server() -> String {
    use axum::routing::post;
    use axum::{Json, Router};

    let app = Router::new().route(
        "/activities",
        post(|| async { Json(serde_json::json!({"id": "wh-1"})) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread")]
async fn webhook_destination_round_trip() {
    let h = start(
        EnricherRegistry::standard(),
        UploaderRegistry::new()
            .with_uploader(Arc::new(WebhookUploader::new(Destination::Webhook))),
        CoreConfig::default(),
    )
    .await;

    let base_url = healthy_webhook_server().await;
    let mut user = UserRecord::new(user_id());
    user.add_integration(
        Integration::new(Destination::Webhook).with_credential("base_url", &base_url),
    );
    h.store.put_user(user).await.unwrap();
    seed_pipeline(&h.store, vec![], &[Destination::Webhook]).await;

    h.intake.accept(run_envelope(), None).await.unwrap();

    let run = wait_for_run(&h.store, |run| run.status.is_terminal()).await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(
        run.destinations[&Destination::Webhook].external_id.as_deref(),
        Some("wh-1")
    );

    let key = UploadedActivityRecord::key(Destination::Webhook, "wh-1");
    assert!(h.store.get_record(&user_id(), &key).await.unwrap().is_some());

    h.runtime.shutdown().await;
}

// =============================================================================
// Splitter idempotence under redelivery
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn redelivered_raw_message_creates_one_run() {
    let h = start(
        EnricherRegistry::standard(),
        UploaderRegistry::new()
            .with_uploader(Arc::new(MockUploader::succeeding(Destination::Mock))),
        CoreConfig::default(),
    )
    .await;
    seed_user(&h.store, &[Destination::Mock]).await;
    seed_pipeline(&h.store, vec![], &[Destination::Mock]).await;

    let envelope = run_envelope();
    h.intake.accept(envelope.clone(), None).await.unwrap();
    h.intake.accept(envelope, None).await.unwrap();

    wait_for_run(&h.store, |run| run.status.is_terminal()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let runs = h.store.list_for_user(&user_id()).await.unwrap();
    assert_eq!(runs.len(), 1, "dedup key must absorb the redelivery");

    h.runtime.shutdown().await;
}

// =============================================================================
// Auto-resume driver claims exactly once
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn auto_resume_fills_default_after_deadline() {
    let mut config = CoreConfig::default();
    // Pending inputs expire immediately; the driver scans fast.
    config.limits.pending_input_ttl = Duration::from_millis(0);
    config.limits.auto_resume_scan_interval = Duration::from_millis(50);

    let mock = Arc::new(MockUploader::succeeding(Destination::Mock));
    let h = start(
        EnricherRegistry::standard(),
        UploaderRegistry::new().with_uploader(mock.clone()),
        config,
    )
    .await;
    seed_user(&h.store, &[Destination::Mock]).await;
    seed_pipeline(
        &h.store,
        vec![PipelineStep::new(ProviderType::CustomTitle)],
        &[Destination::Mock],
    )
    .await;

    h.intake.accept(run_envelope(), None).await.unwrap();

    // The driver claims the expired input and the provider fills a default.
    let run = wait_for_run(&h.store, |run| run.status == RunStatus::Success).await;
    assert_eq!(mock.remote().name, "Run");

    // The pending input ended in exactly one terminal state.
    let pending = h.store.waiting_for_user(&user_id()).await.unwrap();
    assert!(pending.is_empty());

    let records = h
        .store
        .for_pipeline_execution(&run.pipeline_execution_id)
        .await
        .unwrap();
    // Two enricher passes: the parking one and the auto-resumed one.
    assert!(
        records
            .iter()
            .filter(|r| r.service == "enricher")
            .count()
            >= 2
    );

    h.runtime.shutdown().await;
}
