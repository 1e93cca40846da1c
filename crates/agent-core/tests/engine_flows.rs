use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agent_core::{
    CallPurpose, DecisionEngine, EngineConfig, LowConfidencePolicy, MockSearchProvider,
    MockTextGenerator, PageKind, PageRepresentation, ProviderError, SearchHit, StepRequest,
    StepResponse, UsageRecord, UsageRecorder, WitnessedChanges,
};
use agent_core::AgentError;
use async_trait::async_trait;
use parking_lot::Mutex;
use waypoint_core_types::{
    ActionRecord, CorrectionRecord, StepStatus, SubTaskStatus, Task, TaskComplexity, TaskId,
    TaskStatus, VerificationTier,
};
use waypoint_task_store::{InMemoryTaskStore, StoreError, TaskStore};

const HOME: &str = "[1]<a href=\"/pricing\">Pricing</a>\n[2]<button>Sign in</button>";
const PRICING: &str = "[3]<a href=\"/enterprise\">Enterprise</a>\n[4]<button>Contact sales</button>";
const TWO_STEP_PLAN: &str =
    r#"{"steps":[{"index":0,"description":"Click \"Pricing\""},{"index":1,"description":"Click \"Enterprise\""}]}"#;

fn structural(content: &str) -> PageRepresentation {
    PageRepresentation::new(content, PageKind::Structural)
}

fn first_request() -> StepRequest {
    StepRequest::new("open the enterprise pricing page", "https://a.com/").with_page(structural(HOME))
}

fn follow_up(previous: &StepResponse, url: &str, content: &str) -> StepRequest {
    let next = previous.step_index.map(|index| index + 1).unwrap_or(0);
    StepRequest::new("open the enterprise pricing page", url)
        .with_task(previous.task_id.clone(), next)
        .with_page(structural(content))
}

fn page_context(mock: &MockTextGenerator) {
    mock.push(
        CallPurpose::ContextClassification,
        r#"{"primarySource":"PAGE","missingFields":[],"reasoning":"the page has what we need"}"#,
    );
}

fn refine_click(mock: &MockTextGenerator, id: u32) {
    mock.push(
        CallPurpose::StepRefinement,
        format!(r#"{{"toolName":"click","toolType":"DOM","parameters":{{"id":{id}}},"thought":"click {id}"}}"#),
    );
}

fn setup(config: EngineConfig) -> (DecisionEngine, Arc<MockTextGenerator>, Arc<InMemoryTaskStore>) {
    let mock = Arc::new(MockTextGenerator::new());
    let store = Arc::new(InMemoryTaskStore::new());
    let engine = DecisionEngine::new(store.clone(), mock.clone()).with_config(config);
    (engine, mock, store)
}

async fn started(engine: &DecisionEngine, mock: &MockTextGenerator) -> StepResponse {
    page_context(mock);
    mock.push(CallPurpose::Planning, TWO_STEP_PLAN);
    refine_click(mock, 1);
    engine.step(first_request()).await.expect("first step")
}

#[tokio::test]
async fn navigation_is_verified_deterministically_and_plan_advances() {
    let (engine, mock, store) = setup(EngineConfig::default());
    let first = started(&engine, &mock).await;
    assert_eq!(first.action.as_deref(), Some("click(1)"));

    refine_click(&mock, 3);
    let second = engine
        .step(follow_up(&first, "https://a.com/pricing", PRICING))
        .await
        .unwrap();

    let verdict = second.verification.as_ref().expect("verification");
    assert!(verdict.success);
    assert!(!verdict.goal_achieved);
    assert_eq!(verdict.result.tier, VerificationTier::Deterministic);
    assert_eq!(verdict.result.confidence, 1.0);
    assert_eq!(mock.calls_for(CallPurpose::SemanticVerification), 0);
    assert_eq!(mock.calls_for(CallPurpose::ContextClassification), 1);

    assert_eq!(second.action.as_deref(), Some("click(3)"));
    assert_eq!(second.step_index, Some(1));
    let plan = second.plan.unwrap();
    assert_eq!(plan.current_step_index, 1);
    assert_eq!(plan.steps[0].status, StepStatus::Completed);

    let task = store.get(&second.task_id).await.unwrap().unwrap();
    assert_eq!(task.consecutive_failures, 0);
    assert_eq!(task.metrics.deterministic_verdicts, 1);
    assert_eq!(store.action_records(&task.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn final_navigation_of_simple_task_finishes() {
    let (engine, mock, _) = setup(EngineConfig::default());
    let first = started(&engine, &mock).await;
    refine_click(&mock, 3);
    let second = engine
        .step(follow_up(&first, "https://a.com/pricing", PRICING))
        .await
        .unwrap();

    let third = engine
        .step(follow_up(&second, "https://a.com/enterprise", "<h1>Enterprise plans</h1>"))
        .await
        .unwrap();
    assert_eq!(third.status, TaskStatus::Completed);
    assert_eq!(third.action.as_deref(), Some("finish()"));
    assert!(third.verification.unwrap().goal_achieved);

    let calls = mock.total_calls();
    let idle = engine
        .step(
            StepRequest::new("open the enterprise pricing page", "https://a.com/enterprise")
                .with_task(third.task_id.clone(), 2),
        )
        .await
        .unwrap();
    assert!(idle.action.is_none());
    assert_eq!(idle.status, TaskStatus::Completed);
    assert_eq!(mock.total_calls(), calls);
}

#[tokio::test]
async fn actuator_failure_triggers_accepted_correction() {
    let (engine, mock, store) = setup(EngineConfig::default());
    let first = started(&engine, &mock).await;

    mock.push(
        CallPurpose::Correction,
        r#"{"strategy":"ALTERNATIVE_SELECTOR","reason":"the link is hidden behind a menu","correctedAction":"click(2)","correctedDescription":"Open the menu and click \"Pricing\""}"#,
    );
    let request = follow_up(&first, "https://a.com/", HOME)
        .with_execution(false, Some("element 1 is not visible".into()));
    let second = engine.step(request).await.unwrap();

    let verdict = second.verification.as_ref().unwrap();
    assert!(!verdict.success);
    assert_eq!(verdict.result.confidence, 1.0);
    assert_eq!(second.action.as_deref(), Some("click(2)"));
    assert_eq!(second.status, TaskStatus::Correcting);
    let correction = second.correction.as_ref().expect("correction summary");
    assert_eq!(correction.attempt, 1);
    assert_eq!(mock.calls_for(CallPurpose::StepRefinement), 1);

    let records = store.correction_records(&second.task_id, Some(0)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].original_action, "click(1)");
    let plan = second.plan.unwrap();
    assert_eq!(plan.steps[0].description, "Open the menu and click \"Pricing\"");
    assert_eq!(plan.steps[0].status, StepStatus::Active);
}

#[tokio::test]
async fn rejected_correction_degrades_to_regeneration_with_reason() {
    let (engine, mock, store) = setup(EngineConfig::default());
    let first = started(&engine, &mock).await;

    // Proposes the action that just failed.
    mock.push(
        CallPurpose::Correction,
        r#"{"strategy":"RETRY_WITH_DELAY","reason":"try again","correctedAction":"click( 1 )","correctedDescription":"Click Pricing"}"#,
    );
    refine_click(&mock, 2);
    let request = follow_up(&first, "https://a.com/", HOME)
        .with_execution(false, Some("timeout".into()));
    let second = engine.step(request).await.unwrap();

    assert!(second.correction.is_none());
    assert_eq!(second.action.as_deref(), Some("click(2)"));
    assert!(store
        .correction_records(&second.task_id, None)
        .await
        .unwrap()
        .is_empty());
    let refinement = mock
        .calls()
        .into_iter()
        .filter(|call| call.purpose == CallPurpose::StepRefinement)
        .last()
        .unwrap();
    assert!(refinement.prompt.contains("Previous attempt failed"));
    let task = store.get(&second.task_id).await.unwrap().unwrap();
    assert_eq!(task.metrics.corrections_rejected, 1);
    assert_eq!(task.consecutive_failures, 1);
}

#[tokio::test]
async fn retry_budget_exhaustion_fails_task_without_provider_call() {
    let (engine, mock, store) = setup(EngineConfig::default());
    page_context(&mock);
    mock.push(CallPurpose::Planning, TWO_STEP_PLAN);
    refine_click(&mock, 1);
    let mut request = first_request();
    request.max_retries_per_step = Some(1);
    let first = engine.step(request).await.unwrap();

    mock.push(
        CallPurpose::Correction,
        r#"{"strategy":"ALTERNATIVE_SELECTOR","reason":"hidden","correctedAction":"click(2)","correctedDescription":"Click the other Pricing link"}"#,
    );
    let second = engine
        .step(follow_up(&first, "https://a.com/", HOME).with_execution(false, Some("hidden".into())))
        .await
        .unwrap();
    assert_eq!(second.correction.as_ref().unwrap().attempt, 1);

    let corrections_before = mock.calls_for(CallPurpose::Correction);
    let third = engine
        .step(follow_up(&second, "https://a.com/", HOME).with_execution(false, Some("hidden".into())))
        .await
        .unwrap();
    assert_eq!(mock.calls_for(CallPurpose::Correction), corrections_before);
    assert_eq!(third.status, TaskStatus::Failed);
    assert!(third.action.is_none());
    assert!(third.thought.contains("correction attempts"));

    let task = store.get(&third.task_id).await.unwrap().unwrap();
    assert_eq!(task.plan.unwrap().steps[0].status, StepStatus::Failed);
    assert!(task.failure_reason.is_some());
}

#[tokio::test]
async fn step_limit_fails_task_after_verifying_last_action() {
    let (engine, mock, _) = setup(EngineConfig::default().with_max_steps(1));
    let first = started(&engine, &mock).await;
    let second = engine
        .step(follow_up(&first, "https://a.com/pricing", PRICING))
        .await
        .unwrap();
    assert!(second.verification.unwrap().success);
    assert_eq!(second.status, TaskStatus::Failed);
    assert!(second.thought.contains("step limit"));
    assert_eq!(mock.calls_for(CallPurpose::StepRefinement), 1);
}

#[tokio::test]
async fn private_field_asks_user_and_answer_resumes() {
    let (engine, mock, store) = setup(EngineConfig::default());
    mock.push(
        CallPurpose::ContextClassification,
        r#"{"primarySource":"ASK_USER","missingFields":["social security number"],"reasoning":"form needs the SSN"}"#,
    );
    let first = engine.step(first_request()).await.unwrap();
    assert!(first.action.is_none());
    assert!(first.plan.is_none());
    let question = first.clarification.clone().expect("clarification");
    assert!(question.contains("social security number"));
    assert_eq!(mock.calls_for(CallPurpose::Planning), 0);

    // Re-sent without an answer: nothing runs.
    let waiting = engine
        .step(first_request().with_task(first.task_id.clone(), 0))
        .await
        .unwrap();
    assert_eq!(waiting.clarification.as_deref(), Some(question.as_str()));
    assert_eq!(mock.total_calls(), 1);

    page_context(&mock);
    mock.push(CallPurpose::Planning, TWO_STEP_PLAN);
    refine_click(&mock, 1);
    let answered = engine
        .step(
            first_request()
                .with_task(first.task_id.clone(), 0)
                .with_user_message("123-45-6789"),
        )
        .await
        .unwrap();
    assert!(answered.clarification.is_none());
    assert_eq!(answered.action.as_deref(), Some("click(1)"));
    let task = store.get(&answered.task_id).await.unwrap().unwrap();
    assert!(task.context_notes.iter().any(|note| note.contains("123-45-6789")));
}

#[tokio::test]
async fn placeholder_in_generated_action_becomes_clarification() {
    let (engine, mock, _) = setup(EngineConfig::default());
    page_context(&mock);
    mock.push(CallPurpose::Planning, r#"{"steps":[{"index":0,"description":"Enter the SSN"}]}"#);
    mock.push(
        CallPurpose::StepRefinement,
        r#"{"toolName":"setValue","parameters":{"id":4,"text":"[social security number]"},"thought":"fill the field"}"#,
    );
    let response = engine.step(first_request()).await.unwrap();
    assert!(response.action.is_none());
    assert!(response.step_index.is_none());
    assert!(response.clarification.unwrap().contains("social security number"));
}

#[tokio::test]
async fn external_gap_is_searched_and_generation_resumes() {
    let search = Arc::new(MockSearchProvider::new());
    search.push_hits(vec![SearchHit {
        title: "Opening hours".into(),
        url: "https://museum.example/hours".into(),
        snippet: "Open daily 9:00-17:00".into(),
    }]);
    let mock = Arc::new(MockTextGenerator::new());
    let store = Arc::new(InMemoryTaskStore::new());
    let engine = DecisionEngine::new(store.clone(), mock.clone()).with_search(search.clone());

    page_context(&mock);
    mock.push(CallPurpose::Planning, r#"{"steps":[{"index":0,"description":"Pick a visiting time"}]}"#);
    mock.push(
        CallPurpose::StepRefinement,
        r#"{"toolName":"select","parameters":{},"action":"","thought":"I need [MISSING_INFO: museum opening hours] first"}"#,
    );
    mock.push(CallPurpose::SearchEvaluation, r#"{"solved":true,"confidence":0.9}"#);
    refine_click(&mock, 2);

    let response = engine.step(first_request()).await.unwrap();
    assert_eq!(response.action.as_deref(), Some("click(2)"));
    assert_eq!(search.queries().len(), 1);
    assert!(search.queries()[0].text.contains("museum opening hours"));
    let task = store.get(&response.task_id).await.unwrap().unwrap();
    assert!(task.context_notes.iter().any(|note| note.contains("9:00-17:00")));
}

#[tokio::test]
async fn memory_context_with_search_requirement_searches_before_planning() {
    let search = Arc::new(MockSearchProvider::new());
    search.push_hits(vec![SearchHit {
        title: "Opening hours".into(),
        url: "https://museum.example/hours".into(),
        snippet: "Open daily 9:00-17:00".into(),
    }]);
    let mock = Arc::new(MockTextGenerator::new());
    let store = Arc::new(InMemoryTaskStore::new());
    let engine = DecisionEngine::new(store.clone(), mock.clone()).with_search(search.clone());

    mock.push(
        CallPurpose::ContextClassification,
        r#"{"primarySource":"MEMORY","requiredSources":["MEMORY","WEB_SEARCH"],"missingFields":["museum opening hours"]}"#,
    );
    mock.push(CallPurpose::SearchEvaluation, r#"{"solved":true,"confidence":0.9}"#);
    mock.push(CallPurpose::Planning, TWO_STEP_PLAN);
    refine_click(&mock, 1);

    let response = engine.step(first_request()).await.unwrap();
    assert_eq!(response.action.as_deref(), Some("click(1)"));
    assert_eq!(search.queries().len(), 1);
    assert_eq!(mock.calls_for(CallPurpose::SearchEvaluation), 1);
    let task = store.get(&response.task_id).await.unwrap().unwrap();
    assert!(task.context_notes.iter().any(|note| note.contains("9:00-17:00")));
}

#[tokio::test]
async fn long_plan_is_decomposed_into_sub_tasks() {
    let (engine, mock, store) = setup(EngineConfig::default());
    page_context(&mock);
    mock.push(
        CallPurpose::Planning,
        r#"{"steps":[
            {"index":0,"description":"Search for a dentist near Berlin"},
            {"index":1,"description":"Open the first result"},
            {"index":2,"description":"Fill the patient name field"},
            {"index":3,"description":"Fill the phone field"},
            {"index":4,"description":"Submit the booking form"},
            {"index":5,"description":"Confirm the appointment"},
            {"index":6,"description":"Schedule a reminder"}
        ]}"#,
    );
    refine_click(&mock, 1);
    let response = engine.step(first_request()).await.unwrap();

    let plan = response.plan.unwrap();
    assert!(plan.is_decomposed);
    assert!(plan.sub_tasks.len() >= 2);
    assert_eq!(plan.sub_tasks[0].status, SubTaskStatus::Active);
    let task = store.get(&response.task_id).await.unwrap().unwrap();
    assert_eq!(task.complexity, TaskComplexity::Complex);
    assert_eq!(mock.calls_for(CallPurpose::Decomposition), 1);
}

fn subscribe_setup(policy: LowConfidencePolicy) -> (DecisionEngine, Arc<MockTextGenerator>) {
    let config = EngineConfig::default()
        .with_lightweight_tier(false)
        .with_low_confidence_policy(policy);
    let (engine, mock, _) = setup(config);
    page_context(&mock);
    mock.push(CallPurpose::Planning, r#"{"steps":[{"index":0,"description":"Click Subscribe"}]}"#);
    refine_click(&mock, 2);
    mock.push(
        CallPurpose::SemanticVerification,
        r#"{"action_succeeded":true,"task_completed":true,"confidence":0.78,"reason":"a confirmation banner appeared"}"#,
    );
    (engine, mock)
}

const NEWSLETTER: &str = "[1]<input name=\"email\">\n[2]<button>Subscribe</button>";

fn subscribe_follow_up(first: &StepResponse) -> StepRequest {
    follow_up(first, "https://a.com/", NEWSLETTER).with_witnessed(WitnessedChanges {
        dom_mutated: true,
        ..Default::default()
    })
}

#[tokio::test]
async fn low_confidence_completion_is_logged_and_completes_by_default() {
    let (engine, mock) = subscribe_setup(LowConfidencePolicy::LogOnly);
    let first = engine
        .step(first_request().with_page(structural(NEWSLETTER)))
        .await
        .unwrap();
    let second = engine.step(subscribe_follow_up(&first)).await.unwrap();

    let verdict = second.verification.unwrap();
    assert!(verdict.goal_achieved);
    assert!(verdict.low_confidence_completion);
    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(mock.calls_for(CallPurpose::ActionGeneration), 0);
}

#[tokio::test]
async fn low_confidence_completion_can_require_confirmation() {
    let (engine, mock) = subscribe_setup(LowConfidencePolicy::RequireConfirmation);
    mock.push(
        CallPurpose::ActionGeneration,
        r#"{"thought":"the banner confirms the subscription","action":"finish()"}"#,
    );
    let first = engine
        .step(first_request().with_page(structural(NEWSLETTER)))
        .await
        .unwrap();
    let second = engine.step(subscribe_follow_up(&first)).await.unwrap();

    assert!(second.verification.unwrap().low_confidence_completion);
    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(second.action.as_deref(), Some("finish()"));
    let confirmation = mock
        .calls()
        .into_iter()
        .find(|call| call.purpose == CallPurpose::ActionGeneration)
        .unwrap();
    assert!(confirmation.prompt.contains("Confirm on the page"));
}

#[tokio::test]
async fn critic_rejecting_twice_emits_flagged_second_candidate() {
    let (engine, mock, _) = setup(EngineConfig::default().with_critic(true));
    page_context(&mock);
    mock.push(CallPurpose::Planning, TWO_STEP_PLAN);
    refine_click(&mock, 2);
    refine_click(&mock, 1);
    mock.push(CallPurpose::Critic, r#"{"approved":false,"reason":"element 2 signs in"}"#);
    mock.push(CallPurpose::Critic, r#"{"approved":false,"reason":"still unsure"}"#);

    let response = engine.step(first_request()).await.unwrap();
    assert!(response.critic_overridden);
    assert_eq!(response.action.as_deref(), Some("click(1)"));
    assert_eq!(mock.calls_for(CallPurpose::Critic), 2);
}

#[tokio::test]
async fn critic_approval_after_regeneration_is_not_flagged() {
    let (engine, mock, _) = setup(EngineConfig::default().with_critic(true));
    page_context(&mock);
    mock.push(CallPurpose::Planning, TWO_STEP_PLAN);
    refine_click(&mock, 2);
    refine_click(&mock, 1);
    mock.push(CallPurpose::Critic, r#"{"approved":false,"reason":"element 2 signs in"}"#);
    mock.push(CallPurpose::Critic, r#"{"approved":true,"reason":"pricing link"}"#);

    let response = engine.step(first_request()).await.unwrap();
    assert!(!response.critic_overridden);
    assert_eq!(response.action.as_deref(), Some("click(1)"));
}

/// Store that loses the version race on the next commit while `lose_next` is set.
struct RacingStore {
    inner: InMemoryTaskStore,
    lose_next: AtomicBool,
}

impl RacingStore {
    fn new(lose_next: bool) -> Self {
        Self {
            inner: InMemoryTaskStore::new(),
            lose_next: AtomicBool::new(lose_next),
        }
    }
}

#[async_trait]
impl TaskStore for RacingStore {
    async fn get(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        self.inner.get(id).await
    }

    async fn put(&self, task: Task) -> Result<Task, StoreError> {
        self.inner.put(task).await
    }

    async fn append_action_record(&self, record: ActionRecord) -> Result<(), StoreError> {
        self.inner.append_action_record(record).await
    }

    async fn append_correction_record(&self, record: CorrectionRecord) -> Result<(), StoreError> {
        self.inner.append_correction_record(record).await
    }

    async fn commit(
        &self,
        task: Task,
        action: Option<ActionRecord>,
        correction: Option<CorrectionRecord>,
    ) -> Result<Task, StoreError> {
        if self.lose_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::VersionConflict {
                task_id: task.id.clone(),
                stored: task.version + 1,
                given: task.version,
            });
        }
        self.inner.commit(task, action, correction).await
    }

    async fn action_records(&self, id: &TaskId) -> Result<Vec<ActionRecord>, StoreError> {
        self.inner.action_records(id).await
    }

    async fn correction_records(
        &self,
        id: &TaskId,
        step_index: Option<u32>,
    ) -> Result<Vec<CorrectionRecord>, StoreError> {
        self.inner.correction_records(id, step_index).await
    }
}

#[tokio::test]
async fn losing_version_race_is_a_conflict() {
    let mock = Arc::new(MockTextGenerator::offline());
    let store = Arc::new(RacingStore::new(true));
    let engine = DecisionEngine::new(store, mock);
    let err = engine.step(first_request()).await.unwrap_err();
    assert!(matches!(err, AgentError::Conflict(_)));
}

#[tokio::test]
async fn step_that_lost_the_race_can_be_resubmitted() {
    let mock = Arc::new(MockTextGenerator::new());
    let store = Arc::new(RacingStore::new(false));
    let engine = DecisionEngine::new(store.clone(), mock.clone());
    let first = started(&engine, &mock).await;

    store.lose_next.store(true, Ordering::SeqCst);
    refine_click(&mock, 3);
    let request = follow_up(&first, "https://a.com/pricing", PRICING);
    let err = engine.step(request.clone()).await.unwrap_err();
    assert!(matches!(err, AgentError::Conflict(_)));

    // Nothing from the losing cycle was persisted.
    let task = store.get(&first.task_id).await.unwrap().unwrap();
    assert_eq!(task.next_step_index, 1);
    assert_eq!(store.action_records(&task.id).await.unwrap().len(), 1);

    refine_click(&mock, 3);
    let second = engine.step(request).await.expect("resubmitted step");
    assert_eq!(second.step_index, Some(1));
    assert_eq!(second.action.as_deref(), Some("click(3)"));
    let indices: Vec<u32> = store
        .action_records(&second.task_id)
        .await
        .unwrap()
        .iter()
        .map(|record| record.step_index)
        .collect();
    assert_eq!(indices, vec![0, 1]);
}

#[derive(Default)]
struct CollectingRecorder {
    records: Mutex<Vec<UsageRecord>>,
    fail: bool,
}

#[async_trait]
impl UsageRecorder for CollectingRecorder {
    async fn record(&self, record: UsageRecord) -> Result<(), ProviderError> {
        if self.fail {
            return Err(ProviderError::Unavailable("ledger offline".into()));
        }
        self.records.lock().push(record);
        Ok(())
    }
}

#[tokio::test]
async fn usage_is_recorded_per_cycle() {
    let recorder = Arc::new(CollectingRecorder::default());
    let mock = Arc::new(MockTextGenerator::new());
    let engine = DecisionEngine::new(Arc::new(InMemoryTaskStore::new()), mock.clone())
        .with_usage_recorder(recorder.clone());
    let response = started(&engine, &mock).await;

    let records = recorder.records.lock();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task_id, response.task_id);
    assert_eq!(records[0].calls, 3);
    assert_eq!(records[0].provider, "mock");
}

#[tokio::test]
async fn failing_usage_recorder_does_not_fail_the_step() {
    let recorder = Arc::new(CollectingRecorder {
        fail: true,
        ..Default::default()
    });
    let mock = Arc::new(MockTextGenerator::new());
    let engine = DecisionEngine::new(Arc::new(InMemoryTaskStore::new()), mock.clone())
        .with_usage_recorder(recorder);
    let response = started(&engine, &mock).await;
    assert_eq!(response.action.as_deref(), Some("click(1)"));
}

#[tokio::test]
async fn offline_generator_drives_a_task_to_completion() {
    let engine = DecisionEngine::new(
        Arc::new(InMemoryTaskStore::new()),
        Arc::new(MockTextGenerator::offline()),
    );
    let response = engine.step(first_request()).await.unwrap();
    assert_eq!(response.action.as_deref(), Some("finish()"));
    assert_eq!(response.status, TaskStatus::Completed);
}
