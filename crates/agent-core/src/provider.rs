//! Ports the decision core consumes: text generation, web search and usage
//! bookkeeping, plus scripted in-process implementations for tests and
//! offline runs.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use waypoint_core_types::TaskId;

use crate::errors::ProviderError;
use crate::metrics;

/// Why a generation call is made. Adapters may route purposes to different
/// models; the engine uses it for accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPurpose {
    Planning,
    Decomposition,
    StepRefinement,
    ActionGeneration,
    OutcomePrediction,
    LightweightVerification,
    SemanticVerification,
    Correction,
    ContextClassification,
    SearchEvaluation,
    Critic,
}

impl CallPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            CallPurpose::Planning => "planning",
            CallPurpose::Decomposition => "decomposition",
            CallPurpose::StepRefinement => "step_refinement",
            CallPurpose::ActionGeneration => "action_generation",
            CallPurpose::OutcomePrediction => "outcome_prediction",
            CallPurpose::LightweightVerification => "lightweight_verification",
            CallPurpose::SemanticVerification => "semantic_verification",
            CallPurpose::Correction => "correction",
            CallPurpose::ContextClassification => "context_classification",
            CallPurpose::SearchEvaluation => "search_evaluation",
            CallPurpose::Critic => "critic",
        }
    }

    /// Calls that should go to the cheap model when one is configured.
    pub fn is_lightweight(self) -> bool {
        matches!(
            self,
            CallPurpose::LightweightVerification | CallPurpose::Critic
        )
    }
}

impl fmt::Display for CallPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON schema attached to a structured-output request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub schema: Value,
}

impl ResponseSchema {
    pub fn of<T: JsonSchema>(name: &'static str) -> Self {
        let root = schemars::schema_for!(T);
        Self {
            name,
            schema: serde_json::to_value(root).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub purpose: CallPurpose,
    pub system: String,
    pub prompt: String,
    pub schema: Option<ResponseSchema>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(purpose: CallPurpose, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            system: system.into(),
            prompt: prompt.into(),
            schema: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Upstream requests sent for one generation, rate-limit hops included.
    #[serde(default)]
    pub requests: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.requests += other.requests;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub text: String,
    pub usage: Option<Usage>,
    pub model: Option<String>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            model: None,
        }
    }
}

/// Abstraction over LLM backends so multiple vendors can plug into the core.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, ProviderError>;

    fn name(&self) -> &str {
        "unknown"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    /// Restrict hits to this registered domain.
    pub domain: Option<String>,
    pub max_results: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, ProviderError>;
}

/// Search provider used when web search is not configured.
#[derive(Debug, Default, Clone)]
pub struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchHit>, ProviderError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub task_id: TaskId,
    pub step_index: Option<u32>,
    pub provider: String,
    pub calls: u32,
    pub failures: u32,
    pub usage: Usage,
    pub recorded_at: DateTime<Utc>,
}

/// Cost bookkeeping sink. Failures are logged and otherwise ignored.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record(&self, record: UsageRecord) -> Result<(), ProviderError>;
}

#[derive(Debug, Default, Clone)]
pub struct NoopUsageRecorder;

#[async_trait]
impl UsageRecorder for NoopUsageRecorder {
    async fn record(&self, _record: UsageRecord) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Counters collected by [`MeteredGenerator`] during one decision cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLedger {
    pub calls: u32,
    pub failures: u32,
    pub usage: Usage,
    pub purposes: Vec<CallPurpose>,
}

/// Wraps a generator for the duration of one request and tallies calls,
/// failures and token usage.
pub struct MeteredGenerator<'a> {
    inner: &'a dyn TextGenerator,
    ledger: Mutex<CallLedger>,
}

impl<'a> MeteredGenerator<'a> {
    pub fn new(inner: &'a dyn TextGenerator) -> Self {
        Self {
            inner,
            ledger: Mutex::new(CallLedger::default()),
        }
    }

    pub fn ledger(&self) -> CallLedger {
        self.ledger.lock().clone()
    }
}

#[async_trait]
impl<'a> TextGenerator for MeteredGenerator<'a> {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, ProviderError> {
        let purpose = request.purpose;
        let result = self.inner.generate(request).await;
        let mut ledger = self.ledger.lock();
        ledger.calls += 1;
        ledger.purposes.push(purpose);
        match &result {
            Ok(generation) => {
                if let Some(usage) = generation.usage {
                    ledger.usage.add(usage);
                }
                metrics::record_provider_call(purpose, "ok");
            }
            Err(_) => {
                ledger.failures += 1;
                metrics::record_provider_call(purpose, "error");
            }
        }
        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Scripted generator for tests and offline development.
///
/// Responses are queued per [`CallPurpose`]; when a queue is empty the
/// purpose's fallback is returned, and without one the call fails with
/// [`ProviderError::Unavailable`].
#[derive(Default)]
pub struct MockTextGenerator {
    queues: Mutex<HashMap<CallPurpose, VecDeque<Result<String, ProviderError>>>>,
    fallbacks: Mutex<HashMap<CallPurpose, String>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl MockTextGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned answers for every purpose so the engine can run without a
    /// network provider.
    pub fn offline() -> Self {
        let mock = Self::new();
        let answers = [
            (
                CallPurpose::Planning,
                r#"{"steps":[{"index":0,"description":"Work toward the goal on the current page","reasoning":"offline planner","toolType":"DOM"}]}"#,
            ),
            (
                CallPurpose::StepRefinement,
                r#"{"toolName":"finish","toolType":"DOM","parameters":{},"thought":"offline mode cannot inspect the page"}"#,
            ),
            (
                CallPurpose::ActionGeneration,
                r#"{"thought":"offline mode cannot inspect the page","action":"finish()"}"#,
            ),
            (
                CallPurpose::LightweightVerification,
                r#"{"succeeded":true}"#,
            ),
            (
                CallPurpose::SemanticVerification,
                r#"{"action_succeeded":true,"task_completed":false,"confidence":0.75,"reason":"offline verifier"}"#,
            ),
            (
                CallPurpose::ContextClassification,
                r#"{"primarySource":"PAGE","requiredSources":["PAGE"],"missingFields":[],"reasoning":"offline classifier"}"#,
            ),
            (CallPurpose::Critic, r#"{"approved":true,"reason":"offline critic"}"#),
        ];
        for (purpose, text) in answers {
            mock.set_fallback(purpose, text);
        }
        mock
    }

    pub fn push(&self, purpose: CallPurpose, text: impl Into<String>) -> &Self {
        self.queues
            .lock()
            .entry(purpose)
            .or_default()
            .push_back(Ok(text.into()));
        self
    }

    pub fn push_error(&self, purpose: CallPurpose, error: ProviderError) -> &Self {
        self.queues
            .lock()
            .entry(purpose)
            .or_default()
            .push_back(Err(error));
        self
    }

    pub fn set_fallback(&self, purpose: CallPurpose, text: impl Into<String>) -> &Self {
        self.fallbacks.lock().insert(purpose, text.into());
        self
    }

    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, purpose: CallPurpose) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.purpose == purpose)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, ProviderError> {
        let purpose = request.purpose;
        self.calls.lock().push(request);
        let scripted = self
            .queues
            .lock()
            .get_mut(&purpose)
            .and_then(VecDeque::pop_front);
        let text = match scripted {
            Some(result) => result?,
            None => self.fallbacks.lock().get(&purpose).cloned().ok_or_else(|| {
                ProviderError::Unavailable(format!("no scripted response for {purpose}"))
            })?,
        };
        Ok(Generation {
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: (text.len() / 4) as u64,
                requests: 1,
            }),
            text,
            model: Some("mock".to_string()),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Scripted search provider; unscripted calls return no hits.
#[derive(Default)]
pub struct MockSearchProvider {
    responses: Mutex<VecDeque<Result<Vec<SearchHit>, ProviderError>>>,
    queries: Mutex<Vec<SearchQuery>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_hits(&self, hits: Vec<SearchHit>) -> &Self {
        self.responses.lock().push_back(Ok(hits));
        self
    }

    pub fn push_error(&self, error: ProviderError) -> &Self {
        self.responses.lock().push_back(Err(error));
        self
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, ProviderError> {
        self.queries.lock().push(query.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
