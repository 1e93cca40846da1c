//! Waypoint agent core.
//!
//! Per-step decision service for a web-browsing agent: given a goal, the
//! current page and the outcome of the previous action it verifies that
//! action, corrects course on failure, plans, and returns the next atomic
//! browser action together with its expected outcome. Continuity lives in
//! the task store; the engine itself keeps no per-task state.

pub mod atomic;
pub mod classify;
pub mod config;
pub mod context;
pub mod correction;
pub mod critic;
pub mod decompose;
pub mod engine;
pub mod errors;
pub mod generate;
pub mod grammar;
pub mod interrupt;
pub mod metrics;
pub mod planning;
pub mod predict;
pub mod prompt;
pub mod provider;
pub mod refine;
pub mod request;
pub mod search;
pub mod structured;
pub mod transitions;
pub mod verification;

pub use atomic::{atomize_plan, is_compound_action, split_compound_action};
pub use config::{EngineConfig, LowConfidencePolicy};
pub use context::{ContextDecision, ContextSource};
pub use correction::{CorrectionOutcome, SelfCorrector};
pub use decompose::{extract_outputs, HierarchicalDecomposer, PhaseCategory};
pub use engine::DecisionEngine;
pub use errors::{AgentError, ProviderError};
pub use grammar::{parse_action, validate_action, ActionVerb, GrammarError, ParsedAction};
pub use interrupt::{detect_missing_info, InfoKind, Interrupt, MissingInfo};
pub use metrics::register_metrics;
pub use planning::PlanningEngine;
pub use provider::{
    CallPurpose, Generation, GenerationRequest, MockSearchProvider, MockTextGenerator, NoSearch,
    NoopUsageRecorder, ResponseSchema, SearchHit, SearchProvider, SearchQuery, TextGenerator,
    Usage, UsageRecord, UsageRecorder,
};
pub use request::{
    ChatRole, ChatTurn, CorrectionSummary, ExecutionOutcome, KnowledgeSnippet, PageKind,
    PageRepresentation, PlanSnapshot, SearchBudget, StepRequest, StepResponse, WitnessedChanges,
};
pub use verification::{compute_is_last_step, route, RoutedVerification, TieredVerifier, VerificationInput};
