//! The decision engine: one call per browser step.
//!
//! ```text
//! step(request):
//!     load task, check the step index
//!     verify the previous action   -> correct on failure
//!     classify context             -> ask the user or search
//!     plan + decompose             (first request only)
//!     generate                     (correction | refined step | direct)
//!     critic gate
//!     predict, record, commit
//! ```
//!
//! The engine holds no per-task state. Everything a cycle changes is
//! collected in a [`Cycle`] and written back once, records first and the
//! task snapshot last, so a losing concurrent request fails before its
//! snapshot lands.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use waypoint_core_types::{
    ActionRecord, ActionType, BeforeState, CorrectionRecord, ExpectedOutcome, PlanStep, Task,
    TaskId, VerificationResult, VerificationTier,
};
use waypoint_task_store::TaskStore;

use crate::classify::classify_action;
use crate::config::{EngineConfig, LowConfidencePolicy};
use crate::context::{ContextClassifier, ContextInput, ContextSource};
use crate::correction::{CorrectionOutcome, CorrectionRequest, SelfCorrector};
use crate::critic::{Critic, CriticReview};
use crate::decompose::{extract_outputs, sub_task_context, HierarchicalDecomposer};
use crate::errors::AgentError;
use crate::generate::{ActionContext, ActionGenerator, GeneratedAction};
use crate::grammar::{parse_action, ActionVerb, ParsedAction};
use crate::interrupt::{clarification_question, Interrupt, MissingInfo};
use crate::metrics;
use crate::planning::{PlanningContext, PlanningEngine};
use crate::predict::OutcomePredictor;
use crate::prompt::truncate_chars;
use crate::provider::{
    CallLedger, MeteredGenerator, NoSearch, NoopUsageRecorder, SearchProvider, TextGenerator,
    UsageRecord, UsageRecorder,
};
use crate::refine::StepRefiner;
use crate::request::{CorrectionSummary, PlanSnapshot, SearchBudget, StepRequest, StepResponse};
use crate::search::{SearchManager, SearchStop};
use crate::transitions;
use crate::verification::{
    compute_is_last_step, content_hash, extract_skeleton, registered_domain, route, LookAhead,
    Observation, RoutedVerification, StructuralDiff, TieredVerifier, VerificationInput,
};

static QUOTED_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["“]([^"“”]{2,60})["”]|'([^']{2,60})'"#).expect("valid quoted label regex")
});

/// First quoted label in a step description, e.g. `Click "Checkout"`.
fn quoted_label(description: &str) -> Option<String> {
    let captures = QUOTED_LABEL.captures(description)?;
    let label = captures.get(1).or_else(|| captures.get(2))?.as_str().trim();
    (!label.is_empty()).then(|| label.to_string())
}

/// Components built from the engine configuration.
#[derive(Debug, Clone)]
struct Stages {
    verifier: TieredVerifier,
    corrector: SelfCorrector,
    planner: PlanningEngine,
    decomposer: HierarchicalDecomposer,
    refiner: StepRefiner,
    generator: ActionGenerator,
    predictor: OutcomePredictor,
    context: ContextClassifier,
    search: SearchManager,
    critic: Critic,
}

impl Stages {
    fn from_config(config: &EngineConfig) -> Self {
        Self {
            verifier: TieredVerifier::new(config),
            corrector: SelfCorrector::new(config),
            planner: PlanningEngine::new(),
            decomposer: HierarchicalDecomposer::new(config),
            refiner: StepRefiner::new(),
            generator: ActionGenerator::new(),
            predictor: OutcomePredictor::new(config.refine_predictions),
            context: ContextClassifier::new(),
            search: SearchManager::new(config),
            critic: Critic::new(config.enable_critic),
        }
    }
}

/// Action chosen for this cycle, ready for the response.
#[derive(Debug, Clone, Default)]
struct Emission {
    step_index: Option<u32>,
    thought: String,
    action: Option<String>,
    action_type: Option<ActionType>,
    expected_outcome: Option<ExpectedOutcome>,
    critic_overridden: bool,
}

/// Everything one decision cycle changes.
struct Cycle {
    task: Task,
    was_terminal: bool,
    verification: Option<RoutedVerification>,
    accepted: Option<CorrectionRecord>,
    /// Why the previous attempt failed, forwarded to generation.
    feedback: Option<String>,
    search_budget: SearchBudget,
    record: Option<ActionRecord>,
    emission: Emission,
}

impl Cycle {
    fn new(task: Task, search_budget: SearchBudget) -> Self {
        Self {
            was_terminal: task.is_terminal(),
            task,
            verification: None,
            accepted: None,
            feedback: None,
            search_budget,
            record: None,
            emission: Emission::default(),
        }
    }

    fn thought(&mut self, thought: impl Into<String>) {
        self.emission.thought = thought.into();
    }

    fn spend_searches(&mut self, calls: u32) {
        self.search_budget.remaining_searches = self.search_budget.remaining_searches.saturating_sub(calls);
    }
}

/// What the caller of a stage should do next.
enum Next {
    Continue,
    Commit,
}

pub struct DecisionEngine {
    store: Arc<dyn TaskStore>,
    generator: Arc<dyn TextGenerator>,
    search: Arc<dyn SearchProvider>,
    usage: Arc<dyn UsageRecorder>,
    config: EngineConfig,
    stages: Stages,
}

impl DecisionEngine {
    pub fn new(store: Arc<dyn TaskStore>, generator: Arc<dyn TextGenerator>) -> Self {
        let config = EngineConfig::default();
        Self {
            store,
            generator,
            search: Arc::new(NoSearch),
            usage: Arc::new(NoopUsageRecorder),
            stages: Stages::from_config(&config),
            config,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.stages = Stages::from_config(&config);
        self.config = config;
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = search;
        self
    }

    pub fn with_usage_recorder(mut self, usage: Arc<dyn UsageRecorder>) -> Self {
        self.usage = usage;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Runs one decision cycle.
    pub async fn step(&self, request: StepRequest) -> Result<StepResponse, AgentError> {
        request.validate()?;
        let task = self.load_task(&request).await?;
        if task.is_terminal() {
            return Ok(StepResponse::idle(
                &task,
                format!("task already {}", task.status.as_str()),
            ));
        }
        if let Some(got) = request.step_index {
            if got != task.next_step_index {
                return Err(AgentError::DuplicateStep {
                    task_id: task.id.clone(),
                    expected: task.next_step_index,
                    got,
                });
            }
        }
        if task.pending_clarification.is_some() && request.user_message.is_none() {
            return Ok(StepResponse::idle(&task, "waiting for the user to answer"));
        }

        let metered = MeteredGenerator::new(self.generator.as_ref());
        let mut cycle = Cycle::new(task, request.search_budget);
        self.run(&mut cycle, &request, &metered).await?;
        self.commit(cycle, metered.ledger()).await
    }

    async fn run(
        &self,
        cycle: &mut Cycle,
        request: &StepRequest,
        generator: &dyn TextGenerator,
    ) -> Result<(), AgentError> {
        if let Next::Commit = self.verify_previous(cycle, request, generator).await? {
            return Ok(());
        }
        if cycle.task.metrics.actions_issued >= self.config.max_steps {
            let reason = format!("step limit of {} actions reached", self.config.max_steps);
            warn!(target: "engine", task_id = %cycle.task.id, "{reason}");
            cycle.task = transitions::terminal_failure(&cycle.task, reason.clone())?;
            cycle.thought(reason);
            return Ok(());
        }
        if let Some(message) = request.user_message.as_deref() {
            cycle.task = transitions::clarification_answered(&cycle.task, message)?;
        }
        if cycle.task.plan.is_none() || request.user_message.is_some() {
            if let Next::Commit = self.gather_context(cycle, request, generator).await? {
                return Ok(());
            }
        }
        if cycle.task.plan.is_none() {
            self.plan(cycle, request, generator).await?;
        }
        self.act(cycle, request, generator).await
    }

    async fn load_task(&self, request: &StepRequest) -> Result<Task, AgentError> {
        let fresh = |id: TaskId| {
            let max_retries = request
                .max_retries_per_step
                .unwrap_or(self.config.max_retries_per_step);
            info!(target: "engine", task_id = %id, goal = %request.goal, "task created");
            Task::new(request.goal.trim(), request.target_url.clone())
                .with_id(id)
                .with_max_retries(max_retries)
        };
        match &request.task_id {
            None => Ok(fresh(TaskId::new())),
            Some(id) => match self.store.get(id).await? {
                Some(task) => Ok(task),
                None if request.step_index.is_some() => Err(AgentError::NotFound(id.clone())),
                None => Ok(fresh(id.clone())),
            },
        }
    }

    // ---- verification -------------------------------------------------

    async fn verify_previous(
        &self,
        cycle: &mut Cycle,
        request: &StepRequest,
        generator: &dyn TextGenerator,
    ) -> Result<Next, AgentError> {
        let Some(awaiting) = cycle.task.awaiting_verification else {
            return Ok(Next::Continue);
        };
        let record = match self.store.last_action_record(&cycle.task.id).await? {
            Some(record) if record.step_index == awaiting => record,
            _ => {
                warn!(target: "engine", task_id = %cycle.task.id, awaiting, "awaited action record missing; skipping verification");
                cycle.task.awaiting_verification = None;
                return Ok(Next::Continue);
            }
        };

        let result = match &request.execution {
            Some(outcome) if !outcome.success => VerificationResult::failed(
                1.0,
                format!(
                    "action failed to execute: {}",
                    outcome.error.as_deref().unwrap_or("no error detail")
                ),
                VerificationTier::Deterministic,
            ),
            _ => {
                let input = self.verification_input(&cycle.task, &record, request);
                self.stages.verifier.verify(&input, generator).await
            }
        };
        let mut routed = route(result, &self.config);
        info!(
            target: "engine",
            task_id = %cycle.task.id,
            step = record.step_index,
            tier = routed.result.tier.as_str(),
            success = routed.success,
            goal_achieved = routed.goal_achieved,
            confidence = routed.result.confidence,
            "previous action verified"
        );

        let next = if routed.success {
            self.on_verified(cycle, &mut routed, &record, request)?
        } else {
            cycle.task = transitions::verification_failed(&cycle.task, &routed)?;
            self.correct(cycle, &routed, &record, request, generator).await?
        };
        cycle.verification = Some(routed);
        Ok(next)
    }

    fn verification_input(&self, task: &Task, record: &ActionRecord, request: &StepRequest) -> VerificationInput {
        let observation = record.before.skeleton.as_ref().map(|before| Observation {
            diff: StructuralDiff::between(before, &extract_skeleton(&request.page.content)),
        });
        let meaningful_content_change = observation
            .as_ref()
            .map(|observed| observed.diff.is_meaningful())
            .unwrap_or(false);
        let look_ahead = task
            .plan
            .as_ref()
            .and_then(|plan| plan.next_step())
            .and_then(|next| quoted_label(&next.description))
            .filter(|_| !request.page.content.trim().is_empty())
            .map(|element| LookAhead {
                present: request
                    .page
                    .content
                    .to_lowercase()
                    .contains(&element.to_lowercase()),
                element,
            });
        VerificationInput {
            goal: task.goal.clone(),
            before_url: request
                .previous_url
                .clone()
                .unwrap_or_else(|| record.before.url.clone()),
            after_url: request.current_url.clone(),
            action: record.action.clone(),
            action_type: record.action_type,
            is_last_step: compute_is_last_step(task.plan.as_ref()),
            meaningful_content_change,
            witnessed: request.witnessed,
            complexity: task.complexity,
            look_ahead,
            expected: record.expected_outcome.clone(),
            observation,
            after_page: truncate_chars(&request.page.content, self.config.max_page_chars / 2),
        }
    }

    fn on_verified(
        &self,
        cycle: &mut Cycle,
        routed: &mut RoutedVerification,
        record: &ActionRecord,
        request: &StepRequest,
    ) -> Result<Next, AgentError> {
        cycle.task = transitions::verification_succeeded(&cycle.task, routed)?;
        if routed.goal_achieved {
            let confirm = routed.low_confidence_completion
                && self.config.low_confidence_policy == LowConfidencePolicy::RequireConfirmation
                && !cycle.task.pending_confirmation;
            if confirm {
                info!(target: "engine", task_id = %cycle.task.id, "low-confidence completion held for confirmation");
                cycle.task = transitions::confirmation_requested(&cycle.task)?;
                cycle.task = transitions::step_completed(&cycle.task)?;
                return Ok(Next::Continue);
            }
            cycle.task = transitions::task_completed(&cycle.task)?;
            cycle.emission.action = Some(ParsedAction::finish().to_string());
            cycle.thought(format!("Goal achieved: {}", routed.result.reason));
            return Ok(Next::Commit);
        }

        let closes_sub_task = cycle
            .task
            .hierarchy
            .as_ref()
            .filter(|hierarchy| hierarchy.is_decomposed)
            .and_then(|hierarchy| hierarchy.current())
            .and_then(|sub_task| sub_task.last_step_index())
            .is_some_and(|last| Some(last) == record.plan_step_index);
        cycle.task = transitions::step_completed(&cycle.task)?;
        if closes_sub_task {
            let outputs = cycle
                .task
                .hierarchy
                .as_ref()
                .and_then(|hierarchy| hierarchy.current())
                .map(|sub_task| {
                    let evidence = format!(
                        "{}\n{}\n{}",
                        routed.result.reason,
                        request.current_url,
                        request.page.describe(self.config.max_page_chars)
                    );
                    extract_outputs(sub_task, &evidence)
                })
                .unwrap_or_default();
            info!(target: "engine", task_id = %cycle.task.id, outputs = outputs.len(), "sub-task completed");
            cycle.task = transitions::sub_task_completed(&cycle.task, outputs)?;
            routed.result.sub_task_completed = Some(true);
            if let Some(verification) = cycle.task.last_verification.as_mut() {
                verification.sub_task_completed = Some(true);
            }
        }
        Ok(Next::Continue)
    }

    async fn correct(
        &self,
        cycle: &mut Cycle,
        routed: &RoutedVerification,
        record: &ActionRecord,
        request: &StepRequest,
        generator: &dyn TextGenerator,
    ) -> Result<Next, AgentError> {
        let plan_len = cycle.task.plan.as_ref().map(|plan| plan.len()).unwrap_or(0) as u32;
        let step = record
            .plan_step_index
            .and_then(|index| cycle.task.plan.as_ref()?.step(index).cloned())
            .unwrap_or_else(|| PlanStep::new(plan_len, cycle.task.goal.clone()));
        let previous = self
            .store
            .correction_records(&cycle.task.id, Some(step.index))
            .await?;
        let page_state = request.page.describe(self.config.max_page_chars);
        let correction = CorrectionRequest {
            task_id: &cycle.task.id,
            goal: &cycle.task.goal,
            step: &step,
            failed_action: &record.action,
            failure_reason: &routed.result.reason,
            page_state: &page_state,
            previous: &previous,
            max_retries_per_step: cycle.task.max_retries_per_step,
            prior_consecutive_failures: cycle.task.consecutive_failures.saturating_sub(1),
        };
        match self.stages.corrector.correct(&correction, generator).await {
            CorrectionOutcome::Terminal { reason } => {
                cycle.task = transitions::terminal_failure(&cycle.task, reason.clone())?;
                cycle.thought(reason);
                Ok(Next::Commit)
            }
            CorrectionOutcome::Accepted(accepted) => {
                cycle.task = transitions::correction_accepted(&cycle.task, &accepted)?;
                cycle.accepted = Some(accepted);
                Ok(Next::Continue)
            }
            CorrectionOutcome::Unavailable { reason } => {
                cycle.task = transitions::correction_rejected(&cycle.task)?;
                cycle.feedback = Some(format!("{} ({reason})", routed.result.reason));
                Ok(Next::Continue)
            }
        }
    }

    // ---- context ------------------------------------------------------

    async fn gather_context(
        &self,
        cycle: &mut Cycle,
        request: &StepRequest,
        generator: &dyn TextGenerator,
    ) -> Result<Next, AgentError> {
        let summary = request.page.describe(2_000);
        let decision = {
            let input = ContextInput {
                goal: &cycle.task.goal,
                current_url: &request.current_url,
                page_summary: &summary,
                chat_history: &request.chat_history,
                user_message: request.user_message.as_deref(),
                knowledge: &request.knowledge,
            };
            self.stages.context.classify(&input, generator).await
        };
        match decision.source {
            ContextSource::AskUser => {
                let question = clarification_question(&decision.private_fields);
                self.request_clarification(cycle, question)?;
                Ok(Next::Commit)
            }
            ContextSource::WebSearch => {
                self.search_for(cycle, &decision.external_fields, generator).await
            }
            ContextSource::Memory | ContextSource::Page if decision.needs_search() => {
                debug!(target: "engine", task_id = %cycle.task.id, source = ?decision.source, "secondary web search requested");
                self.search_for(cycle, &decision.external_fields, generator).await
            }
            ContextSource::Memory | ContextSource::Page => Ok(Next::Continue),
        }
    }

    /// Runs one search resolution and folds its hits into the task notes.
    async fn search_for(
        &self,
        cycle: &mut Cycle,
        fields: &[MissingInfo],
        generator: &dyn TextGenerator,
    ) -> Result<Next, AgentError> {
        if !cycle.search_budget.can_search() {
            debug!(target: "engine", task_id = %cycle.task.id, "search budget exhausted; skipping search");
            return Ok(Next::Continue);
        }
        let domain = cycle.task.target_url.as_deref().and_then(registered_domain);
        let outcome = self
            .stages
            .search
            .resolve(
                &cycle.task.goal,
                fields,
                domain,
                cycle.search_budget,
                self.search.as_ref(),
                generator,
            )
            .await;
        cycle.spend_searches(outcome.provider_calls);
        if outcome.stop == SearchStop::AskUser {
            let question = clarification_question(fields);
            self.request_clarification(cycle, question)?;
            return Ok(Next::Commit);
        }
        let notes = outcome.notes();
        if !notes.is_empty() {
            cycle.task = transitions::context_noted(&cycle.task, notes)?;
        }
        Ok(Next::Continue)
    }

    fn request_clarification(&self, cycle: &mut Cycle, question: String) -> Result<(), AgentError> {
        info!(target: "engine", task_id = %cycle.task.id, %question, "asking the user");
        cycle.task = transitions::clarification_requested(&cycle.task, question)?;
        cycle.thought("more information is needed from the user");
        Ok(())
    }

    // ---- planning -----------------------------------------------------

    async fn plan(
        &self,
        cycle: &mut Cycle,
        request: &StepRequest,
        generator: &dyn TextGenerator,
    ) -> Result<(), AgentError> {
        cycle.task = transitions::planning_started(&cycle.task)?;
        let summary = request.page.describe(4_000);
        let plan = {
            let context = PlanningContext {
                goal: &cycle.task.goal,
                current_url: &request.current_url,
                target_url: cycle.task.target_url.as_deref(),
                page_summary: &summary,
                notes: &cycle.task.context_notes,
            };
            self.stages.planner.create_plan(&context, generator).await
        };
        let hierarchy = self
            .stages
            .decomposer
            .decompose(&cycle.task.goal, &plan, generator)
            .await;
        cycle.task = transitions::plan_created(&cycle.task, plan, hierarchy)?;
        Ok(())
    }

    // ---- generation ---------------------------------------------------

    fn action_context<'a>(
        &self,
        task: &'a Task,
        request: &'a StepRequest,
        feedback: Option<String>,
    ) -> ActionContext<'a> {
        let mut context = ActionContext::new(&task.goal, &request.current_url, &request.page);
        context.step = task.current_step();
        context.sub_task_context = task.hierarchy.as_ref().map(sub_task_context).unwrap_or_default();
        context.notes = task.context_notes.as_slice();
        context.knowledge = request.knowledge.as_slice();
        context.chat_history = request.chat_history.as_slice();
        context.feedback = feedback;
        context.confirm_completion = task.pending_confirmation;
        context.max_page_chars = self.config.max_page_chars;
        context
    }

    /// Step refiner for the current plan step, direct generation otherwise
    /// or when refinement fails.
    async fn generate(
        &self,
        task: &Task,
        request: &StepRequest,
        feedback: Option<String>,
        generator: &dyn TextGenerator,
    ) -> Result<GeneratedAction, AgentError> {
        let context = self.action_context(task, request, feedback);
        if context.step.is_some() && !context.confirm_completion {
            match self.stages.refiner.refine(&context, generator).await {
                Ok(refined) => return Ok(refined.generated),
                Err(err) => {
                    warn!(target: "engine", kind = err.kind(), error = %err, "step refinement failed; generating directly");
                }
            }
        }
        self.stages.generator.generate(&context, generator).await
    }

    async fn act(
        &self,
        cycle: &mut Cycle,
        request: &StepRequest,
        generator: &dyn TextGenerator,
    ) -> Result<(), AgentError> {
        let first = match cycle.accepted.as_ref() {
            Some(accepted) => parse_action(&accepted.corrected_action)
                .map(|action| GeneratedAction {
                    thought: format!("Retrying step with {}: {}", accepted.strategy.as_str(), accepted.reason),
                    action: Some(action),
                    raw: String::new(),
                })
                .map_err(AgentError::from),
            None => self.generate(&cycle.task, request, cycle.feedback.clone(), generator).await,
        };
        let candidate = match first {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(target: "engine", task_id = %cycle.task.id, kind = err.kind(), error = %err, "no action could be generated");
                cycle.thought(format!("could not decide on an action: {err}"));
                return Ok(());
            }
        };

        let Some(candidate) = self.resolve_interrupt(cycle, request, candidate, generator).await? else {
            return Ok(());
        };
        let Some(action) = candidate.action.clone() else {
            return Ok(());
        };
        let (thought, action) = self.gate(cycle, request, candidate.thought, action, generator).await;
        self.emit(cycle, request, thought, action, generator).await
    }

    /// Handles missing-information markers in a candidate. Returns `None`
    /// when the cycle ends with a clarification question.
    async fn resolve_interrupt(
        &self,
        cycle: &mut Cycle,
        request: &StepRequest,
        candidate: GeneratedAction,
        generator: &dyn TextGenerator,
    ) -> Result<Option<GeneratedAction>, AgentError> {
        let scanned = match &candidate.action {
            Some(action) => action.to_string(),
            None => candidate.raw.clone(),
        };
        let Some(interrupt) = Interrupt::from_text(&scanned) else {
            return Ok(Some(candidate));
        };
        if interrupt.needs_user() {
            self.request_clarification(cycle, clarification_question(&interrupt.private))?;
            return Ok(None);
        }
        if !cycle.search_budget.can_search() {
            self.request_clarification(cycle, clarification_question(&interrupt.external))?;
            return Ok(None);
        }
        info!(target: "engine", task_id = %cycle.task.id, fields = interrupt.external.len(), "searching for missing information");
        if let Next::Commit = self
            .search_for(cycle, &interrupt.external, generator)
            .await?
        {
            return Ok(None);
        }

        let retried = self
            .generate(&cycle.task, request, cycle.feedback.clone(), generator)
            .await;
        match retried {
            Ok(again) => {
                let rescanned = match &again.action {
                    Some(action) => action.to_string(),
                    None => again.raw.clone(),
                };
                match Interrupt::from_text(&rescanned) {
                    None if again.action.is_some() => Ok(Some(again)),
                    found => {
                        let fields = found
                            .map(|still| [still.private, still.external].concat())
                            .unwrap_or_else(|| interrupt.external.clone());
                        self.request_clarification(cycle, clarification_question(&fields))?;
                        Ok(None)
                    }
                }
            }
            Err(err) => {
                warn!(target: "engine", kind = err.kind(), error = %err, "generation after search failed");
                self.request_clarification(cycle, clarification_question(&interrupt.external))?;
                Ok(None)
            }
        }
    }

    /// Critic gate: one regeneration on rejection, then the candidate goes
    /// out flagged.
    async fn gate(
        &self,
        cycle: &mut Cycle,
        request: &StepRequest,
        thought: String,
        action: ParsedAction,
        generator: &dyn TextGenerator,
    ) -> (String, ParsedAction) {
        if !self.stages.critic.is_enabled() || action.verb.is_terminal() {
            return (thought, action);
        }
        let step = cycle.task.current_step().map(|step| step.description.clone());
        let rendered = action.to_string();
        let verdict = self
            .stages
            .critic
            .review(
                &CriticReview {
                    goal: &cycle.task.goal,
                    step: step.as_deref(),
                    thought: &thought,
                    action: &rendered,
                    page: &request.page.content,
                },
                generator,
            )
            .await;
        if verdict.approved {
            return (thought, action);
        }

        let feedback = format!("a reviewer rejected {rendered}: {}", verdict.reason);
        let second = match self.generate(&cycle.task, request, Some(feedback), generator).await {
            Ok(GeneratedAction {
                thought,
                action: Some(action),
                ..
            }) => (thought, action),
            Ok(_) | Err(_) => {
                warn!(target: "engine", task_id = %cycle.task.id, "regeneration after critic rejection failed; keeping first candidate");
                cycle.emission.critic_overridden = true;
                return (thought, action);
            }
        };
        let rendered = second.1.to_string();
        let again = self
            .stages
            .critic
            .review(
                &CriticReview {
                    goal: &cycle.task.goal,
                    step: step.as_deref(),
                    thought: &second.0,
                    action: &rendered,
                    page: &request.page.content,
                },
                generator,
            )
            .await;
        if !again.approved {
            warn!(target: "engine", task_id = %cycle.task.id, action = %rendered, reason = %again.reason, "critic rejected twice; emitting anyway");
            cycle.emission.critic_overridden = true;
        }
        second
    }

    async fn emit(
        &self,
        cycle: &mut Cycle,
        request: &StepRequest,
        thought: String,
        action: ParsedAction,
        generator: &dyn TextGenerator,
    ) -> Result<(), AgentError> {
        cycle.emission.thought = thought;
        match action.verb {
            ActionVerb::Finish => {
                cycle.task = transitions::task_completed(&cycle.task)?;
                cycle.emission.action = Some(action.to_string());
                return Ok(());
            }
            ActionVerb::Fail => {
                let reason = action.arg(0).unwrap_or("agent gave up").to_string();
                cycle.task = transitions::terminal_failure(&cycle.task, reason)?;
                cycle.emission.action = Some(action.to_string());
                return Ok(());
            }
            _ => {}
        }

        let step_index = cycle.task.next_step_index;
        let action_type = classify_action(&action, &request.page.content);
        let expected = self
            .stages
            .predictor
            .predict(
                &action,
                action_type,
                &request.page.content,
                &request.current_url,
                &cycle.task.goal,
                generator,
            )
            .await;
        let skeleton = extract_skeleton(&request.page.content);
        let record = ActionRecord {
            task_id: cycle.task.id.clone(),
            step_index,
            plan_step_index: cycle.task.current_step().map(|step| step.index),
            thought: cycle.emission.thought.clone(),
            action: action.to_string(),
            action_type,
            expected_outcome: Some(expected.clone()),
            before: BeforeState {
                url: request.current_url.clone(),
                content_hash: content_hash(&request.page.content),
                skeleton: (!skeleton.is_empty()).then_some(skeleton),
                focused_element: request.page.focused_element.clone(),
            },
            created_at: Utc::now(),
        };
        cycle.task = transitions::action_issued(&cycle.task, step_index)?;
        info!(
            target: "engine",
            task_id = %cycle.task.id,
            step = step_index,
            action = %record.action,
            action_type = action_type.as_str(),
            "action issued"
        );
        cycle.emission.step_index = Some(step_index);
        cycle.emission.action = Some(record.action.clone());
        cycle.emission.action_type = Some(action_type);
        cycle.emission.expected_outcome = Some(expected);
        cycle.record = Some(record);
        Ok(())
    }

    // ---- commit -------------------------------------------------------

    async fn commit(&self, cycle: Cycle, ledger: CallLedger) -> Result<StepResponse, AgentError> {
        let Cycle {
            mut task,
            was_terminal,
            verification,
            accepted,
            record,
            emission,
            ..
        } = cycle;
        task.metrics.provider_calls += ledger.calls;
        task.metrics.provider_failures += ledger.failures;
        task.metrics.prompt_tokens += ledger.usage.prompt_tokens;
        task.metrics.completion_tokens += ledger.usage.completion_tokens;
        task.touch();

        let stored = self.store.commit(task, record, accepted.clone()).await?;

        if ledger.calls > 0 {
            let usage = UsageRecord {
                task_id: stored.id.clone(),
                step_index: emission.step_index,
                provider: self.generator.name().to_string(),
                calls: ledger.calls,
                failures: ledger.failures,
                usage: ledger.usage,
                recorded_at: Utc::now(),
            };
            if let Err(err) = self.usage.record(usage).await {
                warn!(target: "engine", task_id = %stored.id, error = %err, "usage recording failed");
            }
        }
        if stored.is_terminal() && !was_terminal {
            info!(
                target: "engine",
                task_id = %stored.id,
                status = stored.status.as_str(),
                reason = stored.failure_reason.as_deref().unwrap_or(""),
                "task finished"
            );
            metrics::record_task_finished(stored.status);
        }

        Ok(StepResponse {
            task_id: stored.id.clone(),
            step_index: emission.step_index,
            thought: emission.thought,
            action: emission.action,
            action_type: emission.action_type,
            expected_outcome: emission.expected_outcome,
            verification,
            plan: PlanSnapshot::of(&stored),
            status: stored.status,
            clarification: stored.pending_clarification.clone(),
            correction: accepted.map(|record| CorrectionSummary {
                strategy: record.strategy,
                attempt: record.attempt,
                reason: record.reason,
            }),
            critic_overridden: emission.critic_overridden,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core_types::TaskStatus;
    use waypoint_task_store::InMemoryTaskStore;

    use crate::provider::{CallPurpose, MockTextGenerator};
    use crate::request::{PageKind, PageRepresentation};

    const PLAN: &str = r#"{"steps":[{"index":0,"description":"Click \"Pricing\""},{"index":1,"description":"Click \"Enterprise\""}]}"#;
    const PAGE: &str = "[1]<a href=\"/pricing\">Pricing</a>\n[2]<button>Sign in</button>";

    fn engine(mock: Arc<MockTextGenerator>) -> (DecisionEngine, Arc<InMemoryTaskStore>) {
        let store = Arc::new(InMemoryTaskStore::new());
        (DecisionEngine::new(store.clone(), mock), store)
    }

    fn first_request() -> StepRequest {
        StepRequest::new("open the enterprise pricing", "https://a.com/")
            .with_page(PageRepresentation::new(PAGE, PageKind::Structural))
    }

    fn scripted() -> Arc<MockTextGenerator> {
        let mock = Arc::new(MockTextGenerator::new());
        mock.push(
            CallPurpose::ContextClassification,
            r#"{"primarySource":"PAGE","missingFields":[]}"#,
        );
        mock.push(CallPurpose::Planning, PLAN);
        mock.push(
            CallPurpose::StepRefinement,
            r#"{"toolName":"click","parameters":{"id":1},"thought":"open pricing"}"#,
        );
        mock
    }

    #[test]
    fn quoted_labels() {
        assert_eq!(quoted_label("Click \"Checkout\" now").as_deref(), Some("Checkout"));
        assert_eq!(quoted_label("Press the 'Next' button").as_deref(), Some("Next"));
        assert_eq!(quoted_label("Open the menu"), None);
    }

    #[tokio::test]
    async fn first_request_plans_and_issues_action() {
        let mock = scripted();
        let (engine, store) = engine(mock.clone());
        let response = engine.step(first_request()).await.unwrap();

        assert_eq!(response.action.as_deref(), Some("click(1)"));
        assert_eq!(response.step_index, Some(0));
        assert_eq!(response.action_type, Some(ActionType::Navigation));
        assert_eq!(response.status, TaskStatus::Executing);
        assert_eq!(response.plan.as_ref().unwrap().steps.len(), 2);
        let expected = response.expected_outcome.unwrap();
        assert_eq!(expected.expected_url.as_deref(), Some("https://a.com/pricing"));

        let task = store.get(&response.task_id).await.unwrap().unwrap();
        assert_eq!(task.version, 1);
        assert_eq!(task.awaiting_verification, Some(0));
        assert_eq!(task.metrics.provider_calls, 3);
        let record = store.last_action_record(&task.id).await.unwrap().unwrap();
        assert_eq!(record.plan_step_index, Some(0));
        assert!(record.before.skeleton.is_some());
    }

    #[tokio::test]
    async fn out_of_order_step_index_is_rejected() {
        let mock = scripted();
        let (engine, _) = engine(mock);
        let response = engine.step(first_request()).await.unwrap();

        let replay = first_request().with_task(response.task_id.clone(), 0);
        let err = engine.step(replay).await.unwrap_err();
        assert!(matches!(err, AgentError::DuplicateStep { expected: 1, got: 0, .. }));
    }

    #[tokio::test]
    async fn unknown_task_with_step_index_is_not_found() {
        let (engine, _) = engine(Arc::new(MockTextGenerator::new()));
        let request = first_request().with_task(TaskId::from("missing"), 4);
        assert!(matches!(engine.step(request).await, Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn validation_runs_before_anything_else() {
        let mock = Arc::new(MockTextGenerator::new());
        let (engine, store) = engine(mock.clone());
        let err = engine
            .step(StepRequest::new("", "https://a.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert_eq!(mock.total_calls(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn generation_failure_commits_without_action() {
        let mock = Arc::new(MockTextGenerator::new());
        mock.push(CallPurpose::ContextClassification, r#"{"primarySource":"PAGE"}"#);
        let (engine, store) = engine(mock);
        let response = engine.step(first_request()).await.unwrap();
        assert!(response.action.is_none());
        assert!(response.thought.contains("could not decide"));
        let task = store.get(&response.task_id).await.unwrap().unwrap();
        assert_eq!(task.next_step_index, 0);
        assert!(task.awaiting_verification.is_none());
        assert_eq!(task.plan.unwrap().steps.len(), 1);
    }
}
