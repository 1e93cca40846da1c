//! Self-correction after a failed verification.
//!
//! Checks run in a fixed order: the per-step retry budget, then the
//! consecutive-failure circuit breaker, and only then a provider call. A
//! proposal is screened by loop-prevention guards before it is accepted.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use waypoint_core_types::{CorrectionRecord, CorrectionStrategy, PlanStep, TaskId};

use crate::config::EngineConfig;
use crate::errors::AgentError;
use crate::grammar::{canonicalize, parse_action, same_action};
use crate::metrics;
use crate::prompt::{truncate_chars, CORRECTION_SYSTEM_PROMPT};
use crate::provider::{CallPurpose, GenerationRequest, ResponseSchema, TextGenerator};
use crate::structured::generate_structured;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProposedCorrection {
    pub strategy: String,
    #[serde(default)]
    pub reason: String,
    #[serde(alias = "corrected_action")]
    pub corrected_action: String,
    #[serde(default, alias = "corrected_description")]
    pub corrected_description: String,
}

#[derive(Debug, Clone)]
pub struct CorrectionRequest<'a> {
    pub task_id: &'a TaskId,
    pub goal: &'a str,
    pub step: &'a PlanStep,
    pub failed_action: &'a str,
    pub failure_reason: &'a str,
    pub page_state: &'a str,
    /// Corrections already persisted for this step, oldest first.
    pub previous: &'a [CorrectionRecord],
    pub max_retries_per_step: u32,
    /// Consecutive failures before the one being corrected.
    pub prior_consecutive_failures: u32,
}

impl CorrectionRequest<'_> {
    pub fn attempt_number(&self) -> u32 {
        self.previous.len() as u32 + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionOutcome {
    /// Budget or breaker exhausted; the step and task fail.
    Terminal { reason: String },
    /// Proposal passed the guards and should be persisted and emitted.
    Accepted(CorrectionRecord),
    /// Provider failed or the proposal was rejected. Nothing is persisted.
    Unavailable { reason: String },
}

struct GuardInput<'a> {
    proposal: &'a ProposedCorrection,
    failed_action: &'a str,
    previous: &'a [CorrectionRecord],
}

type Guard = fn(&GuardInput<'_>) -> Option<String>;

fn guard_grammar(input: &GuardInput<'_>) -> Option<String> {
    parse_action(&input.proposal.corrected_action)
        .err()
        .map(|err| format!("proposal is not a valid action: {err}"))
}

fn guard_repeats_failed_action(input: &GuardInput<'_>) -> Option<String> {
    same_action(&input.proposal.corrected_action, input.failed_action)
        .then(|| "proposal repeats the action that just failed".to_string())
}

fn guard_repeats_previous_correction(input: &GuardInput<'_>) -> Option<String> {
    input
        .previous
        .iter()
        .find(|record| same_action(&record.corrected_action, &input.proposal.corrected_action))
        .map(|record| format!("proposal repeats correction attempt {}", record.attempt))
}

const LOOP_GUARDS: &[(&str, Guard)] = &[
    ("grammar", guard_grammar),
    ("failed_action", guard_repeats_failed_action),
    ("previous_correction", guard_repeats_previous_correction),
];

/// First guard that rejects the proposal, with its reason.
fn screen(input: &GuardInput<'_>) -> Option<(&'static str, String)> {
    LOOP_GUARDS
        .iter()
        .find_map(|(name, guard)| guard(input).map(|reason| (*name, reason)))
}

#[derive(Debug, Clone)]
pub struct SelfCorrector {
    circuit_breaker_threshold: u32,
    max_page_chars: usize,
}

impl SelfCorrector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            circuit_breaker_threshold: config.circuit_breaker_threshold,
            max_page_chars: config.max_page_chars / 2,
        }
    }

    pub async fn correct(
        &self,
        request: &CorrectionRequest<'_>,
        generator: &dyn TextGenerator,
    ) -> CorrectionOutcome {
        let attempt = request.attempt_number();
        if attempt > request.max_retries_per_step {
            let reason = format!(
                "step {} exhausted its {} correction attempts",
                request.step.index, request.max_retries_per_step
            );
            warn!(target: "correction", task_id = %request.task_id, attempt, "{reason}");
            metrics::record_correction("terminal");
            return CorrectionOutcome::Terminal { reason };
        }
        if request.prior_consecutive_failures >= self.circuit_breaker_threshold {
            let reason = format!(
                "circuit breaker open after {} consecutive failures",
                request.prior_consecutive_failures + 1
            );
            warn!(target: "correction", task_id = %request.task_id, "{reason}");
            metrics::record_correction("terminal");
            return CorrectionOutcome::Terminal { reason };
        }

        let proposal = match self.propose(request, generator).await {
            Ok(proposal) => proposal,
            Err(err) => {
                warn!(target: "correction", task_id = %request.task_id, kind = err.kind(), error = %err, "correction unavailable");
                metrics::record_correction("unavailable");
                return CorrectionOutcome::Unavailable {
                    reason: format!("correction unavailable: {err}"),
                };
            }
        };

        let guard_input = GuardInput {
            proposal: &proposal,
            failed_action: request.failed_action,
            previous: request.previous,
        };
        if let Some((guard, reason)) = screen(&guard_input) {
            warn!(target: "correction", task_id = %request.task_id, guard, "{reason}");
            metrics::record_correction("rejected");
            return CorrectionOutcome::Unavailable { reason };
        }

        let strategy = proposal
            .strategy
            .parse::<CorrectionStrategy>()
            .unwrap_or_else(|err| {
                warn!(target: "correction", error = %err, "defaulting correction strategy");
                CorrectionStrategy::AlternativeSelector
            });
        let corrected_description = if proposal.corrected_description.trim().is_empty() {
            request.step.description.clone()
        } else {
            proposal.corrected_description.clone()
        };
        let record = CorrectionRecord {
            task_id: request.task_id.clone(),
            step_index: request.step.index,
            strategy,
            attempt,
            reason: if proposal.reason.trim().is_empty() {
                request.failure_reason.to_string()
            } else {
                proposal.reason.clone()
            },
            original_action: request.failed_action.to_string(),
            original_description: request.step.description.clone(),
            corrected_action: canonicalize(&proposal.corrected_action),
            corrected_description,
            created_at: Utc::now(),
        };
        info!(
            target: "correction",
            task_id = %request.task_id,
            step = request.step.index,
            attempt,
            strategy = strategy.as_str(),
            action = %record.corrected_action,
            "correction accepted"
        );
        metrics::record_correction("accepted");
        CorrectionOutcome::Accepted(record)
    }

    async fn propose(
        &self,
        request: &CorrectionRequest<'_>,
        generator: &dyn TextGenerator,
    ) -> Result<ProposedCorrection, AgentError> {
        let mut prompt = format!(
            "Goal: {}\nFailed step [{}]: {}\nFailed action: {}\nWhy it failed: {}\nAttempt: {} of {}\n",
            request.goal,
            request.step.index,
            request.step.description,
            request.failed_action,
            request.failure_reason,
            request.attempt_number(),
            request.max_retries_per_step,
        );
        if !request.previous.is_empty() {
            prompt.push_str("Earlier corrections (do not repeat):\n");
            for record in request.previous {
                prompt.push_str(&format!(
                    "- attempt {} {}: {}\n",
                    record.attempt, record.strategy, record.corrected_action
                ));
            }
        }
        prompt.push_str("Current page:\n");
        prompt.push_str(&truncate_chars(request.page_state, self.max_page_chars));
        let request = GenerationRequest::new(CallPurpose::Correction, CORRECTION_SYSTEM_PROMPT, prompt)
            .with_schema(ResponseSchema::of::<ProposedCorrection>("correction"))
            .with_temperature(0.4);
        generate_structured(generator, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::provider::MockTextGenerator;

    fn record(attempt: u32, action: &str) -> CorrectionRecord {
        CorrectionRecord {
            task_id: TaskId::from("t"),
            step_index: 2,
            strategy: CorrectionStrategy::AlternativeSelector,
            attempt,
            reason: "r".into(),
            original_action: "click(5)".into(),
            original_description: "Click Submit".into(),
            corrected_action: action.into(),
            corrected_description: "Click Send".into(),
            created_at: Utc::now(),
        }
    }

    fn run<'a>(
        task_id: &'a TaskId,
        step: &'a PlanStep,
        previous: &'a [CorrectionRecord],
        prior_failures: u32,
    ) -> CorrectionRequest<'a> {
        CorrectionRequest {
            task_id,
            goal: "send the form",
            step,
            failed_action: "click(5)",
            failure_reason: "nothing happened",
            page_state: "[5]<button>Submit</button>[6]<button>Send</button>",
            previous,
            max_retries_per_step: 3,
            prior_consecutive_failures: prior_failures,
        }
    }

    #[tokio::test]
    async fn exhausted_budget_makes_no_call() {
        let mock = MockTextGenerator::new();
        let id = TaskId::from("t");
        let step = PlanStep::new(2, "Click Submit");
        let previous = vec![record(1, "click(6)"), record(2, "click(7)"), record(3, "press('Enter')")];
        let outcome = SelfCorrector::new(&EngineConfig::default())
            .correct(&run(&id, &step, &previous, 0), &mock)
            .await;
        assert!(matches!(outcome, CorrectionOutcome::Terminal { .. }));
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn breaker_trips_regardless_of_budget() {
        let mock = MockTextGenerator::new();
        let id = TaskId::from("t");
        let step = PlanStep::new(2, "Click Submit");
        let outcome = SelfCorrector::new(&EngineConfig::default())
            .correct(&run(&id, &step, &[], 3), &mock)
            .await;
        assert!(matches!(outcome, CorrectionOutcome::Terminal { ref reason } if reason.contains("circuit breaker")));
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn rejects_repeat_of_failed_action() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::Correction,
            r#"{"strategy":"RETRY_WITH_DELAY","reason":"slow","correctedAction":"click(\"5\")","correctedDescription":"retry"}"#,
        );
        let id = TaskId::from("t");
        let step = PlanStep::new(2, "Click Submit");
        let outcome = SelfCorrector::new(&EngineConfig::default())
            .correct(&run(&id, &step, &[], 0), &mock)
            .await;
        assert!(matches!(outcome, CorrectionOutcome::Unavailable { ref reason } if reason.contains("just failed")));
    }

    #[tokio::test]
    async fn rejects_repeat_of_previous_correction() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::Correction,
            r#"{"strategy":"ALTERNATIVE_SELECTOR","reason":"other","correctedAction":"click(6)"}"#,
        );
        let id = TaskId::from("t");
        let step = PlanStep::new(2, "Click Submit");
        let previous = vec![record(1, "click(6)")];
        let outcome = SelfCorrector::new(&EngineConfig::default())
            .correct(&run(&id, &step, &previous, 1), &mock)
            .await;
        assert!(matches!(outcome, CorrectionOutcome::Unavailable { ref reason } if reason.contains("attempt 1")));
    }

    #[tokio::test]
    async fn rejects_ungrammatical_proposal() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::Correction,
            r#"{"strategy":"ALTERNATIVE_TOOL","correctedAction":"doubleClick(6)"}"#,
        );
        let id = TaskId::from("t");
        let step = PlanStep::new(2, "Click Submit");
        let outcome = SelfCorrector::new(&EngineConfig::default())
            .correct(&run(&id, &step, &[], 0), &mock)
            .await;
        assert!(matches!(outcome, CorrectionOutcome::Unavailable { .. }));
    }

    #[tokio::test]
    async fn accepts_new_action_with_next_attempt_number() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::Correction,
            r#"{"strategy":"alternative selector","reason":"Send is the real button","correctedAction":"click('6')","correctedDescription":"Click Send"}"#,
        );
        let id = TaskId::from("t");
        let step = PlanStep::new(2, "Click Submit");
        let previous = vec![record(1, "click(7)")];
        let outcome = SelfCorrector::new(&EngineConfig::default())
            .correct(&run(&id, &step, &previous, 1), &mock)
            .await;
        let CorrectionOutcome::Accepted(record) = outcome else {
            panic!("expected acceptance, got {outcome:?}");
        };
        assert_eq!(record.attempt, 2);
        assert_eq!(record.corrected_action, "click(6)");
        assert_eq!(record.strategy, CorrectionStrategy::AlternativeSelector);
        assert_eq!(record.original_description, "Click Submit");
    }

    #[tokio::test]
    async fn provider_failure_is_graceful() {
        let mock = MockTextGenerator::new();
        mock.push_error(CallPurpose::Correction, ProviderError::Transport("reset".into()));
        let id = TaskId::from("t");
        let step = PlanStep::new(2, "Click Submit");
        let outcome = SelfCorrector::new(&EngineConfig::default())
            .correct(&run(&id, &step, &[], 0), &mock)
            .await;
        assert!(matches!(outcome, CorrectionOutcome::Unavailable { .. }));
    }
}
