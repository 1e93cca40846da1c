//! Tiered verification of the previously issued action.
//!
//! Tier 1 is a pure ordered rule table, Tier 2 a minimal-token provider
//! classification and Tier 3 a full semantic judgement. Every verdict passes
//! through [`route`] which applies the confidence contract.

pub mod diff;
mod lightweight;
mod semantic;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use waypoint_core_types::{
    ActionType, ExpectedOutcome, Plan, TaskComplexity, VerificationResult, VerificationTier,
};

use crate::config::EngineConfig;
use crate::metrics;
use crate::provider::TextGenerator;
use crate::request::WitnessedChanges;

pub use diff::{content_hash, extract_skeleton, registered_domain, StructuralDiff};
pub use semantic::{RawVerdict, VerdictSchema};

/// Element the next plan step needs, and whether the after-page has it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookAhead {
    pub element: String,
    pub present: bool,
}

/// Structural baseline comparison available when the ActionRecord carried a
/// skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub diff: StructuralDiff,
}

#[derive(Debug, Clone)]
pub struct VerificationInput {
    pub goal: String,
    pub before_url: String,
    pub after_url: String,
    pub action: String,
    pub action_type: ActionType,
    pub is_last_step: bool,
    pub meaningful_content_change: bool,
    pub witnessed: WitnessedChanges,
    pub complexity: TaskComplexity,
    pub look_ahead: Option<LookAhead>,
    pub expected: Option<ExpectedOutcome>,
    pub observation: Option<Observation>,
    /// Raw after-state (already truncated for prompts).
    pub after_page: String,
}

impl VerificationInput {
    pub fn url_changed(&self) -> bool {
        diff::urls_differ(&self.before_url, &self.after_url)
    }

    fn cross_domain(&self) -> bool {
        match (
            registered_domain(&self.before_url),
            registered_domain(&self.after_url),
        ) {
            (Some(before), Some(after)) => before != after,
            _ => false,
        }
    }
}

pub fn compute_is_last_step(plan: Option<&Plan>) -> bool {
    match plan {
        None => true,
        Some(plan) => plan.current_step_index + 1 == plan.steps.len(),
    }
}

/// Nothing observable happened: no URL change, no structural change and no
/// client-witnessed event.
pub fn short_circuit(input: &VerificationInput) -> Option<VerificationResult> {
    if input.url_changed() || input.meaningful_content_change || input.witnessed.any() {
        return None;
    }
    Some(VerificationResult::failed(
        0.2,
        "no URL change, no structural change and no witnessed page events",
        VerificationTier::Deterministic,
    ))
}

type Rule = fn(&VerificationInput) -> Option<VerificationResult>;

fn navigation_url_changed(input: &VerificationInput) -> Option<VerificationResult> {
    (input.action_type == ActionType::Navigation && input.url_changed() && !input.is_last_step).then(
        || {
            VerificationResult::succeeded(
                1.0,
                format!("navigated from {} to {}", input.before_url, input.after_url),
                VerificationTier::Deterministic,
            )
        },
    )
}

fn meaningful_content_change(input: &VerificationInput) -> Option<VerificationResult> {
    (input.meaningful_content_change && !input.is_last_step).then(|| {
        VerificationResult::succeeded(
            0.95,
            "interactive page structure changed",
            VerificationTier::Deterministic,
        )
    })
}

fn cross_domain_navigation(input: &VerificationInput) -> Option<VerificationResult> {
    (input.url_changed() && input.cross_domain() && !input.is_last_step).then(|| {
        VerificationResult::succeeded(
            1.0,
            format!("moved to another site: {}", input.after_url),
            VerificationTier::Deterministic,
        )
    })
}

fn look_ahead_missing(input: &VerificationInput) -> Option<VerificationResult> {
    let look = input.look_ahead.as_ref().filter(|look| !look.present)?;
    Some(
        VerificationResult::failed(
            0.8,
            format!("next step needs '{}' which is not on the page", look.element),
            VerificationTier::Deterministic,
        )
        .with_route_to_correction(),
    )
}

fn look_ahead_present(input: &VerificationInput) -> Option<VerificationResult> {
    let look = input
        .look_ahead
        .as_ref()
        .filter(|look| look.present && !input.is_last_step)?;
    Some(VerificationResult::succeeded(
        0.95,
        format!("next step element '{}' is present", look.element),
        VerificationTier::Deterministic,
    ))
}

fn simple_task_final_navigation(input: &VerificationInput) -> Option<VerificationResult> {
    (input.complexity == TaskComplexity::Simple
        && input.action_type == ActionType::Navigation
        && input.is_last_step)
        .then(|| {
            VerificationResult::new(
                true,
                true,
                1.0,
                "final navigation of a simple task",
                VerificationTier::Deterministic,
            )
        })
}

const DETERMINISTIC_RULES: &[(&str, Rule)] = &[
    ("navigation_url_changed", navigation_url_changed),
    ("meaningful_content_change", meaningful_content_change),
    ("cross_domain_navigation", cross_domain_navigation),
    ("look_ahead_missing", look_ahead_missing),
    ("look_ahead_present", look_ahead_present),
    ("simple_task_final_navigation", simple_task_final_navigation),
];

/// Tier 1. First matching rule wins; `None` means no verdict.
pub fn deterministic_verdict(input: &VerificationInput) -> Option<VerificationResult> {
    DETERMINISTIC_RULES.iter().find_map(|(name, rule)| {
        let verdict = rule(input)?;
        debug!(target: "verification", rule = *name, "deterministic rule matched");
        Some(verdict)
    })
}

/// Verdict after the confidence contract is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedVerification {
    #[serde(flatten)]
    pub result: VerificationResult,
    pub success: bool,
    pub goal_achieved: bool,
    pub low_confidence_completion: bool,
}

pub fn route(result: VerificationResult, config: &EngineConfig) -> RoutedVerification {
    let confident = result.confidence >= config.success_threshold;
    let success = result.action_succeeded && confident;
    let goal_achieved = result.task_completed && confident;
    let low_confidence_completion = goal_achieved && result.confidence < config.audit_threshold;
    if low_confidence_completion {
        warn!(
            target: "verification",
            confidence = result.confidence,
            tier = result.tier.as_str(),
            "goal achieved with low confidence"
        );
        metrics::record_low_confidence_completion();
    }
    metrics::record_verdict(result.tier, success);
    RoutedVerification {
        result,
        success,
        goal_achieved,
        low_confidence_completion,
    }
}

/// Runs the tiers in order, escalating until one yields a verdict.
#[derive(Debug, Clone)]
pub struct TieredVerifier {
    enable_lightweight: bool,
}

impl TieredVerifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            enable_lightweight: config.enable_lightweight_tier,
        }
    }

    pub async fn verify(
        &self,
        input: &VerificationInput,
        generator: &dyn TextGenerator,
    ) -> VerificationResult {
        if let Some(result) = short_circuit(input) {
            info!(target: "verification", action = %input.action, "short-circuit: nothing changed");
            return result;
        }
        if let Some(result) = deterministic_verdict(input) {
            return result;
        }

        let final_step_of_complex =
            input.is_last_step && input.complexity == TaskComplexity::Complex;
        if self.enable_lightweight && !final_step_of_complex {
            match lightweight::classify(input, generator).await {
                Ok(result) => return result,
                Err(err) => {
                    debug!(target: "verification", error = %err, "lightweight tier escalating");
                }
            }
        }

        semantic::judge(input, generator).await
    }
}
