use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;
use waypoint_core_types::{VerificationResult, VerificationTier};

use super::VerificationInput;
use crate::errors::AgentError;
use crate::prompt::{
    truncate_chars, OBSERVATION_VERIFIER_SYSTEM_PROMPT, PREDICTION_VERIFIER_SYSTEM_PROMPT,
};
use crate::provider::{CallPurpose, GenerationRequest, ResponseSchema, TextGenerator};
use crate::structured::parse_structured;

const DEFAULT_CONFIDENCE: f64 = 0.5;
const DEGRADED_CONFIDENCE: f64 = 0.3;
const MISSING_REASON: &str = "no reason given";

/// Shape requested from the provider.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct VerdictSchema {
    pub action_succeeded: bool,
    pub task_completed: bool,
    pub confidence: f64,
    pub reason: String,
}

/// Shape accepted from the provider, including the legacy single `match`
/// field older prompts produced.
#[derive(Debug, Default, Deserialize)]
pub struct RawVerdict {
    #[serde(default)]
    pub action_succeeded: Option<bool>,
    #[serde(default)]
    pub task_completed: Option<bool>,
    #[serde(default, rename = "match")]
    pub legacy_match: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl RawVerdict {
    /// Normalizes once into a full-tier result. A legacy `match` sets both
    /// flags; a missing confidence becomes 0.5 and is clamped to [0, 1].
    pub fn normalize(self) -> Result<VerificationResult, AgentError> {
        let (action_succeeded, task_completed) = match (self.action_succeeded, self.legacy_match) {
            (Some(succeeded), _) => (succeeded, self.task_completed.unwrap_or(false)),
            (None, Some(matched)) => (matched, matched),
            (None, None) => {
                return Err(AgentError::parse(
                    "verdict has neither action_succeeded nor match",
                ))
            }
        };
        let confidence = self
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_CONFIDENCE)
            .clamp(0.0, 1.0);
        let reason = self
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| MISSING_REASON.to_string());
        Ok(VerificationResult::new(
            action_succeeded,
            task_completed,
            confidence,
            reason,
            VerificationTier::Full,
        ))
    }
}

fn observation_prompt(input: &VerificationInput) -> String {
    let structural = input
        .observation
        .as_ref()
        .map(|obs| obs.diff.summary(8))
        .unwrap_or_else(|| "unknown".to_string());
    let url_delta = if input.url_changed() {
        format!("URL changed from {} to {}", input.before_url, input.after_url)
    } else {
        format!("URL unchanged ({})", input.after_url)
    };
    format!(
        "Goal: {}\nAction: {}\nFinal planned step: {}\nObserved changes:\n- {}\n- Interactive elements: {}\n- Client events: {}",
        input.goal,
        input.action,
        input.is_last_step,
        url_delta,
        structural,
        input.witnessed.describe(),
    )
}

fn prediction_prompt(input: &VerificationInput) -> String {
    let expected = input
        .expected
        .as_ref()
        .and_then(|e| serde_json::to_string(e).ok())
        .unwrap_or_else(|| "{}".to_string());
    format!(
        "Goal: {}\nAction: {}\nFinal planned step: {}\nExpected outcome: {}\nURL after: {}\nPage after:\n{}",
        input.goal,
        input.action,
        input.is_last_step,
        expected,
        input.after_url,
        truncate_chars(&input.after_page, 6_000),
    )
}

/// Tier 3. Never fails: provider or parse errors yield a degraded failed
/// verdict.
pub(super) async fn judge(
    input: &VerificationInput,
    generator: &dyn TextGenerator,
) -> VerificationResult {
    let (system, prompt, protocol) = if input.observation.is_some() {
        (OBSERVATION_VERIFIER_SYSTEM_PROMPT, observation_prompt(input), "observation")
    } else {
        (PREDICTION_VERIFIER_SYSTEM_PROMPT, prediction_prompt(input), "prediction")
    };
    let request = GenerationRequest::new(CallPurpose::SemanticVerification, system, prompt)
        .with_schema(ResponseSchema::of::<VerdictSchema>("verdict"))
        .with_temperature(0.0);

    let outcome = match generator.generate(request).await {
        Ok(generation) => {
            parse_structured::<RawVerdict>(&generation.text).and_then(RawVerdict::normalize)
        }
        Err(err) => Err(AgentError::from(err)),
    };
    match outcome {
        Ok(result) => result,
        Err(err) => {
            warn!(
                target: "verification",
                protocol,
                kind = err.kind(),
                error = %err,
                "semantic verification degraded"
            );
            VerificationResult::failed(
                DEGRADED_CONFIDENCE,
                format!("verification unavailable: {err}"),
                VerificationTier::Full,
            )
        }
    }
}
