use schemars::JsonSchema;
use serde::Deserialize;
use waypoint_core_types::{VerificationResult, VerificationTier};

use super::VerificationInput;
use crate::errors::AgentError;
use crate::prompt::LIGHTWEIGHT_VERIFIER_SYSTEM_PROMPT;
use crate::provider::{CallPurpose, GenerationRequest, ResponseSchema, TextGenerator};
use crate::structured::generate_structured;

const LIGHTWEIGHT_CONFIDENCE: f64 = 0.75;

#[derive(Debug, Deserialize, JsonSchema)]
struct CoarseVerdict {
    succeeded: bool,
}

/// Tier 2: coarse succeeded/failed signal. Never claims completion; errors
/// are returned so the caller escalates.
pub(super) async fn classify(
    input: &VerificationInput,
    generator: &dyn TextGenerator,
) -> Result<VerificationResult, AgentError> {
    let prompt = format!(
        "Action: {}\nURL before: {}\nURL after: {}\nStructural change: {}\nClient events: {}",
        input.action,
        input.before_url,
        input.after_url,
        input.meaningful_content_change,
        input.witnessed.describe(),
    );
    let request = GenerationRequest::new(
        CallPurpose::LightweightVerification,
        LIGHTWEIGHT_VERIFIER_SYSTEM_PROMPT,
        prompt,
    )
    .with_schema(ResponseSchema::of::<CoarseVerdict>("coarse_verdict"))
    .with_max_tokens(16)
    .with_temperature(0.0);
    let verdict: CoarseVerdict = generate_structured(generator, request).await?;
    let reason = if verdict.succeeded {
        "lightweight check: action appears to have succeeded"
    } else {
        "lightweight check: action appears to have failed"
    };
    Ok(VerificationResult::new(
        verdict.succeeded,
        false,
        LIGHTWEIGHT_CONFIDENCE,
        reason,
        VerificationTier::Lightweight,
    ))
}
