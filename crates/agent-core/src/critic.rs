use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::prompt::{truncate_chars, CRITIC_SYSTEM_PROMPT};
use crate::provider::{CallPurpose, GenerationRequest, ResponseSchema, TextGenerator};
use crate::structured::generate_structured;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CriticVerdict {
    pub approved: bool,
    #[serde(default)]
    pub reason: String,
}

impl CriticVerdict {
    fn approve(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CriticReview<'a> {
    pub goal: &'a str,
    pub step: Option<&'a str>,
    pub thought: &'a str,
    pub action: &'a str,
    pub page: &'a str,
}

/// Pre-execution sanity check. Disabled critics and provider failures
/// approve.
#[derive(Debug, Clone)]
pub struct Critic {
    enabled: bool,
}

impl Critic {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn review(&self, review: &CriticReview<'_>, generator: &dyn TextGenerator) -> CriticVerdict {
        if !self.enabled {
            return CriticVerdict::approve("critic disabled");
        }
        let mut prompt = format!("Goal: {}\n", review.goal);
        if let Some(step) = review.step {
            prompt.push_str(&format!("Current step: {step}\n"));
        }
        prompt.push_str(&format!(
            "Agent reasoning: {}\nProposed action: {}\nPage:\n{}",
            review.thought,
            review.action,
            truncate_chars(review.page, 4_000)
        ));
        let request = GenerationRequest::new(CallPurpose::Critic, CRITIC_SYSTEM_PROMPT, prompt)
            .with_schema(ResponseSchema::of::<CriticVerdict>("critic"))
            .with_max_tokens(200)
            .with_temperature(0.0);
        match generate_structured::<CriticVerdict>(generator, request).await {
            Ok(verdict) => {
                if !verdict.approved {
                    info!(target: "critic", action = review.action, reason = %verdict.reason, "critic rejected action");
                }
                verdict
            }
            Err(err) => {
                warn!(target: "critic", kind = err.kind(), error = %err, "critic unavailable; approving");
                CriticVerdict::approve(format!("critic unavailable: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::provider::MockTextGenerator;

    fn review() -> CriticReview<'static> {
        CriticReview {
            goal: "subscribe to the newsletter",
            step: Some("Click Subscribe"),
            thought: "the subscribe button is [4]",
            action: "click(4)",
            page: "[4]<button>Delete account</button>",
        }
    }

    #[tokio::test]
    async fn disabled_critic_makes_no_call() {
        let mock = MockTextGenerator::new();
        assert!(Critic::new(false).review(&review(), &mock).await.approved);
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn rejection_carries_reason() {
        let mock = MockTextGenerator::new();
        mock.push(CallPurpose::Critic, r#"{"approved":false,"reason":"element 4 deletes the account"}"#);
        let verdict = Critic::new(true).review(&review(), &mock).await;
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("deletes"));
    }

    #[tokio::test]
    async fn provider_failure_fails_open() {
        let mock = MockTextGenerator::new();
        mock.push_error(CallPurpose::Critic, ProviderError::Timeout("2s".into()));
        assert!(Critic::new(true).review(&review(), &mock).await.approved);
    }
}
