use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TaskId;

/// Coarse classification of an action, used by deterministic verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Navigation,
    Dropdown,
    #[default]
    Generic,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Navigation => "navigation",
            ActionType::Dropdown => "dropdown",
            ActionType::Generic => "generic",
        }
    }
}

/// Expected scale of the DOM change an action should produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomChange {
    #[default]
    None,
    Partial,
    Full,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    #[serde(default)]
    pub url_should_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_url: Option<String>,
    #[serde(default)]
    pub dom_change: DomChange,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_elements: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// Page snapshot captured when an action is issued. The skeleton is the
/// structural baseline used for observation-based verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeforeState {
    pub url: String,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skeleton: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focused_element: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub task_id: TaskId,
    pub step_index: u32,
    pub plan_step_index: Option<u32>,
    #[serde(default)]
    pub thought: String,
    pub action: String,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<ExpectedOutcome>,
    pub before: BeforeState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationTier {
    #[default]
    Deterministic,
    Lightweight,
    Full,
}

impl VerificationTier {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationTier::Deterministic => "deterministic",
            VerificationTier::Lightweight => "lightweight",
            VerificationTier::Full => "full",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub action_succeeded: bool,
    pub task_completed: bool,
    pub confidence: f64,
    pub reason: String,
    pub tier: VerificationTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_to_correction: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_task_completed: Option<bool>,
}

impl VerificationResult {
    pub fn new(
        action_succeeded: bool,
        task_completed: bool,
        confidence: f64,
        reason: impl Into<String>,
        tier: VerificationTier,
    ) -> Self {
        Self {
            action_succeeded,
            task_completed,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            tier,
            route_to_correction: None,
            sub_task_completed: None,
        }
    }

    pub fn succeeded(confidence: f64, reason: impl Into<String>, tier: VerificationTier) -> Self {
        Self::new(true, false, confidence, reason, tier)
    }

    pub fn failed(confidence: f64, reason: impl Into<String>, tier: VerificationTier) -> Self {
        Self::new(false, false, confidence, reason, tier)
    }

    pub fn with_route_to_correction(mut self) -> Self {
        self.route_to_correction = Some(true);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionStrategy {
    AlternativeSelector,
    AlternativeTool,
    GatherInformation,
    UpdatePlan,
    RetryWithDelay,
}

impl CorrectionStrategy {
    pub const ALL: [CorrectionStrategy; 5] = [
        CorrectionStrategy::AlternativeSelector,
        CorrectionStrategy::AlternativeTool,
        CorrectionStrategy::GatherInformation,
        CorrectionStrategy::UpdatePlan,
        CorrectionStrategy::RetryWithDelay,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CorrectionStrategy::AlternativeSelector => "ALTERNATIVE_SELECTOR",
            CorrectionStrategy::AlternativeTool => "ALTERNATIVE_TOOL",
            CorrectionStrategy::GatherInformation => "GATHER_INFORMATION",
            CorrectionStrategy::UpdatePlan => "UPDATE_PLAN",
            CorrectionStrategy::RetryWithDelay => "RETRY_WITH_DELAY",
        }
    }
}

impl fmt::Display for CorrectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrectionStrategy {
    type Err = String;

    /// Accepts any casing and `-`, `_` or space separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        CorrectionStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| format!("unknown correction strategy '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub task_id: TaskId,
    /// Plan step the correction applies to.
    pub step_index: u32,
    pub strategy: CorrectionStrategy,
    pub attempt: u32,
    pub reason: String,
    pub original_action: String,
    #[serde(default)]
    pub original_description: String,
    pub corrected_action: String,
    #[serde(default)]
    pub corrected_description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parse_is_lenient() {
        assert_eq!(
            "alternative-selector".parse::<CorrectionStrategy>().unwrap(),
            CorrectionStrategy::AlternativeSelector
        );
        assert_eq!(
            " Retry With Delay ".parse::<CorrectionStrategy>().unwrap(),
            CorrectionStrategy::RetryWithDelay
        );
        assert!("reboot".parse::<CorrectionStrategy>().is_err());
    }

    #[test]
    fn strategy_serializes_screaming_snake() {
        let json = serde_json::to_string(&CorrectionStrategy::UpdatePlan).unwrap();
        assert_eq!(json, "\"UPDATE_PLAN\"");
    }

    #[test]
    fn verification_result_clamps_confidence() {
        let high = VerificationResult::succeeded(1.7, "ok", VerificationTier::Full);
        assert_eq!(high.confidence, 1.0);
        let low = VerificationResult::failed(-0.2, "bad", VerificationTier::Full);
        assert_eq!(low.confidence, 0.0);
    }

    #[test]
    fn optional_verification_fields_are_skipped() {
        let result = VerificationResult::failed(0.2, "no change", VerificationTier::Deterministic);
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("route_to_correction").is_none());
        assert_eq!(value["tier"], "deterministic");
    }
}
