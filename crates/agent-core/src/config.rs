//! Tunables for the decision engine.

use serde::{Deserialize, Serialize};

/// What to do with a completion whose confidence sits between the success
/// threshold and the audit threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowConfidencePolicy {
    /// Complete the task, log and count the completion.
    #[default]
    LogOnly,
    /// Keep the task open and ask the next generation pass to confirm the goal.
    RequireConfirmation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum confidence for a verdict to count as success.
    /// Default: 0.70
    pub success_threshold: f64,

    /// Completions below this confidence are flagged as low confidence.
    /// Default: 0.85
    pub audit_threshold: f64,

    /// Correction attempts allowed per plan step.
    /// Default: 3
    pub max_retries_per_step: u32,

    /// Consecutive verification failures that trip the circuit breaker.
    /// Default: 3
    pub circuit_breaker_threshold: u32,

    /// Actions issued before the task is failed.
    /// Default: 50
    pub max_steps: u32,

    /// Search attempts per resolution.
    /// Default: 3
    pub max_search_attempts: u32,

    /// Hits requested per search call.
    /// Default: 5
    pub search_max_results: usize,

    /// Whether the pre-execution critic runs.
    /// Default: false
    pub enable_critic: bool,

    /// Whether the lightweight verification tier runs before the full one.
    /// Default: true
    pub enable_lightweight_tier: bool,

    /// Whether expected outcomes are refined by a provider call.
    /// Default: false
    pub refine_predictions: bool,

    pub low_confidence_policy: LowConfidencePolicy,

    /// Plans longer than this are decomposed into sub-tasks.
    /// Default: 5
    pub decomposition_step_threshold: usize,

    /// Distinct phase categories that force decomposition.
    /// Default: 3
    pub phase_category_threshold: usize,

    /// Page content characters forwarded to prompts.
    /// Default: 12000
    pub max_page_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            success_threshold: 0.70,
            audit_threshold: 0.85,
            max_retries_per_step: 3,
            circuit_breaker_threshold: 3,
            max_steps: 50,
            max_search_attempts: 3,
            search_max_results: 5,
            enable_critic: false,
            enable_lightweight_tier: true,
            refine_predictions: false,
            low_confidence_policy: LowConfidencePolicy::LogOnly,
            decomposition_step_threshold: 5,
            phase_category_threshold: 3,
            max_page_chars: 12_000,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_critic(mut self, enabled: bool) -> Self {
        self.enable_critic = enabled;
        self
    }

    pub fn with_lightweight_tier(mut self, enabled: bool) -> Self {
        self.enable_lightweight_tier = enabled;
        self
    }

    pub fn with_prediction_refinement(mut self, enabled: bool) -> Self {
        self.refine_predictions = enabled;
        self
    }

    pub fn with_low_confidence_policy(mut self, policy: LowConfidencePolicy) -> Self {
        self.low_confidence_policy = policy;
        self
    }

    pub fn with_max_retries_per_step(mut self, retries: u32) -> Self {
        self.max_retries_per_step = retries;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Rejects threshold combinations the routing contract cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.success_threshold) {
            return Err(format!(
                "success_threshold must be within [0, 1], got {}",
                self.success_threshold
            ));
        }
        if self.audit_threshold < self.success_threshold || self.audit_threshold > 1.0 {
            return Err(format!(
                "audit_threshold must be within [success_threshold, 1], got {}",
                self.audit_threshold
            ));
        }
        if self.max_steps == 0 {
            return Err("max_steps must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_routing_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.success_threshold, 0.70);
        assert_eq!(config.audit_threshold, 0.85);
        assert_eq!(config.max_retries_per_step, 3);
        assert_eq!(config.circuit_breaker_threshold, 3);
        assert!(!config.enable_critic);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"enable_critic": true, "low_confidence_policy": "require_confirmation"}"#)
                .unwrap();
        assert!(config.enable_critic);
        assert_eq!(
            config.low_confidence_policy,
            LowConfidencePolicy::RequireConfirmation
        );
        assert_eq!(config.max_steps, 50);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let config = EngineConfig {
            audit_threshold: 0.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
