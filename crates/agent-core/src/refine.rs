use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use waypoint_core_types::ToolType;

use crate::errors::AgentError;
use crate::generate::{candidate_from, ActionContext, GeneratedAction};
use crate::grammar::{ActionVerb, ParsedAction};
use crate::prompt::{ACTION_GRAMMAR_HELP, REFINER_SYSTEM_PROMPT};
use crate::provider::{CallPurpose, GenerationRequest, ResponseSchema, TextGenerator};
use crate::structured::parse_structured;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefinedStep {
    #[serde(default, alias = "tool_name")]
    pub tool_name: String,
    #[serde(default, alias = "tool_type")]
    pub tool_type: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub thought: String,
}

fn param(parameters: &BTreeMap<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match parameters.get(*key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

const ID_KEYS: &[&str] = &["id", "elementId", "element_id", "index", "target"];
const TEXT_KEYS: &[&str] = &["text", "value", "content"];

/// Builds the action from `parameters` for the tools that can be
/// synthesized: `click`, `setValue`, `finish` and `fail`.
pub fn synthesize_action(tool_name: &str, parameters: &BTreeMap<String, Value>) -> Option<ParsedAction> {
    let verb = ActionVerb::from_name(tool_name)?;
    let args = match verb {
        ActionVerb::Click => vec![param(parameters, ID_KEYS)?],
        ActionVerb::SetValue => vec![param(parameters, ID_KEYS)?, param(parameters, TEXT_KEYS)?],
        ActionVerb::Finish => Vec::new(),
        ActionVerb::Fail => vec![param(parameters, &["reason", "message"])
            .unwrap_or_else(|| "step cannot be completed".to_string())],
        _ => return None,
    };
    ParsedAction::new(verb, args).ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinedAction {
    pub generated: GeneratedAction,
    pub tool_type: ToolType,
}

/// Turns the current plan step into one concrete action.
#[derive(Debug, Clone, Default)]
pub struct StepRefiner;

impl StepRefiner {
    pub fn new() -> Self {
        Self
    }

    pub async fn refine(
        &self,
        context: &ActionContext<'_>,
        generator: &dyn TextGenerator,
    ) -> Result<RefinedAction, AgentError> {
        let system = format!("{REFINER_SYSTEM_PROMPT}\n\n{ACTION_GRAMMAR_HELP}");
        let request = GenerationRequest::new(CallPurpose::StepRefinement, system, context.render())
            .with_schema(ResponseSchema::of::<RefinedStep>("refined_step"))
            .with_temperature(0.2);
        let generation = generator.generate(request).await?;
        let refined: RefinedStep = parse_structured(&generation.text)?;
        let tool_type = refined
            .tool_type
            .as_deref()
            .map(ToolType::parse_lenient)
            .unwrap_or_default();

        let explicit = refined
            .action
            .as_deref()
            .map(str::trim)
            .filter(|action| !action.is_empty() && !action.eq_ignore_ascii_case(refined.tool_name.trim()));
        let action = match explicit {
            Some(action) => action.to_string(),
            None => synthesize_action(&refined.tool_name, &refined.parameters)
                .map(|action| action.to_string())
                .unwrap_or_default(),
        };
        let generated = candidate_from(refined.thought, &action, generation.text)?;
        Ok(RefinedAction { generated, tool_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockTextGenerator;
    use crate::request::{PageKind, PageRepresentation};

    fn page() -> PageRepresentation {
        PageRepresentation::new("[7]<input name=\"email\">", PageKind::Structural)
    }

    #[tokio::test]
    async fn action_synthesized_from_parameters() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::StepRefinement,
            r#"{"toolName":"setValue","toolType":"DOM","parameters":{"id":7,"text":"me@example.com"},"action":"setValue","thought":"fill email"}"#,
        );
        let page = page();
        let refined = StepRefiner::new()
            .refine(&ActionContext::new("sign up", "https://a.com", &page), &mock)
            .await
            .unwrap();
        assert_eq!(
            refined.generated.action.unwrap().to_string(),
            "setValue(7, \"me@example.com\")"
        );
        assert_eq!(refined.tool_type, ToolType::Dom);
    }

    #[tokio::test]
    async fn explicit_action_wins() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::StepRefinement,
            r#"{"toolName":"press","parameters":{},"action":"press(\"Enter\")","thought":"submit"}"#,
        );
        let page = page();
        let refined = StepRefiner::new()
            .refine(&ActionContext::new("search", "https://a.com", &page), &mock)
            .await
            .unwrap();
        assert_eq!(refined.generated.action.unwrap().verb, ActionVerb::Press);
    }

    #[tokio::test]
    async fn unsynthesizable_tool_is_rejected() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::StepRefinement,
            r#"{"toolName":"scroll","parameters":{"direction":"down"},"thought":"look"}"#,
        );
        let page = page();
        let err = StepRefiner::new()
            .refine(&ActionContext::new("browse", "https://a.com", &page), &mock)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[test]
    fn fail_gets_default_reason() {
        let action = synthesize_action("fail", &BTreeMap::new()).unwrap();
        assert_eq!(action.verb, ActionVerb::Fail);
        assert!(synthesize_action("finish", &BTreeMap::new()).is_some());
    }
}
