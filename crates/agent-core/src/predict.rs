use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;
use waypoint_core_types::{ActionType, DomChange, ExpectedOutcome};

use crate::classify::{attribute, find_element};
use crate::errors::AgentError;
use crate::grammar::{ActionVerb, ParsedAction};
use crate::prompt::{truncate_chars, PREDICTOR_SYSTEM_PROMPT};
use crate::provider::{CallPurpose, GenerationRequest, ResponseSchema, TextGenerator};
use crate::structured::generate_structured;

fn resolve_href(current_url: &str, href: &str) -> Option<String> {
    let base = url::Url::parse(current_url).ok()?;
    base.join(href).ok().map(|resolved| resolved.to_string())
}

fn element_label(page_content: &str, id: &str) -> Option<String> {
    let pattern = format!(r"\[{}\]\s*<[^>]*>([^<\n]*)", regex::escape(id));
    let re = Regex::new(&pattern).ok()?;
    let label: String = re.captures(page_content)?.get(1)?.as_str().trim().chars().take(60).collect();
    (!label.is_empty()).then_some(label)
}

/// Deterministic expectation derived from the verb and action type.
pub fn predict_outcome(
    action: &ParsedAction,
    action_type: ActionType,
    page_content: &str,
    current_url: &str,
) -> ExpectedOutcome {
    let outcome = |url_should_change: bool, dom_change: DomChange, description: String| ExpectedOutcome {
        url_should_change,
        expected_url: None,
        dom_change,
        expected_elements: Vec::new(),
        description,
    };
    match action.verb {
        ActionVerb::Navigate => {
            let target = action.arg(0).unwrap_or_default();
            let mut expected = outcome(true, DomChange::Full, format!("the browser loads {target}"));
            expected.expected_url = resolve_href(current_url, target).or_else(|| Some(target.to_string()));
            expected
        }
        ActionVerb::Click if action_type == ActionType::Navigation => {
            let id = action.target_id().unwrap_or_default();
            let href = find_element(page_content, id)
                .and_then(|(_, attrs)| attribute(attrs, "href").map(str::to_string));
            let mut expected = outcome(true, DomChange::Full, format!("following link {id} opens a new page"));
            expected.expected_url = href.and_then(|href| resolve_href(current_url, &href));
            expected
        }
        ActionVerb::Click if action_type == ActionType::Dropdown => outcome(
            false,
            DomChange::Partial,
            "the dropdown opens and lists its options".to_string(),
        ),
        ActionVerb::Click => {
            let id = action.target_id().unwrap_or_default();
            let description = match element_label(page_content, id) {
                Some(label) => format!("clicking '{label}' updates the page"),
                None => format!("clicking element {id} updates the page"),
            };
            outcome(false, DomChange::Partial, description)
        }
        ActionVerb::SetValue => outcome(
            false,
            DomChange::Partial,
            format!(
                "field {} holds \"{}\"",
                action.target_id().unwrap_or_default(),
                action.arg(1).unwrap_or_default()
            ),
        ),
        ActionVerb::Select => {
            let option = action.arg(1).unwrap_or_default();
            let mut expected = outcome(false, DomChange::Partial, format!("option \"{option}\" is selected"));
            expected.expected_elements.push(option.to_string());
            expected
        }
        ActionVerb::Check => outcome(false, DomChange::Partial, "the control toggles".to_string()),
        ActionVerb::Press => {
            let key = action.arg(0).unwrap_or_default();
            if key.eq_ignore_ascii_case("enter") {
                outcome(false, DomChange::Partial, "the focused form submits or the input is confirmed".to_string())
            } else {
                outcome(false, DomChange::Partial, format!("key {key} is handled by the page"))
            }
        }
        ActionVerb::Hover => outcome(false, DomChange::Partial, "hover content appears".to_string()),
        ActionVerb::Scroll => outcome(
            false,
            DomChange::None,
            format!("the viewport scrolls {}", action.arg(0).unwrap_or_default()),
        ),
        ActionVerb::Wait => outcome(false, DomChange::None, "the page settles".to_string()),
        ActionVerb::Finish => outcome(false, DomChange::None, "the goal is achieved".to_string()),
        ActionVerb::Fail => outcome(false, DomChange::None, "the task is abandoned".to_string()),
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct PredictionSchema {
    #[serde(default, alias = "url_should_change")]
    url_should_change: Option<bool>,
    #[serde(default, alias = "expected_url")]
    expected_url: Option<String>,
    #[serde(default, alias = "dom_change")]
    dom_change: Option<String>,
    #[serde(default, alias = "expected_elements")]
    expected_elements: Vec<String>,
    #[serde(default)]
    description: Option<String>,
}

fn parse_dom_change(raw: &str) -> Option<DomChange> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "none" => Some(DomChange::None),
        "partial" => Some(DomChange::Partial),
        "full" => Some(DomChange::Full),
        _ => None,
    }
}

/// Optional provider refinement on top of [`predict_outcome`].
#[derive(Debug, Clone)]
pub struct OutcomePredictor {
    refine: bool,
}

impl OutcomePredictor {
    pub fn new(refine: bool) -> Self {
        Self { refine }
    }

    pub async fn predict(
        &self,
        action: &ParsedAction,
        action_type: ActionType,
        page_content: &str,
        current_url: &str,
        goal: &str,
        generator: &dyn TextGenerator,
    ) -> ExpectedOutcome {
        let baseline = predict_outcome(action, action_type, page_content, current_url);
        if !self.refine || action.verb.is_terminal() {
            return baseline;
        }
        match self.refine_with(action, &baseline, page_content, goal, generator).await {
            Ok(refined) => refined,
            Err(err) => {
                debug!(target: "predict", error = %err, "prediction refinement failed; keeping baseline");
                baseline
            }
        }
    }

    async fn refine_with(
        &self,
        action: &ParsedAction,
        baseline: &ExpectedOutcome,
        page_content: &str,
        goal: &str,
        generator: &dyn TextGenerator,
    ) -> Result<ExpectedOutcome, AgentError> {
        let prompt = format!(
            "Goal: {goal}\nAction: {action}\nBaseline expectation: {}\nPage:\n{}",
            serde_json::to_string(baseline).unwrap_or_default(),
            truncate_chars(page_content, 4_000),
        );
        let request = GenerationRequest::new(CallPurpose::OutcomePrediction, PREDICTOR_SYSTEM_PROMPT, prompt)
            .with_schema(ResponseSchema::of::<PredictionSchema>("prediction"))
            .with_temperature(0.0);
        let predicted: PredictionSchema = generate_structured(generator, request).await?;
        Ok(ExpectedOutcome {
            url_should_change: predicted.url_should_change.unwrap_or(baseline.url_should_change),
            expected_url: predicted.expected_url.or_else(|| baseline.expected_url.clone()),
            dom_change: predicted
                .dom_change
                .as_deref()
                .and_then(parse_dom_change)
                .unwrap_or(baseline.dom_change),
            expected_elements: if predicted.expected_elements.is_empty() {
                baseline.expected_elements.clone()
            } else {
                predicted.expected_elements
            },
            description: predicted
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| baseline.description.clone()),
        })
    }
}
