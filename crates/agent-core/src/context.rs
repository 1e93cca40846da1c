//! Decides where the information a goal needs comes from.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::interrupt::{InfoKind, MissingInfo};
use crate::prompt::{truncate_chars, CONTEXT_SYSTEM_PROMPT};
use crate::provider::{CallPurpose, GenerationRequest, ResponseSchema, TextGenerator};
use crate::request::{ChatTurn, KnowledgeSnippet};
use crate::structured::generate_structured;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextSource {
    Memory,
    Page,
    WebSearch,
    AskUser,
}

impl ContextSource {
    /// Lenient match for the free-form labels models put in `requiredSources`.
    pub fn parse_label(raw: &str) -> Option<Self> {
        let label: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match label.as_str() {
            "memory" | "knowledge" => Some(Self::Memory),
            "page" | "currentpage" | "dom" => Some(Self::Page),
            "websearch" | "search" | "web" => Some(Self::WebSearch),
            "askuser" | "user" => Some(Self::AskUser),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContextResponse {
    #[serde(alias = "primary_source")]
    pub primary_source: ContextSource,
    #[serde(default, alias = "required_sources")]
    pub required_sources: Vec<String>,
    #[serde(default, alias = "missing_fields")]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextDecision {
    pub source: ContextSource,
    /// Every source the answer draws on, the primary one included.
    pub required_sources: Vec<ContextSource>,
    /// Fields only the user can supply.
    pub private_fields: Vec<MissingInfo>,
    /// Fields a web search may answer.
    pub external_fields: Vec<MissingInfo>,
    pub reasoning: String,
}

impl ContextDecision {
    fn degraded(reason: String) -> Self {
        Self {
            source: ContextSource::WebSearch,
            required_sources: vec![ContextSource::WebSearch],
            private_fields: Vec::new(),
            external_fields: Vec::new(),
            reasoning: reason,
        }
    }

    /// Applies the private/external split to a provider answer. An
    /// `ASK_USER` answer whose fields are all public is re-routed to search.
    pub fn from_response(response: ContextResponse) -> Self {
        let mut fields: Vec<MissingInfo> = Vec::new();
        for raw in &response.missing_fields {
            let info = MissingInfo::new(raw);
            if !info.name.is_empty() && !fields.iter().any(|seen| seen.name == info.name) {
                fields.push(info);
            }
        }
        let (private_fields, external_fields): (Vec<_>, Vec<_>) = fields
            .into_iter()
            .partition(|info| info.kind == InfoKind::PrivateData);
        let source = match response.primary_source {
            ContextSource::AskUser if private_fields.is_empty() && !external_fields.is_empty() => {
                ContextSource::WebSearch
            }
            other => other,
        };
        let mut required_sources = vec![source];
        for label in &response.required_sources {
            match ContextSource::parse_label(label) {
                Some(found) if !required_sources.contains(&found) => required_sources.push(found),
                Some(_) => {}
                None => debug!(target: "context", %label, "unknown context source ignored"),
            }
        }
        Self {
            source,
            required_sources,
            private_fields,
            external_fields,
            reasoning: response.reasoning,
        }
    }

    /// Web search is needed as the primary source or alongside it.
    pub fn needs_search(&self) -> bool {
        self.required_sources.contains(&ContextSource::WebSearch)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextInput<'a> {
    pub goal: &'a str,
    pub current_url: &'a str,
    pub page_summary: &'a str,
    pub chat_history: &'a [ChatTurn],
    pub user_message: Option<&'a str>,
    pub knowledge: &'a [KnowledgeSnippet],
}

#[derive(Debug, Clone, Default)]
pub struct ContextClassifier;

impl ContextClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Provider failure routes to web search.
    pub async fn classify(
        &self,
        input: &ContextInput<'_>,
        generator: &dyn TextGenerator,
    ) -> ContextDecision {
        match self.request(input, generator).await {
            Ok(response) => {
                let decision = ContextDecision::from_response(response);
                info!(
                    target: "context",
                    source = ?decision.source,
                    private = decision.private_fields.len(),
                    external = decision.external_fields.len(),
                    "context classified"
                );
                decision
            }
            Err(err) => {
                warn!(target: "context", kind = err.kind(), error = %err, "context classification failed; assuming web search");
                ContextDecision::degraded(format!("classification unavailable: {err}"))
            }
        }
    }

    async fn request(
        &self,
        input: &ContextInput<'_>,
        generator: &dyn TextGenerator,
    ) -> Result<ContextResponse, AgentError> {
        let mut prompt = format!("Goal: {}\nCurrent URL: {}\n", input.goal, input.current_url);
        if let Some(message) = input.user_message {
            prompt.push_str(&format!("Latest user message: {message}\n"));
        }
        if !input.chat_history.is_empty() {
            prompt.push_str("Conversation:\n");
            for turn in input.chat_history.iter().rev().take(10).rev() {
                prompt.push_str(&format!("- {:?}: {}\n", turn.role, turn.content));
            }
        }
        if !input.knowledge.is_empty() {
            prompt.push_str("Known snippets:\n");
            for snippet in input.knowledge.iter().take(5) {
                prompt.push_str(&format!("- ({:.2}) {}\n", snippet.score, snippet.text));
            }
        }
        if !input.page_summary.is_empty() {
            prompt.push_str("Page:\n");
            prompt.push_str(&truncate_chars(input.page_summary, 2_000));
        }
        let request = GenerationRequest::new(CallPurpose::ContextClassification, CONTEXT_SYSTEM_PROMPT, prompt)
            .with_schema(ResponseSchema::of::<ContextResponse>("context"))
            .with_temperature(0.0);
        generate_structured(generator, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::provider::MockTextGenerator;

    fn input() -> ContextInput<'static> {
        ContextInput {
            goal: "apply for the credit card",
            current_url: "https://bank.example",
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn ask_user_keeps_private_fields() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::ContextClassification,
            r#"{"primarySource":"ASK_USER","requiredSources":["user"],"missingFields":["social security number","branch opening hours"],"reasoning":"personal data"}"#,
        );
        let decision = ContextClassifier::new().classify(&input(), &mock).await;
        assert_eq!(decision.source, ContextSource::AskUser);
        assert_eq!(decision.private_fields[0].name, "social_security_number");
        assert_eq!(decision.external_fields[0].name, "branch_opening_hours");
    }

    #[tokio::test]
    async fn ask_user_with_only_public_fields_searches() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::ContextClassification,
            r#"{"primarySource":"ASK_USER","missingFields":["annual fee"],"reasoning":"?"}"#,
        );
        let decision = ContextClassifier::new().classify(&input(), &mock).await;
        assert_eq!(decision.source, ContextSource::WebSearch);
    }

    #[tokio::test]
    async fn memory_answer_can_still_require_search() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::ContextClassification,
            r#"{"primarySource":"MEMORY","requiredSources":["memory","web_search","crystal ball"],"missingFields":["museum opening hours"]}"#,
        );
        let decision = ContextClassifier::new().classify(&input(), &mock).await;
        assert_eq!(decision.source, ContextSource::Memory);
        assert_eq!(
            decision.required_sources,
            vec![ContextSource::Memory, ContextSource::WebSearch]
        );
        assert!(decision.needs_search());
    }

    #[tokio::test]
    async fn page_answer_without_search() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::ContextClassification,
            r#"{"primarySource":"PAGE","reasoning":"visible"}"#,
        );
        let decision = ContextClassifier::new().classify(&input(), &mock).await;
        assert_eq!(decision.required_sources, vec![ContextSource::Page]);
        assert!(!decision.needs_search());
    }

    #[tokio::test]
    async fn failure_means_web_search() {
        let mock = MockTextGenerator::new();
        mock.push_error(
            CallPurpose::ContextClassification,
            ProviderError::Transport("dns".into()),
        );
        let decision = ContextClassifier::new().classify(&input(), &mock).await;
        assert_eq!(decision.source, ContextSource::WebSearch);
        assert!(decision.private_fields.is_empty());
    }
}
