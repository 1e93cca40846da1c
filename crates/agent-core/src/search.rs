//! Bounded web-search loop used to resolve missing public information.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::AgentError;
use crate::interrupt::MissingInfo;
use crate::prompt::SEARCH_EVALUATION_SYSTEM_PROMPT;
use crate::provider::{
    CallPurpose, GenerationRequest, ResponseSchema, SearchHit, SearchProvider, SearchQuery,
    TextGenerator,
};
use crate::request::SearchBudget;
use crate::structured::generate_structured;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchEvaluation {
    pub solved: bool,
    #[serde(alias = "should_retry")]
    pub should_retry: bool,
    #[serde(alias = "should_ask_user")]
    pub should_ask_user: bool,
    #[serde(alias = "refined_query")]
    pub refined_query: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStop {
    Solved,
    AskUser,
    NoResults,
    EvaluationFailed,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub stop: SearchStop,
    pub hits: Vec<SearchHit>,
    /// Search provider calls made, including the unrestricted retry.
    pub provider_calls: u32,
    pub attempts: u32,
    pub confidence: f64,
}

impl SearchOutcome {
    pub fn solved(&self) -> bool {
        self.stop == SearchStop::Solved
    }

    /// One context note per hit.
    pub fn notes(&self) -> Vec<String> {
        self.hits
            .iter()
            .map(|hit| {
                if hit.snippet.is_empty() {
                    format!("{} ({})", hit.title, hit.url)
                } else {
                    format!("{} ({}): {}", hit.title, hit.url, hit.snippet)
                }
            })
            .collect()
    }
}

pub fn initial_query(goal: &str, fields: &[MissingInfo]) -> String {
    if fields.is_empty() {
        return goal.trim().to_string();
    }
    let labels: Vec<String> = fields.iter().map(MissingInfo::label).collect();
    format!("{} {}", labels.join(" "), goal.trim())
}

#[derive(Debug, Clone)]
pub struct SearchManager {
    max_attempts: u32,
    max_results: usize,
}

impl SearchManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_search_attempts.max(1),
            max_results: config.search_max_results.max(1),
        }
    }

    pub async fn resolve(
        &self,
        goal: &str,
        fields: &[MissingInfo],
        domain: Option<String>,
        budget: SearchBudget,
        search: &dyn SearchProvider,
        generator: &dyn TextGenerator,
    ) -> SearchOutcome {
        let mut outcome = SearchOutcome {
            stop: SearchStop::Exhausted,
            hits: Vec::new(),
            provider_calls: 0,
            attempts: 0,
            confidence: 0.0,
        };
        let mut remaining = if budget.allow_web_search {
            budget.remaining_searches
        } else {
            0
        };
        let mut query = initial_query(goal, fields);
        let mut domain = domain;

        while outcome.attempts < self.max_attempts && remaining > 0 {
            outcome.attempts += 1;
            let mut hits = self.run_query(&query, domain.clone(), search, &mut outcome, &mut remaining).await;
            if hits.is_empty() && domain.is_some() && remaining > 0 {
                debug!(target: "search", %query, "no hits inside the target domain; retrying unrestricted");
                domain = None;
                hits = self.run_query(&query, None, search, &mut outcome, &mut remaining).await;
            }
            if hits.is_empty() {
                outcome.stop = SearchStop::NoResults;
                break;
            }
            for hit in hits {
                if !outcome.hits.iter().any(|seen| seen.url == hit.url) {
                    outcome.hits.push(hit);
                }
            }

            let evaluation = match self.evaluate(goal, fields, &query, &outcome.hits, generator).await {
                Ok(evaluation) => evaluation,
                Err(err) => {
                    warn!(target: "search", kind = err.kind(), error = %err, "search evaluation failed");
                    outcome.stop = SearchStop::EvaluationFailed;
                    break;
                }
            };
            outcome.confidence = evaluation.confidence.clamp(0.0, 1.0);
            if evaluation.solved {
                outcome.stop = SearchStop::Solved;
                break;
            }
            if evaluation.should_ask_user {
                outcome.stop = SearchStop::AskUser;
                break;
            }
            if !evaluation.should_retry || evaluation.refined_query.trim().is_empty() {
                outcome.stop = SearchStop::Exhausted;
                break;
            }
            query = evaluation.refined_query.trim().to_string();
        }
        info!(
            target: "search",
            stop = ?outcome.stop,
            attempts = outcome.attempts,
            calls = outcome.provider_calls,
            hits = outcome.hits.len(),
            "search finished"
        );
        outcome
    }

    async fn run_query(
        &self,
        query: &str,
        domain: Option<String>,
        search: &dyn SearchProvider,
        outcome: &mut SearchOutcome,
        remaining: &mut u32,
    ) -> Vec<SearchHit> {
        *remaining = remaining.saturating_sub(1);
        outcome.provider_calls += 1;
        let request = SearchQuery {
            text: query.to_string(),
            domain,
            max_results: self.max_results,
        };
        match search.search(&request).await {
            Ok(mut hits) => {
                hits.truncate(self.max_results);
                hits
            }
            Err(err) => {
                warn!(target: "search", error = %err, "search provider failed; treating as no results");
                Vec::new()
            }
        }
    }

    async fn evaluate(
        &self,
        goal: &str,
        fields: &[MissingInfo],
        query: &str,
        hits: &[SearchHit],
        generator: &dyn TextGenerator,
    ) -> Result<SearchEvaluation, AgentError> {
        let wanted: Vec<String> = fields.iter().map(MissingInfo::label).collect();
        let mut prompt = format!(
            "Goal: {goal}\nMissing information: {}\nQuery: {query}\nResults:\n",
            if wanted.is_empty() { "unspecified".to_string() } else { wanted.join(", ") }
        );
        for (i, hit) in hits.iter().enumerate() {
            prompt.push_str(&format!("{}. {} ({})\n   {}\n", i + 1, hit.title, hit.url, hit.snippet));
        }
        let request = GenerationRequest::new(CallPurpose::SearchEvaluation, SEARCH_EVALUATION_SYSTEM_PROMPT, prompt)
            .with_schema(ResponseSchema::of::<SearchEvaluation>("search_evaluation"))
            .with_temperature(0.0);
        generate_structured(generator, request).await
    }
}
