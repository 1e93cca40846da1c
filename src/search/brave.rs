//! Brave Search API adapter for the [`SearchProvider`] port.

use std::time::Duration;

use agent_core::{ProviderError, SearchHit, SearchProvider, SearchQuery};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const MAX_COUNT: usize = 20;

pub struct BraveSearchProvider {
    client: Client,
    api_key: String,
    endpoint: String,
    timeout: Duration,
}

impl BraveSearchProvider {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Unavailable(
                "missing Brave API key (set BRAVE_SEARCH_API_KEY or search.api_key)".into(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::Unavailable(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.into(),
            timeout,
        })
    }
}

/// Query text sent to Brave; domain restriction uses the `site:` operator.
fn query_text(query: &SearchQuery) -> String {
    match &query.domain {
        Some(domain) => format!("{} site:{}", query.text.trim(), domain),
        None => query.text.trim().to_string(),
    }
}

#[async_trait]
impl SearchProvider for BraveSearchProvider {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, ProviderError> {
        let count = query.max_results.clamp(1, MAX_COUNT);
        let text = query_text(query);
        let count_param = count.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", text.as_str()), ("count", count_param.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ProviderError::Timeout(humantime::format_duration(self.timeout).to_string())
                } else {
                    ProviderError::Transport(format!("brave request failed: {err}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(ProviderError::Status { status, body });
        }

        let payload: BraveResponse = response.json().await.map_err(|err| {
            ProviderError::InvalidResponse(format!("brave response invalid: {err}"))
        })?;
        let hits = payload.into_hits(count);
        debug!(target: "search", query = %text, hits = hits.len(), "brave search completed");
        Ok(hits)
    }
}

#[derive(Debug, Default, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Default, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: Option<String>,
}

impl BraveResponse {
    fn into_hits(self, limit: usize) -> Vec<SearchHit> {
        self.web
            .map(|web| web.results)
            .unwrap_or_default()
            .into_iter()
            .filter(|result| !result.url.is_empty())
            .take(limit)
            .map(|result| SearchHit {
                title: result.title,
                url: result.url,
                snippet: result.description.unwrap_or_default(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_restriction_uses_site_operator() {
        let query = SearchQuery {
            text: " opening hours ".into(),
            domain: Some("museum.example".into()),
            max_results: 5,
        };
        assert_eq!(query_text(&query), "opening hours site:museum.example");
    }

    #[test]
    fn results_without_urls_are_dropped() {
        let payload: BraveResponse = serde_json::from_str(
            r#"{"web":{"results":[
                {"title":"Hours","url":"https://museum.example/hours","description":"Open 9-17"},
                {"title":"Broken","url":""},
                {"title":"Visit","url":"https://museum.example/visit"}
            ]}}"#,
        )
        .unwrap();
        let hits = payload.into_hits(5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].snippet, "Open 9-17");
        assert_eq!(hits[1].snippet, "");
    }

    #[test]
    fn missing_web_section_yields_no_hits() {
        let payload: BraveResponse = serde_json::from_str(r#"{"type":"search"}"#).unwrap();
        assert!(payload.into_hits(5).is_empty());
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(BraveSearchProvider::new(" ", "https://api.search.brave.com", Duration::from_secs(1)).is_err());
    }
}
