//! Wiring from [`Config`] to a ready [`DecisionEngine`].

use std::sync::Arc;

use agent_core::{
    DecisionEngine, MockTextGenerator, NoSearch, SearchProvider, TextGenerator,
};
use anyhow::{Context, Result};
use tracing::info;
use waypoint_task_store::{InMemoryTaskStore, JsonFileTaskStore, TaskStore};

use crate::config::{Config, LlmProviderKind, SearchProviderKind, StorageBackend};
use crate::llm::{OpenAiConfig, OpenAiTextGenerator};
use crate::search::BraveSearchProvider;
use crate::usage::TracingUsageRecorder;

#[derive(Clone)]
pub struct AppContext {
    config: Arc<Config>,
    store: Arc<dyn TaskStore>,
    engine: Arc<DecisionEngine>,
}

impl AppContext {
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let store = build_store(&config)?;
        let generator = build_generator(&config)?;
        let search = build_search(&config)?;

        let mut engine_config = config.engine.clone();
        engine_config.search_max_results = config.search.max_results;
        let engine = DecisionEngine::new(store.clone(), generator)
            .with_config(engine_config)
            .with_search(search)
            .with_usage_recorder(Arc::new(TracingUsageRecorder));

        Ok(Self {
            config: Arc::new(config),
            store,
            engine: Arc::new(engine),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    pub fn engine(&self) -> Arc<DecisionEngine> {
        self.engine.clone()
    }
}

fn build_store(config: &Config) -> Result<Arc<dyn TaskStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory task store");
            Ok(Arc::new(InMemoryTaskStore::new()))
        }
        StorageBackend::File => {
            let dir = config
                .storage
                .resolved_dir()
                .context("Failed to resolve task storage directory")?;
            info!("Using file task store at {}", dir.display());
            Ok(Arc::new(JsonFileTaskStore::new(dir)))
        }
    }
}

fn build_generator(config: &Config) -> Result<Arc<dyn TextGenerator>> {
    match config.llm.provider {
        LlmProviderKind::OpenAi => {
            let settings =
                OpenAiConfig::from_settings(&config.llm).context("Invalid llm section")?;
            info!(model = %settings.model, base = %settings.api_base, "Using OpenAI-compatible generator");
            let generator =
                OpenAiTextGenerator::new(settings).context("Failed to create OpenAI generator")?;
            Ok(Arc::new(generator))
        }
        LlmProviderKind::Mock => {
            info!("Using offline mock generator");
            Ok(Arc::new(MockTextGenerator::offline()))
        }
    }
}

fn build_search(config: &Config) -> Result<Arc<dyn SearchProvider>> {
    match config.search.provider {
        SearchProviderKind::Brave => {
            let key = config
                .search
                .api_key
                .clone()
                .context("search.provider is brave but no API key is configured")?;
            let timeout = config.search.timeout().context("Invalid search section")?;
            let provider = BraveSearchProvider::new(key, config.search.endpoint.clone(), timeout)
                .context("Failed to create Brave search provider")?;
            Ok(Arc::new(provider))
        }
        SearchProviderKind::None => Ok(Arc::new(NoSearch)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_without_keys_fails_to_wire() {
        let err = AppContext::from_config(Config::default()).err().expect("missing key");
        assert!(format!("{err:#}").contains("missing OpenAI API key"));
    }

    #[test]
    fn brave_without_key_fails_to_wire() {
        let mut config = Config::default();
        config.llm.provider = LlmProviderKind::Mock;
        config.search.provider = SearchProviderKind::Brave;
        assert!(AppContext::from_config(config).is_err());
    }

    #[test]
    fn mock_provider_wires_offline() {
        let mut config = Config::default();
        config.llm.provider = LlmProviderKind::Mock;
        config.search.max_results = 3;
        let context = AppContext::from_config(config).expect("wired");
        assert_eq!(context.engine().config().search_max_results, 3);
    }
}
