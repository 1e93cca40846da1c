use agent_core::{ProviderError, UsageRecord, UsageRecorder};
use async_trait::async_trait;
use tracing::info;

/// Usage sink that writes one structured log line per decision cycle.
#[derive(Debug, Default, Clone)]
pub struct TracingUsageRecorder;

#[async_trait]
impl UsageRecorder for TracingUsageRecorder {
    async fn record(&self, record: UsageRecord) -> Result<(), ProviderError> {
        info!(
            target: "usage",
            task_id = %record.task_id,
            step_index = ?record.step_index,
            provider = %record.provider,
            calls = record.calls,
            failures = record.failures,
            prompt_tokens = record.usage.prompt_tokens,
            completion_tokens = record.usage.completion_tokens,
            requests = record.usage.requests,
            recorded_at = %record.recorded_at.to_rfc3339(),
            "provider usage"
        );
        Ok(())
    }
}
