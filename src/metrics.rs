use once_cell::sync::{Lazy, OnceCell};
use prometheus::{opts, Encoder, IntCounterVec, Registry, TextEncoder};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

static STEP_REQUESTS: Lazy<Option<IntCounterVec>> = Lazy::new(|| {
    match IntCounterVec::new(
        opts!(
            "waypoint_http_step_requests_total",
            "Step requests served over HTTP grouped by outcome"
        ),
        &["outcome"],
    ) {
        Ok(counter) => Some(counter),
        Err(err) => {
            error!(?err, "failed to build step request counter");
            None
        }
    }
});

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        agent_core::register_metrics(registry);
        if let Some(counter) = STEP_REQUESTS.as_ref() {
            if let Err(err) = registry.register(Box::new(counter.clone())) {
                error!(?err, "failed to register step request counter");
            }
        }
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

/// Counts one served step request; `outcome` is `ok` or an error kind.
pub fn record_step_request(outcome: &str) {
    if let Some(counter) = STEP_REQUESTS.as_ref() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Renders the registry in the Prometheus text format, returning the
/// content type alongside the body.
pub fn encode_metrics() -> Result<(String, String), prometheus::Error> {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&global_registry().gather(), &mut buffer)?;
    let body = String::from_utf8(buffer)
        .map_err(|err| prometheus::Error::Msg(format!("metrics are not utf8: {err}")))?;
    Ok((encoder.format_type().to_string(), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_counter_is_exported() {
        record_step_request("ok");
        let (content_type, body) = encode_metrics().expect("encode");
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("waypoint_http_step_requests_total"));
    }
}
