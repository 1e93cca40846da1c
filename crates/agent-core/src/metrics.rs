use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, Registry};
use tracing::error;
use waypoint_core_types::{TaskStatus, VerificationTier};

use crate::provider::CallPurpose;

lazy_static! {
    static ref PROVIDER_CALLS: IntCounterVec = IntCounterVec::new(
        opts!(
            "waypoint_provider_calls_total",
            "Provider generation calls grouped by purpose and outcome"
        ),
        &["purpose", "outcome"]
    )
    .unwrap();
    static ref VERDICTS: IntCounterVec = IntCounterVec::new(
        opts!(
            "waypoint_verification_verdicts_total",
            "Verification verdicts grouped by tier and routed success"
        ),
        &["tier", "success"]
    )
    .unwrap();
    static ref LOW_CONFIDENCE_COMPLETIONS: IntCounter = IntCounter::new(
        "waypoint_low_confidence_completions_total",
        "Completions accepted below the audit threshold",
    )
    .unwrap();
    static ref CORRECTIONS: IntCounterVec = IntCounterVec::new(
        opts!(
            "waypoint_corrections_total",
            "Self-correction outcomes"
        ),
        &["outcome"]
    )
    .unwrap();
    static ref TASKS_FINISHED: IntCounterVec = IntCounterVec::new(
        opts!(
            "waypoint_tasks_finished_total",
            "Tasks reaching a terminal status"
        ),
        &["status"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register agent metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, PROVIDER_CALLS.clone());
    register(registry, VERDICTS.clone());
    register(registry, LOW_CONFIDENCE_COMPLETIONS.clone());
    register(registry, CORRECTIONS.clone());
    register(registry, TASKS_FINISHED.clone());
}

pub fn record_provider_call(purpose: CallPurpose, outcome: &str) {
    PROVIDER_CALLS
        .with_label_values(&[purpose.as_str(), outcome])
        .inc();
}

pub fn record_verdict(tier: VerificationTier, success: bool) {
    let success = if success { "true" } else { "false" };
    VERDICTS.with_label_values(&[tier.as_str(), success]).inc();
}

pub fn record_low_confidence_completion() {
    LOW_CONFIDENCE_COMPLETIONS.inc();
}

pub fn record_correction(outcome: &str) {
    CORRECTIONS.with_label_values(&[outcome]).inc();
}

pub fn record_task_finished(status: TaskStatus) {
    TASKS_FINISHED.with_label_values(&[status.as_str()]).inc();
}
