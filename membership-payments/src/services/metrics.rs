use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; only the
/// first call installs anything.
pub fn init_metrics() -> anyhow::Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;

    if METRICS_HANDLE.set(handle).is_err() {
        tracing::warn!("Metrics handle was already initialized");
    }

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!(
        "payment_orders_created_total",
        "Gateway orders created through this service"
    );
    metrics::describe_counter!(
        "payment_verifications_total",
        "Payment verification attempts by outcome"
    );
    metrics::describe_counter!("payment_refunds_total", "Refunds issued through the gateway");
    metrics::describe_counter!(
        "membership_grants_total",
        "Membership upserts by outcome"
    );
    metrics::describe_counter!("webhook_events_total", "Webhook events received by type");
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_order_created() {
    metrics::counter!("payment_orders_created_total").increment(1);
}

/// `outcome` is one of `verified`, `duplicate` or a failure kind.
pub fn record_verification(outcome: &'static str) {
    metrics::counter!("payment_verifications_total", "outcome" => outcome).increment(1);
}

pub fn record_refund() {
    metrics::counter!("payment_refunds_total").increment(1);
}

pub fn record_membership_grant(outcome: &'static str) {
    metrics::counter!("membership_grants_total", "outcome" => outcome).increment(1);
}

pub fn record_webhook_event(event: &'static str) {
    metrics::counter!("webhook_events_total", "event" => event).increment(1);
}
