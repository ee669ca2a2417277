use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

use crate::error::FailureKind;

pub const SCREENSHOTS_CAPTURED: &str = "screenshots_captured_total";
pub const CAPTURE_DURATION: &str = "screenshot_capture_seconds";
pub const KEY_VALIDATIONS: &str = "api_key_validations_total";

/// Install the Prometheus recorder and describe the exported series
///
/// Without an installed recorder every `record_*` call is a no-op.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        SCREENSHOTS_CAPTURED,
        "Capture attempts by outcome (success or failure kind)"
    );
    describe_histogram!(
        CAPTURE_DURATION,
        Unit::Seconds,
        "Wall time of a capture attempt from navigation to image"
    );
    describe_counter!(KEY_VALIDATIONS, "API key checks by result");

    info!("Prometheus recorder installed");
    Ok(handle)
}

/// Count one capture attempt; `failure` is `None` for a successful capture
pub fn record_capture(duration: Duration, failure: Option<FailureKind>) {
    let outcome = failure.map_or("success", |kind| kind.as_str());
    counter!(SCREENSHOTS_CAPTURED, 1, "outcome" => outcome);
    histogram!(CAPTURE_DURATION, duration.as_secs_f64(), "outcome" => outcome);
}

pub fn record_key_validation(valid: bool) {
    let result = if valid { "valid" } else { "invalid" };
    counter!(KEY_VALIDATIONS, 1, "result" => result);
}
