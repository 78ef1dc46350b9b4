use std::time::Instant;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::info;

/// Wraps one inference round-trip with request/response timing records on the
/// `capgen.timing` target. The wrapped future's result is passed through
/// untouched; only the status field reflects success or failure.
pub async fn log_llm_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: "capgen.timing",
        "event=llm_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: "capgen.timing",
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status,
        metadata_text
    );

    result
}

/// Timing scope for one end-to-end generation request.
#[derive(Debug)]
pub struct RequestTimer {
    operation: String,
    started_at: chrono::DateTime<Utc>,
    started_perf: Instant,
}

impl RequestTimer {
    pub fn start(operation: &str) -> Self {
        let timer = RequestTimer {
            operation: operation.to_string(),
            started_at: Utc::now(),
            started_perf: Instant::now(),
        };
        info!(
            target: "capgen.timing",
            "event=request_received operation={} received_at={}",
            timer.operation,
            timer.started_at.to_rfc3339()
        );
        timer
    }

    pub fn complete(self, status: &str, detail: Option<&str>) {
        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: "capgen.timing",
            "event=request_completed operation={} started_at={} completed_at={} duration_s={:.3} status={} detail={}",
            self.operation,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            status,
            detail.unwrap_or_default()
        );
    }
}
