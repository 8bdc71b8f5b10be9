use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::utils::logging::TIMING_TARGET;

const MAX_ARGUMENT_CHARS: usize = 300;

fn loggable_argument(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .take(MAX_ARGUMENT_CHARS)
        .collect()
}

/// Timing record for one console action. `start` logs receipt; `finish`
/// logs the outcome. A timer dropped unfinished (a panicking task) is logged
/// as `abandoned`.
#[derive(Debug)]
pub struct ActionTimer {
    action: &'static str,
    argument: Option<String>,
    received_at: DateTime<Utc>,
    started: Instant,
    finished: bool,
}

impl ActionTimer {
    pub fn start(action: &'static str, argument: Option<&str>) -> Self {
        let timer = ActionTimer {
            action,
            argument: argument.map(loggable_argument),
            received_at: Utc::now(),
            started: Instant::now(),
            finished: false,
        };
        info!(
            target: TIMING_TARGET,
            event = "action_received",
            action = timer.action,
            received_at = %timer.received_at.to_rfc3339(),
            argument = ?timer.argument
        );
        timer
    }

    pub fn finish(mut self, status: &str, detail: Option<&str>) {
        self.finished = true;
        info!(
            target: TIMING_TARGET,
            event = "action_completed",
            action = self.action,
            argument = ?self.argument,
            duration_s = self.started.elapsed().as_secs_f64(),
            status,
            detail = detail.unwrap_or_default()
        );
    }
}

impl Drop for ActionTimer {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                target: TIMING_TARGET,
                event = "action_completed",
                action = self.action,
                duration_s = self.started.elapsed().as_secs_f64(),
                status = "abandoned"
            );
        }
    }
}

/// Runs one model call and logs a request/response pair around it with the
/// elapsed time and whether it failed.
pub async fn timed_model_call<T, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> anyhow::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let metadata = metadata
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    let started = Instant::now();
    info!(
        target: TIMING_TARGET,
        event = "llm_request",
        provider,
        model,
        operation,
        metadata = %metadata
    );

    let result = call().await;

    info!(
        target: TIMING_TARGET,
        event = "llm_response",
        provider,
        model,
        operation,
        duration_s = started.elapsed().as_secs_f64(),
        status = if result.is_ok() { "success" } else { "error" },
        metadata = %metadata
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_arguments_are_truncated_and_flattened() {
        let long = format!("line one\n{}", "x".repeat(400));
        let timer = ActionTimer::start("add", Some(&long));
        let argument = timer.argument.clone().unwrap();
        assert_eq!(argument.chars().count(), MAX_ARGUMENT_CHARS);
        assert!(argument.starts_with("line one x"));
        timer.finish("success", None);
    }

    #[test]
    fn multibyte_arguments_are_cut_on_char_boundaries() {
        assert_eq!(loggable_argument(&"驚".repeat(301)).chars().count(), 300);
    }

    #[tokio::test]
    async fn model_call_result_passes_through() {
        let ok = timed_model_call("gemini", "model", "op", None, || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: anyhow::Result<u32> = timed_model_call("gemini", "model", "op", None, || async {
            Err(anyhow::anyhow!("nope"))
        })
        .await;
        assert!(err.is_err());
    }
}
