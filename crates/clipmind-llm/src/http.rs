//! Transport plumbing shared by the network adapters.

use std::time::Duration;

use clipmind_types::{BackendError, ClipmindError};

pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Build a client whose every request is bounded by `timeout_ms`.
pub(crate) fn build_client(
    backend: &str,
    timeout_ms: u64,
) -> Result<reqwest::Client, ClipmindError> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| ClipmindError::Config(format!("{backend}: failed to build HTTP client: {e}")))
}

/// Classify a transport failure (no HTTP status was received).
pub(crate) fn transport_error(backend: &str, timeout_ms: u64, e: &reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout {
            backend: backend.into(),
            timeout_ms,
        }
    } else {
        BackendError::Network {
            backend: backend.into(),
            message: e.to_string(),
        }
    }
}

/// Send `request`, read the body, map non-success statuses through
/// `map_error`, and parse the body as JSON.
pub(crate) async fn send_json(
    backend: &str,
    timeout_ms: u64,
    request: reqwest::RequestBuilder,
    map_error: fn(reqwest::StatusCode, &str) -> BackendError,
) -> Result<serde_json::Value, BackendError> {
    let resp = request
        .send()
        .await
        .map_err(|e| transport_error(backend, timeout_ms, &e))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| transport_error(backend, timeout_ms, &e))?;

    if !status.is_success() {
        tracing::debug!(backend, status = status.as_u16(), "Backend returned error status");
        return Err(map_error(status, &body));
    }

    serde_json::from_str(&body).map_err(|e| BackendError::InvalidResponse {
        backend: backend.into(),
        message: format!("Failed to parse response JSON: {e}"),
    })
}

/// `error.message` from a JSON error body, or the raw body.
pub(crate) fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["error"].as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_error_message_reads_nested_and_flat_shapes() {
        assert_eq!(
            extract_error_message(r#"{"error": {"message": "invalid api key"}}"#),
            "invalid api key"
        );
        assert_eq!(
            extract_error_message(r#"{"error": "model 'llama9' not found"}"#),
            "model 'llama9' not found"
        );
        assert_eq!(extract_error_message("Bad Gateway"), "Bad Gateway");
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let client = build_client("local", 2_000).unwrap();
        // Port 9 on loopback is closed on any sane test machine.
        let err = send_json(
            "local",
            2_000,
            client.get("http://127.0.0.1:9/api/tags"),
            |status, _body| BackendError::Runtime {
                backend: "local".into(),
                status: status.as_u16(),
                message: String::new(),
                retryable: false,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            BackendError::Network { .. } | BackendError::Timeout { .. }
        ));
        assert_eq!(err.backend(), "local");
    }
}
