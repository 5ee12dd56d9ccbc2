use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::{BackendResponse, CompletionRequest};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Hooks run around every adapter call the router makes, including failover attempts.
pub trait Middleware: Send + Sync {
    fn before(&self, _backend: &str, _request: &mut CompletionRequest) {}
    fn after(
        &self,
        _backend: &str,
        _request: &CompletionRequest,
        _response: &mut BackendResponse,
    ) {
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, backend: &str, request: &mut CompletionRequest) {
        tracing::info!(
            backend,
            model = request.model.as_deref().unwrap_or("default"),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "LLM request"
        );
    }

    fn after(&self, backend: &str, _request: &CompletionRequest, response: &mut BackendResponse) {
        tracing::info!(
            backend,
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            tool_calls = response.tool_calls.len(),
            finish = ?response.finish_reason,
            "LLM response"
        );
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware: UsageTrackingMiddleware
// ---------------------------------------------------------------------------

/// Running token totals. Clones share the same counters.
#[derive(Clone)]
pub struct UsageTrackingMiddleware {
    total_input: Arc<AtomicU64>,
    total_output: Arc<AtomicU64>,
}

impl UsageTrackingMiddleware {
    pub fn new() -> Self {
        Self {
            total_input: Arc::new(AtomicU64::new(0)),
            total_output: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input.load(Ordering::Relaxed)
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output.load(Ordering::Relaxed)
    }
}

impl Default for UsageTrackingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for UsageTrackingMiddleware {
    fn after(&self, _backend: &str, _request: &CompletionRequest, response: &mut BackendResponse) {
        self.total_input
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        self.total_output
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Message, Usage};

    fn response(input: u64, output: u64) -> BackendResponse {
        BackendResponse {
            id: "r".into(),
            text: "ok".into(),
            tool_calls: vec![],
            reasoning: None,
            usage: Usage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
                ..Default::default()
            },
            model: "m".into(),
            finish_reason: FinishReason::EndTurn,
        }
    }

    #[test]
    fn usage_tracking_accumulates_across_clones() {
        let tracker = UsageTrackingMiddleware::new();
        let installed = tracker.clone();
        let req = CompletionRequest::new(vec![Message::user("hi")]);

        installed.after("openai", &req, &mut response(10, 20));
        installed.after("local", &req, &mut response(5, 1));

        assert_eq!(tracker.total_input_tokens(), 15);
        assert_eq!(tracker.total_output_tokens(), 21);
    }

    #[test]
    fn logging_middleware_leaves_request_untouched() {
        let mut req = CompletionRequest::new(vec![Message::user("hi")]).with_max_tokens(64);
        LoggingMiddleware.before("anthropic", &mut req);
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.max_tokens, Some(64));
    }
}
