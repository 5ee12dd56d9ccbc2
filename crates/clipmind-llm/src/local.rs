//! Local Ollama daemon over its `/api/generate` endpoint.
//!
//! The generate endpoint takes one prompt and has no notion of tools, so the
//! conversation is flattened into a transcript and tool parts travel as text.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::LOCAL;
use crate::http::{self, extract_error_message};
use crate::{
    BackendResponse, BackendSettings, CompletionRequest, ContentPart, FinishReason, Message,
    ProviderAdapter, Role, Usage,
};
use clipmind_types::{BackendError, Capability, ClipmindError};

const DEFAULT_MODEL: &str = "llama3.2";
/// Local models are slow to load; allow well beyond the cloud default.
const DEFAULT_TIMEOUT_MS: u64 = 300_000;
const LIVENESS_TIMEOUT_MS: u64 = 2_000;

const CAPABILITIES: &[Capability] = &[Capability::TextCompletion, Capability::Vision];

// ---------------------------------------------------------------------------
// LocalAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct LocalAdapter {
    client: reqwest::Client,
    host: String,
    model: String,
    timeout_ms: u64,
}

impl LocalAdapter {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// `Ok(None)` when no host is configured.
    pub fn from_settings(settings: &BackendSettings) -> Result<Option<Self>, ClipmindError> {
        let Some(host) = &settings.host else {
            return Ok(None);
        };
        let timeout_ms = settings.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let mut adapter = Self::new(normalize_host(host));
        adapter.client = http::build_client(LOCAL, timeout_ms)?;
        adapter.timeout_ms = timeout_ms;
        if let Some(model) = &settings.model {
            adapter.model = model.clone();
        }
        Ok(Some(adapter))
    }

    /// Fail fast with a network error when the daemon is not running.
    async fn ensure_running(&self) -> Result<(), BackendError> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.host))
            .timeout(Duration::from_millis(LIVENESS_TIMEOUT_MS))
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(
                    host = %self.host,
                    error = %e,
                    "Local daemon liveness check failed"
                );
                BackendError::Network {
                    backend: LOCAL.into(),
                    message: format!("daemon not reachable at {}", self.host),
                }
            })?;

        if !resp.status().is_success() {
            return Err(BackendError::Network {
                backend: LOCAL.into(),
                message: format!(
                    "daemon at {} answered liveness check with HTTP {}",
                    self.host,
                    resp.status().as_u16()
                ),
            });
        }
        Ok(())
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "prompt": build_prompt(&request.messages),
            "stream": false,
        });

        let system = request.system_texts();
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }

        let images = collect_images(&request.messages);
        if !images.is_empty() {
            body["images"] = json!(images);
        }

        let mut options = json!({});
        if let Some(temp) = request.temperature {
            options["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        if options.as_object().is_some_and(|o| !o.is_empty()) {
            body["options"] = options;
        }

        body
    }
}

/// Accept `host:port` as well as full URLs, as `OLLAMA_HOST` commonly holds the former.
fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

// ---------------------------------------------------------------------------
// Request translation
// ---------------------------------------------------------------------------

/// A lone user message is sent verbatim; longer conversations become a
/// role-labelled transcript.
fn build_prompt(messages: &[Message]) -> String {
    let turns: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();

    if let [only] = turns.as_slice() {
        if only.role == Role::User {
            return only.plain_text();
        }
    }

    let mut prompt = String::new();
    for msg in turns {
        let text = msg.plain_text();
        if text.is_empty() {
            continue;
        }
        let label = match msg.role {
            Role::Assistant => "Assistant",
            Role::User | Role::System => "User",
        };
        prompt.push_str(&format!("{label}: {text}\n\n"));
    }
    prompt.push_str("Assistant:");
    prompt
}

fn collect_images(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|p| match p {
            ContentPart::Image { data: Some(data), .. } => Some(data.clone()),
            ContentPart::Image { url: Some(url), .. } => {
                tracing::debug!(%url, "Local backend only accepts inline images, skipping URL");
                None
            }
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Response translation
// ---------------------------------------------------------------------------

fn parse_response(body: &serde_json::Value) -> Result<BackendResponse, BackendError> {
    let Some(text) = body["response"].as_str() else {
        return Err(BackendError::InvalidResponse {
            backend: LOCAL.into(),
            message: "missing response field".into(),
        });
    };

    let finish_reason = match body["done_reason"].as_str() {
        Some("length") => FinishReason::MaxTokens,
        _ => FinishReason::EndTurn,
    };

    let input_tokens = body["prompt_eval_count"].as_u64().unwrap_or(0);
    let output_tokens = body["eval_count"].as_u64().unwrap_or(0);

    Ok(BackendResponse {
        id: uuid::Uuid::new_v4().to_string(),
        text: text.to_string(),
        tool_calls: Vec::new(),
        reasoning: body["thinking"]
            .as_str()
            .filter(|t| !t.is_empty())
            .map(String::from),
        usage: Usage {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            ..Default::default()
        },
        model: body["model"].as_str().unwrap_or("").to_string(),
        finish_reason,
    })
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(status: reqwest::StatusCode, body: &str) -> BackendError {
    let status_u16 = status.as_u16();
    BackendError::Runtime {
        backend: LOCAL.into(),
        status: status_u16,
        message: extract_error_message(body),
        // 404 means the model is not pulled; retrying will not help.
        retryable: status.is_server_error(),
    }
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for LocalAdapter {
    async fn complete(&self, request: &CompletionRequest) -> Result<BackendResponse, BackendError> {
        self.ensure_running().await?;

        let body = self.build_request_body(request);
        tracing::debug!(model = %body["model"], host = %self.host, "Local generate request");

        let builder = self
            .client
            .post(format!("{}/api/generate", self.host))
            .json(&body);

        let json = http::send_json(LOCAL, self.timeout_ms, builder, map_error).await?;
        parse_response(&json)
    }

    fn name(&self) -> &str {
        LOCAL
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    /// The local daemon needs no credential.
    fn has_valid_credentials(&self) -> bool {
        true
    }

    fn context_window_size(&self) -> usize {
        8_192
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
