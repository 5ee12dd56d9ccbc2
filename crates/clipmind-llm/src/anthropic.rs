use async_trait::async_trait;
use serde_json::json;

use crate::config::ANTHROPIC;
use crate::http::{self, extract_error_message, DEFAULT_TIMEOUT_MS};
use crate::{
    BackendResponse, BackendSettings, CompletionRequest, ContentPart, FinishReason, Message,
    ProviderAdapter, Role, ToolCall, ToolDefinition, ToolResultEncoding, Usage,
};
use clipmind_types::{BackendError, Capability, ClipmindError};

const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

const CAPABILITIES: &[Capability] = &[
    Capability::TextCompletion,
    Capability::StructuredOutput,
    Capability::FunctionCalling,
    Capability::Vision,
];

// ---------------------------------------------------------------------------
// AnthropicAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout_ms: u64,
}

impl AnthropicAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// `Ok(None)` when no API key is configured.
    pub fn from_settings(settings: &BackendSettings) -> Result<Option<Self>, ClipmindError> {
        let Some(api_key) = settings.api_key.clone() else {
            return Ok(None);
        };
        let timeout_ms = settings.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let mut adapter = Self::new(api_key);
        adapter.client = http::build_client(ANTHROPIC, timeout_ms)?;
        adapter.timeout_ms = timeout_ms;
        if let Some(host) = &settings.host {
            adapter.base_url = host.trim_end_matches('/').to_string();
        }
        if let Some(model) = &settings.model {
            adapter.model = model.clone();
        }
        Ok(Some(adapter))
    }
}

// ---------------------------------------------------------------------------
// Request translation (Unified → Anthropic JSON)
// ---------------------------------------------------------------------------

fn build_request_body(request: &CompletionRequest, default_model: &str) -> serde_json::Value {
    // 1. System prompt and system-role messages become top-level blocks
    let system_parts: Vec<serde_json::Value> = request
        .system_texts()
        .into_iter()
        .map(|text| {
            json!({
                "type": "text",
                "text": text,
                "cache_control": { "type": "ephemeral" }
            })
        })
        .collect();

    // 2. Convert non-system messages
    let messages = convert_messages(&request.messages);

    // 3. Build body
    let mut body = json!({
        "model": request.model.as_deref().unwrap_or(default_model),
        "max_tokens": request.max_tokens.unwrap_or(4096),
        "messages": messages,
    });

    if !system_parts.is_empty() {
        body["system"] = json!(system_parts);
    }

    // 4. Convert tools
    if !request.tools.is_empty() {
        body["tools"] = json!(request
            .tools
            .iter()
            .map(convert_tool_definition)
            .collect::<Vec<_>>());
    }

    // 5. Temperature
    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }

    body
}

fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    let mut result: Vec<serde_json::Value> = Vec::new();

    for msg in messages {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => continue,
        };
        let content = convert_content_parts(&msg.content);
        if content.is_empty() {
            continue;
        }
        // Consecutive same-role messages are merged; the API requires alternation.
        if let Some(last) = result.last_mut() {
            if last["role"] == role {
                if let Some(arr) = last["content"].as_array_mut() {
                    arr.extend(content);
                    continue;
                }
            }
        }
        result.push(json!({ "role": role, "content": content }));
    }

    result
}

fn convert_content_parts(parts: &[ContentPart]) -> Vec<serde_json::Value> {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(json!({
                "type": "text",
                "text": text
            })),
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => Some(json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": arguments
            })),
            ContentPart::ToolResult {
                tool_call_id,
                content,
                is_error,
                ..
            } => {
                let mut v = json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": content
                });
                if *is_error {
                    v["is_error"] = json!(true);
                }
                Some(v)
            }
            ContentPart::Image {
                data: Some(data),
                media_type,
                ..
            } => Some(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": media_type.as_deref().unwrap_or("image/png"),
                    "data": data
                }
            })),
            ContentPart::Image { url: Some(url), .. } => Some(json!({
                "type": "image",
                "source": {
                    "type": "url",
                    "url": url
                }
            })),
            ContentPart::Image { .. } => None,
            // Thinking blocks need a signature to be replayed; drop them.
            ContentPart::Thinking { .. } => None,
        })
        .collect()
}

fn convert_tool_definition(tool: &ToolDefinition) -> serde_json::Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters
    })
}

// ---------------------------------------------------------------------------
// Response translation (Anthropic JSON → BackendResponse)
// ---------------------------------------------------------------------------

fn parse_response(body: &serde_json::Value) -> Result<BackendResponse, BackendError> {
    let Some(content) = body["content"].as_array() else {
        return Err(BackendError::InvalidResponse {
            backend: ANTHROPIC.into(),
            message: "missing content array".into(),
        });
    };

    let id = body["id"].as_str().unwrap_or("").to_string();
    let model = body["model"].as_str().unwrap_or("").to_string();

    let stop_reason = match body["stop_reason"].as_str() {
        Some("end_turn") => FinishReason::EndTurn,
        Some("max_tokens") => FinishReason::MaxTokens,
        Some("stop_sequence") => FinishReason::StopSequence,
        Some("tool_use") => FinishReason::ToolUse,
        _ => FinishReason::EndTurn,
    };

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut reasoning: Option<String> = None;

    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(t) = block["text"].as_str() {
                    text_parts.push(t.to_string());
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: block["input"].clone(),
                });
            }
            Some("thinking") => {
                if let Some(t) = block["thinking"].as_str() {
                    reasoning = Some(t.to_string());
                }
            }
            _ => {}
        }
    }

    // Parse usage
    let usage_obj = &body["usage"];
    let input_tokens = usage_obj["input_tokens"].as_u64().unwrap_or(0);
    let output_tokens = usage_obj["output_tokens"].as_u64().unwrap_or(0);

    let usage = Usage {
        input_tokens,
        output_tokens,
        reasoning_tokens: None,
        cache_read_tokens: usage_obj["cache_read_input_tokens"].as_u64(),
        cache_write_tokens: usage_obj["cache_creation_input_tokens"].as_u64(),
        total_tokens: input_tokens + output_tokens,
    };

    Ok(BackendResponse {
        id,
        text: text_parts.join(""),
        tool_calls,
        reasoning,
        usage,
        model,
        finish_reason: stop_reason,
    })
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(status: reqwest::StatusCode, body: &str) -> BackendError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => {
            // Try to extract retry-after from the error body
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            BackendError::RateLimited {
                backend: ANTHROPIC.into(),
                retry_after_ms: retry_ms,
            }
        }
        401 | 403 => BackendError::Credential {
            backend: ANTHROPIC.into(),
        },
        500 | 502 | 503 | 529 => BackendError::Runtime {
            backend: ANTHROPIC.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => BackendError::Runtime {
            backend: ANTHROPIC.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn complete(&self, request: &CompletionRequest) -> Result<BackendResponse, BackendError> {
        let body = build_request_body(request, &self.model);
        tracing::debug!(
            model = %body["model"],
            messages = request.messages.len(),
            "Anthropic request"
        );

        let builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body);

        let json = http::send_json(ANTHROPIC, self.timeout_ms, builder, map_error).await?;
        parse_response(&json)
    }

    fn name(&self) -> &str {
        ANTHROPIC
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    fn has_valid_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn tool_result_encoding(&self) -> ToolResultEncoding {
        ToolResultEncoding::Structured
    }

    fn context_window_size(&self) -> usize {
        200_000
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
