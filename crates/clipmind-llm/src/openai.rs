use async_trait::async_trait;
use serde_json::json;

use crate::config::OPENAI;
use crate::http::{self, extract_error_message, DEFAULT_TIMEOUT_MS};
use crate::{
    BackendResponse, BackendSettings, CompletionRequest, ContentPart, FinishReason, Message,
    ProviderAdapter, Role, ToolCall, Usage,
};
use clipmind_types::{BackendError, Capability, ClipmindError};

const CAPABILITIES: &[Capability] = &[
    Capability::TextCompletion,
    Capability::StructuredOutput,
    Capability::FunctionCalling,
    Capability::Vision,
];

// ---------------------------------------------------------------------------
// OpenAiAdapter
// ---------------------------------------------------------------------------

/// Responses API adapter. Tool results are fed back as text summaries.
#[derive(Debug)]
pub struct OpenAiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    timeout_ms: u64,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
            default_model: "gpt-4o".to_string(),
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
        adapter.client = http::build_client(OPENAI, timeout_ms)?;
        adapter.timeout_ms = timeout_ms;
        if let Some(host) = &settings.host {
            adapter.base_url = host.trim_end_matches('/').to_string();
        }
        if let Some(model) = &settings.model {
            adapter.default_model = model.clone();
        }
        Ok(Some(adapter))
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        // 1. Convert non-system messages to input array
        let input: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(convert_message)
            .collect();

        // 2. Build body
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.default_model),
            "input": input,
        });

        // 3. System text goes to instructions
        let system = request.system_texts();
        if !system.is_empty() {
            body["instructions"] = json!(system.join("\n\n"));
        }

        // 4. max_tokens -> max_output_tokens
        if let Some(max_tokens) = request.max_tokens {
            body["max_output_tokens"] = json!(max_tokens);
        }

        // 5. Temperature
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        // 6. Tools
        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        body
    }
}

// ---------------------------------------------------------------------------
// Message conversion helpers
// ---------------------------------------------------------------------------

fn convert_message(msg: &Message) -> serde_json::Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    let has_images = msg
        .content
        .iter()
        .any(|p| matches!(p, ContentPart::Image { .. }));
    if msg.role != Role::User || !has_images {
        return json!({
            "role": role,
            "content": msg.plain_text(),
        });
    }

    let content: Vec<serde_json::Value> = msg
        .content
        .iter()
        .filter_map(|part| match part {
            ContentPart::Image {
                data: Some(data),
                media_type,
                ..
            } => Some(json!({
                "type": "input_image",
                "image_url": format!(
                    "data:{};base64,{data}",
                    media_type.as_deref().unwrap_or("image/png")
                ),
            })),
            ContentPart::Image { url: Some(url), .. } => Some(json!({
                "type": "input_image",
                "image_url": url,
            })),
            other => {
                let text = other.plain_text();
                (!text.is_empty()).then(|| json!({ "type": "input_text", "text": text }))
            }
        })
        .collect();

    json!({ "role": role, "content": content })
}

// ---------------------------------------------------------------------------
// Response translation
// ---------------------------------------------------------------------------

fn parse_response(body: &serde_json::Value) -> Result<BackendResponse, BackendError> {
    let Some(output) = body["output"].as_array() else {
        return Err(BackendError::InvalidResponse {
            backend: OPENAI.into(),
            message: "missing output array".into(),
        });
    };

    let id = body["id"].as_str().unwrap_or("").to_string();
    let model = body["model"].as_str().unwrap_or("").to_string();

    // Extract text and tool calls from output array
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut reasoning: Option<String> = None;

    for item in output {
        match item["type"].as_str() {
            Some("message") => {
                if let Some(content) = item["content"].as_array() {
                    for block in content {
                        if block["type"] == "output_text" {
                            if let Some(t) = block["text"].as_str() {
                                text_parts.push(t.to_string());
                            }
                        }
                    }
                }
            }
            Some("function_call") => {
                let call_id = item["call_id"]
                    .as_str()
                    .or_else(|| item["id"].as_str())
                    .unwrap_or("")
                    .to_string();
                let name = item["name"].as_str().unwrap_or("").to_string();
                let arguments_str = item["arguments"].as_str().unwrap_or("{}");
                let arguments: serde_json::Value =
                    serde_json::from_str(arguments_str).unwrap_or(json!({}));
                tool_calls.push(ToolCall {
                    id: call_id,
                    name,
                    arguments,
                });
            }
            Some("reasoning") => {
                let summary: Vec<&str> = item["summary"]
                    .as_array()
                    .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
                    .unwrap_or_default();
                if !summary.is_empty() {
                    reasoning = Some(summary.join("\n"));
                }
            }
            _ => {}
        }
    }

    let finish_reason = match body["status"].as_str() {
        Some("incomplete") => FinishReason::MaxTokens,
        _ if !tool_calls.is_empty() => FinishReason::ToolUse,
        _ => FinishReason::EndTurn,
    };

    // Parse usage
    let usage_obj = &body["usage"];
    let input_tokens = usage_obj["input_tokens"].as_u64().unwrap_or(0);
    let output_tokens = usage_obj["output_tokens"].as_u64().unwrap_or(0);

    let usage = Usage {
        input_tokens,
        output_tokens,
        reasoning_tokens: usage_obj["output_tokens_details"]["reasoning_tokens"].as_u64(),
        cache_read_tokens: usage_obj["input_tokens_details"]["cached_tokens"].as_u64(),
        cache_write_tokens: None,
        total_tokens: input_tokens + output_tokens,
    };

    Ok(BackendResponse {
        id,
        text: text_parts.join(""),
        tool_calls,
        reasoning,
        usage,
        model,
        finish_reason,
    })
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(status: reqwest::StatusCode, body: &str) -> BackendError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => {
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            BackendError::RateLimited {
                backend: OPENAI.into(),
                retry_after_ms: retry_ms,
            }
        }
        401 | 403 => BackendError::Credential {
            backend: OPENAI.into(),
        },
        500 | 502 | 503 => BackendError::Runtime {
            backend: OPENAI.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => BackendError::Runtime {
            backend: OPENAI.into(),
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
impl ProviderAdapter for OpenAiAdapter {
    async fn complete(&self, request: &CompletionRequest) -> Result<BackendResponse, BackendError> {
        let body = self.build_request_body(request);
        tracing::debug!(
            model = %body["model"],
            messages = request.messages.len(),
            "OpenAI request"
        );

        let builder = self
            .client
            .post(format!("{}/v1/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);

        let json = http::send_json(OPENAI, self.timeout_ms, builder, map_error).await?;
        parse_response(&json)
    }

    fn name(&self) -> &str {
        OPENAI
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    fn has_valid_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn context_window_size(&self) -> usize {
        128_000
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
