use async_trait::async_trait;
use serde_json::json;

use crate::config::GEMINI;
use crate::http::{self, extract_error_message, DEFAULT_TIMEOUT_MS};
use crate::{
    BackendResponse, BackendSettings, CompletionRequest, ContentPart, FinishReason, Message,
    ProviderAdapter, Role, ToolCall, ToolDefinition, Usage,
};
use clipmind_types::{BackendError, Capability, ClipmindError};

const CAPABILITIES: &[Capability] = &[
    Capability::TextCompletion,
    Capability::StructuredOutput,
    Capability::FunctionCalling,
    Capability::Vision,
];

// ---------------------------------------------------------------------------
// GeminiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GeminiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    timeout_ms: u64,
}

impl GeminiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            default_model: "gemini-2.5-pro".to_string(),
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
        adapter.client = http::build_client(GEMINI, timeout_ms)?;
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
        // 1. Convert non-system messages to contents
        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(convert_message)
            .collect();

        // 2. Build body
        let mut body = json!({
            "contents": contents,
        });

        // 3. System prompt and system-role messages go to systemInstruction
        let system_texts = request.system_texts();
        if !system_texts.is_empty() {
            let parts: Vec<serde_json::Value> = system_texts
                .iter()
                .map(|t| json!({ "text": t }))
                .collect();
            body["systemInstruction"] = json!({ "parts": parts });
        }

        // 4. Tools (functionDeclarations)
        if !request.tools.is_empty() {
            let declarations: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(convert_tool_definition)
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        // 5. Generation config
        let mut gen_config = json!({});
        if let Some(max_tokens) = request.max_tokens {
            gen_config["maxOutputTokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            gen_config["temperature"] = json!(temp);
        }
        if gen_config.as_object().is_some_and(|o| !o.is_empty()) {
            body["generationConfig"] = gen_config;
        }

        body
    }
}

// ---------------------------------------------------------------------------
// Message conversion helpers
// ---------------------------------------------------------------------------

fn convert_message(msg: &Message) -> serde_json::Value {
    let role = match msg.role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    };

    let parts: Vec<serde_json::Value> = msg
        .content
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(json!({ "text": text })),
            ContentPart::Image {
                data: Some(data),
                media_type,
                ..
            } => Some(json!({
                "inlineData": {
                    "mimeType": media_type.as_deref().unwrap_or("image/png"),
                    "data": data
                }
            })),
            ContentPart::Image {
                url: Some(url),
                media_type,
                ..
            } => Some(json!({
                "fileData": {
                    "mimeType": media_type.as_deref().unwrap_or("image/png"),
                    "fileUri": url
                }
            })),
            ContentPart::Thinking { .. } => None,
            // Tool calls and results travel as text for this backend.
            other => {
                let text = other.plain_text();
                (!text.is_empty()).then(|| json!({ "text": text }))
            }
        })
        .collect();

    json!({
        "role": role,
        "parts": parts
    })
}

fn convert_tool_definition(tool: &ToolDefinition) -> serde_json::Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.parameters
    })
}

// ---------------------------------------------------------------------------
// Response translation
// ---------------------------------------------------------------------------

fn parse_response(json: &serde_json::Value) -> Result<BackendResponse, BackendError> {
    let candidate = json["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| BackendError::InvalidResponse {
            backend: GEMINI.into(),
            message: "Missing candidates in response".into(),
        })?;

    let finish_reason = match candidate["finishReason"].as_str() {
        Some("MAX_TOKENS") => FinishReason::MaxTokens,
        Some("STOP_SEQUENCE") => FinishReason::StopSequence,
        _ => FinishReason::EndTurn,
    };

    // Parse content parts
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                text_parts.push(text.to_string());
            }
            if let Some(fc) = part.get("functionCall") {
                // The API does not assign call ids.
                tool_calls.push(ToolCall {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: fc["name"].as_str().unwrap_or("").to_string(),
                    arguments: fc["args"].clone(),
                });
            }
        }
    }

    // Parse usage
    let usage_meta = &json["usageMetadata"];
    let input_tokens = usage_meta["promptTokenCount"].as_u64().unwrap_or(0);
    let output_tokens = usage_meta["candidatesTokenCount"].as_u64().unwrap_or(0);
    let total_tokens = usage_meta["totalTokenCount"]
        .as_u64()
        .unwrap_or(input_tokens + output_tokens);

    let usage = Usage {
        input_tokens,
        output_tokens,
        reasoning_tokens: usage_meta["thoughtsTokenCount"].as_u64(),
        cache_read_tokens: usage_meta["cachedContentTokenCount"].as_u64(),
        cache_write_tokens: None,
        total_tokens,
    };

    let final_finish_reason = if tool_calls.is_empty() {
        finish_reason
    } else {
        FinishReason::ToolUse
    };

    Ok(BackendResponse {
        id: json["responseId"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        text: text_parts.join(""),
        tool_calls,
        reasoning: None,
        usage,
        model: json["modelVersion"].as_str().unwrap_or("").to_string(),
        finish_reason: final_finish_reason,
    })
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(status: reqwest::StatusCode, body: &str) -> BackendError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => BackendError::RateLimited {
            backend: GEMINI.into(),
            retry_after_ms: 1000,
        },
        401 | 403 => BackendError::Credential {
            backend: GEMINI.into(),
        },
        // An invalid key is reported as 400 INVALID_ARGUMENT.
        400 if body.contains("API_KEY_INVALID") => BackendError::Credential {
            backend: GEMINI.into(),
        },
        500 | 503 => BackendError::Runtime {
            backend: GEMINI.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => BackendError::Runtime {
            backend: GEMINI.into(),
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
impl ProviderAdapter for GeminiAdapter {
    async fn complete(&self, request: &CompletionRequest) -> Result<BackendResponse, BackendError> {
        let body = self.build_request_body(request);
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        tracing::debug!(%model, messages = request.messages.len(), "Gemini request");

        let builder = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body);

        let json = http::send_json(GEMINI, self.timeout_ms, builder, map_error).await?;
        parse_response(&json)
    }

    fn name(&self) -> &str {
        GEMINI
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
        1_000_000
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GeminiAdapter {
        GeminiAdapter::new("gm-test".into())
    }

    #[test]
    fn build_request_body_sets_system_instruction_and_config() {
        let req = CompletionRequest::new(vec![
            Message::system("You edit video."),
            Message::user("Hi"),
            Message::assistant("Hello"),
        ])
        .with_max_tokens(100);
        let body = adapter().build_request_body(&req);

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You edit video.");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
    }

    #[test]
    fn generation_config_omitted_when_unset() {
        let body = adapter().build_request_body(&CompletionRequest::new(vec![Message::user("Hi")]));
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn tools_become_function_declarations() {
        let req = CompletionRequest::new(vec![Message::user("Split at 10s")]).with_tools(vec![
            ToolDefinition {
                name: "split_clip".into(),
                description: "Split the clip".into(),
                parameters: json!({"type": "object"}),
            },
        ]);
        let body = adapter().build_request_body(&req);
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "split_clip");
    }

    #[test]
    fn tool_results_are_rendered_as_text() {
        let msg = Message::with_parts(
            Role::Assistant,
            vec![ContentPart::ToolResult {
                tool_call_id: "x".into(),
                tool_name: "split_clip".into(),
                content: r#"{"clips":2}"#.into(),
                is_error: false,
            }],
        );
        let converted = convert_message(&msg);
        assert_eq!(
            converted["parts"][0]["text"],
            r#"Tool split_clip returned: {"clips":2}"#
        );
    }

    #[test]
    fn inline_images_use_inline_data() {
        let msg = Message::with_parts(
            Role::User,
            vec![ContentPart::Image {
                url: None,
                data: Some("aGVsbG8=".into()),
                media_type: Some("image/webp".into()),
            }],
        );
        let converted = convert_message(&msg);
        assert_eq!(converted["parts"][0]["inlineData"]["mimeType"], "image/webp");
    }

    #[test]
    fn parse_response_assigns_ids_to_function_calls() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Splitting."},
                    {"functionCall": {"name": "split_clip", "args": {"at": 10}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 8,
                "totalTokenCount": 20
            },
            "modelVersion": "gemini-2.5-pro"
        });

        let resp = parse_response(&body).unwrap();
        assert_eq!(resp.text, "Splitting.");
        assert_eq!(resp.finish_reason, FinishReason::ToolUse);
        assert_eq!(resp.tool_calls[0].name, "split_clip");
        assert!(uuid::Uuid::parse_str(&resp.tool_calls[0].id).is_ok());
        assert_eq!(resp.usage.total_tokens, 20);
        assert_eq!(resp.model, "gemini-2.5-pro");
    }

    #[test]
    fn parse_response_without_candidates_is_invalid() {
        let err = parse_response(&json!({"candidates": []})).unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse { .. }));
    }

    #[test]
    fn invalid_key_400_is_credential_error() {
        let err = map_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error": {"message": "API key not valid",
                "details": [{"reason": "API_KEY_INVALID"}]}}"#,
        );
        assert!(matches!(err, BackendError::Credential { .. }));

        let other = map_error(reqwest::StatusCode::BAD_REQUEST, r#"{"error": {"message": "bad"}}"#);
        assert!(matches!(other, BackendError::Runtime { status: 400, .. }));
    }

    #[test]
    fn declares_capabilities_statically() {
        let gm = adapter();
        assert!(gm.supports(Capability::FunctionCalling));
        assert!(!gm.supports(Capability::Embedding));
        assert!(gm.has_valid_credentials());
        assert!(!GeminiAdapter::new(String::new()).has_valid_credentials());
    }
}
