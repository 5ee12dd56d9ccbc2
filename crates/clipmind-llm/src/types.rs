use chrono::{DateTime, Utc};
use clipmind_types::{Capability, ClipmindError};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

// ---------------------------------------------------------------------------
// ContentPart
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// An image given either by URL or as base64 data.
    Image {
        url: Option<String>,
        data: Option<String>,
        media_type: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
    Thinking {
        text: String,
    },
}

impl ContentPart {
    /// Text rendering of this part for backends that only understand plain text.
    pub fn plain_text(&self) -> String {
        match self {
            ContentPart::Text { text } => text.clone(),
            ContentPart::Image { url: Some(url), .. } => format!("[image: {url}]"),
            ContentPart::Image { .. } => "[image]".to_string(),
            ContentPart::ToolCall {
                name, arguments, ..
            } => format!("[called tool {name} with {arguments}]"),
            ContentPart::ToolResult {
                tool_name, content, ..
            } => tool_result_summary(tool_name, content),
            ContentPart::Thinking { .. } => String::new(),
        }
    }
}

/// The line used to describe a tool result in plain text.
pub fn tool_result_summary(tool_name: &str, content: &str) -> String {
    format!("Tool {tool_name} returned: {content}")
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn with_parts(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    /// All parts rendered as text and joined with newlines; empty renderings are skipped.
    pub fn plain_text(&self) -> String {
        self.content
            .iter()
            .map(ContentPart::plain_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_tool_parts(&self) -> bool {
        self.content.iter().any(|p| {
            matches!(
                p,
                ContentPart::ToolCall { .. } | ContentPart::ToolResult { .. }
            )
        })
    }

    /// Copy of this message where tool calls and tool results are replaced by
    /// their text rendering. Other parts are kept as they are.
    pub fn without_tool_parts(&self) -> Self {
        if !self.has_tool_parts() {
            return self.clone();
        }
        let mut content = Vec::with_capacity(self.content.len());
        for part in &self.content {
            match part {
                ContentPart::ToolCall { .. } | ContentPart::ToolResult { .. } => {
                    content.push(ContentPart::Text {
                        text: part.plain_text(),
                    });
                }
                other => content.push(other.clone()),
            }
        }
        Self {
            role: self.role,
            content,
        }
    }
}

// ---------------------------------------------------------------------------
// CompletionRequest
// ---------------------------------------------------------------------------

/// A normalized completion request. Message order is the caller's and is never changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Overrides the adapter's default model when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The system prompt followed by the text of every system-role message.
    pub fn system_texts(&self) -> Vec<String> {
        self.system_prompt
            .iter()
            .cloned()
            .chain(
                self.messages
                    .iter()
                    .filter(|m| m.role == Role::System)
                    .map(Message::plain_text),
            )
            .filter(|t| !t.is_empty())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// BackendResponse: what a single adapter returns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    pub id: String,
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning: Option<String>,
    pub usage: Usage,
    pub model: String,
    pub finish_reason: FinishReason,
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub cache_write_tokens: Option<u64>,
    pub total_tokens: u64,
}

// ---------------------------------------------------------------------------
// FinishReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

// ---------------------------------------------------------------------------
// Tool types
// ---------------------------------------------------------------------------

/// A tool offered to the model. Supplied by the caller and passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model. The `id` is backend-specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

// ---------------------------------------------------------------------------
// CompletionResponse: what the router hands back to callers
// ---------------------------------------------------------------------------

/// Why a routed completion failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnconfiguredCapability,
    NoQualifyingBackend,
    CapabilityUnsupported,
    AllBackendsExhausted,
    Cancelled,
}

impl FailureKind {
    pub fn of(err: &ClipmindError) -> Option<Self> {
        match err {
            ClipmindError::UnconfiguredCapability { .. } => {
                Some(FailureKind::UnconfiguredCapability)
            }
            ClipmindError::NoQualifyingBackend { .. } => Some(FailureKind::NoQualifyingBackend),
            ClipmindError::CapabilityUnsupported { .. } => {
                Some(FailureKind::CapabilityUnsupported)
            }
            ClipmindError::AllBackendsExhausted { .. } => Some(FailureKind::AllBackendsExhausted),
            ClipmindError::Cancelled => Some(FailureKind::Cancelled),
            _ => None,
        }
    }
}

/// One adapter invocation made while serving a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub backend: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// `None` when the attempt succeeded.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub success: bool,
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub requires_tool_results: bool,
    /// The backend that produced the response, or the last one tried on failure.
    pub used_provider: Option<String>,
    pub model: Option<String>,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub attempts: Vec<AttemptRecord>,
}

impl CompletionResponse {
    /// Wrap a successful adapter response. `requires_tool_results` is derived
    /// from the tool calls, so it is set exactly when calls are pending.
    pub fn from_backend(
        backend: impl Into<String>,
        response: BackendResponse,
        attempts: Vec<AttemptRecord>,
    ) -> Self {
        let requires_tool_results = !response.tool_calls.is_empty();
        Self {
            success: true,
            content: response.text,
            reasoning: response.reasoning,
            tool_calls: response.tool_calls,
            requires_tool_results,
            used_provider: Some(backend.into()),
            model: Some(response.model).filter(|m| !m.is_empty()),
            usage: response.usage,
            finish_reason: Some(response.finish_reason),
            error: None,
            failure: None,
            attempts,
        }
    }

    pub fn failed(
        err: &ClipmindError,
        last_backend: Option<String>,
        attempts: Vec<AttemptRecord>,
    ) -> Self {
        Self {
            success: false,
            content: String::new(),
            reasoning: None,
            tool_calls: Vec::new(),
            requires_tool_results: false,
            used_provider: last_backend,
            model: None,
            usage: Usage::default(),
            finish_reason: None,
            error: Some(err.to_string()),
            failure: FailureKind::of(err),
            attempts,
        }
    }

    /// The failure of an unrouted capability, used before any adapter is chosen.
    pub fn unrouted(err: &ClipmindError) -> Self {
        Self::failed(err, None, Vec::new())
    }
}

/// The outcome of a backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteResult {
    pub capability: Capability,
    pub backend: String,
    /// Position of the backend within the capability's chain.
    pub position: usize,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
