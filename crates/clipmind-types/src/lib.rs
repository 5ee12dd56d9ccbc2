//! Shared capability tags and error taxonomy for the clipmind backend router.
//!
//! This crate provides the foundational types used across all other clipmind crates:
//! - `Capability`: the kinds of operation a backend may serve
//! - `BackendError`: typed failure returned by a single provider adapter call
//! - `ClipmindError`: unified error taxonomy for routing and turn orchestration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A named kind of operation a backend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextCompletion,
    StructuredOutput,
    FunctionCalling,
    Transcription,
    Vision,
    ImageGeneration,
    Embedding,
    Streaming,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::TextCompletion,
        Capability::StructuredOutput,
        Capability::FunctionCalling,
        Capability::Transcription,
        Capability::Vision,
        Capability::ImageGeneration,
        Capability::Embedding,
        Capability::Streaming,
    ];

    /// The snake_case tag used in configuration files and on the command line.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Capability::TextCompletion => "text_completion",
            Capability::StructuredOutput => "structured_output",
            Capability::FunctionCalling => "function_calling",
            Capability::Transcription => "transcription",
            Capability::Vision => "vision",
            Capability::ImageGeneration => "image_generation",
            Capability::Embedding => "embedding",
            Capability::Streaming => "streaming",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::TextCompletion => "TextCompletion",
            Capability::StructuredOutput => "StructuredOutput",
            Capability::FunctionCalling => "FunctionCalling",
            Capability::Transcription => "Transcription",
            Capability::Vision => "Vision",
            Capability::ImageGeneration => "ImageGeneration",
            Capability::Embedding => "Embedding",
            Capability::Streaming => "Streaming",
        };
        f.write_str(name)
    }
}

impl FromStr for Capability {
    type Err = ClipmindError;

    /// Accepts either the snake_case tag or the display name, case-insensitively.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        Capability::ALL
            .into_iter()
            .find(|c| c.to_string().to_ascii_lowercase() == normalized)
            .ok_or_else(|| ClipmindError::Config(format!("Unknown capability '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// BackendError: what a single adapter call can fail with
// ---------------------------------------------------------------------------

/// Typed failure of one provider adapter call.
///
/// Adapters classify failures into these variants themselves so the router
/// never has to inspect error messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Credentials rejected by {backend}")]
    Credential { backend: String },

    #[error("Could not reach {backend}: {message}")]
    Network { backend: String, message: String },

    #[error("Request to {backend} timed out after {timeout_ms}ms")]
    Timeout { backend: String, timeout_ms: u64 },

    #[error("Rate limited by {backend}, retry after {retry_after_ms}ms")]
    RateLimited {
        backend: String,
        retry_after_ms: u64,
    },

    #[error("{backend} returned HTTP {status}: {message}")]
    Runtime {
        backend: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("{backend} sent a response that could not be understood: {message}")]
    InvalidResponse { backend: String, message: String },

    #[error("Request to {backend} was cancelled")]
    Cancelled { backend: String },
}

impl BackendError {
    /// The backend identity that produced the error.
    pub fn backend(&self) -> &str {
        match self {
            BackendError::Credential { backend }
            | BackendError::Network { backend, .. }
            | BackendError::Timeout { backend, .. }
            | BackendError::RateLimited { backend, .. }
            | BackendError::Runtime { backend, .. }
            | BackendError::InvalidResponse { backend, .. }
            | BackendError::Cancelled { backend } => backend,
        }
    }

    /// Returns `true` if the error is transient and the same backend may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Network { .. }
                | BackendError::Timeout { .. }
                | BackendError::RateLimited { .. }
                | BackendError::Runtime {
                    retryable: true,
                    ..
                }
        )
    }

    /// Returns `true` if retrying against the same backend will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackendError::Credential { .. } | BackendError::InvalidResponse { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// ClipmindError
// ---------------------------------------------------------------------------

/// Unified error type for all clipmind subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ClipmindError {
    // === Routing ===
    #[error("No backend chain is configured for capability {capability}")]
    UnconfiguredCapability { capability: Capability },

    #[error(
        "No backend with valid credentials is available for {capability}; configure an API key"
    )]
    NoQualifyingBackend { capability: Capability },

    #[error("No backend in the chain for {capability} supports it; add one that does")]
    CapabilityUnsupported { capability: Capability },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("All backends failed for {capability}; last attempt {last_backend}: {message}")]
    AllBackendsExhausted {
        capability: Capability,
        last_backend: String,
        message: String,
    },

    #[error("Request cancelled")]
    Cancelled,

    // === Configuration ===
    #[error("Unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("Invalid capability matrix: {0}")]
    InvalidMatrix(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // === Turn orchestration ===
    #[error("Turn is {actual}, expected {expected}")]
    InvalidTurnState { expected: String, actual: String },

    #[error("Tool results do not match the pending tool calls: {0}")]
    ToolResultMismatch(String),

    #[error("Tool round limit reached: {rounds} rounds")]
    ToolRoundLimit { rounds: usize },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ClipmindError {
    /// Returns `true` if the end user can fix the problem through configuration.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            ClipmindError::NoQualifyingBackend { .. }
                | ClipmindError::Backend(BackendError::Credential { .. })
                | ClipmindError::Config(_)
        )
    }
}

/// A convenience alias for `Result<T, ClipmindError>`.
pub type Result<T> = std::result::Result<T, ClipmindError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_display_uses_pascal_case() {
        assert_eq!(Capability::TextCompletion.to_string(), "TextCompletion");
        assert_eq!(Capability::ImageGeneration.to_string(), "ImageGeneration");
    }

    #[test]
    fn capability_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&Capability::FunctionCalling).unwrap(),
            "\"function_calling\""
        );
        let back: Capability = serde_json::from_str("\"structured_output\"").unwrap();
        assert_eq!(back, Capability::StructuredOutput);
    }

    #[test]
    fn capability_parses_tag_and_display_name() {
        assert_eq!(
            "text_completion".parse::<Capability>().unwrap(),
            Capability::TextCompletion
        );
        assert_eq!(
            "TextCompletion".parse::<Capability>().unwrap(),
            Capability::TextCompletion
        );
        assert_eq!("vision".parse::<Capability>().unwrap(), Capability::Vision);
        assert_eq!(
            "image-generation".parse::<Capability>().unwrap(),
            Capability::ImageGeneration
        );
        assert!("telepathy".parse::<Capability>().is_err());
    }

    #[test]
    fn tags_match_serde_names() {
        for cap in Capability::ALL {
            let json = serde_json::to_string(&cap).unwrap();
            assert_eq!(json, format!("\"{}\"", cap.as_tag()));
        }
    }

    #[test]
    fn backend_error_retryable_classification() {
        let network = BackendError::Network {
            backend: "local".into(),
            message: "connection refused".into(),
        };
        assert!(network.is_retryable());
        assert!(!network.is_terminal());

        let cred = BackendError::Credential {
            backend: "anthropic".into(),
        };
        assert!(!cred.is_retryable());
        assert!(cred.is_terminal());

        let server = BackendError::Runtime {
            backend: "openai".into(),
            status: 503,
            message: "overloaded".into(),
            retryable: true,
        };
        assert!(server.is_retryable());

        let bad_request = BackendError::Runtime {
            backend: "openai".into(),
            status: 400,
            message: "model not found".into(),
            retryable: false,
        };
        assert!(!bad_request.is_retryable());
        assert!(!bad_request.is_terminal());
    }

    #[test]
    fn backend_error_reports_backend() {
        let err = BackendError::Timeout {
            backend: "gemini".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(err.backend(), "gemini");
        assert_eq!(err.to_string(), "Request to gemini timed out after 30000ms");
    }

    #[test]
    fn error_messages_name_the_capability() {
        let err = ClipmindError::NoQualifyingBackend {
            capability: Capability::Vision,
        };
        assert!(err.to_string().contains("Vision"));
        assert!(err.is_user_actionable());

        let err = ClipmindError::UnconfiguredCapability {
            capability: Capability::Embedding,
        };
        assert!(err.to_string().contains("Embedding"));
        assert!(!err.is_user_actionable());
    }

    #[test]
    fn backend_error_converts_transparently() {
        let err: ClipmindError = BackendError::Credential {
            backend: "openai".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Credentials rejected by openai");
        assert!(err.is_user_actionable());
    }
}
