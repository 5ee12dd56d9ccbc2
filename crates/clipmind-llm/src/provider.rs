use std::sync::Arc;

use async_trait::async_trait;
use clipmind_types::{BackendError, Capability};

use crate::{BackendResponse, CompletionRequest};

// ---------------------------------------------------------------------------
// ToolResultEncoding
// ---------------------------------------------------------------------------

/// How a backend expects tool results to be fed back into the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolResultEncoding {
    /// One user message holding a structured result block per tool call id.
    Structured,
    /// One assistant message summarizing each result as text.
    TextSummary,
}

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

/// One backend identity. Adapters issue a single request per `complete` call
/// and never retry; failover belongs to the router.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<BackendResponse, BackendError>;

    /// Stable backend identity, e.g. `"anthropic"` or `"local"`.
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    /// The static capability set this adapter declares.
    fn capabilities(&self) -> &[Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Side-effect free check of the configured credential.
    fn has_valid_credentials(&self) -> bool;

    fn tool_result_encoding(&self) -> ToolResultEncoding {
        ToolResultEncoding::TextSummary
    }

    fn context_window_size(&self) -> usize;
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

/// Shared handle to a boxed adapter. Cloning yields another handle to the
/// same instance.
#[derive(Clone)]
pub struct DynProvider(Arc<dyn ProviderAdapter>);

impl DynProvider {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self(Arc::new(provider))
    }

    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<BackendResponse, BackendError> {
        self.0.complete(request).await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }

    pub fn capabilities(&self) -> &[Capability] {
        self.0.capabilities()
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.0.supports(capability)
    }

    pub fn has_valid_credentials(&self) -> bool {
        self.0.has_valid_credentials()
    }

    pub fn tool_result_encoding(&self) -> ToolResultEncoding {
        self.0.tool_result_encoding()
    }

    pub fn context_window_size(&self) -> usize {
        self.0.context_window_size()
    }

    /// Whether this adapter can be selected for `capability` right now.
    pub fn qualifies_for(&self, capability: Capability) -> bool {
        self.has_valid_credentials() && self.supports(capability)
    }

    /// True when both handles point at the same adapter instance.
    pub fn same_instance(&self, other: &DynProvider) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for DynProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DynProvider").field(&self.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
