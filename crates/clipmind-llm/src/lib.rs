//! Capability-based routing over multiple LLM backends (Anthropic, OpenAI,
//! Gemini, local Ollama).
//!
//! Provides the `ProviderAdapter` trait, `DynProvider` wrapper, the
//! capability matrix, middleware chain, and `CapabilityRouter` for selecting
//! a backend per capability with sequential failover.

#[cfg(feature = "providers")]
mod anthropic;
mod config;
mod factory;
#[cfg(feature = "providers")]
mod gemini;
#[cfg(feature = "providers")]
mod http;
#[cfg(feature = "providers")]
mod local;
mod matrix;
mod middleware;
#[cfg(feature = "providers")]
mod openai;
mod provider;
mod router;
mod types;

#[cfg(feature = "providers")]
pub use anthropic::AnthropicAdapter;
pub use config::*;
pub use factory::BackendFactory;
#[cfg(feature = "providers")]
pub use gemini::GeminiAdapter;
#[cfg(feature = "providers")]
pub use local::LocalAdapter;
pub use matrix::CapabilityMatrix;
pub use middleware::*;
#[cfg(feature = "providers")]
pub use openai::OpenAiAdapter;
pub use provider::*;
pub use router::*;
pub use types::*;

pub use clipmind_types::{BackendError, Capability, ClipmindError};
