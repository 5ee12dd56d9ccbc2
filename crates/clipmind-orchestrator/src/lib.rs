//! Tool-call orchestration on top of the capability router.
//!
//! A [`Turn`] drives one user request through the router. When the model asks
//! for tools the turn pauses in `AwaitingToolResults` and hands the calls to
//! the caller; the caller executes them (see [`ToolExecutor`]) and resumes the
//! turn with the results, which are encoded for whichever backend receives
//! them next.

pub mod encoding;
mod tool;
mod turn;

pub use encoding::PairedResult;
pub use tool::*;
pub use turn::*;

use std::sync::Arc;

use clipmind_llm::{CapabilityRouter, CompletionRequest};
use clipmind_types::Capability;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 25;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Resumes allowed per turn before it fails with `ToolRoundLimit`.
    pub max_tool_rounds: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

/// Creates turns against a shared router.
#[derive(Clone)]
pub struct ToolCallOrchestrator {
    router: Arc<CapabilityRouter>,
    config: OrchestratorConfig,
}

impl ToolCallOrchestrator {
    pub fn new(router: Arc<CapabilityRouter>) -> Self {
        Self {
            router,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn router(&self) -> &Arc<CapabilityRouter> {
        &self.router
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Begin a turn. Nothing is sent until [`Turn::submit`].
    pub fn start_turn(&self, request: CompletionRequest, capability: Capability) -> Turn {
        Turn::new(
            Arc::clone(&self.router),
            request,
            capability,
            self.config.max_tool_rounds,
        )
    }
}
