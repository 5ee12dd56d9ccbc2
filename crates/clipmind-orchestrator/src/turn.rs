use std::fmt;
use std::sync::Arc;

use clipmind_llm::{
    CapabilityRouter, CompletionRequest, CompletionResponse, FailureKind, Message, ToolCall,
    ToolResultEncoding,
};
use clipmind_types::{Capability, ClipmindError, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::encoding::{self, PairedResult};
use crate::{ToolExecutor, ToolResult};

// ---------------------------------------------------------------------------
// TurnState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Ready,
    AwaitingCompletion,
    AwaitingToolResults,
    Done,
    Failed,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Ready => "Ready",
            TurnState::AwaitingCompletion => "AwaitingCompletion",
            TurnState::AwaitingToolResults => "AwaitingToolResults",
            TurnState::Done => "Done",
            TurnState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// TurnOutcome
// ---------------------------------------------------------------------------

/// What a `submit` or `resume` step ended in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed {
        content: String,
        reasoning: Option<String>,
        used_provider: String,
    },
    /// The caller must execute these calls and resume. They are returned
    /// exactly as the backend produced them.
    ToolCallsRequested {
        tool_calls: Vec<ToolCall>,
        used_provider: String,
    },
    Failed {
        error: String,
        failure: Option<FailureKind>,
    },
}

// ---------------------------------------------------------------------------
// Turn
// ---------------------------------------------------------------------------

/// One user turn: an initial completion plus any number of tool rounds.
pub struct Turn {
    id: String,
    router: Arc<CapabilityRouter>,
    capability: Capability,
    /// Request parameters; its `messages` are unused; the conversation lives in `conversation`.
    template: CompletionRequest,
    conversation: Vec<Message>,
    state: TurnState,
    pending: Vec<ToolCall>,
    /// Backend that issued the pending calls.
    origin: Option<String>,
    unsent: Vec<PairedResult>,
    rounds: usize,
    max_tool_rounds: usize,
    cancel: CancellationToken,
    last_response: Option<CompletionResponse>,
}

impl Turn {
    pub(crate) fn new(
        router: Arc<CapabilityRouter>,
        mut request: CompletionRequest,
        capability: Capability,
        max_tool_rounds: usize,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let conversation = std::mem::take(&mut request.messages);
        tracing::debug!(turn_id = %id, %capability, tools = request.tools.len(), "Turn created");
        Self {
            id,
            router,
            capability,
            template: request,
            conversation,
            state: TurnState::Ready,
            pending: Vec::new(),
            origin: None,
            unsent: Vec::new(),
            rounds: 0,
            max_tool_rounds,
            cancel: CancellationToken::new(),
            last_response: None,
        }
    }

    /// Abort in-flight and future backend calls when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Messages committed so far, including the model's tool requests.
    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        &self.pending
    }

    /// Results accepted by a resume that never reached a backend.
    pub fn unsent_tool_results(&self) -> &[PairedResult] {
        &self.unsent
    }

    pub fn last_response(&self) -> Option<&CompletionResponse> {
        self.last_response.as_ref()
    }

    /// Number of tool rounds delivered to a backend so far.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    fn expect_state(&self, expected: TurnState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ClipmindError::InvalidTurnState {
                expected: expected.to_string(),
                actual: self.state.to_string(),
            })
        }
    }

    fn request_with(&self, messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest {
            messages,
            ..self.template.clone()
        }
    }

    // -----------------------------------------------------------------------
    // Submit
    // -----------------------------------------------------------------------

    /// Send the initial request through the router.
    pub async fn submit(&mut self) -> Result<TurnOutcome> {
        self.expect_state(TurnState::Ready)?;
        self.state = TurnState::AwaitingCompletion;
        tracing::info!(turn_id = %self.id, capability = %self.capability, "Turn submitted");

        let router = Arc::clone(&self.router);
        let request = self.request_with(self.conversation.clone());
        let response = router
            .dispatch(self.capability, None, &self.cancel, |_, _| request.clone())
            .await;

        Ok(self.absorb(response, None))
    }

    // -----------------------------------------------------------------------
    // Resume
    // -----------------------------------------------------------------------

    /// Feed the caller's tool results back and continue the turn.
    ///
    /// Exactly one message carrying every result is appended to the
    /// conversation. The backend that issued the calls is preferred; if the
    /// request lands elsewhere the results degrade to a text summary.
    pub async fn resume_with_tool_results(
        &mut self,
        results: Vec<ToolResult>,
    ) -> Result<TurnOutcome> {
        self.expect_state(TurnState::AwaitingToolResults)?;
        let paired = encoding::pair_results(&self.pending, results)?;

        if self.rounds >= self.max_tool_rounds {
            tracing::warn!(turn_id = %self.id, rounds = self.rounds, "Tool round limit reached");
            self.unsent = paired;
            self.state = TurnState::Failed;
            return Err(ClipmindError::ToolRoundLimit {
                rounds: self.rounds,
            });
        }

        self.unsent = paired;
        self.dispatch_results().await
    }

    /// Retry a failed turn: unsent tool results are re-sent once, otherwise
    /// the initial request is submitted again.
    pub async fn retry(&mut self) -> Result<TurnOutcome> {
        self.expect_state(TurnState::Failed)?;
        if self.cancel.is_cancelled() {
            return Err(ClipmindError::Cancelled);
        }
        tracing::info!(turn_id = %self.id, unsent = self.unsent.len(), "Retrying turn");
        if !self.unsent.is_empty() && self.rounds >= self.max_tool_rounds {
            return Err(ClipmindError::ToolRoundLimit {
                rounds: self.rounds,
            });
        }
        if self.unsent.is_empty() {
            self.state = TurnState::Ready;
            self.submit().await
        } else {
            self.dispatch_results().await
        }
    }

    async fn dispatch_results(&mut self) -> Result<TurnOutcome> {
        self.state = TurnState::AwaitingCompletion;
        tracing::info!(
            turn_id = %self.id,
            round = self.rounds + 1,
            results = self.unsent.len(),
            origin = self.origin.as_deref().unwrap_or("none"),
            "Resuming turn with tool results"
        );

        let router = Arc::clone(&self.router);
        let origin = self.origin.clone();
        let mut appended: Vec<(String, Message)> = Vec::new();

        let response = {
            let conversation = &self.conversation;
            let unsent = &self.unsent;
            let template = &self.template;
            let turn_id = &self.id;
            let preferred = origin.as_deref();
            router
                .dispatch(self.capability, preferred, &self.cancel, |identity, adapter| {
                    let mode = encoding::encoding_for(identity, adapter, origin.as_deref());
                    if origin.as_deref() != Some(identity) {
                        tracing::warn!(
                            turn_id = %turn_id,
                            origin = origin.as_deref().unwrap_or("none"),
                            backend = identity,
                            "Tool calls re-routed, sending results as text summary"
                        );
                    } else if mode == ToolResultEncoding::TextSummary {
                        tracing::debug!(
                            turn_id = %turn_id,
                            backend = identity,
                            "Backend lacks structured tool results, summarizing"
                        );
                    }

                    let message = encoding::results_message(mode, unsent);
                    let mut messages = encoding::conversation_for(mode, conversation);
                    messages.push(message.clone());
                    appended.push((identity.to_string(), message));
                    CompletionRequest {
                        messages,
                        ..template.clone()
                    }
                })
                .await
        };

        if response.success {
            self.rounds += 1;
        }
        let sent = response.used_provider.as_deref().and_then(|backend| {
            appended
                .into_iter()
                .find(|(name, _)| name == backend)
                .map(|(_, message)| message)
        });
        Ok(self.absorb(response, sent))
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Apply a router response. `sent` is the results message delivered to
    /// the winning backend, committed only on success.
    fn absorb(&mut self, response: CompletionResponse, sent: Option<Message>) -> TurnOutcome {
        let outcome = if !response.success {
            tracing::warn!(
                turn_id = %self.id,
                failure = ?response.failure,
                unsent = self.unsent.len(),
                "Turn failed"
            );
            self.state = TurnState::Failed;
            TurnOutcome::Failed {
                error: response
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string()),
                failure: response.failure,
            }
        } else {
            if let Some(message) = sent {
                self.conversation.push(message);
            }
            self.unsent.clear();
            let used_provider = response.used_provider.clone().unwrap_or_default();

            if response.requires_tool_results {
                self.conversation.push(encoding::tool_request_message(
                    &response.content,
                    &response.tool_calls,
                ));
                self.pending = response.tool_calls.clone();
                self.origin = Some(used_provider.clone());
                self.state = TurnState::AwaitingToolResults;
                tracing::info!(
                    turn_id = %self.id,
                    backend = %used_provider,
                    tool_calls = self.pending.len(),
                    "Awaiting tool results"
                );
                TurnOutcome::ToolCallsRequested {
                    tool_calls: response.tool_calls.clone(),
                    used_provider,
                }
            } else {
                self.conversation
                    .push(Message::assistant(response.content.clone()));
                self.pending.clear();
                self.state = TurnState::Done;
                tracing::info!(
                    turn_id = %self.id,
                    backend = %used_provider,
                    rounds = self.rounds,
                    "Turn done"
                );
                TurnOutcome::Completed {
                    content: response.content.clone(),
                    reasoning: response.reasoning.clone(),
                    used_provider,
                }
            }
        };
        self.last_response = Some(response);
        outcome
    }

    // -----------------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------------

    /// Submit (if not yet submitted) and keep executing requested tools with
    /// `executor` until the turn completes or fails.
    pub async fn run_to_completion(&mut self, executor: &dyn ToolExecutor) -> Result<TurnOutcome> {
        let mut outcome = match self.state {
            TurnState::Ready => self.submit().await?,
            TurnState::AwaitingToolResults => TurnOutcome::ToolCallsRequested {
                tool_calls: self.pending.clone(),
                used_provider: self.origin.clone().unwrap_or_default(),
            },
            other => {
                return Err(ClipmindError::InvalidTurnState {
                    expected: format!("{} or {}", TurnState::Ready, TurnState::AwaitingToolResults),
                    actual: other.to_string(),
                })
            }
        };

        loop {
            let TurnOutcome::ToolCallsRequested { tool_calls, .. } = &outcome else {
                return Ok(outcome);
            };
            let mut results = Vec::with_capacity(tool_calls.len());
            for call in tool_calls {
                results.push(executor.execute(call).await);
            }
            outcome = self.resume_with_tool_results(results).await?;
        }
    }
}

impl fmt::Debug for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Turn")
            .field("id", &self.id)
            .field("capability", &self.capability)
            .field("state", &self.state)
            .field("messages", &self.conversation.len())
            .field("pending", &self.pending.len())
            .field("rounds", &self.rounds)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
