//! End-to-end routing tests against scripted backends.
//!
//! Each test builds a factory of in-process adapters registered under the
//! built-in identities, so the default matrix validates against it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use clipmind_llm::{
    BackendError, BackendFactory, BackendResponse, BackendSettings, Capability, CapabilityMatrix,
    CapabilityRouter, ChainEntryStatus, ClipmindError, CompletionRequest, DynProvider,
    FailureKind, FinishReason, Message, ProviderAdapter, RouterConfig, Usage, ANTHROPIC, GEMINI,
    LOCAL, OPENAI,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Scripted {
    name: &'static str,
    key: String,
    fails: bool,
    capabilities: &'static [Capability],
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ProviderAdapter for Scripted {
    async fn complete(
        &self,
        _request: &CompletionRequest,
    ) -> Result<BackendResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fails {
            return Err(BackendError::Network {
                backend: self.name.into(),
                message: "connection refused".into(),
            });
        }
        Ok(BackendResponse {
            id: "resp".into(),
            text: format!("answer from {}", self.name),
            tool_calls: vec![],
            reasoning: None,
            usage: Usage::default(),
            model: String::new(),
            finish_reason: FinishReason::EndTurn,
        })
    }
    fn name(&self) -> &str {
        self.name
    }
    fn default_model(&self) -> &str {
        "scripted"
    }
    fn capabilities(&self) -> &[Capability] {
        self.capabilities
    }
    fn has_valid_credentials(&self) -> bool {
        // The local identity mirrors the real daemon: no credential needed.
        self.name == LOCAL || !self.key.is_empty()
    }
    fn context_window_size(&self) -> usize {
        32_000
    }
}

const CLOUD: &[Capability] = &[
    Capability::TextCompletion,
    Capability::StructuredOutput,
    Capability::FunctionCalling,
    Capability::Vision,
];
const DAEMON: &[Capability] = &[Capability::TextCompletion, Capability::Vision];

/// Factory over the four built-in identities; `failing` backends error on every call.
fn factory(failing: &[&str], calls: &Arc<AtomicUsize>) -> BackendFactory {
    let mut factory = BackendFactory::new();
    for name in [ANTHROPIC, OPENAI, GEMINI, LOCAL] {
        let fails = failing.contains(&name);
        let calls = Arc::clone(calls);
        let capabilities = if name == LOCAL { DAEMON } else { CLOUD };
        factory.register(name, move |settings: &BackendSettings| {
            let key = if name == LOCAL {
                settings.host.clone()
            } else {
                settings.api_key.clone()
            };
            Ok(key.map(|key| {
                DynProvider::new(Scripted {
                    name,
                    key,
                    fails,
                    capabilities,
                    calls: Arc::clone(&calls),
                })
            }))
        });
    }
    factory
}

fn ask() -> CompletionRequest {
    CompletionRequest::new(vec![Message::user("Summarize this clip")])
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[test]
fn only_local_configured_routes_to_local() {
    let calls = Arc::new(AtomicUsize::new(0));
    let matrix = CapabilityMatrix::new().with_chain(Capability::TextCompletion, [ANTHROPIC, LOCAL]);
    let config =
        RouterConfig::new().with_backend(
            LOCAL,
            BackendSettings::with_host("http://localhost:11434"),
        );
    let router = CapabilityRouter::new(matrix, factory(&[], &calls), config).unwrap();

    let route = router.select_for_capability(Capability::TextCompletion).unwrap();
    assert_eq!(route.backend, "local");
    assert_eq!(route.reason, "best available for TextCompletion");
    assert_eq!(calls.load(Ordering::SeqCst), 0, "selection must not call backends");
}

#[test]
fn default_matrix_explains_missing_function_calling() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = RouterConfig::new()
        .with_backend(OPENAI, BackendSettings::with_api_key(""))
        .with_backend(LOCAL, BackendSettings::with_host("http://localhost:11434"));
    let router =
        CapabilityRouter::new(CapabilityMatrix::default(), factory(&[], &calls), config).unwrap();

    assert!(router.select_for_capability(Capability::FunctionCalling).is_none());
    let statuses: Vec<_> = router
        .explain(Capability::FunctionCalling)
        .unwrap()
        .into_iter()
        .map(|e| (e.backend, e.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("anthropic".to_string(), ChainEntryStatus::NotConfigured),
            ("openai".to_string(), ChainEntryStatus::MissingCredentials),
            ("gemini".to_string(), ChainEntryStatus::NotConfigured),
        ]
    );

    // Text still routes to the local daemon at the end of its chain.
    let route = router.select_for_capability(Capability::TextCompletion).unwrap();
    assert_eq!(route.backend, "local");
    assert_eq!(route.position, 3);
}

#[test]
fn local_is_unsupported_for_function_calling_even_when_listed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let matrix = CapabilityMatrix::new().with_chain(Capability::FunctionCalling, [LOCAL]);
    let config =
        RouterConfig::new().with_backend(LOCAL, BackendSettings::with_host("localhost:11434"));
    let router = CapabilityRouter::new(matrix, factory(&[], &calls), config).unwrap();

    let entries = router.explain(Capability::FunctionCalling).unwrap();
    assert_eq!(entries[0].status, ChainEntryStatus::CapabilityUnsupported);
}

#[tokio::test]
async fn capability_no_backend_declares_is_not_a_credentials_problem() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = RouterConfig::new()
        .with_backend(ANTHROPIC, BackendSettings::with_api_key("sk-ant"))
        .with_backend(OPENAI, BackendSettings::with_api_key("sk-oai"))
        .with_backend(GEMINI, BackendSettings::with_api_key("gm"))
        .with_backend(LOCAL, BackendSettings::with_host("http://localhost:11434"));
    let router =
        CapabilityRouter::new(CapabilityMatrix::default(), factory(&[], &calls), config).unwrap();

    let err = router.resolve(Capability::Transcription).unwrap_err();
    assert!(matches!(err, ClipmindError::CapabilityUnsupported { .. }));
    assert!(!err.to_string().contains("API key"), "{err}");
    assert!(router
        .explain(Capability::Transcription)
        .unwrap()
        .iter()
        .all(|entry| entry.status == ChainEntryStatus::CapabilityUnsupported));

    let resp = router.complete(&ask(), Capability::Transcription).await;
    assert_eq!(resp.failure, Some(FailureKind::CapabilityUnsupported));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Failover
// ---------------------------------------------------------------------------

#[tokio::test]
async fn network_failure_fails_over_to_next_cloud() {
    let calls = Arc::new(AtomicUsize::new(0));
    let matrix = CapabilityMatrix::new()
        .with_chain(Capability::TextCompletion, [ANTHROPIC, OPENAI, GEMINI]);
    let config = RouterConfig::new()
        .with_backend(ANTHROPIC, BackendSettings::with_api_key("sk-ant"))
        .with_backend(OPENAI, BackendSettings::with_api_key("sk-oai"))
        .with_backend(GEMINI, BackendSettings::with_api_key("gm"));
    let router = CapabilityRouter::new(matrix, factory(&[ANTHROPIC], &calls), config).unwrap();

    let resp = router.complete(&ask(), Capability::TextCompletion).await;
    assert!(resp.success);
    assert_eq!(resp.used_provider.as_deref(), Some("openai"));
    assert_eq!(resp.content, "answer from openai");
    assert_eq!(calls.load(Ordering::SeqCst), 2, "gemini must not be called");
    let tried: Vec<_> = resp.attempts.iter().map(|a| a.backend.as_str()).collect();
    assert_eq!(tried, vec!["anthropic", "openai"]);
}

#[tokio::test]
async fn exhausted_chain_reports_last_backend_and_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let matrix = CapabilityMatrix::new().with_chain(Capability::TextCompletion, [ANTHROPIC, LOCAL]);
    let config = RouterConfig::new()
        .with_backend(ANTHROPIC, BackendSettings::with_api_key("sk-ant"))
        .with_backend(LOCAL, BackendSettings::with_host("http://localhost:11434"));
    let router =
        CapabilityRouter::new(matrix, factory(&[ANTHROPIC, LOCAL], &calls), config).unwrap();

    let resp = router.complete(&ask(), Capability::TextCompletion).await;
    assert!(!resp.success);
    assert_eq!(resp.failure, Some(FailureKind::AllBackendsExhausted));
    assert_eq!(resp.used_provider.as_deref(), Some("local"));
    let error = resp.error.unwrap();
    assert!(error.contains("local"), "{error}");
    assert!(error.contains("connection refused"), "{error}");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Configuration updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn adding_a_key_at_runtime_makes_backend_selectable() {
    let calls = Arc::new(AtomicUsize::new(0));
    let router = CapabilityRouter::new(
        CapabilityMatrix::default(),
        factory(&[], &calls),
        RouterConfig::new(),
    )
    .unwrap();

    let resp = router.complete(&ask(), Capability::Vision).await;
    assert_eq!(resp.failure, Some(FailureKind::NoQualifyingBackend));
    assert!(router.list_available_backends().is_empty());

    router.update_config(
        RouterConfig::new().with_backend(GEMINI, BackendSettings::with_api_key("gm")),
    );

    assert_eq!(router.list_available_backends(), vec!["gemini"]);
    let resp = router.complete(&ask(), Capability::Vision).await;
    assert_eq!(resp.used_provider.as_deref(), Some("gemini"));
}

#[test]
fn concurrent_selection_never_sees_partial_update() {
    let calls = Arc::new(AtomicUsize::new(0));
    let matrix =
        CapabilityMatrix::new().with_chain(Capability::TextCompletion, [ANTHROPIC, OPENAI]);
    let config = RouterConfig::new()
        .with_backend(ANTHROPIC, BackendSettings::with_api_key("k"))
        .with_backend(OPENAI, BackendSettings::with_api_key(""));
    let router = Arc::new(CapabilityRouter::new(matrix, factory(&[], &calls), config).unwrap());

    // Every published configuration has exactly one credentialed backend.
    let flip = |anthropic: &str, openai: &str| {
        RouterConfig::new()
            .with_backend(ANTHROPIC, BackendSettings::with_api_key(anthropic))
            .with_backend(OPENAI, BackendSettings::with_api_key(openai))
    };

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let router = Arc::clone(&router);
            scope.spawn(move || {
                for _ in 0..2_000 {
                    let route = router.select_for_capability(Capability::TextCompletion);
                    assert!(route.is_some(), "selection observed a partially rebuilt router");
                }
            });
        }
        scope.spawn(|| {
            for i in 0..200 {
                if i % 2 == 0 {
                    router.update_config(flip("", "k"));
                } else {
                    router.update_config(flip("k", ""));
                }
            }
        });
    });
}
