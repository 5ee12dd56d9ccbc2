//! Capability routing with sequential failover.
//!
//! The router owns every adapter instance. Selection walks the capability's
//! chain in order and picks the first backend that is configured, holds valid
//! credentials and declares the capability. Invocation fails over to later
//! chain entries only; an entry is never retried within one request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;
use clipmind_types::{BackendError, Capability, ClipmindError, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    AttemptRecord, BackendFactory, CapabilityMatrix, CompletionRequest, CompletionResponse,
    DynProvider, Middleware, RouteResult, RouterConfig,
};

// ---------------------------------------------------------------------------
// RouterSnapshot
// ---------------------------------------------------------------------------

/// One immutable generation of router state. Replaced wholesale on update.
struct RouterSnapshot {
    config: RouterConfig,
    adapters: HashMap<String, DynProvider>,
}

// ---------------------------------------------------------------------------
// ChainEntryStatus
// ---------------------------------------------------------------------------

/// Diagnosis of one chain entry for a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainEntryStatus {
    /// The entry selection would pick.
    Selected,
    /// Usable, but a higher-priority entry wins.
    Eligible,
    /// No adapter exists because the backend has no settings.
    NotConfigured,
    /// The adapter exists but reports invalid credentials.
    MissingCredentials,
    /// The adapter does not declare the capability.
    CapabilityUnsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainEntry {
    pub backend: String,
    pub position: usize,
    pub status: ChainEntryStatus,
}

// ---------------------------------------------------------------------------
// CapabilityRouter
// ---------------------------------------------------------------------------

pub struct CapabilityRouter {
    matrix: CapabilityMatrix,
    factory: BackendFactory,
    state: RwLock<Arc<RouterSnapshot>>,
    update_lock: Mutex<()>,
    middleware: Vec<Box<dyn Middleware>>,
}

impl CapabilityRouter {
    /// Validate `matrix` against `factory` and build adapters for `config`.
    pub fn new(
        matrix: CapabilityMatrix,
        factory: BackendFactory,
        config: RouterConfig,
    ) -> Result<Self> {
        matrix.validate(&factory)?;
        for identity in config.backends.keys() {
            if !factory.is_known(identity) {
                tracing::warn!(backend = %identity, "Settings given for unknown backend, ignoring");
            }
        }

        let adapters = factory.build_all(&config);
        tracing::info!(
            configured = adapters.len(),
            capabilities = matrix.capabilities().count(),
            "Capability router initialized"
        );

        Ok(Self {
            matrix,
            factory,
            state: RwLock::new(Arc::new(RouterSnapshot { config, adapters })),
            update_lock: Mutex::new(()),
            middleware: Vec::new(),
        })
    }

    /// Router over the built-in backends with the default matrix.
    #[cfg(feature = "providers")]
    pub fn with_builtin_backends(config: RouterConfig) -> Result<Self> {
        Self::new(
            CapabilityMatrix::default(),
            BackendFactory::with_builtin_backends(),
            config,
        )
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn matrix(&self) -> &CapabilityMatrix {
        &self.matrix
    }

    /// The current merged configuration.
    pub fn config(&self) -> RouterConfig {
        self.snapshot().config.clone()
    }

    fn snapshot(&self) -> Arc<RouterSnapshot> {
        match self.state.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Merge `partial` into the configuration and rebuild every adapter from
    /// scratch. Concurrent readers see either the old or the new adapter set.
    pub fn update_config(&self, partial: RouterConfig) {
        let _writer = self
            .update_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut config = self.snapshot().config.clone();
        config.merge(&partial);
        let adapters = self.factory.build_all(&config);
        tracing::info!(
            updated = partial.backends.len(),
            configured = adapters.len(),
            "Router configuration updated, adapters rebuilt"
        );

        let next = Arc::new(RouterSnapshot { config, adapters });
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// The best available backend for `capability`, without any network call.
    pub fn select_for_capability(&self, capability: Capability) -> Option<RouteResult> {
        self.resolve(capability).ok()
    }

    /// Like [`select_for_capability`](Self::select_for_capability) but says why
    /// nothing qualified.
    pub fn resolve(&self, capability: Capability) -> Result<RouteResult> {
        let snapshot = self.snapshot();
        let chain = self
            .matrix
            .chain(capability)
            .ok_or(ClipmindError::UnconfiguredCapability { capability })?;

        chain
            .iter()
            .enumerate()
            .find(|(_, identity)| {
                entry_status(&snapshot, identity, capability) == ChainEntryStatus::Eligible
            })
            .map(|(position, identity)| {
                tracing::debug!(%capability, backend = %identity, position, "Backend selected");
                RouteResult {
                    capability,
                    backend: identity.clone(),
                    position,
                    reason: format!("best available for {capability}"),
                }
            })
            .ok_or_else(|| unroutable(&snapshot, chain, capability))
    }

    /// Per-entry diagnosis of the chain for `capability`.
    pub fn explain(&self, capability: Capability) -> Result<Vec<ChainEntry>> {
        let snapshot = self.snapshot();
        let chain = self
            .matrix
            .chain(capability)
            .ok_or(ClipmindError::UnconfiguredCapability { capability })?;

        let mut selected = false;
        Ok(chain
            .iter()
            .enumerate()
            .map(|(position, identity)| {
                let mut status = entry_status(&snapshot, identity, capability);
                if status == ChainEntryStatus::Eligible && !selected {
                    selected = true;
                    status = ChainEntryStatus::Selected;
                }
                ChainEntry {
                    backend: identity.clone(),
                    position,
                    status,
                }
            })
            .collect())
    }

    /// Identities whose adapters currently report valid credentials, in
    /// factory registration order.
    pub fn list_available_backends(&self) -> Vec<String> {
        let snapshot = self.snapshot();
        self.factory
            .identities()
            .filter(|id| {
                snapshot
                    .adapters
                    .get(*id)
                    .is_some_and(DynProvider::has_valid_credentials)
            })
            .map(String::from)
            .collect()
    }

    /// The adapter currently registered for `identity`, if configured.
    pub fn adapter(&self, identity: &str) -> Option<DynProvider> {
        self.snapshot().adapters.get(identity).cloned()
    }

    // -----------------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------------

    pub async fn complete(
        &self,
        request: &CompletionRequest,
        capability: Capability,
    ) -> CompletionResponse {
        self.complete_with_cancel(request, capability, &CancellationToken::new())
            .await
    }

    pub async fn complete_with_cancel(
        &self,
        request: &CompletionRequest,
        capability: Capability,
        cancel: &CancellationToken,
    ) -> CompletionResponse {
        self.dispatch(capability, None, cancel, |_, _| request.clone())
            .await
    }

    /// Route one request with failover.
    ///
    /// When `preferred` names a backend that still qualifies it is tried first
    /// and failover continues with the chain entries after it; otherwise the
    /// whole chain is walked. `build` produces the request for the chain
    /// identity and adapter about to be called. Adapter errors never escape:
    /// they are recorded as attempts and reported in the failed response.
    pub async fn dispatch<F>(
        &self,
        capability: Capability,
        preferred: Option<&str>,
        cancel: &CancellationToken,
        mut build: F,
    ) -> CompletionResponse
    where
        F: FnMut(&str, &DynProvider) -> CompletionRequest + Send,
    {
        let snapshot = self.snapshot();
        let Some(chain) = self.matrix.chain(capability) else {
            return CompletionResponse::unrouted(&ClipmindError::UnconfiguredCapability {
                capability,
            });
        };

        let order = attempt_order(chain, preferred, &snapshot, capability);
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut last_failure: Option<BackendError> = None;

        for identity in order {
            let Some(adapter) = snapshot.adapters.get(identity) else {
                tracing::debug!(backend = %identity, %capability, "Skipping unconfigured backend");
                continue;
            };
            if !adapter.qualifies_for(capability) {
                tracing::debug!(
                    backend = %identity,
                    %capability,
                    "Skipping backend without credentials or capability"
                );
                continue;
            }
            if cancel.is_cancelled() {
                return CompletionResponse::failed(
                    &ClipmindError::Cancelled,
                    last_failure.map(|e| e.backend().to_string()),
                    attempts,
                );
            }

            let mut request = build(identity, adapter);
            for m in &self.middleware {
                m.before(identity, &mut request);
            }

            tracing::debug!(
                backend = %identity,
                %capability,
                attempt = attempts.len() + 1,
                "Calling backend"
            );
            let started_at = Utc::now();
            let clock = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(BackendError::Cancelled {
                    backend: identity.to_string(),
                }),
                result = adapter.complete(&request) => result,
            };
            let elapsed_ms = clock.elapsed().as_millis() as u64;

            match outcome {
                Ok(mut response) => {
                    for m in &self.middleware {
                        m.after(identity, &request, &mut response);
                    }
                    attempts.push(AttemptRecord {
                        backend: identity.to_string(),
                        started_at,
                        elapsed_ms,
                        error: None,
                    });
                    return CompletionResponse::from_backend(identity, response, attempts);
                }
                Err(BackendError::Cancelled { backend }) => {
                    tracing::info!(%backend, %capability, "Request cancelled");
                    attempts.push(AttemptRecord {
                        backend: backend.clone(),
                        started_at,
                        elapsed_ms,
                        error: Some("cancelled".into()),
                    });
                    return CompletionResponse::failed(
                        &ClipmindError::Cancelled,
                        Some(backend),
                        attempts,
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        backend = %identity,
                        %capability,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Backend failed, failing over"
                    );
                    attempts.push(AttemptRecord {
                        backend: identity.to_string(),
                        started_at,
                        elapsed_ms,
                        error: Some(e.to_string()),
                    });
                    last_failure = Some(e);
                }
            }
        }

        match last_failure {
            Some(e) => {
                let last_backend = e.backend().to_string();
                let err = ClipmindError::AllBackendsExhausted {
                    capability,
                    last_backend: last_backend.clone(),
                    message: e.to_string(),
                };
                tracing::warn!(%capability, attempts = attempts.len(), "All backends exhausted");
                CompletionResponse::failed(&err, Some(last_backend), attempts)
            }
            None => CompletionResponse::unrouted(&unroutable(&snapshot, chain, capability)),
        }
    }
}

/// Diagnosis of one chain entry; every usable entry is `Eligible`.
fn entry_status(
    snapshot: &RouterSnapshot,
    identity: &str,
    capability: Capability,
) -> ChainEntryStatus {
    match snapshot.adapters.get(identity) {
        None => ChainEntryStatus::NotConfigured,
        Some(adapter) if !adapter.has_valid_credentials() => ChainEntryStatus::MissingCredentials,
        Some(adapter) if !adapter.supports(capability) => ChainEntryStatus::CapabilityUnsupported,
        Some(_) => ChainEntryStatus::Eligible,
    }
}

/// Why no entry of `chain` qualifies. Configuring credentials only helps when
/// some entry is unconfigured or lacks them.
fn unroutable(
    snapshot: &RouterSnapshot,
    chain: &[String],
    capability: Capability,
) -> ClipmindError {
    let unsupported = chain.iter().all(|identity| {
        entry_status(snapshot, identity, capability) == ChainEntryStatus::CapabilityUnsupported
    });
    if unsupported {
        ClipmindError::CapabilityUnsupported { capability }
    } else {
        ClipmindError::NoQualifyingBackend { capability }
    }
}

/// Chain entries to try, in order. Qualification is re-checked by the caller.
fn attempt_order<'a>(
    chain: &'a [String],
    preferred: Option<&'a str>,
    snapshot: &RouterSnapshot,
    capability: Capability,
) -> Vec<&'a str> {
    let all = || chain.iter().map(String::as_str).collect::<Vec<_>>();

    let Some(preferred) = preferred else {
        return all();
    };
    let still_qualifies = snapshot
        .adapters
        .get(preferred)
        .is_some_and(|adapter| adapter.qualifies_for(capability));
    if !still_qualifies {
        tracing::debug!(
            backend = %preferred,
            %capability,
            "Preferred backend unavailable, walking whole chain"
        );
        return all();
    }

    match chain.iter().position(|id| id == preferred) {
        Some(index) => chain[index..].iter().map(String::as_str).collect(),
        None => std::iter::once(preferred)
            .chain(chain.iter().map(String::as_str))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
