use std::collections::HashMap;
use std::sync::Arc;

use clipmind_types::Result;

use crate::{BackendSettings, DynProvider, RouterConfig};

type Constructor = Arc<dyn Fn(&BackendSettings) -> Result<Option<DynProvider>> + Send + Sync>;

/// Ordered registry of backend identities and how to build their adapters.
///
/// A constructor returns `Ok(None)` when the settings lack the field that
/// makes the backend usable (the API key for cloud services, the host for
/// the local daemon). That backend is then "not configured", which is a
/// different diagnosis from an adapter reporting invalid credentials.
#[derive(Clone, Default)]
pub struct BackendFactory {
    constructors: Vec<(String, Constructor)>,
}

impl BackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constructor for `identity`.
    pub fn register<F>(&mut self, identity: impl Into<String>, constructor: F)
    where
        F: Fn(&BackendSettings) -> Result<Option<DynProvider>> + Send + Sync + 'static,
    {
        let identity = identity.into();
        let constructor: Constructor = Arc::new(constructor);
        match self.constructors.iter_mut().find(|(id, _)| *id == identity) {
            Some(entry) => entry.1 = constructor,
            None => self.constructors.push((identity, constructor)),
        }
    }

    pub fn is_known(&self, identity: &str) -> bool {
        self.constructors.iter().any(|(id, _)| id == identity)
    }

    /// Registered identities in registration order.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.constructors.iter().map(|(id, _)| id.as_str())
    }

    /// Build a fresh adapter for every configured backend.
    ///
    /// Constructor failures are logged and leave the backend unconfigured.
    pub fn build_all(&self, config: &RouterConfig) -> HashMap<String, DynProvider> {
        let mut adapters = HashMap::new();
        for (identity, constructor) in &self.constructors {
            let Some(settings) = config.backend(identity) else {
                tracing::debug!(backend = %identity, "No settings, backend not configured");
                continue;
            };
            match constructor(settings) {
                Ok(Some(adapter)) => {
                    tracing::debug!(
                        backend = %identity,
                        credentials = adapter.has_valid_credentials(),
                        "Adapter built"
                    );
                    adapters.insert(identity.clone(), adapter);
                }
                Ok(None) => {
                    tracing::debug!(
                        backend = %identity,
                        "Settings incomplete, backend not configured"
                    );
                }
                Err(e) => {
                    tracing::warn!(backend = %identity, error = %e, "Failed to build adapter");
                }
            }
        }
        adapters
    }

    /// The factory for the built-in network adapters.
    #[cfg(feature = "providers")]
    pub fn with_builtin_backends() -> Self {
        use crate::config::{ANTHROPIC, GEMINI, LOCAL, OPENAI};

        let mut factory = Self::new();
        factory.register(ANTHROPIC, |settings| {
            crate::AnthropicAdapter::from_settings(settings)
                .map(|adapter| adapter.map(DynProvider::new))
        });
        factory.register(OPENAI, |settings| {
            crate::OpenAiAdapter::from_settings(settings)
                .map(|adapter| adapter.map(DynProvider::new))
        });
        factory.register(GEMINI, |settings| {
            crate::GeminiAdapter::from_settings(settings)
                .map(|adapter| adapter.map(DynProvider::new))
        });
        factory.register(LOCAL, |settings| {
            crate::LocalAdapter::from_settings(settings)
                .map(|adapter| adapter.map(DynProvider::new))
        });
        factory
    }
}

impl std::fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.identities()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackendResponse, CompletionRequest, FinishReason, ProviderAdapter, Usage};
    use async_trait::async_trait;
    use clipmind_types::{BackendError, Capability, ClipmindError};

    struct KeyedMock {
        key: String,
    }

    #[async_trait]
    impl ProviderAdapter for KeyedMock {
        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> std::result::Result<BackendResponse, BackendError> {
            Ok(BackendResponse {
                id: "r".into(),
                text: "ok".into(),
                tool_calls: vec![],
                reasoning: None,
                usage: Usage::default(),
                model: "m".into(),
                finish_reason: FinishReason::EndTurn,
            })
        }
        fn name(&self) -> &str {
            "keyed"
        }
        fn default_model(&self) -> &str {
            "m"
        }
        fn capabilities(&self) -> &[Capability] {
            &[Capability::TextCompletion]
        }
        fn has_valid_credentials(&self) -> bool {
            !self.key.is_empty()
        }
        fn context_window_size(&self) -> usize {
            8_000
        }
    }

    fn keyed_factory() -> BackendFactory {
        let mut factory = BackendFactory::new();
        factory.register("keyed", |settings: &BackendSettings| {
            Ok(settings
                .api_key
                .clone()
                .map(|key| DynProvider::new(KeyedMock { key })))
        });
        factory.register("broken", |_settings: &BackendSettings| {
            Err(ClipmindError::Config("tls init failed".into()))
        });
        factory
    }

    #[test]
    fn identities_keep_registration_order() {
        let factory = keyed_factory();
        assert_eq!(factory.identities().collect::<Vec<_>>(), vec!["keyed", "broken"]);
        assert!(factory.is_known("keyed"));
        assert!(!factory.is_known("openai"));
    }

    #[test]
    fn register_replaces_existing_identity() {
        let mut factory = keyed_factory();
        factory.register("keyed", |_settings| Ok(None));
        assert_eq!(factory.identities().count(), 2);
        let config = RouterConfig::new().with_backend("keyed", BackendSettings::with_api_key("k"));
        assert!(factory.build_all(&config).is_empty());
    }

    #[test]
    fn build_all_skips_unconfigured_and_failing_backends() {
        let factory = keyed_factory();
        let config = RouterConfig::new()
            .with_backend("keyed", BackendSettings::with_api_key("secret"))
            .with_backend("broken", BackendSettings::with_api_key("x"));
        let adapters = factory.build_all(&config);
        assert_eq!(adapters.len(), 1);
        assert!(adapters["keyed"].has_valid_credentials());
    }

    #[test]
    fn settings_without_key_field_leave_backend_unconfigured() {
        let factory = keyed_factory();
        let config = RouterConfig::new().with_backend(
            "keyed",
            BackendSettings {
                model: Some("m".into()),
                ..Default::default()
            },
        );
        assert!(factory.build_all(&config).is_empty());
    }

    #[test]
    fn empty_key_builds_adapter_without_valid_credentials() {
        let factory = keyed_factory();
        let config = RouterConfig::new().with_backend("keyed", BackendSettings::with_api_key(""));
        let adapters = factory.build_all(&config);
        assert!(!adapters["keyed"].has_valid_credentials());
    }
}
