//! Backend credentials and host settings.
//!
//! A backend without settings, or without its key field, stays unconfigured
//! and can never be selected. Missing values are never defaulted to empty
//! credentials.

use std::collections::BTreeMap;
use std::path::Path;

use clipmind_types::{ClipmindError, Result};
use serde::{Deserialize, Serialize};

use crate::CapabilityMatrix;

pub const ANTHROPIC: &str = "anthropic";
pub const OPENAI: &str = "openai";
pub const GEMINI: &str = "gemini";
pub const LOCAL: &str = "local";

// ---------------------------------------------------------------------------
// BackendSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL of the backend, e.g. the local daemon address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl BackendSettings {
    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Default::default()
        }
    }

    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Default::default()
        }
    }

    /// Overlay every field present in `partial`.
    pub fn merge(&mut self, partial: &BackendSettings) {
        if let Some(key) = &partial.api_key {
            self.api_key = Some(key.clone());
        }
        if let Some(host) = &partial.host {
            self.host = Some(host.clone());
        }
        if let Some(model) = &partial.model {
            self.model = Some(model.clone());
        }
        if let Some(timeout) = partial.timeout_ms {
            self.timeout_ms = Some(timeout);
        }
    }
}

// ---------------------------------------------------------------------------
// RouterConfig
// ---------------------------------------------------------------------------

/// Settings per backend identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouterConfig {
    pub backends: BTreeMap<String, BackendSettings>,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, identity: impl Into<String>, settings: BackendSettings) -> Self {
        self.backends.insert(identity.into(), settings);
        self
    }

    pub fn backend(&self, identity: &str) -> Option<&BackendSettings> {
        self.backends.get(identity)
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Merge `partial` into this configuration field by field. Backends and
    /// fields absent from `partial` keep their current values.
    pub fn merge(&mut self, partial: &RouterConfig) {
        for (identity, settings) in &partial.backends {
            self.backends
                .entry(identity.clone())
                .or_default()
                .merge(settings);
        }
    }

    /// Create from environment variables (detect available API keys and hosts).
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();

        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            config
                .backends
                .insert(ANTHROPIC.into(), BackendSettings::with_api_key(key));
        }

        if let Some(key) = lookup("OPENAI_API_KEY") {
            config
                .backends
                .insert(OPENAI.into(), BackendSettings::with_api_key(key));
        }

        if let Some(key) = lookup("GOOGLE_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
            config
                .backends
                .insert(GEMINI.into(), BackendSettings::with_api_key(key));
        }

        if let Some(host) = lookup("OLLAMA_HOST") {
            config
                .backends
                .insert(LOCAL.into(), BackendSettings::with_host(host));
        }

        config
    }
}

// ---------------------------------------------------------------------------
// ConfigFile
// ---------------------------------------------------------------------------

/// On-disk configuration: backend settings plus an optional matrix override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub backends: RouterConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilityMatrix>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        serde_json::from_str(&source).map_err(|e| {
            ClipmindError::Config(format!("{}: {e}", path.display()))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
