use std::collections::{BTreeMap, HashSet};

use clipmind_types::{Capability, ClipmindError, Result};
use serde::{Deserialize, Serialize};

use crate::config::{ANTHROPIC, GEMINI, LOCAL, OPENAI};
use crate::BackendFactory;

/// Ordered backend preference ("chain") per capability, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMatrix {
    chains: BTreeMap<Capability, Vec<String>>,
}

impl CapabilityMatrix {
    /// An empty matrix. Capabilities without a chain are unroutable.
    pub fn new() -> Self {
        Self {
            chains: BTreeMap::new(),
        }
    }

    pub fn with_chain<I, S>(mut self, capability: Capability, chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chains
            .insert(capability, chain.into_iter().map(Into::into).collect());
        self
    }

    pub fn chain(&self, capability: Capability) -> Option<&[String]> {
        self.chains.get(&capability).map(Vec::as_slice)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.chains.keys().copied()
    }

    /// Every identity referenced by any chain, in first-seen order.
    pub fn referenced_backends(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.chains
            .values()
            .flatten()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Replace the chains of `overrides`, keeping every other capability.
    pub fn overlay(&mut self, overrides: &CapabilityMatrix) {
        for (capability, chain) in &overrides.chains {
            self.chains.insert(*capability, chain.clone());
        }
    }

    /// Check that every chain is non-empty, free of duplicates, and names only
    /// identities the factory can construct.
    pub fn validate(&self, factory: &BackendFactory) -> Result<()> {
        for (capability, chain) in &self.chains {
            if chain.is_empty() {
                return Err(ClipmindError::InvalidMatrix(format!(
                    "chain for {capability} is empty"
                )));
            }

            let mut seen = HashSet::new();
            for identity in chain {
                if !seen.insert(identity.as_str()) {
                    return Err(ClipmindError::InvalidMatrix(format!(
                        "chain for {capability} lists '{identity}' twice"
                    )));
                }
                if !factory.is_known(identity) {
                    return Err(ClipmindError::UnknownBackend(identity.clone()));
                }
            }
        }
        Ok(())
    }
}

impl Default for CapabilityMatrix {
    /// Prefer the most capable cloud model, then cheaper clouds, then the local daemon.
    fn default() -> Self {
        Self::new()
            .with_chain(
                Capability::TextCompletion,
                [ANTHROPIC, OPENAI, GEMINI, LOCAL],
            )
            .with_chain(
                Capability::StructuredOutput,
                [ANTHROPIC, OPENAI, GEMINI, LOCAL],
            )
            .with_chain(Capability::FunctionCalling, [ANTHROPIC, OPENAI, GEMINI])
            .with_chain(Capability::Vision, [ANTHROPIC, OPENAI, GEMINI, LOCAL])
            .with_chain(Capability::Transcription, [OPENAI, LOCAL])
            .with_chain(Capability::ImageGeneration, [OPENAI, GEMINI])
            .with_chain(Capability::Embedding, [OPENAI, GEMINI, LOCAL])
            .with_chain(Capability::Streaming, [ANTHROPIC, OPENAI, GEMINI, LOCAL])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn factory_with(ids: &[&str]) -> BackendFactory {
        let mut factory = BackendFactory::new();
        for id in ids {
            factory.register(*id, |_settings| Ok(None));
        }
        factory
    }

    #[test]
    fn default_matrix_covers_every_capability() {
        let matrix = CapabilityMatrix::default();
        for cap in Capability::ALL {
            let chain = matrix.chain(cap).expect("chain for every capability");
            assert!(!chain.is_empty(), "{cap} chain is empty");
        }
    }

    #[test]
    fn default_matrix_validates_against_builtin_identities() {
        let factory = factory_with(&[ANTHROPIC, OPENAI, GEMINI, LOCAL]);
        CapabilityMatrix::default().validate(&factory).unwrap();
    }

    #[test]
    fn validate_rejects_unknown_identity() {
        let factory = factory_with(&[ANTHROPIC]);
        let matrix = CapabilityMatrix::new()
            .with_chain(Capability::TextCompletion, ["anthropic", "mistral"]);
        let err = matrix.validate(&factory).unwrap_err();
        assert!(matches!(err, ClipmindError::UnknownBackend(id) if id == "mistral"));
    }

    #[test]
    fn validate_rejects_empty_chain() {
        let factory = factory_with(&[ANTHROPIC]);
        let matrix = CapabilityMatrix::new().with_chain(Capability::Vision, Vec::<String>::new());
        let err = matrix.validate(&factory).unwrap_err();
        assert!(err.to_string().contains("Vision"));
    }

    #[test]
    fn validate_rejects_duplicates() {
        let factory = factory_with(&[ANTHROPIC, LOCAL]);
        let matrix = CapabilityMatrix::new()
            .with_chain(Capability::TextCompletion, ["anthropic", "local", "anthropic"]);
        assert!(matches!(
            matrix.validate(&factory),
            Err(ClipmindError::InvalidMatrix(_))
        ));
    }

    #[test]
    fn referenced_backends_are_unique_and_ordered() {
        let matrix = CapabilityMatrix::new()
            .with_chain(Capability::TextCompletion, ["anthropic", "local"])
            .with_chain(Capability::Vision, ["openai", "anthropic"]);
        assert_eq!(
            matrix.referenced_backends(),
            vec!["anthropic", "local", "openai"]
        );
    }

    #[test]
    fn overlay_replaces_only_given_chains() {
        let mut matrix = CapabilityMatrix::default();
        let overrides = CapabilityMatrix::new().with_chain(Capability::TextCompletion, ["local"]);
        matrix.overlay(&overrides);
        assert_eq!(
            matrix.chain(Capability::TextCompletion).unwrap(),
            &["local".to_string()]
        );
        assert_eq!(matrix.chain(Capability::Vision).unwrap().len(), 4);
    }

    #[test]
    fn matrix_serializes_as_capability_map() {
        let matrix = CapabilityMatrix::new().with_chain(Capability::Embedding, ["openai"]);
        let json = serde_json::to_value(&matrix).unwrap();
        assert_eq!(json["embedding"][0], "openai");
        let back: CapabilityMatrix = serde_json::from_value(json).unwrap();
        assert_eq!(back, matrix);
    }
}
