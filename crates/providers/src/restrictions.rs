//! Operator allow-list policy parsed from `*_ALLOWED_MODELS` variables.
//!
//! An empty or unset variable leaves the provider unrestricted. Matching is
//! case-insensitive and accepts canonical names as well as aliases, so
//! `OPENAI_ALLOWED_MODELS=mini` admits `gpt-5-mini` through its alias.

use std::collections::{BTreeMap, HashMap, HashSet};

use proto::{ModelCapabilities, ProviderType};
use tracing::warn;

/// Per-provider allow-lists applied to every listing and selection path
#[derive(Debug, Default)]
pub struct RestrictionPolicy {
    allowed: HashMap<ProviderType, HashSet<String>>,
}

impl RestrictionPolicy {
    /// Builds the policy by reading each provider's allow-list variable
    /// through `lookup` (injected so tests avoid process-env mutation).
    pub fn from_env_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut allowed = HashMap::new();
        for provider in ProviderType::PRIORITY_ORDER {
            let Some(var) = provider.allowed_models_env() else {
                continue;
            };
            let Some(raw) = lookup(var) else {
                continue;
            };
            let tokens: HashSet<String> = raw
                .split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            if !tokens.is_empty() {
                allowed.insert(provider, tokens);
            }
        }
        Self { allowed }
    }

    /// Whether the policy names any models for this provider.
    pub fn has_restrictions(&self, provider: ProviderType) -> bool {
        self.allowed.contains_key(&provider)
    }

    /// Policy check: canonical name or any alias must appear in the
    /// provider's allow-list (empty list ⇒ everything allowed).
    pub fn is_allowed(&self, provider: ProviderType, canonical: &str, aliases: &[String]) -> bool {
        let Some(tokens) = self.allowed.get(&provider) else {
            return true;
        };
        if tokens.contains(&canonical.to_ascii_lowercase()) {
            return true;
        }
        aliases
            .iter()
            .any(|a| tokens.contains(&a.to_ascii_lowercase()))
    }

    /// Allow-list tokens for a provider, sorted for stable error messages.
    pub fn allowed_summary(&self, provider: ProviderType) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .allowed
            .get(&provider)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        tokens.sort();
        tokens
    }

    /// Logs allow-list tokens that match no known model. Unknown tokens do
    /// not fail startup; they silently restrict nothing.
    pub fn warn_unknown_tokens(
        &self,
        catalogs: &HashMap<ProviderType, BTreeMap<String, ModelCapabilities>>,
    ) {
        for (provider, tokens) in &self.allowed {
            let Some(models) = catalogs.get(provider) else {
                continue;
            };
            for token in tokens {
                let known = models.values().any(|caps| caps.matches_name(token));
                if !known {
                    warn!(
                        provider = %provider,
                        token = %token,
                        "allow-list names a model this provider does not serve"
                    );
                }
            }
        }
    }
}
