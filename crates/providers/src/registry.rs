//! Provider registry and priority router.
//!
//! Holds a factory per configured provider, instantiates lazily on first
//! use, and resolves model names by walking the provider priority order.
//! Routing decisions are memoized per lowercased alias for the process
//! lifetime.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use proto::{ModelCapabilities, ModelError, ProviderType, ToolCategory};
use tracing::{debug, warn};

use crate::base::ModelProvider;
use crate::restrictions::RestrictionPolicy;

/// Constructor for one provider, run at most once on first use.
pub type ProviderFactory =
    Box<dyn Fn() -> Result<Arc<dyn ModelProvider>, proto::Error> + Send + Sync>;

/// Central catalogue of provider instances used by the dispatcher and tools
pub struct ProviderRegistry {
    factories: HashMap<ProviderType, ProviderFactory>,
    /// `None` marks a factory that failed; it is not retried.
    instances: RwLock<HashMap<ProviderType, Option<Arc<dyn ModelProvider>>>>,
    /// lowercased alias → provider that owns it
    route_cache: DashMap<String, ProviderType>,
    restrictions: Arc<RestrictionPolicy>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field(
                "instances",
                &self
                    .instances
                    .read()
                    .map(|g| g.keys().copied().collect::<Vec<_>>())
                    .unwrap_or_default(),
            )
            .field("route_cache", &self.route_cache)
            .field("restrictions", &self.restrictions)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new(restrictions: Arc<RestrictionPolicy>) -> Self {
        Self {
            factories: HashMap::new(),
            instances: RwLock::new(HashMap::new()),
            route_cache: DashMap::new(),
            restrictions,
        }
    }

    /// Registers a provider factory. Called once per configured provider
    /// during startup wiring.
    pub fn register(&mut self, provider_type: ProviderType, factory: ProviderFactory) {
        debug!(provider = %provider_type, "registering provider factory");
        self.factories.insert(provider_type, factory);
    }

    /// Provider types with a registered factory, in priority order.
    pub fn registered_providers(&self) -> Vec<ProviderType> {
        ProviderType::PRIORITY_ORDER
            .into_iter()
            .filter(|p| self.factories.contains_key(p))
            .collect()
    }

    pub fn restrictions(&self) -> &RestrictionPolicy {
        &self.restrictions
    }

    /// Lazily-initialized provider instance, `None` when unregistered or
    /// its factory failed.
    pub fn get_provider(&self, provider_type: ProviderType) -> Option<Arc<dyn ModelProvider>> {
        if let Some(entry) = self
            .instances
            .read()
            .expect("provider instances lock")
            .get(&provider_type)
        {
            return entry.clone();
        }

        let mut instances = self.instances.write().expect("provider instances lock");
        // Re-check: another task may have initialized while we waited.
        if let Some(entry) = instances.get(&provider_type) {
            return entry.clone();
        }

        let factory = self.factories.get(&provider_type)?;
        let instance = match factory() {
            Ok(provider) => Some(provider),
            Err(err) => {
                warn!(provider = %provider_type, error = %err, "provider initialization failed");
                None
            }
        };
        instances.insert(provider_type, instance.clone());
        instance
    }

    /// Resolves a model name or alias to the provider that will serve it.
    ///
    /// Walks providers in priority order; the first whose catalogue knows
    /// the name and whose restriction policy permits it wins. A name that
    /// resolves somewhere but is disallowed everywhere reports the policy;
    /// a name nobody knows suggests alternatives.
    pub fn get_provider_for_model(
        &self,
        name: &str,
    ) -> Result<Arc<dyn ModelProvider>, ModelError> {
        let key = name.to_ascii_lowercase();
        if let Some(cached) = self.route_cache.get(&key)
            && let Some(provider) = self.get_provider(*cached)
        {
            return Ok(provider);
        }

        let mut restricted: Option<(ProviderType, String)> = None;
        for provider_type in ProviderType::PRIORITY_ORDER {
            let Some(provider) = self.get_provider(provider_type) else {
                continue;
            };
            let Some(caps) = provider.resolve(name) else {
                continue;
            };
            if self
                .restrictions
                .is_allowed(provider_type, &caps.model_name, &caps.aliases)
            {
                debug!(model = %name, provider = %provider_type, "model routed");
                self.route_cache.insert(key, provider_type);
                return Ok(provider.clone());
            }
            if restricted.is_none() {
                restricted = Some((provider_type, caps.model_name.clone()));
            }
        }

        match restricted {
            Some((provider_type, model)) => Err(ModelError::Restricted {
                model,
                provider: provider_type.to_string(),
                allowed: self.restrictions.allowed_summary(provider_type),
            }),
            None => Err(ModelError::UnknownModel {
                model: name.to_string(),
                suggestions: self.suggestions(),
            }),
        }
    }

    /// All allowed models across available providers, keyed by canonical
    /// name. First provider in priority order wins a name collision.
    pub fn available_models(&self) -> BTreeMap<String, ProviderType> {
        let mut models = BTreeMap::new();
        for provider_type in ProviderType::PRIORITY_ORDER {
            let Some(provider) = self.get_provider(provider_type) else {
                continue;
            };
            for name in provider.list_models(true) {
                models.entry(name).or_insert(provider_type);
            }
        }
        models
    }

    /// Allowed capabilities ordered for auto-mode suggestions: effective
    /// rank descending, canonical name as the tie break. Extended-reasoning
    /// tools are narrowed to thinking-capable models when any exist.
    pub fn list_for_tool(&self, category: ToolCategory, top_n: usize) -> Vec<ModelCapabilities> {
        let mut all: Vec<ModelCapabilities> = Vec::new();
        for provider_type in ProviderType::PRIORITY_ORDER {
            let Some(provider) = self.get_provider(provider_type) else {
                continue;
            };
            for caps in provider.capabilities_map().values() {
                if self
                    .restrictions
                    .is_allowed(provider_type, &caps.model_name, &caps.aliases)
                {
                    all.push(caps.clone());
                }
            }
        }

        if category == ToolCategory::ExtendedReasoning
            && all.iter().any(|c| c.supports_extended_thinking)
        {
            all.retain(|c| c.supports_extended_thinking);
        }

        all.sort_by(|a, b| {
            b.effective_rank()
                .cmp(&a.effective_rank())
                .then_with(|| a.model_name.cmp(&b.model_name))
        });
        all.truncate(top_n);
        all
    }

    /// Highest-ranked allowed model for a tool category, used by `auto`.
    pub fn best_for(&self, category: ToolCategory) -> Option<ModelCapabilities> {
        self.list_for_tool(category, 1).into_iter().next()
    }

    fn suggestions(&self) -> Vec<String> {
        self.available_models().into_keys().take(8).collect()
    }
}
