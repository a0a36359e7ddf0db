//! Provider wiring: manifests, restriction policy, and the registry
//! factory table.
//!
//! Manifests load eagerly so malformed configuration is fatal before the
//! server starts serving; provider instances themselves stay lazy behind
//! registry factories.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use proto::{ConfigError, ModelCapabilities, ProviderType};
use providers::base::ModelProvider;
use providers::registry::ProviderRegistry;
use providers::{GeminiProvider, OpenAiCompatProvider, RestrictionPolicy, capabilities};
use tracing::{info, warn};

use crate::env::EnvFile;

const OPENAI_DEFAULT_BASE: &str = "https://api.openai.com/v1";
const XAI_DEFAULT_BASE: &str = "https://api.x.ai/v1";
const OPENROUTER_DEFAULT_BASE: &str = "https://openrouter.ai/api/v1";
const DIAL_DEFAULT_BASE: &str = "https://core.dialx.ai/v1";

/// Loaded manifests per provider, kept for restriction-token warnings and
/// startup diagnostics.
pub type Catalogs = HashMap<ProviderType, BTreeMap<String, ModelCapabilities>>;

/// Builds the registry from the environment. Fails when a manifest is
/// malformed or no provider has credentials.
pub fn build_registry(
    env: &EnvFile,
    policy: Arc<RestrictionPolicy>,
) -> Result<(ProviderRegistry, Catalogs), proto::Error> {
    let mut registry = ProviderRegistry::new(Arc::clone(&policy));
    let mut catalogs: Catalogs = HashMap::new();

    // Per-request soft deadline shared by every provider.
    let request_timeout = std::time::Duration::from_secs(
        env.get_usize("PROVIDER_REQUEST_TIMEOUT_SECS", 300)? as u64,
    );

    // The OpenRouter catalogue doubles as the refusal list for custom
    // endpoints: names OpenRouter declares fall through to it.
    let openrouter_models = load_models(env, ProviderType::OpenRouter)?;

    for provider_type in ProviderType::PRIORITY_ORDER {
        let Some(api_key) = env.get(provider_type.api_key_env()).filter(|k| !k.is_empty())
        else {
            continue;
        };

        let mut models = if provider_type == ProviderType::OpenRouter {
            openrouter_models.clone()
        } else {
            load_models(env, provider_type)?
        };

        match provider_type {
            ProviderType::Google => {
                let base_url = env.get("GEMINI_API_URL");
                let models = models.clone();
                let policy = Arc::clone(&policy);
                registry.register(
                    provider_type,
                    Box::new(move || {
                        let mut provider =
                            GeminiProvider::new(api_key.clone(), models.clone(), Arc::clone(&policy))
                                .with_request_timeout(request_timeout);
                        if let Some(url) = &base_url {
                            provider = provider.with_base_url(url.clone());
                        }
                        Ok(Arc::new(provider) as Arc<dyn ModelProvider>)
                    }),
                );
            }
            ProviderType::Azure => {
                let Some(endpoint) = env.get("AZURE_OPENAI_ENDPOINT").filter(|e| !e.is_empty())
                else {
                    warn!("AZURE_OPENAI_API_KEY set but AZURE_OPENAI_ENDPOINT missing; skipping Azure");
                    continue;
                };
                let api_version = env.get("AZURE_OPENAI_API_VERSION");
                let models = models.clone();
                let policy = Arc::clone(&policy);
                registry.register(
                    provider_type,
                    Box::new(move || {
                        Ok(Arc::new(
                            OpenAiCompatProvider::azure(
                                api_key.clone(),
                                endpoint.clone(),
                                api_version.clone(),
                                models.clone(),
                                Arc::clone(&policy),
                            )
                            .with_request_timeout(request_timeout),
                        ) as Arc<dyn ModelProvider>)
                    }),
                );
            }
            ProviderType::Custom => {
                let Some(base_url) = env.get("CUSTOM_API_URL").filter(|u| !u.is_empty()) else {
                    warn!("CUSTOM_API_KEY set but CUSTOM_API_URL missing; skipping custom provider");
                    continue;
                };
                models = refuse_openrouter_names(models, &openrouter_models);
                let models = models.clone();
                let policy = Arc::clone(&policy);
                registry.register(
                    provider_type,
                    Box::new(move || {
                        Ok(Arc::new(
                            OpenAiCompatProvider::new(
                                ProviderType::Custom,
                                api_key.clone(),
                                base_url.clone(),
                                models.clone(),
                                Arc::clone(&policy),
                            )
                            .with_request_timeout(request_timeout),
                        ) as Arc<dyn ModelProvider>)
                    }),
                );
            }
            ProviderType::OpenAi | ProviderType::XAi | ProviderType::Dial
            | ProviderType::OpenRouter => {
                let base_url = match provider_type {
                    ProviderType::OpenAi => env
                        .get("OPENAI_BASE_URL")
                        .unwrap_or_else(|| OPENAI_DEFAULT_BASE.to_string()),
                    ProviderType::XAi => XAI_DEFAULT_BASE.to_string(),
                    ProviderType::Dial => env
                        .get("DIAL_API_HOST")
                        .unwrap_or_else(|| DIAL_DEFAULT_BASE.to_string()),
                    _ => OPENROUTER_DEFAULT_BASE.to_string(),
                };
                let models = models.clone();
                let policy = Arc::clone(&policy);
                registry.register(
                    provider_type,
                    Box::new(move || {
                        Ok(Arc::new(
                            OpenAiCompatProvider::new(
                                provider_type,
                                api_key.clone(),
                                base_url.clone(),
                                models.clone(),
                                Arc::clone(&policy),
                            )
                            .with_request_timeout(request_timeout),
                        ) as Arc<dyn ModelProvider>)
                    }),
                );
            }
        }

        info!(provider = %provider_type, models = models.len(), "provider configured");
        catalogs.insert(provider_type, models);
    }

    if catalogs.is_empty() {
        return Err(ConfigError::NoProvidersConfigured.into());
    }
    Ok((registry, catalogs))
}

fn load_models(
    env: &EnvFile,
    provider: ProviderType,
) -> Result<BTreeMap<String, ModelCapabilities>, ConfigError> {
    let override_path = env.get(provider.manifest_path_env());
    capabilities::load_for_provider(provider, override_path.as_deref())
}

/// Drops custom entries whose canonical name or alias is declared by the
/// OpenRouter manifest, so those requests route to OpenRouter instead.
fn refuse_openrouter_names(
    mut custom: BTreeMap<String, ModelCapabilities>,
    openrouter: &BTreeMap<String, ModelCapabilities>,
) -> BTreeMap<String, ModelCapabilities> {
    custom.retain(|name, caps| {
        let clash = openrouter.values().any(|or| {
            or.matches_name(name) || caps.aliases.iter().any(|a| or.matches_name(a))
        });
        if clash {
            info!(model = %name, "custom model deferred to openrouter");
        }
        !clash
    });
    custom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(lines: &str) -> EnvFile {
        // The override flag isolates the test from the real process env.
        EnvFile::parse(&format!("ZEN_MCP_FORCE_ENV_OVERRIDE=true\n{lines}"))
    }

    #[test]
    fn no_keys_means_no_providers_configured() {
        let err = build_registry(
            &env_with(""),
            Arc::new(RestrictionPolicy::default()),
        )
        .expect_err("no keys set");
        assert!(err.to_string().contains("No providers configured"));
    }

    #[test]
    fn openai_key_registers_openai_provider() {
        let (registry, catalogs) = build_registry(
            &env_with("OPENAI_API_KEY=sk-test\n"),
            Arc::new(RestrictionPolicy::default()),
        )
        .expect("registry");

        assert_eq!(registry.registered_providers(), vec![ProviderType::OpenAi]);
        assert!(catalogs[&ProviderType::OpenAi].contains_key("gpt-5-mini"));

        let provider = registry
            .get_provider_for_model("mini")
            .expect("alias routes to openai");
        assert_eq!(provider.provider_type(), ProviderType::OpenAi);
    }

    #[test]
    fn azure_without_endpoint_is_skipped() {
        let err = build_registry(
            &env_with("AZURE_OPENAI_API_KEY=sk-azure\n"),
            Arc::new(RestrictionPolicy::default()),
        )
        .expect_err("azure alone without endpoint configures nothing");
        assert!(err.to_string().contains("No providers configured"));
    }

    #[test]
    fn azure_with_endpoint_owns_deployment_models() {
        let (registry, _) = build_registry(
            &env_with(
                "AZURE_OPENAI_API_KEY=sk-azure\n\
                 AZURE_OPENAI_ENDPOINT=https://myres.openai.azure.com\n",
            ),
            Arc::new(RestrictionPolicy::default()),
        )
        .expect("registry");

        let provider = registry
            .get_provider_for_model("gpt-4o")
            .expect("azure serves gpt-4o");
        assert_eq!(provider.provider_type(), ProviderType::Azure);
        assert_eq!(
            provider
                .capabilities("gpt-4o")
                .expect("caps")
                .deployment
                .as_deref(),
            Some("prod-gpt4o")
        );
    }

    #[test]
    fn custom_requires_url_and_defers_openrouter_names() {
        let err = build_registry(
            &env_with("CUSTOM_API_KEY=anything\n"),
            Arc::new(RestrictionPolicy::default()),
        )
        .expect_err("custom without URL configures nothing");
        assert!(err.to_string().contains("No providers configured"));

        let (registry, catalogs) = build_registry(
            &env_with(
                "CUSTOM_API_KEY=anything\n\
                 CUSTOM_API_URL=http://localhost:11434/v1\n\
                 OPENROUTER_API_KEY=sk-or\n",
            ),
            Arc::new(RestrictionPolicy::default()),
        )
        .expect("registry");

        // The bundled custom manifest keeps its local-only names.
        assert!(catalogs[&ProviderType::Custom].contains_key("llama3.2"));
        let provider = registry
            .get_provider_for_model("llama3.2")
            .expect("custom model routes");
        assert_eq!(provider.provider_type(), ProviderType::Custom);
    }

    #[test]
    fn refusal_filter_drops_clashing_names() {
        let openrouter = capabilities::load_manifest(
            ProviderType::OpenRouter,
            "openrouter_models.json",
            r#"{"models": [{"model_name": "meta-llama/llama-3.3-70b-instruct",
                            "aliases": ["llama3.2"]}]}"#,
        )
        .expect("openrouter manifest");
        let custom = capabilities::load_manifest(
            ProviderType::Custom,
            "custom_models.json",
            r#"{"models": [
                {"model_name": "llama3.2"},
                {"model_name": "qwen3-coder"}
            ]}"#,
        )
        .expect("custom manifest");

        let kept = refuse_openrouter_names(custom, &openrouter);
        assert!(!kept.contains_key("llama3.2"));
        assert!(kept.contains_key("qwen3-coder"));
    }

    #[test]
    fn manifest_override_path_is_honored() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"models": [{{"model_name": "grok-experimental"}}]}}"#
        )
        .expect("write manifest");

        let (_, catalogs) = build_registry(
            &env_with(&format!(
                "XAI_API_KEY=sk-x\nXAI_MODELS_CONFIG_PATH={}\n",
                file.path().display()
            )),
            Arc::new(RestrictionPolicy::default()),
        )
        .expect("registry");
        assert!(catalogs[&ProviderType::XAi].contains_key("grok-experimental"));
        assert!(!catalogs[&ProviderType::XAi].contains_key("grok-4"));
    }

    #[test]
    fn malformed_manifest_is_fatal() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "{{not json").expect("write manifest");

        let err = build_registry(
            &env_with(&format!(
                "OPENAI_API_KEY=sk\nOPENAI_MODELS_CONFIG_PATH={}\n",
                file.path().display()
            )),
            Arc::new(RestrictionPolicy::default()),
        )
        .expect_err("malformed manifest");
        assert!(err.to_string().contains("Malformed manifest"));
    }
}
