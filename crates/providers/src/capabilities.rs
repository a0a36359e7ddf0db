//! Capability manifest loading and validation.
//!
//! Each provider ships a JSON manifest of the models it serves. Manifests
//! are embedded at compile time and can be replaced per provider with a
//! `*_MODELS_CONFIG_PATH` file. Malformed manifests are fatal at startup
//! and name the offending file and entry.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use proto::{ConfigError, ModelCapabilities, ProviderType};
use serde::Deserialize;

/// On-disk manifest shape: a `models` array plus an ignored `_README` block.
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "_README", default)]
    _readme: Option<serde_json::Value>,
    models: Vec<ModelCapabilities>,
}

/// Returns the manifest bundled into the binary for the given provider.
pub fn builtin_manifest(provider: ProviderType) -> &'static str {
    match provider {
        ProviderType::Google => include_str!("../../../conf/gemini_models.json"),
        ProviderType::OpenAi => include_str!("../../../conf/openai_models.json"),
        ProviderType::XAi => include_str!("../../../conf/xai_models.json"),
        ProviderType::Azure => include_str!("../../../conf/azure_models.json"),
        ProviderType::Dial => include_str!("../../../conf/dial_models.json"),
        ProviderType::Custom => include_str!("../../../conf/custom_models.json"),
        ProviderType::OpenRouter => include_str!("../../../conf/openrouter_models.json"),
    }
}

/// Parses and validates a manifest for one provider.
///
/// `path` is only used to name the source in error messages.
pub fn load_manifest(
    provider: ProviderType,
    path: &str,
    contents: &str,
) -> Result<BTreeMap<String, ModelCapabilities>, ConfigError> {
    let manifest: Manifest =
        serde_json::from_str(contents).map_err(|e| ConfigError::ManifestParse {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

    let mut models = BTreeMap::new();
    // name (lowercased) -> canonical model that claimed it
    let mut claimed: HashMap<String, String> = HashMap::new();

    for mut caps in manifest.models {
        caps.provider = provider;

        if caps.model_name.is_empty() {
            return Err(ConfigError::ManifestParse {
                path: path.to_string(),
                reason: "entry with empty model_name".to_string(),
            });
        }
        if provider == ProviderType::Azure && caps.deployment.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("{path}: {}", caps.model_name),
                reason: "Azure entries require a deployment id".to_string(),
            });
        }
        if !(1..=20).contains(&caps.intelligence_score) {
            return Err(ConfigError::InvalidValue {
                field: format!("{path}: {}.intelligence_score", caps.model_name),
                reason: format!("{} is outside [1, 20]", caps.intelligence_score),
            });
        }
        if caps.context_window > 0 && caps.max_output_tokens > caps.context_window {
            return Err(ConfigError::InvalidValue {
                field: format!("{path}: {}.max_output_tokens", caps.model_name),
                reason: format!(
                    "{} exceeds context window {}",
                    caps.max_output_tokens, caps.context_window
                ),
            });
        }

        for alias in &mut caps.aliases {
            *alias = alias.to_ascii_lowercase();
        }

        let mut names: Vec<String> = vec![caps.model_name.to_ascii_lowercase()];
        names.extend(caps.aliases.iter().cloned());
        for name in names {
            if let Some(owner) = claimed.get(&name) {
                return Err(ConfigError::DuplicateAlias {
                    alias: name,
                    model: owner.clone(),
                    path: path.to_string(),
                });
            }
            claimed.insert(name, caps.model_name.clone());
        }

        models.insert(caps.model_name.clone(), caps);
    }

    Ok(models)
}

/// Loads a manifest from an operator-supplied file path.
pub fn load_manifest_file(
    provider: ProviderType,
    path: &Path,
) -> Result<BTreeMap<String, ModelCapabilities>, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_manifest(provider, &path.to_string_lossy(), &contents)
}

/// Loads the manifest for a provider, preferring the `*_MODELS_CONFIG_PATH`
/// override when `env_path` carries one.
pub fn load_for_provider(
    provider: ProviderType,
    env_path: Option<&str>,
) -> Result<BTreeMap<String, ModelCapabilities>, ConfigError> {
    match env_path {
        Some(path) if !path.trim().is_empty() => load_manifest_file(provider, Path::new(path)),
        _ => load_manifest(
            provider,
            provider.manifest_file_name(),
            builtin_manifest(provider),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_minimal_manifest_and_ignores_readme() {
        let json = r#"{
            "_README": {"note": "ignored"},
            "models": [
                {"model_name": "gpt-5-mini", "context_window": 400000,
                 "max_output_tokens": 64000, "aliases": ["Mini", "GPT5MINI"]}
            ]
        }"#;
        let models =
            load_manifest(ProviderType::OpenAi, "openai_models.json", json).expect("load");
        let caps = &models["gpt-5-mini"];
        assert_eq!(caps.provider, ProviderType::OpenAi);
        assert_eq!(caps.aliases, vec!["mini", "gpt5mini"]);
        assert_eq!(caps.intelligence_score, 10);
    }

    #[test]
    fn rejects_malformed_json_naming_the_file() {
        let err = load_manifest(ProviderType::OpenAi, "broken.json", "{not json")
            .expect_err("malformed json should fail");
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn rejects_entry_missing_model_name() {
        let json = r#"{"models": [{"context_window": 1000}]}"#;
        assert!(load_manifest(ProviderType::OpenAi, "m.json", json).is_err());

        let json = r#"{"models": [{"model_name": ""}]}"#;
        let err = load_manifest(ProviderType::OpenAi, "m.json", json)
            .expect_err("empty model_name should fail");
        assert!(err.to_string().contains("empty model_name"));
    }

    #[test]
    fn rejects_azure_entry_without_deployment() {
        let json = r#"{"models": [{"model_name": "gpt-4o"}]}"#;
        let err = load_manifest(ProviderType::Azure, "azure_models.json", json)
            .expect_err("azure without deployment should fail");
        assert!(err.to_string().contains("deployment"));

        let json = r#"{"models": [{"model_name": "gpt-4o", "deployment": "prod-gpt4o"}]}"#;
        let models = load_manifest(ProviderType::Azure, "azure_models.json", json).expect("load");
        assert_eq!(models["gpt-4o"].deployment.as_deref(), Some("prod-gpt4o"));
    }

    #[test]
    fn rejects_out_of_range_intelligence_score() {
        let json = r#"{"models": [{"model_name": "m", "intelligence_score": 21}]}"#;
        let err =
            load_manifest(ProviderType::OpenAi, "m.json", json).expect_err("21 is out of range");
        assert!(err.to_string().contains("outside [1, 20]"));
    }

    #[test]
    fn rejects_output_budget_above_context_window() {
        let json = r#"{"models": [{"model_name": "m", "context_window": 1000,
                                    "max_output_tokens": 2000}]}"#;
        assert!(load_manifest(ProviderType::OpenAi, "m.json", json).is_err());
    }

    #[test]
    fn rejects_duplicate_alias_within_provider() {
        let json = r#"{"models": [
            {"model_name": "gpt-5", "aliases": ["best"]},
            {"model_name": "gpt-5-pro", "aliases": ["BEST"]}
        ]}"#;
        let err = load_manifest(ProviderType::OpenAi, "m.json", json)
            .expect_err("duplicate alias should fail");
        let ConfigError::DuplicateAlias { alias, model, .. } = err else {
            panic!("expected DuplicateAlias, got {err}");
        };
        assert_eq!(alias, "best");
        assert_eq!(model, "gpt-5");
    }

    #[test]
    fn rejects_alias_shadowing_another_canonical_name() {
        let json = r#"{"models": [
            {"model_name": "grok-4"},
            {"model_name": "grok-3", "aliases": ["grok-4"]}
        ]}"#;
        assert!(load_manifest(ProviderType::XAi, "m.json", json).is_err());
    }

    #[test]
    fn builtin_manifests_all_parse() {
        for provider in ProviderType::PRIORITY_ORDER {
            let models = load_manifest(
                provider,
                provider.manifest_file_name(),
                builtin_manifest(provider),
            )
            .expect("bundled manifest should parse");
            assert!(!models.is_empty(), "no models for {provider}");
        }
    }

    #[test]
    fn env_path_override_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"models": [{{"model_name": "local-llama", "context_window": 128000}}]}}"#
        )
        .expect("write manifest");

        let models = load_for_provider(
            ProviderType::Custom,
            Some(file.path().to_string_lossy().as_ref()),
        )
        .expect("load override");
        assert!(models.contains_key("local-llama"));
    }

    #[test]
    fn missing_override_file_is_an_io_error() {
        let err = load_for_provider(ProviderType::Custom, Some("/nonexistent/models.json"))
            .expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn manifest_round_trip_preserves_capabilities() {
        let models = load_manifest(
            ProviderType::OpenAi,
            "openai_models.json",
            builtin_manifest(ProviderType::OpenAi),
        )
        .expect("load builtin");
        let caps = models.values().next().expect("at least one model");

        let wrapped = format!(
            r#"{{"models": [{}]}}"#,
            serde_json::to_string(caps).expect("serialize")
        );
        let reloaded = load_manifest(ProviderType::OpenAi, "roundtrip.json", &wrapped)
            .expect("reload serialized capabilities");
        assert_eq!(&reloaded[&caps.model_name], caps);
    }
}
