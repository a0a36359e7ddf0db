//! Provider abstraction shared by every model backend.
//!
//! Concrete providers supply their capability catalogue and wire-level
//! `generate`; alias resolution, restriction-aware lookup, temperature
//! correction, and token estimation live here so backends stay small.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use proto::{
    Error, ModelCapabilities, ModelError, ModelResponse, ProviderType, ThinkingMode, UpstreamError,
};

use crate::restrictions::RestrictionPolicy;

/// Maximum accepted image payload in bytes (20 MB).
const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// One generation request, provider-agnostic
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Alias or canonical name; resolved by the provider before the call.
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u32>,
    pub thinking_mode: Option<ThinkingMode>,
    /// Absolute image paths or `data:` URLs.
    pub images: Vec<String>,
    /// Ask for a JSON-object response when the model supports it.
    pub json_mode: bool,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            ..Self::default()
        }
    }
}

/// Contract every model backend satisfies
#[async_trait]
pub trait ModelProvider: Send + Sync + std::fmt::Debug {
    fn provider_type(&self) -> ProviderType;

    /// Canonical name → capabilities for every model this backend serves.
    fn capabilities_map(&self) -> &BTreeMap<String, ModelCapabilities>;

    /// The operator restriction policy this provider consults.
    fn restriction_policy(&self) -> &RestrictionPolicy;

    /// Resolves an alias or canonical name, case-insensitively.
    fn resolve(&self, name: &str) -> Option<&ModelCapabilities> {
        let map = self.capabilities_map();
        if let Some(caps) = map.get(name) {
            return Some(caps);
        }
        map.values().find(|caps| caps.matches_name(name))
    }

    /// Restriction-aware capability lookup.
    fn capabilities(&self, name: &str) -> Result<&ModelCapabilities, ModelError> {
        let Some(caps) = self.resolve(name) else {
            return Err(ModelError::UnknownModel {
                model: name.to_string(),
                suggestions: self.list_models(true),
            });
        };
        let policy = self.restriction_policy();
        if !policy.is_allowed(self.provider_type(), &caps.model_name, &caps.aliases) {
            return Err(ModelError::Restricted {
                model: caps.model_name.clone(),
                provider: self.provider_type().to_string(),
                allowed: policy.allowed_summary(self.provider_type()),
            });
        }
        Ok(caps)
    }

    /// Whether this backend can serve `name` under current policy.
    fn validate(&self, name: &str) -> bool {
        self.capabilities(name).is_ok()
    }

    /// Canonical model names, optionally filtered by restriction policy.
    fn list_models(&self, respect_restrictions: bool) -> Vec<String> {
        let policy = self.restriction_policy();
        self.capabilities_map()
            .values()
            .filter(|caps| {
                !respect_restrictions
                    || policy.is_allowed(self.provider_type(), &caps.model_name, &caps.aliases)
            })
            .map(|caps| caps.model_name.clone())
            .collect()
    }

    /// Executes one generation request against the upstream API.
    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, Error>;

    /// Token estimate for budgeting; providers with an accurate tokenizer
    /// override this.
    fn count_tokens(&self, text: &str, _model: &str) -> usize {
        proto::estimate_tokens(text)
    }
}

/// Applies a model's temperature constraint to the requested value.
///
/// Returns the temperature to send (None when the model takes none at all)
/// plus a diagnostic for the response metadata when the request was
/// silently adjusted.
pub fn resolve_temperature(
    caps: &ModelCapabilities,
    requested: Option<f64>,
) -> (Option<f64>, Option<String>) {
    if !caps.supports_temperature {
        let note = requested.map(|t| {
            format!(
                "temperature {t} omitted: {} does not accept a temperature parameter",
                caps.model_name
            )
        });
        return (None, note);
    }

    match requested {
        None => (Some(caps.temperature_constraint.default_temperature()), None),
        Some(t) if caps.temperature_constraint.validate(t) => (Some(t), None),
        Some(t) => {
            let corrected = caps.temperature_constraint.correct(t);
            let note = format!(
                "temperature {t} adjusted to {corrected}: {} {}",
                caps.model_name,
                caps.temperature_constraint.describe()
            );
            (Some(corrected), Some(note))
        }
    }
}

/// Reads an image path into a base64 data URL with a sniffed MIME type.
/// `data:` URLs pass through untouched.
pub fn encode_image_data_url(path: &str) -> Result<String, UpstreamError> {
    if path.starts_with("data:") {
        return Ok(path.to_string());
    }

    let mime = match path.rsplit('.').next().map(str::to_ascii_lowercase) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        _ => {
            return Err(UpstreamError::InvalidArgument(format!(
                "unsupported image format: {path}"
            )));
        }
    };

    let bytes = std::fs::read(path)
        .map_err(|e| UpstreamError::InvalidArgument(format!("cannot read image {path}: {e}")))?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(UpstreamError::InvalidArgument(format!(
            "image {path} is {} bytes, larger than the {MAX_IMAGE_BYTES} byte limit",
            bytes.len()
        )));
    }

    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(format!("data:{mime};base64,{encoded}"))
}
