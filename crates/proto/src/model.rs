//! Model capability descriptors and normalized provider responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default intelligence score applied when a manifest entry omits one.
pub const DEFAULT_INTELLIGENCE_SCORE: u8 = 10;

/// Rank penalty applied to custom-endpoint models in auto-mode ordering.
const CUSTOM_RANK_PENALTY: f64 = 5.0;

/// Identity of a model backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Direct Google Gemini access.
    Google,
    /// Direct OpenAI access.
    OpenAi,
    /// Direct X.AI GROK access.
    XAi,
    /// Azure-hosted OpenAI deployments.
    Azure,
    /// DIAL unified API access.
    Dial,
    /// Local/self-hosted OpenAI-compatible endpoints.
    #[default]
    Custom,
    /// Catch-all for cloud models via a unified API.
    OpenRouter,
}

impl ProviderType {
    /// Registry walk order for model resolution. Native APIs first, then
    /// custom endpoints, then catch-all providers.
    pub const PRIORITY_ORDER: [ProviderType; 7] = [
        ProviderType::Google,
        ProviderType::OpenAi,
        ProviderType::XAi,
        ProviderType::Azure,
        ProviderType::Dial,
        ProviderType::Custom,
        ProviderType::OpenRouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::OpenAi => "openai",
            Self::XAi => "xai",
            Self::Azure => "azure",
            Self::Dial => "dial",
            Self::Custom => "custom",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Google => "GEMINI_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::XAi => "XAI_API_KEY",
            Self::Azure => "AZURE_OPENAI_API_KEY",
            Self::Dial => "DIAL_API_KEY",
            Self::Custom => "CUSTOM_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Environment variable carrying the operator allow-list, if the
    /// provider supports restriction at all.
    pub fn allowed_models_env(&self) -> Option<&'static str> {
        match self {
            Self::Google => Some("GOOGLE_ALLOWED_MODELS"),
            Self::OpenAi => Some("OPENAI_ALLOWED_MODELS"),
            Self::XAi => Some("XAI_ALLOWED_MODELS"),
            Self::Azure => Some("AZURE_OPENAI_ALLOWED_MODELS"),
            Self::Dial => Some("DIAL_ALLOWED_MODELS"),
            Self::OpenRouter => Some("OPENROUTER_ALLOWED_MODELS"),
            Self::Custom => None,
        }
    }

    /// Environment variable overriding this provider's manifest path.
    pub fn manifest_path_env(&self) -> &'static str {
        match self {
            Self::Google => "GEMINI_MODELS_CONFIG_PATH",
            Self::OpenAi => "OPENAI_MODELS_CONFIG_PATH",
            Self::XAi => "XAI_MODELS_CONFIG_PATH",
            Self::Azure => "AZURE_MODELS_CONFIG_PATH",
            Self::Dial => "DIAL_MODELS_CONFIG_PATH",
            Self::Custom => "CUSTOM_MODELS_CONFIG_PATH",
            Self::OpenRouter => "OPENROUTER_MODELS_CONFIG_PATH",
        }
    }

    /// File name of the bundled manifest for this provider.
    pub fn manifest_file_name(&self) -> &'static str {
        match self {
            Self::Google => "gemini_models.json",
            Self::OpenAi => "openai_models.json",
            Self::XAi => "xai_models.json",
            Self::Azure => "azure_models.json",
            Self::Dial => "dial_models.json",
            Self::Custom => "custom_models.json",
            Self::OpenRouter => "openrouter_models.json",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" | "gemini" => Ok(Self::Google),
            "openai" => Ok(Self::OpenAi),
            "xai" => Ok(Self::XAi),
            "azure" => Ok(Self::Azure),
            "dial" => Ok(Self::Dial),
            "custom" => Ok(Self::Custom),
            "openrouter" => Ok(Self::OpenRouter),
            other => Err(crate::error::ConfigError::InvalidValue {
                field: "provider".to_string(),
                reason: format!("unknown provider '{other}'"),
            }),
        }
    }
}

/// Temperature policy a model enforces
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TemperatureConstraint {
    /// The model accepts exactly one temperature (reasoning models).
    Fixed { value: f64 },
    /// Continuous range with a default.
    Range { min: f64, max: f64, default: f64 },
    /// Discrete list of accepted values.
    Discrete { values: Vec<f64>, default: f64 },
}

impl Default for TemperatureConstraint {
    fn default() -> Self {
        Self::Range {
            min: 0.0,
            max: 2.0,
            default: 0.3,
        }
    }
}

impl TemperatureConstraint {
    pub fn validate(&self, temperature: f64) -> bool {
        match self {
            Self::Fixed { value } => (temperature - value).abs() < 1e-6,
            Self::Range { min, max, .. } => (*min..=*max).contains(&temperature),
            Self::Discrete { values, .. } => values.iter().any(|v| (temperature - v).abs() < 1e-6),
        }
    }

    /// Coerce an out-of-range temperature into an accepted substitute.
    pub fn correct(&self, temperature: f64) -> f64 {
        match self {
            Self::Fixed { value } => *value,
            Self::Range { min, max, .. } => temperature.clamp(*min, *max),
            Self::Discrete { values, default } => values
                .iter()
                .copied()
                .min_by(|a, b| {
                    (a - temperature)
                        .abs()
                        .partial_cmp(&(b - temperature).abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(*default),
        }
    }

    pub fn default_temperature(&self) -> f64 {
        match self {
            Self::Fixed { value } => *value,
            Self::Range { default, .. } | Self::Discrete { default, .. } => *default,
        }
    }

    /// Human readable description for error messages and diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Self::Fixed { value } => format!("only supports temperature={value}"),
            Self::Range { min, max, .. } => format!("supports temperature range [{min}, {max}]"),
            Self::Discrete { values, .. } => format!("supports temperatures {values:?}"),
        }
    }
}

// Manifests may spell the constraint either as a keyword ("fixed",
// "discrete", "range") or as the full tagged object form.
impl<'de> Deserialize<'de> for TemperatureConstraint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(tag = "type", rename_all = "lowercase")]
        enum Full {
            Fixed { value: f64 },
            Range { min: f64, max: f64, default: f64 },
            Discrete { values: Vec<f64>, default: f64 },
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Keyword(String),
            Full(Full),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Keyword(word) => match word.as_str() {
                "fixed" => Ok(Self::Fixed { value: 1.0 }),
                "discrete" => Ok(Self::Discrete {
                    values: vec![0.0, 0.3, 0.7, 1.0, 1.5, 2.0],
                    default: 0.3,
                }),
                "range" => Ok(Self::default()),
                other => Err(serde::de::Error::custom(format!(
                    "unknown temperature constraint '{other}'"
                ))),
            },
            Repr::Full(full) => Ok(match full {
                Full::Fixed { value } => Self::Fixed { value },
                Full::Range { min, max, default } => Self::Range { min, max, default },
                Full::Discrete { values, default } => Self::Discrete { values, default },
            }),
        }
    }
}

/// Depth of extended thinking requested by a tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    Minimal,
    Low,
    #[default]
    Medium,
    High,
    Max,
}

impl ThinkingMode {
    /// Gemini `thinkingBudget` token allocation for this mode.
    pub fn gemini_budget_tokens(&self) -> u32 {
        match self {
            Self::Minimal => 128,
            Self::Low => 2_048,
            Self::Medium => 8_192,
            Self::High => 16_384,
            Self::Max => 32_768,
        }
    }

    /// `reasoning_effort`-style keyword for OpenAI-shaped providers.
    pub fn effort(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High | Self::Max => "high",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Max => "max",
        }
    }
}

impl std::str::FromStr for ThinkingMode {
    type Err = crate::error::SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "max" => Ok(Self::Max),
            other => Err(crate::error::SchemaError::Validation {
                field: "thinking_mode".to_string(),
                reason: format!("unknown thinking mode '{other}'"),
            }),
        }
    }
}

/// Model demand profile of a tool, used for auto-mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Deep multi-step reasoning (debug, thinkdeep).
    ExtendedReasoning,
    /// Quick conversational turnaround (chat, listmodels).
    FastResponse,
    /// No strong preference.
    Balanced,
}

/// Static capabilities and constraints for one provider-managed model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Owning provider; filled in by the manifest loader.
    #[serde(default)]
    pub provider: ProviderType,
    /// Canonical name used on the upstream wire.
    pub model_name: String,
    /// Display name for logs and listings.
    #[serde(default)]
    pub friendly_name: String,
    /// Context window in tokens.
    #[serde(default)]
    pub context_window: u32,
    /// Maximum output tokens per call.
    #[serde(default)]
    pub max_output_tokens: u32,
    /// Relative capability score, 1..=20.
    #[serde(default = "default_intelligence_score")]
    pub intelligence_score: u8,
    #[serde(default)]
    pub supports_extended_thinking: bool,
    #[serde(default)]
    pub supports_json_mode: bool,
    #[serde(default)]
    pub supports_function_calling: bool,
    #[serde(default)]
    pub supports_images: bool,
    #[serde(default = "default_true")]
    pub supports_temperature: bool,
    #[serde(default = "default_true")]
    pub supports_system_prompts: bool,
    #[serde(default)]
    pub temperature_constraint: TemperatureConstraint,
    /// Short synonyms accepted in place of the canonical name.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Azure deployment id; the outbound URL uses this, not the model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
    /// Route through the OpenAI Responses API instead of chat completions.
    #[serde(default)]
    pub use_openai_responses_api: bool,
    /// Permit tools to emit generated-code artifacts from this model.
    #[serde(default)]
    pub allow_code_generation: bool,
    #[serde(default)]
    pub description: String,
}

fn default_intelligence_score() -> u8 {
    DEFAULT_INTELLIGENCE_SCORE
}

fn default_true() -> bool {
    true
}

impl ModelCapabilities {
    /// Display name, falling back to the canonical name when the manifest
    /// omitted one.
    pub fn display_name(&self) -> &str {
        if self.friendly_name.is_empty() {
            &self.model_name
        } else {
            &self.friendly_name
        }
    }

    /// Composite score ordering models in auto-mode listings.
    ///
    /// Intelligence dominates; a large context window and feature support
    /// nudge the rank, custom endpoints are discounted.
    pub fn effective_rank(&self) -> u8 {
        let mut rank = f64::from(self.intelligence_score) * 5.0;
        rank = rank.clamp(0.0, 100.0);

        if self.context_window > 1_000 {
            rank += (f64::from(self.context_window) / 1_000.0).log10() * 2.0;
        }
        if self.supports_extended_thinking {
            rank += 3.0;
        }
        if self.supports_function_calling {
            rank += 2.0;
        }
        if self.supports_images {
            rank += 1.0;
        }
        if self.provider == ProviderType::Custom {
            rank -= CUSTOM_RANK_PENALTY;
        }

        rank.clamp(0.0, 100.0).round() as u8
    }

    /// Whether `name` matches the canonical name or any alias,
    /// case-insensitively.
    pub fn matches_name(&self, name: &str) -> bool {
        let lowered = name.to_ascii_lowercase();
        self.model_name.to_ascii_lowercase() == lowered
            || self.aliases.iter().any(|a| a.to_ascii_lowercase() == lowered)
    }
}

/// Token accounting reported by a provider for a single call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Accumulates another usage record into this one.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Normalized result returned by any provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text content.
    pub content: String,
    pub usage: Usage,
    /// Canonical model name that served the request.
    pub model_name: String,
    pub friendly_name: String,
    pub provider: ProviderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Provider-specific extras: temperature corrections, reasoning tokens.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ModelResponse {
    pub fn new(content: impl Into<String>, caps: &ModelCapabilities, usage: Usage) -> Self {
        Self {
            content: content.into(),
            usage,
            model_name: caps.model_name.clone(),
            friendly_name: caps.display_name().to_string(),
            provider: caps.provider,
            finish_reason: None,
            metadata: Map::new(),
        }
    }
}
