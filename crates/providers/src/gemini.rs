//! Native Google Gemini provider.
//!
//! Request shape differs from the OpenAI family: conversation parts go
//! under `contents`, the system prompt under `systemInstruction`, and
//! sampling plus the extended-thinking budget under `generationConfig`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proto::{
    Error, ModelCapabilities, ModelResponse, ProviderType, Usage, UpstreamError, excerpt,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::base::{GenerateRequest, ModelProvider, encode_image_data_url, resolve_temperature};
use crate::openai_compat::parse_retry_after;
use crate::restrictions::RestrictionPolicy;
use crate::retry::{self, RetryPolicy};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ── Request types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(rename = "thinkingConfig", skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "thinkingBudget")]
    thinking_budget: u32,
}

// ── Response types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}

// ── Provider ───────────────────────────────────────────────────────────────────

/// Native Gemini LLM provider
#[derive(Debug)]
pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    models: BTreeMap<String, ModelCapabilities>,
    restrictions: Arc<RestrictionPolicy>,
    client: reqwest::Client,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
}

impl GeminiProvider {
    pub fn new(
        api_key: impl Into<String>,
        models: BTreeMap<String, ModelCapabilities>,
        restrictions: Arc<RestrictionPolicy>,
    ) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            models,
            restrictions,
            client: reqwest::Client::new(),
            retry_policy: RetryPolicy::default(),
            request_timeout: crate::openai_compat::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Points the provider at a custom endpoint (`GEMINI_API_URL`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn request_url(&self, caps: &ModelCapabilities) -> String {
        format!("{}/models/{}:generateContent", self.base_url, caps.model_name)
    }

    async fn send_once(
        &self,
        url: &str,
        body: &GeminiRequest,
    ) -> Result<GeminiResponse, UpstreamError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        if status.as_u16() == 429 {
            return Err(UpstreamError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                body: excerpt(&text),
                retry_after,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| UpstreamError::InvalidResponse(format!("{e}; body: {}", excerpt(&text))))
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Google
    }

    fn capabilities_map(&self) -> &BTreeMap<String, ModelCapabilities> {
        &self.models
    }

    fn restriction_policy(&self) -> &RestrictionPolicy {
        &self.restrictions
    }

    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, Error> {
        let caps = self.capabilities(&request.model)?.clone();
        let (body, note) = build_body(&caps, &request)?;
        let url = self.request_url(&caps);
        debug!(model = %caps.model_name, "sending gemini request");

        let wire = retry::with_deadline(
            self.request_timeout,
            retry::execute(&self.retry_policy, &caps.model_name, |_| {
                self.send_once(&url, &body)
            }),
        )
        .await
        .map_err(Error::Upstream)?;

        let mut response = into_model_response(&caps, wire)?;
        if let Some(note) = note {
            response
                .metadata
                .insert("temperature_note".to_string(), note.into());
        }
        Ok(response)
    }
}

// ── Request/response shaping helpers ───────────────────────────────────────────

fn build_body(
    caps: &ModelCapabilities,
    request: &GenerateRequest,
) -> Result<(GeminiRequest, Option<String>), Error> {
    if !request.images.is_empty() && !caps.supports_images {
        return Err(UpstreamError::InvalidArgument(format!(
            "{} does not accept image input",
            caps.model_name
        ))
        .into());
    }

    let mut parts = vec![Part::Text {
        text: request.prompt.clone(),
    }];
    for image in &request.images {
        let url = encode_image_data_url(image).map_err(Error::Upstream)?;
        let (mime_type, data) = split_data_url(&url).ok_or_else(|| {
            Error::Upstream(UpstreamError::InvalidArgument(format!(
                "malformed image data URL for {image}"
            )))
        })?;
        parts.push(Part::InlineData {
            inline_data: InlineData { mime_type, data },
        });
    }

    let (temperature, note) = resolve_temperature(caps, request.temperature);
    let thinking_config = match (&request.thinking_mode, caps.supports_extended_thinking) {
        (Some(mode), true) => Some(ThinkingConfig {
            thinking_budget: mode.gemini_budget_tokens(),
        }),
        _ => None,
    };

    let body = GeminiRequest {
        contents: vec![Content {
            role: "user",
            parts,
        }],
        system_instruction: request.system_prompt.as_ref().map(|system| {
            SystemInstruction {
                parts: vec![Part::Text {
                    text: system.clone(),
                }],
            }
        }),
        generation_config: GenerationConfig {
            temperature,
            max_output_tokens: request.max_output_tokens,
            thinking_config,
        },
    };
    Ok((body, note))
}

fn into_model_response(
    caps: &ModelCapabilities,
    wire: GeminiResponse,
) -> Result<ModelResponse, Error> {
    let candidate = wire
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| UpstreamError::InvalidResponse("no candidates in response".to_string()))
        .map_err(Error::Upstream)?;

    let content: String = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let usage = match wire.usage_metadata {
        Some(u) => Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            total_tokens: u
                .total_token_count
                .max(u.prompt_token_count + u.candidates_token_count),
        },
        None => Usage::new(0, proto::estimate_tokens(&content) as u32),
    };

    let mut response = ModelResponse::new(content, caps, usage);
    response.finish_reason = candidate.finish_reason;
    Ok(response)
}

/// Splits `data:<mime>;base64,<data>` into its MIME type and payload.
fn split_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime.to_string(), data.to_string()))
}

#[cfg(test)]
mod tests {
    use proto::ThinkingMode;

    use super::*;

    fn gemini_caps() -> ModelCapabilities {
        serde_json::from_value(serde_json::json!({
            "provider": "google",
            "model_name": "gemini-2.5-pro",
            "context_window": 1048576,
            "max_output_tokens": 65536,
            "supports_extended_thinking": true,
            "supports_images": true,
            "aliases": ["pro"],
        }))
        .expect("capabilities fixture")
    }

    fn provider() -> GeminiProvider {
        let caps = gemini_caps();
        let mut models = BTreeMap::new();
        models.insert(caps.model_name.clone(), caps);
        GeminiProvider::new("key", models, Arc::new(RestrictionPolicy::default()))
    }

    #[test]
    fn request_url_targets_generate_content() {
        let provider = provider().with_base_url("https://example.com/v1beta/");
        assert_eq!(
            provider.request_url(&gemini_caps()),
            "https://example.com/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn build_body_shapes_contents_and_system_instruction() {
        let caps = gemini_caps();
        let mut request = GenerateRequest::new("gemini-2.5-pro", "hello");
        request.system_prompt = Some("be terse".to_string());
        request.temperature = Some(0.4);

        let (body, note) = build_body(&caps, &request).expect("body");
        assert!(note.is_none());
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(
            json["systemInstruction"]["parts"][0]["text"],
            "be terse"
        );
        assert_eq!(json["generationConfig"]["temperature"], 0.4);
    }

    #[test]
    fn build_body_maps_thinking_mode_to_budget() {
        let caps = gemini_caps();
        let mut request = GenerateRequest::new("gemini-2.5-pro", "think");
        request.thinking_mode = Some(ThinkingMode::Medium);

        let (body, _) = build_body(&caps, &request).expect("body");
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(
            json["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            8192
        );
    }

    #[test]
    fn build_body_skips_thinking_config_without_support() {
        let mut caps = gemini_caps();
        caps.supports_extended_thinking = false;
        let mut request = GenerateRequest::new("gemini-2.5-pro", "think");
        request.thinking_mode = Some(ThinkingMode::Max);

        let (body, _) = build_body(&caps, &request).expect("body");
        let json = serde_json::to_value(&body).expect("serialize");
        assert!(json["generationConfig"].get("thinkingConfig").is_none());
    }

    #[test]
    fn build_body_embeds_images_as_inline_data() {
        let caps = gemini_caps();
        let mut request = GenerateRequest::new("gemini-2.5-pro", "see");
        request.images = vec!["data:image/png;base64,QUJD".to_string()];

        let (body, _) = build_body(&caps, &request).expect("body");
        let json = serde_json::to_value(&body).expect("serialize");
        let inline = &json["contents"][0]["parts"][1]["inlineData"];
        assert_eq!(inline["mimeType"], "image/png");
        assert_eq!(inline["data"], "QUJD");
    }

    #[test]
    fn split_data_url_parses_and_rejects() {
        assert_eq!(
            split_data_url("data:image/png;base64,AAAA"),
            Some(("image/png".to_string(), "AAAA".to_string()))
        );
        assert!(split_data_url("not-a-data-url").is_none());
        assert!(split_data_url("data:image/png,plain").is_none());
    }

    #[test]
    fn parses_candidate_text_and_usage() {
        let caps = gemini_caps();
        let wire: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "Bonjour"}, {"text": "!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6
            }
        }))
        .expect("wire fixture");

        let response = into_model_response(&caps, wire).expect("normalize");
        assert_eq!(response.content, "Bonjour!");
        assert_eq!(response.usage.total_tokens, 6);
        assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(response.provider, ProviderType::Google);
    }

    #[test]
    fn rejects_response_without_candidates() {
        let caps = gemini_caps();
        let wire: GeminiResponse =
            serde_json::from_value(serde_json::json!({"candidates": []})).expect("wire fixture");
        assert!(into_model_response(&caps, wire).is_err());
    }

    #[test]
    fn alias_resolution_reaches_canonical_name() {
        let provider = provider();
        assert_eq!(
            provider.capabilities("PRO").expect("alias").model_name,
            "gemini-2.5-pro"
        );
    }
}
