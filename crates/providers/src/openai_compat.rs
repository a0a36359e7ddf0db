//! Chat-completions provider for OpenAI-compatible backends.
//!
//! One implementation serves OpenAI, X.AI, OpenRouter, DIAL, custom
//! endpoints, and Azure deployments; they differ only in base URL, auth
//! header, and (for Azure) the deployment-addressed request path. OpenAI
//! models flagged `use_openai_responses_api` are delegated to the
//! Responses-API path in [`crate::responses`].

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
use crate::restrictions::RestrictionPolicy;
use crate::retry::{self, RetryPolicy};
use crate::responses;

/// Default per-request soft deadline.
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Body substrings that mark a transient capacity failure regardless of
/// status code. Mapped to a connection-level error so the retry helper
/// backs off.
const OVERLOADED_PATTERNS: &[&str] = &["overloaded_error", "server_overloaded"];

// ── Request types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

// ── Response types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

// ── Provider ───────────────────────────────────────────────────────────────────

/// OpenAI-compatible chat-completions provider
#[derive(Debug)]
pub struct OpenAiCompatProvider {
    kind: ProviderType,
    base_url: String,
    api_key: String,
    models: BTreeMap<String, ModelCapabilities>,
    restrictions: Arc<RestrictionPolicy>,
    client: reqwest::Client,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
    azure_api_version: String,
}

impl OpenAiCompatProvider {
    pub fn new(
        kind: ProviderType,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        models: BTreeMap<String, ModelCapabilities>,
        restrictions: Arc<RestrictionPolicy>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            models,
            restrictions,
            client: reqwest::Client::new(),
            retry_policy: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            azure_api_version: DEFAULT_AZURE_API_VERSION.to_string(),
        }
    }

    /// Azure-flavoured constructor; `endpoint` is the resource URL from
    /// `AZURE_OPENAI_ENDPOINT` and requests are addressed by deployment id.
    pub fn azure(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        api_version: Option<String>,
        models: BTreeMap<String, ModelCapabilities>,
        restrictions: Arc<RestrictionPolicy>,
    ) -> Self {
        let mut provider = Self::new(ProviderType::Azure, api_key, endpoint, models, restrictions);
        if let Some(version) = api_version {
            provider.azure_api_version = version;
        }
        provider
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Outbound URL for one model. Azure addresses the deployment id, never
    /// the model name.
    fn request_url(&self, caps: &ModelCapabilities) -> String {
        match (self.kind, caps.deployment.as_deref()) {
            (ProviderType::Azure, Some(deployment)) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, deployment, self.azure_api_version
            ),
            _ => format!("{}/chat/completions", self.base_url),
        }
    }

    fn apply_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.kind {
            ProviderType::Azure => builder.header("api-key", &self.api_key),
            ProviderType::OpenRouter => builder
                .bearer_auth(&self.api_key)
                .header("HTTP-Referer", "https://github.com/zen-mcp/zenmcp-rs")
                .header("X-Title", "Zen MCP Server"),
            _ => builder.bearer_auth(&self.api_key),
        }
    }

    async fn send_once(
        &self,
        url: &str,
        body: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, UpstreamError> {
        let response = self
            .apply_headers(self.client.post(url))
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
            if OVERLOADED_PATTERNS.iter().any(|p| text.contains(p)) {
                return Err(UpstreamError::Network(format!(
                    "provider overloaded: {}",
                    excerpt(&text)
                )));
            }
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                body: excerpt(&text),
                retry_after,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            UpstreamError::InvalidResponse(format!("{e}; body: {}", excerpt(&text)))
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn provider_type(&self) -> ProviderType {
        self.kind
    }

    fn capabilities_map(&self) -> &BTreeMap<String, ModelCapabilities> {
        &self.models
    }

    fn restriction_policy(&self) -> &RestrictionPolicy {
        &self.restrictions
    }

    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, Error> {
        let caps = self.capabilities(&request.model)?.clone();

        if self.kind == ProviderType::OpenAi && caps.use_openai_responses_api {
            return responses::generate(
                &self.client,
                &self.base_url,
                &self.api_key,
                &self.retry_policy,
                self.request_timeout,
                &caps,
                &request,
            )
            .await;
        }

        let (body, note) = build_body(&caps, &request)?;
        let url = self.request_url(&caps);
        debug!(
            provider = %self.kind,
            model = %caps.model_name,
            messages = %body.messages.len(),
            "sending chat-completions request"
        );

        let wire = retry::with_deadline(
            self.request_timeout,
            retry::execute(&self.retry_policy, &caps.model_name, |_| {
                self.send_once(&url, &body)
            }),
        )
        .await
        .map_err(Error::Upstream)?;

        let mut response = into_model_response(&caps, wire, |text| {
            self.count_tokens(text, &caps.model_name)
        })?;
        if let Some(note) = note {
            response
                .metadata
                .insert("temperature_note".to_string(), note.into());
        }
        Ok(response)
    }
}

// ── Request/response shaping helpers ───────────────────────────────────────────

/// Builds the outbound body plus an optional temperature diagnostic.
fn build_body(
    caps: &ModelCapabilities,
    request: &GenerateRequest,
) -> Result<(ChatCompletionRequest, Option<String>), Error> {
    if !request.images.is_empty() && !caps.supports_images {
        return Err(UpstreamError::InvalidArgument(format!(
            "{} does not accept image input",
            caps.model_name
        ))
        .into());
    }

    let mut messages = Vec::new();
    let mut prompt = request.prompt.clone();
    if let Some(system) = &request.system_prompt {
        if caps.supports_system_prompts {
            messages.push(ChatMessage {
                role: "system",
                content: MessageContent::Text(system.clone()),
            });
        } else {
            // Models without a system role get the instructions folded into
            // the user turn.
            prompt = format!("{system}\n\n{prompt}");
        }
    }

    let content = if request.images.is_empty() {
        MessageContent::Text(prompt)
    } else {
        let mut parts = vec![ContentPart::Text { text: prompt }];
        for image in &request.images {
            let url = encode_image_data_url(image).map_err(Error::Upstream)?;
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl { url },
            });
        }
        MessageContent::Parts(parts)
    };
    messages.push(ChatMessage {
        role: "user",
        content,
    });

    let (temperature, note) = resolve_temperature(caps, request.temperature);
    let reasoning_effort = match (&request.thinking_mode, caps.supports_extended_thinking) {
        (Some(mode), true) => Some(mode.effort()),
        _ => None,
    };
    let response_format = (request.json_mode && caps.supports_json_mode).then_some(ResponseFormat {
        format_type: "json_object",
    });

    let body = ChatCompletionRequest {
        model: caps.model_name.clone(),
        messages,
        temperature,
        max_tokens: request.max_output_tokens,
        reasoning_effort,
        response_format,
    };
    Ok((body, note))
}

/// Normalizes a wire response, estimating usage when the provider sent none.
fn into_model_response(
    caps: &ModelCapabilities,
    wire: ChatCompletionResponse,
    estimate: impl Fn(&str) -> usize,
) -> Result<ModelResponse, Error> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| UpstreamError::InvalidResponse("no choices in response".to_string()))
        .map_err(Error::Upstream)?;
    let content = choice.message.content.unwrap_or_default();

    let usage = match wire.usage {
        Some(u) => Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens.max(u.prompt_tokens + u.completion_tokens),
        },
        None => Usage::new(0, estimate(&content) as u32),
    };

    let mut response = ModelResponse::new(content, caps, usage);
    response.finish_reason = choice.finish_reason;
    Ok(response)
}

/// Numeric `Retry-After` header value, when present.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
