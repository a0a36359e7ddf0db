//! OpenAI Responses-API path for reasoning models.
//!
//! Models flagged `use_openai_responses_api` (o3-pro, gpt-5-pro,
//! gpt-5-codex) take a different envelope: content is wrapped under
//! `input`, the system prompt becomes `instructions`, thinking depth rides
//! in `reasoning.effort`, and text comes back as
//! `output[*].content[*].text`.

use std::time::Duration;

use proto::{
    Error, ModelCapabilities, ModelResponse, Usage, UpstreamError, excerpt,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::base::{GenerateRequest, encode_image_data_url, resolve_temperature};
use crate::openai_compat::parse_retry_after;
use crate::retry::{self, RetryPolicy};

// ── Request types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<Reasoning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    store: bool,
}

#[derive(Debug, Serialize)]
struct Reasoning {
    effort: &'static str,
}

#[derive(Debug, Serialize)]
struct InputItem {
    role: &'static str,
    content: Vec<InputContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputContent {
    InputText { text: String },
    InputImage { image_url: String },
}

// ── Response types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message { content: Vec<OutputContent> },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputContent {
    OutputText { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
    #[serde(default)]
    output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct OutputTokensDetails {
    #[serde(default)]
    reasoning_tokens: u32,
}

// ── Call path ──────────────────────────────────────────────────────────────────

/// Executes one generation through the Responses API.
pub(crate) async fn generate(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    retry_policy: &RetryPolicy,
    request_timeout: Duration,
    caps: &ModelCapabilities,
    request: &GenerateRequest,
) -> Result<ModelResponse, Error> {
    let (body, note) = build_body(caps, request)?;
    let url = format!("{base_url}/responses");
    debug!(
        model = %caps.model_name,
        input_items = %body.input.len(),
        "sending responses-api request"
    );

    let wire = retry::with_deadline(
        request_timeout,
        retry::execute(retry_policy, &caps.model_name, |_| {
            send_once(client, &url, api_key, &body)
        }),
    )
    .await
    .map_err(Error::Upstream)?;

    let mut response = into_model_response(caps, wire)?;
    if let Some(note) = note {
        response
            .metadata
            .insert("temperature_note".to_string(), note.into());
    }
    Ok(response)
}

async fn send_once(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &ResponsesRequest,
) -> Result<ResponsesResponse, UpstreamError> {
    let response = client
        .post(url)
        .bearer_auth(api_key)
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

fn build_body(
    caps: &ModelCapabilities,
    request: &GenerateRequest,
) -> Result<(ResponsesRequest, Option<String>), Error> {
    if !request.images.is_empty() && !caps.supports_images {
        return Err(UpstreamError::InvalidArgument(format!(
            "{} does not accept image input",
            caps.model_name
        ))
        .into());
    }

    let mut content = vec![InputContent::InputText {
        text: request.prompt.clone(),
    }];
    for image in &request.images {
        let url = encode_image_data_url(image).map_err(Error::Upstream)?;
        content.push(InputContent::InputImage { image_url: url });
    }

    let (temperature, note) = resolve_temperature(caps, request.temperature);
    let reasoning = match (&request.thinking_mode, caps.supports_extended_thinking) {
        (Some(mode), true) => Some(Reasoning {
            effort: mode.effort(),
        }),
        _ => None,
    };

    let body = ResponsesRequest {
        model: caps.model_name.clone(),
        instructions: request.system_prompt.clone(),
        input: vec![InputItem {
            role: "user",
            content,
        }],
        reasoning,
        temperature,
        max_output_tokens: request.max_output_tokens,
        store: false,
    };
    Ok((body, note))
}

fn into_model_response(
    caps: &ModelCapabilities,
    wire: ResponsesResponse,
) -> Result<ModelResponse, Error> {
    let text: String = wire
        .output
        .iter()
        .filter_map(|item| match item {
            OutputItem::Message { content } => Some(
                content
                    .iter()
                    .filter_map(|c| match c {
                        OutputContent::OutputText { text } => Some(text.as_str()),
                        OutputContent::Other => None,
                    })
                    .collect::<Vec<_>>()
                    .join(""),
            ),
            OutputItem::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() && wire.output.is_empty() {
        return Err(UpstreamError::InvalidResponse("empty responses-api output".to_string()).into());
    }

    let mut reasoning_tokens = 0;
    let usage = match &wire.usage {
        Some(u) => {
            reasoning_tokens = u
                .output_tokens_details
                .as_ref()
                .map(|d| d.reasoning_tokens)
                .unwrap_or(0);
            Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
                total_tokens: u.total_tokens.max(u.input_tokens + u.output_tokens),
            }
        }
        None => Usage::new(0, proto::estimate_tokens(&text) as u32),
    };

    let mut response = ModelResponse::new(text, caps, usage);
    if reasoning_tokens > 0 {
        response
            .metadata
            .insert("reasoning_tokens".to_string(), reasoning_tokens.into());
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use proto::ThinkingMode;

    use super::*;

    fn responses_caps() -> ModelCapabilities {
        serde_json::from_value(serde_json::json!({
            "provider": "openai",
            "model_name": "gpt-5-pro",
            "context_window": 400000,
            "max_output_tokens": 272000,
            "supports_extended_thinking": true,
            "supports_temperature": false,
            "temperature_constraint": "fixed",
            "use_openai_responses_api": true,
        }))
        .expect("capabilities fixture")
    }

    #[test]
    fn build_body_wraps_prompt_under_input_items() {
        let caps = responses_caps();
        let mut request = GenerateRequest::new("gpt-5-pro", "prove it");
        request.system_prompt = Some("be rigorous".to_string());
        request.thinking_mode = Some(ThinkingMode::High);

        let (body, _) = build_body(&caps, &request).expect("body");
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["instructions"], "be rigorous");
        assert_eq!(json["input"][0]["role"], "user");
        assert_eq!(json["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(json["input"][0]["content"][0]["text"], "prove it");
        assert_eq!(json["reasoning"]["effort"], "high");
        assert_eq!(json["store"], false);
        // Fixed-temperature reasoning model: no temperature field at all.
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn build_body_skips_reasoning_without_thinking_support() {
        let mut caps = responses_caps();
        caps.supports_extended_thinking = false;
        let mut request = GenerateRequest::new("gpt-5-pro", "prove it");
        request.thinking_mode = Some(ThinkingMode::Max);

        let (body, _) = build_body(&caps, &request).expect("body");
        let json = serde_json::to_value(&body).expect("serialize");
        assert!(json.get("reasoning").is_none());
    }

    #[test]
    fn build_body_rejects_images_without_support() {
        let caps = responses_caps();
        let mut request = GenerateRequest::new("gpt-5-pro", "see");
        request.images = vec!["data:image/png;base64,AAAA".to_string()];
        assert!(build_body(&caps, &request).is_err());
    }

    #[test]
    fn parses_output_text_items() {
        let caps = responses_caps();
        let wire: ResponsesResponse = serde_json::from_value(serde_json::json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Hello"},
                    {"type": "output_text", "text": " world"}
                ]}
            ],
            "usage": {
                "input_tokens": 12, "output_tokens": 30, "total_tokens": 42,
                "output_tokens_details": {"reasoning_tokens": 18}
            }
        }))
        .expect("wire fixture");

        let response = into_model_response(&caps, wire).expect("normalize");
        assert_eq!(response.content, "Hello world");
        assert_eq!(response.usage.total_tokens, 42);
        assert_eq!(response.metadata["reasoning_tokens"], 18);
    }

    #[test]
    fn rejects_entirely_empty_output() {
        let caps = responses_caps();
        let wire: ResponsesResponse =
            serde_json::from_value(serde_json::json!({"output": []})).expect("wire fixture");
        assert!(into_model_response(&caps, wire).is_err());
    }

    #[test]
    fn estimates_usage_when_provider_sent_none() {
        let caps = responses_caps();
        let wire: ResponsesResponse = serde_json::from_value(serde_json::json!({
            "output": [{"type": "message", "content": [{"type": "output_text", "text": "abcd"}]}]
        }))
        .expect("wire fixture");
        let response = into_model_response(&caps, wire).expect("normalize");
        assert_eq!(response.usage.output_tokens, 1);
    }
}
