//! Messages API client backing the description endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{config::DescribeSettings, domain::types::OutputFormat, infra::error::InfraError};

use super::provider::{DescribeError, DescriptionProvider, Descriptions, parse_descriptions, prompt};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const MESSAGES_PATH: &str = "/v1/messages";
const UPSTREAM_MESSAGE_LIMIT: usize = 512;

#[derive(Clone)]
pub struct AnthropicDescriber {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for AnthropicDescriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicDescriber")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl AnthropicDescriber {
    /// `None` when no API key is configured.
    pub fn from_settings(settings: &DescribeSettings) -> Result<Option<Self>, InfraError> {
        let Some(api_key) = settings.api_key.clone() else {
            return Ok(None);
        };

        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Some(Self {
            client,
            endpoint: endpoint(&settings.base_url),
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens.get(),
        }))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body<'a>(
        &'a self,
        prompt: &'a str,
        image_base64: &'a str,
        format: OutputFormat,
    ) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: format.content_type(),
                            data: image_base64,
                        },
                    },
                    ContentBlock::Text { text: prompt },
                ],
            }],
        }
    }
}

#[async_trait]
impl DescriptionProvider for AnthropicDescriber {
    async fn describe(
        &self,
        source: &str,
        image_base64: &str,
        format: OutputFormat,
    ) -> Result<Descriptions, DescribeError> {
        let prompt = prompt(source);
        let body = self.request_body(&prompt, image_base64, format);

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| DescribeError::Upstream {
                status: err.status().map(|status| status.as_u16()),
                message: err.to_string(),
            })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|err| DescribeError::Upstream {
            status: Some(status.as_u16()),
            message: err.to_string(),
        })?;

        if !status.is_success() {
            let message = upstream_message(status, &bytes);
            warn!(
                target = "tikzrender::describe::anthropic",
                status = status.as_u16(),
                error = %message,
                "Description request rejected"
            );
            return Err(DescribeError::Upstream {
                status: Some(status.as_u16()),
                message,
            });
        }

        let reply: MessagesResponse = serde_json::from_slice(&bytes)
            .map_err(|err| DescribeError::MalformedReply(err.to_string()))?;
        let text = reply.first_text().ok_or_else(|| {
            DescribeError::MalformedReply("reply has no text content".to_string())
        })?;

        debug!(
            target = "tikzrender::describe::anthropic",
            reply_chars = text.len(),
            "Description reply received"
        );

        parse_descriptions(text)
    }
}

fn user_agent() -> &'static str {
    concat!("tikzrender/", env!("CARGO_PKG_VERSION"))
}

fn endpoint(base_url: &str) -> String {
    format!("{}{MESSAGES_PATH}", base_url.trim_end_matches('/'))
}

fn upstream_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
        return envelope.error.message;
    }
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return format!("status {status}");
    }
    trimmed.chars().take(UPSTREAM_MESSAGE_LIMIT).collect()
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ReplyBlock>,
}

impl MessagesResponse {
    fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ReplyBlock::Text { text } => Some(text.as_str()),
            ReplyBlock::Other => None,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroU32, time::Duration};

    use serde_json::json;

    use super::*;

    fn settings(api_key: Option<&str>) -> DescribeSettings {
        DescribeSettings {
            api_key: api_key.map(str::to_string),
            base_url: "https://api.example.test/".to_string(),
            model: "test-model".to_string(),
            max_tokens: NonZeroU32::new(256).expect("non-zero"),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn missing_key_disables_provider() {
        let describer = AnthropicDescriber::from_settings(&settings(None)).expect("built");
        assert!(describer.is_none());
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let describer = AnthropicDescriber::from_settings(&settings(Some("key")))
            .expect("built")
            .expect("configured");
        assert_eq!(describer.endpoint(), "https://api.example.test/v1/messages");
    }

    #[test]
    fn request_carries_image_then_prompt() {
        let describer = AnthropicDescriber::from_settings(&settings(Some("key")))
            .expect("built")
            .expect("configured");
        let body = describer.request_body("describe it", "aGVsbG8=", OutputFormat::Png);
        let value = serde_json::to_value(&body).expect("serialize");

        assert_eq!(
            value,
            json!({
                "model": "test-model",
                "max_tokens": 256,
                "messages": [{
                    "role": "user",
                    "content": [
                        {
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": "image/png",
                                "data": "aGVsbG8="
                            }
                        },
                        { "type": "text", "text": "describe it" }
                    ]
                }]
            })
        );
    }

    #[test]
    fn svg_images_use_svg_media_type() {
        let describer = AnthropicDescriber::from_settings(&settings(Some("key")))
            .expect("built")
            .expect("configured");
        let body = describer.request_body("p", "PHN2Zz4=", OutputFormat::Svg);
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(
            value["messages"][0]["content"][0]["source"]["media_type"],
            "image/svg+xml"
        );
    }

    #[test]
    fn reply_text_skips_non_text_blocks() {
        let reply: MessagesResponse = serde_json::from_value(json!({
            "content": [
                { "type": "thinking", "thinking": "..." },
                { "type": "text", "text": "{\"altText\":\"a\",\"longDescription\":\"b\"}" }
            ]
        }))
        .expect("deserialize");
        assert_eq!(
            reply.first_text(),
            Some("{\"altText\":\"a\",\"longDescription\":\"b\"}")
        );
    }

    #[test]
    fn upstream_error_envelope_is_unwrapped() {
        let body = br#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(
            upstream_message(StatusCode::SERVICE_UNAVAILABLE, body),
            "Overloaded"
        );
        assert_eq!(
            upstream_message(StatusCode::BAD_GATEWAY, b"  "),
            "status 502 Bad Gateway"
        );
    }

    #[test]
    fn debug_output_hides_key() {
        let describer = AnthropicDescriber::from_settings(&settings(Some("sk-secret")))
            .expect("built")
            .expect("configured");
        assert!(!format!("{describer:?}").contains("sk-secret"));
    }
}
