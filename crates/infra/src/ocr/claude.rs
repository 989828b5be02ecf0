//! Anthropic Messages API as the vision engine.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use winebox_label::StructuredLabel;

use super::image::LabelImage;
use super::{EngineError, VisionClient};
use crate::config::VisionConfig;

const API_VERSION: &str = "2023-06-01";

const EXTRACTION_PROMPT: &str = r#"You are reading the label of a single bottle of wine. The first image is the front label; a second image, if present, is the back label.

Reply with one JSON object and nothing else. Use null for anything the label does not show.

{
  "name": string,
  "winery": string,
  "vintage": integer year,
  "grape_variety": string (main grape),
  "region": string,
  "sub_region": string,
  "appellation": string,
  "country": string,
  "classification": string (e.g. "Grand Cru Classé", "DOCG", "Gran Reserva", "Spätlese"),
  "alcohol_percentage": number (13.5, not "13.5%"),
  "wine_type": one of "red", "white", "rose", "sparkling", "fortified", "dessert",
  "producer_type": one of "estate", "negociant", "cooperative",
  "drink_window": "YYYY-YYYY",
  "raw_text": all text on the front label, line breaks preserved,
  "back_label_text": all text on the back label
}"#;

/// Vision engine backed by Claude.
#[derive(Debug, Clone)]
pub struct ClaudeVisionClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeVisionClient {
    pub fn new(api_key: impl Into<String>, config: &VisionConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &VisionConfig) -> Option<Self> {
        if !config.has_credentials() {
            return None;
        }
        config.api_key.as_deref().map(|key| Self::new(key.trim(), config))
    }

    fn request_body<'a>(&'a self, images: &[&LabelImage]) -> MessagesRequest<'a> {
        let mut content: Vec<ContentBlock<'a>> = images
            .iter()
            .map(|image| ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: image.media_type,
                    data: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
                },
            })
            .collect();
        content.push(ContentBlock::Text {
            text: EXTRACTION_PROMPT,
        });

        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content,
            }],
        }
    }
}

#[async_trait]
impl VisionClient for ClaudeVisionClient {
    #[instrument(skip_all, fields(model = %self.model, back = back.is_some()), err)]
    async fn read_label(
        &self,
        front: &LabelImage,
        back: Option<&LabelImage>,
    ) -> Result<StructuredLabel, EngineError> {
        let mut images = vec![front];
        images.extend(back);
        let body = self.request_body(&images);

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(EngineError::Quota);
        }
        if !status.is_success() {
            return Err(EngineError::Http {
                status: status.as_u16(),
            });
        }

        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;
        debug!(stop_reason = ?reply.stop_reason, "vision reply received");

        let text = reply
            .content
            .iter()
            .find_map(|block| match block {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::Other => None,
            })
            .ok_or(EngineError::EmptyResponse)?;

        decode_label(text)
    }
}

/// Decode the model's answer, tolerating a Markdown code fence around it.
pub fn decode_label(text: &str) -> Result<StructuredLabel, EngineError> {
    let json = strip_code_fences(text);
    if json.is_empty() {
        return Err(EngineError::EmptyResponse);
    }
    let label: StructuredLabel =
        serde_json::from_str(json).map_err(|e| EngineError::MalformedResponse(e.to_string()))?;
    if label.is_empty() {
        return Err(EngineError::EmptyResponse);
    }
    Ok(label)
}

fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(start) = text.find("```") else {
        return text;
    };
    let body = &text[start + 3..];
    // Skip the info string ("json") up to the end of the fence line.
    let body = match body.find('\n') {
        Some(nl) if !body[..nl].contains('{') => &body[nl + 1..],
        _ => body,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
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
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock<'a> {
    Image { source: ImageSource },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_is_unwrapped() {
        let reply = "Here you go:\n```json\n{\"name\": \"Margaux\", \"vintage\": 2016}\n```\n";
        let label = decode_label(reply).unwrap();
        assert_eq!(label.name.as_deref(), Some("Margaux"));
        assert_eq!(label.vintage, Some(serde_json::json!(2016)));
    }

    #[test]
    fn bare_fence_and_plain_json_decode() {
        assert!(decode_label("```\n{\"winery\": \"Opus One\"}\n```").is_ok());
        assert!(decode_label("  {\"country\": \"France\"}  ").is_ok());
        assert!(decode_label("```{\"country\": \"France\"}```").is_ok());
    }

    #[test]
    fn prose_is_malformed() {
        assert!(matches!(
            decode_label("I cannot read this label."),
            Err(EngineError::MalformedResponse(_))
        ));
    }

    #[test]
    fn all_null_object_is_empty() {
        assert_eq!(
            decode_label(r#"{"name": null, "raw_text": "  "}"#),
            Err(EngineError::EmptyResponse)
        );
        assert_eq!(decode_label("```json\n```"), Err(EngineError::EmptyResponse));
    }

    #[test]
    fn request_carries_every_image_before_the_prompt() {
        let config = VisionConfig::default();
        let client = ClaudeVisionClient::new("key", &config);
        let front = LabelImage {
            bytes: vec![1, 2, 3],
            media_type: "image/png",
            width: 1,
            height: 1,
        };
        let back = LabelImage {
            media_type: "image/jpeg",
            ..front.clone()
        };

        let body = serde_json::to_value(client.request_body(&[&front, &back])).unwrap();
        let content = &body["messages"][0]["content"];
        assert_eq!(body["model"], config.model.as_str());
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["data"], "AQID");
        assert_eq!(content[1]["source"]["media_type"], "image/jpeg");
        assert_eq!(content[2]["type"], "text");
    }

    #[test]
    fn response_ignores_non_text_blocks() {
        let reply: MessagesResponse = serde_json::from_str(
            r#"{"content": [{"type": "thinking", "thinking": "..."}, {"type": "text", "text": "{}"}], "stop_reason": "end_turn"}"#,
        )
        .unwrap();
        assert!(matches!(reply.content[1], ResponseBlock::Text { .. }));
    }

    #[test]
    fn no_key_means_no_client() {
        assert!(ClaudeVisionClient::from_config(&VisionConfig::default()).is_none());
    }
}
