//! Description provider seam and model-reply parsing.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{error::ValidationError, types::OutputFormat};

pub const MAX_ALT_TEXT_CHARS: usize = 150;
const ALT_TEXT_ELLIPSIS: &str = "...";

static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[\s\S]*\}").expect("static regex compiles"));

/// Short alt text plus a longer HTML description for one diagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptions {
    pub alt_text: String,
    pub long_description: String,
}

impl Descriptions {
    /// Plain-text body served to clients: alt text, blank line, long form.
    pub fn to_plain_text(&self) -> String {
        format!("{}\n\n{}", self.alt_text, self.long_description)
    }
}

#[derive(Debug, Clone, Error)]
pub enum DescribeError {
    #[error("description generation is not configured")]
    NotConfigured,
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("imageBase64 is not valid base64: {0}")]
    InvalidImage(String),
    #[error("description provider request failed: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },
    #[error("description provider reply could not be parsed: {0}")]
    MalformedReply(String),
}

impl DescribeError {
    pub fn code(&self) -> &'static str {
        match self {
            DescribeError::NotConfigured => "describe_unavailable",
            DescribeError::InvalidInput(_) => "invalid_input",
            DescribeError::Validation(err) => err.code(),
            DescribeError::InvalidImage(_) => "invalid_image",
            DescribeError::Upstream { .. } => "upstream_failed",
            DescribeError::MalformedReply(_) => "upstream_malformed",
        }
    }
}

#[async_trait]
pub trait DescriptionProvider: Send + Sync {
    async fn describe(
        &self,
        source: &str,
        image_base64: &str,
        format: OutputFormat,
    ) -> Result<Descriptions, DescribeError>;
}

/// Pull the first `{ ... }` span out of free-form model text and decode it.
/// The model may wrap the object in prose or a fenced block.
pub fn parse_descriptions(reply: &str) -> Result<Descriptions, DescribeError> {
    let object = JSON_OBJECT
        .find(reply)
        .ok_or_else(|| DescribeError::MalformedReply("no JSON object in reply".to_string()))?;

    let mut descriptions: Descriptions = serde_json::from_str(object.as_str())
        .map_err(|err| DescribeError::MalformedReply(err.to_string()))?;
    descriptions.alt_text = truncate_alt_text(&descriptions.alt_text);
    Ok(descriptions)
}

/// Alt text longer than the limit keeps its first `limit - 3` characters
/// followed by `...`.
pub fn truncate_alt_text(alt_text: &str) -> String {
    if alt_text.chars().count() <= MAX_ALT_TEXT_CHARS {
        return alt_text.to_string();
    }
    let keep = MAX_ALT_TEXT_CHARS - ALT_TEXT_ELLIPSIS.len();
    let mut truncated: String = alt_text.chars().take(keep).collect();
    truncated.push_str(ALT_TEXT_ELLIPSIS);
    truncated
}

/// Instructions sent with every image.
pub fn prompt(source: &str) -> String {
    format!(
        r#"You are an accessibility expert writing descriptions of TikZ diagrams for assessment content.

Given the TikZ LaTeX code and the rendered image, produce:
1. A short alt text (at most {MAX_ALT_TEXT_CHARS} characters) for the HTML alt attribute.
2. A longer HTML description for first year university students who use screen readers.

Principles:
- Be brief and focused on the data, text and most important visual components, most critical first.
- Use clear, objective, factual language without interpretation.
- Do not reveal answers or solutions the diagram may be testing.
- Start by naming the image type, e.g. "Bar graph showing..." or "Function plot on Cartesian axes with...".
- Use <p>, <strong>, <table>, <ul> and <ol> where they make the structure clearer.
- Include any text from the image verbatim.
- Describe directly; avoid phrases like "This is a diagram of".

Respond with exactly this JSON shape:
{{
  "altText": "short description here",
  "longDescription": "<p>Detailed HTML description here.</p>"
}}

TikZ code:
```latex
{source}
```"#
    )
}
