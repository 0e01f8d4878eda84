use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::render::QueueStats;
use crate::cache::CacheStats;

/// `POST /api/render` body. Fields stay untyped so a wrong JSON type reports
/// the same error as a missing field.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    #[serde(default)]
    pub tikz_code: Option<Value>,
    #[serde(default)]
    pub format: Option<Value>,
}

/// `POST /api/describe` body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRequest {
    #[serde(default)]
    pub tikz_code: Option<Value>,
    #[serde(default)]
    pub image_base64: Option<Value>,
    #[serde(default)]
    pub format: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue: QueueStats,
    pub cache: CacheStats,
    pub ai_descriptions: bool,
}
