//! HTTP client for the external image model service.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::config::GenerationConfig;
use crate::core::error::GenerationError;
use crate::generation::grid::{build_grid_png, extract_center_tile};
use crate::generation::GenerateRequest;

#[derive(Debug, Serialize)]
struct GenerateGridRequest<'a> {
    prompt: &'a str,
    style_name: &'a str,
    grid_png_base64: String,
    negative_prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateGridResponse {
    #[serde(default)]
    image_base64: Option<String>,
}

/// Client speaking the grid-generation protocol.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGenerator {
    /// Build a client against the configured endpoint.
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Send the 3x3 context grid to the model and return the generated
    /// center tile as WebP.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<Bytes, GenerationError> {
        let grid = build_grid_png(&request.neighbors, request.center.as_ref())?;
        debug!(
            prompt = %request.prompt,
            grid_bytes = grid.len(),
            "requesting tile generation"
        );

        let body = GenerateGridRequest {
            prompt: &request.prompt,
            style_name: &request.style,
            grid_png_base64: BASE64.encode(&grid),
            negative_prompt: &request.negative_prompt,
        };

        let response = self
            .client
            .post(format!("{}/v1/generate-grid", self.endpoint))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<GenerateGridResponse>()
            .await?;

        let encoded = response
            .image_base64
            .ok_or_else(|| GenerationError::EmptyResponse("image_base64 missing".to_string()))?;
        let image = BASE64
            .decode(encoded)
            .map_err(|e| GenerationError::InvalidImage(e.to_string()))?;
        extract_center_tile(&image)
    }
}
