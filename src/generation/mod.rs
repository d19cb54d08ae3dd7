//! Tile generation backends and the claim/job flow.
//!
//! Pixels come from an external image model speaking a grid-generation
//! protocol, or from a deterministic local stub when no model service is
//! configured. The claim flow in [`jobs`] marks a cell PENDING synchronously
//! and runs the actual generation in a spawned task.

pub mod grid;
pub mod http;
pub mod jobs;

use bytes::Bytes;
use image::RgbaImage;

use crate::core::config::{GenerationConfig, GeneratorKind};
use crate::core::coords::TILE_SIZE;
use crate::core::error::{GenerationError, Result};
use crate::pyramid::compose::encode_webp;

pub use http::HttpGenerator;
pub use jobs::{ClaimOutcome, GenerationService, JobRegistry};

/// One tile generation request: the prompt, the seed, and the visual
/// context around the target cell.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// User prompt describing the desired content.
    pub prompt: String,
    /// Style name forwarded to the model.
    pub style: String,
    /// Negative prompt forwarded to the model.
    pub negative_prompt: String,
    /// Seed recorded with the result.
    pub seed: u64,
    /// The eight surrounding tiles in [`grid::NEIGHBOR_OFFSETS`] order.
    pub neighbors: [Option<Bytes>; 8],
    /// Current bytes of the target cell when regenerating in place.
    pub center: Option<Bytes>,
}

/// A generation backend.
#[derive(Debug)]
pub enum Generator {
    /// External image model service.
    Http(HttpGenerator),
    /// Deterministic local tiles; no model service required.
    Stub(StubGenerator),
}

impl Generator {
    /// Build the backend selected by configuration.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        Ok(match config.backend {
            GeneratorKind::Http => Generator::Http(HttpGenerator::new(config)?),
            GeneratorKind::Stub => Generator::Stub(StubGenerator),
        })
    }

    /// Produce the WebP bytes for one tile.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<Bytes> {
        let bytes = match self {
            Generator::Http(backend) => backend.generate(request).await?,
            Generator::Stub(backend) => backend.generate(request)?,
        };
        Ok(bytes)
    }
}

/// Seed-derived flat-color tiles. Keeps the server usable end to end with
/// no model endpoint and anchors the test suite.
#[derive(Debug, Default)]
pub struct StubGenerator;

impl StubGenerator {
    fn generate(&self, request: &GenerateRequest) -> std::result::Result<Bytes, GenerationError> {
        let seed = request.seed;
        let rgba = [
            (seed & 0xFF) as u8,
            ((seed >> 8) & 0xFF) as u8,
            ((seed >> 16) & 0xFF) as u8,
            255,
        ];
        let img = RgbaImage::from_pixel(TILE_SIZE, TILE_SIZE, image::Rgba(rgba));
        Ok(Bytes::from(encode_webp(&img)?))
    }
}
