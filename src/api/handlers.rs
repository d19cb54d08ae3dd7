//! HTTP request handlers for the tile map API.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::coords::TileCoord;
use crate::core::error::Result;
use crate::generation::{ClaimOutcome, GenerationService};
use crate::pyramid::compose::placeholder_tile;
use crate::pyramid::propagate::PyramidService;
use crate::storage::meta::TileStatus;
use crate::storage::tile_store::{MapId, TileKey, TileStore};
use crate::timeline::manifest::TimelineService;
use crate::timeline::tiles::TileService;

/// Shared application state, generic over the storage backend.
#[derive(Debug)]
pub struct AppState<S> {
    /// Loaded configuration.
    pub config: Arc<Config>,
    /// Tile storage and resolution.
    pub tiles: TileService<S>,
    /// Timeline manifest CRUD.
    pub timeline: TimelineService<S>,
    /// Parent pyramid maintenance.
    pub pyramid: PyramidService<S>,
    /// Generation claims and jobs.
    pub generation: GenerationService<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            tiles: self.tiles.clone(),
            timeline: self.timeline.clone(),
            pyramid: self.pyramid.clone(),
            generation: self.generation.clone(),
        }
    }
}

// Response types
#[derive(Serialize)]
pub struct TileMetaResponse {
    /// Effective status of the cell at the requested timeline position.
    pub status: TileStatus,
    /// Content hash, when the cell has content.
    pub hash: Option<String>,
    /// Timestamp of the answering record, epoch milliseconds.
    pub updated_at: Option<u64>,
    /// 1-based timeline position that answered; absent for baseline.
    pub source_index: Option<usize>,
}

#[derive(Serialize)]
pub struct TimelineNodeInfo {
    /// 1-based position.
    pub index: usize,
    /// Stable node id.
    pub id: String,
    /// Creation timestamp, epoch milliseconds.
    pub created_at: u64,
}

#[derive(Serialize)]
pub struct TimelineResponse {
    /// Manifest schema version.
    pub version: u32,
    /// Last mutation timestamp, epoch milliseconds.
    pub updated_at: u64,
    /// Nodes in timeline order.
    pub nodes: Vec<TimelineNodeInfo>,
}

#[derive(Serialize)]
pub struct InsertResponse {
    /// 1-based position of the new node.
    pub inserted_index: usize,
    /// Id of the new node.
    pub node_id: String,
}

#[derive(Serialize)]
pub struct DeleteNodeResponse {
    /// Id of the removed node.
    pub removed_id: String,
    /// Node count after the delete.
    pub remaining: usize,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    /// "claimed" or "already_pending".
    pub outcome: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    /// Always "healthy" when the server answers.
    pub status: String,
    /// Crate version.
    pub version: String,
}

#[derive(Deserialize)]
pub struct InsertRequest {
    /// 1-based position to insert after; defaults to the last node.
    pub after: Option<usize>,
}

#[derive(Deserialize)]
pub struct GenerateRequestBody {
    /// Prompt describing the desired tile content.
    pub prompt: String,
}

fn timeline_response(manifest: &crate::timeline::manifest::Manifest) -> TimelineResponse {
    TimelineResponse {
        version: manifest.version,
        updated_at: manifest.updated_at,
        nodes: manifest
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| TimelineNodeInfo {
                index: i + 1,
                id: node.id.clone(),
                created_at: node.created_at,
            })
            .collect(),
    }
}

// Tile handlers

/// Serve the effective tile image at a timeline position.
pub async fn tile_image<S: TileStore>(
    State(state): State<AppState<S>>,
    Path((map, index, z, x, y)): Path<(String, i64, u8, u32, u32)>,
    headers: HeaderMap,
) -> Result<Response> {
    let map = MapId::new(map)?;
    let coord = TileCoord::new(z, x, y)?;
    let context = state.timeline.resolve_context(&map, Some(index)).await?;

    let meta = state.tiles.resolve_effective_meta(&context, coord).await?;
    let etag = meta.hash.as_ref().map(|h| format!("\"{h}\""));

    if let (Some(etag), Some(candidate)) = (&etag, headers.get(header::IF_NONE_MATCH)) {
        if candidate.to_str().is_ok_and(|v| v == etag) {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    let bytes = state
        .tiles
        .resolve_effective_buffer(&context, coord)
        .await?
        .unwrap_or_else(placeholder_tile);

    // Ready tiles are content-addressed, so they can be cached forever; an
    // edit changes the hash and therefore the ETag.
    let cache_control = if meta.status == TileStatus::Ready {
        "public, max-age=31536000, immutable"
    } else {
        "no-cache"
    };

    let mut response = ([(header::CONTENT_TYPE, "image/webp")], bytes).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = cache_control.parse() {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Some(etag) = etag.and_then(|e| e.parse().ok()) {
        headers.insert(header::ETAG, etag);
    }
    Ok(response)
}

/// Report the effective status of a cell at a timeline position.
pub async fn tile_meta<S: TileStore>(
    State(state): State<AppState<S>>,
    Path((map, index, z, x, y)): Path<(String, i64, u8, u32, u32)>,
) -> Result<Json<TileMetaResponse>> {
    let map = MapId::new(map)?;
    let coord = TileCoord::new(z, x, y)?;
    let context = state.timeline.resolve_context(&map, Some(index)).await?;
    let meta = state.tiles.resolve_effective_meta(&context, coord).await?;
    Ok(Json(TileMetaResponse {
        status: meta.status,
        hash: meta.hash,
        updated_at: meta.updated_at,
        source_index: meta.source_index,
    }))
}

/// Tombstone a cell at the addressed timeline node and recompose its
/// ancestors.
pub async fn tile_delete<S: TileStore>(
    State(state): State<AppState<S>>,
    Path((map, index, z, x, y)): Path<(String, i64, u8, u32, u32)>,
) -> Result<StatusCode> {
    let map = MapId::new(map)?;
    let coord = TileCoord::new(z, x, y)?;
    let context = state.timeline.resolve_context(&map, Some(index)).await?;

    let key = TileKey::new(context.map.clone(), context.node_namespace(), coord);
    state.tiles.mark_tombstone(&key).await?;
    state.pyramid.propagate(&context, &[coord]).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Claim a leaf cell for generation; the tile lands asynchronously.
pub async fn tile_generate<S: TileStore>(
    State(state): State<AppState<S>>,
    Path((map, index, z, x, y)): Path<(String, i64, u8, u32, u32)>,
    Json(body): Json<GenerateRequestBody>,
) -> Result<(StatusCode, Json<GenerateResponse>)> {
    let map = MapId::new(map)?;
    let coord = TileCoord::new(z, x, y)?;
    let context = state.timeline.resolve_context(&map, Some(index)).await?;

    let outcome = state.generation.claim(&context, coord, body.prompt).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            outcome: match outcome {
                ClaimOutcome::Claimed => "claimed",
                ClaimOutcome::AlreadyPending => "already_pending",
            },
        }),
    ))
}

// Timeline handlers

/// List a map's timeline nodes, creating the default manifest on first
/// access.
pub async fn timeline_list<S: TileStore>(
    State(state): State<AppState<S>>,
    Path(map): Path<String>,
) -> Result<Json<TimelineResponse>> {
    let map = MapId::new(map)?;
    let manifest = state.timeline.get_or_create(&map).await?;
    Ok(Json(timeline_response(&manifest)))
}

/// Insert a new timeline node after the given position (default: append).
pub async fn timeline_insert<S: TileStore>(
    State(state): State<AppState<S>>,
    Path(map): Path<String>,
    Json(body): Json<InsertRequest>,
) -> Result<(StatusCode, Json<InsertResponse>)> {
    let map = MapId::new(map)?;
    let outcome = match body.after {
        Some(after) => state.timeline.insert_after(&map, after).await?,
        None => state.timeline.append(&map).await?,
    };
    Ok((
        StatusCode::CREATED,
        Json(InsertResponse {
            inserted_index: outcome.inserted_index,
            node_id: outcome.node.id,
        }),
    ))
}

/// Delete the timeline node at the given position.
pub async fn timeline_delete<S: TileStore>(
    State(state): State<AppState<S>>,
    Path((map, index)): Path<(String, usize)>,
) -> Result<Json<DeleteNodeResponse>> {
    let map = MapId::new(map)?;
    let outcome = state.timeline.delete_at(&map, index).await?;
    Ok(Json(DeleteNodeResponse {
        removed_id: outcome.removed.id,
        remaining: outcome.manifest.len(),
    }))
}

// System handlers

/// Liveness check.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
